use anyhow::{Context, Result};
use filetime::{set_file_mtime, FileTime};
use std::{
    fs,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// Replaces `dest` with a fresh copy of `source`. Returns the number of files copied.
pub fn replace_dir_with_copy(source: &Path, dest: &Path) -> Result<usize> {
    if dest.exists() {
        fs::remove_dir_all(dest)
            .with_context(|| format!("remove existing target {}", dest.display()))?;
    }
    fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;
    copy_dir(source, dest)
}

fn copy_dir(source: &Path, dest: &Path) -> Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk {}", source.display()))?;
        let rel = entry.path().strip_prefix(source).context("rel path")?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("create dir {}", target.display()))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create dir {}", parent.display()))?;
            }
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {}", entry.path().display()))?;
            // Timestamps are best effort.
            if let Ok(meta) = entry.metadata() {
                let mtime = FileTime::from_last_modification_time(&meta);
                if let Err(err) = set_file_mtime(&target, mtime) {
                    tracing::debug!("could not set mtime on {}: {err}", target.display());
                }
            }
            copied += 1;
        } else {
            tracing::debug!("skipping non-regular entry {}", entry.path().display());
        }
    }
    Ok(copied)
}

/// Regular files under `root`, sorted, without following symlinks.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}
