use anyhow::{Context, Result};
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use walkdir::WalkDir;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

const README_NAME: &str = "README.txt";
const README_TEXT: &str = "This is the initial backup zip file created for safety purposes.\n\
It holds the mod as it was before the first migration run. It is never overwritten.\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Backup,
    Results,
}

impl ArchiveKind {
    pub fn file_name(self, index: usize) -> String {
        match self {
            ArchiveKind::Backup => format!("backup rev {index:02}.zip"),
            ArchiveKind::Results => format!("results {index:02}.zip"),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ArchiveKind::Backup => "Backup",
            ArchiveKind::Results => "Results",
        }
    }
}

/// Writes `backup.zip` unless it already exists. Returns `None` when an
/// earlier run already produced it.
pub fn create_initial_backup(
    root: &Path,
    backup_path: &Path,
    inputs: &[PathBuf],
) -> Result<Option<PathBuf>> {
    if backup_path.exists() {
        return Ok(None);
    }
    write_archive(
        root,
        backup_path,
        inputs,
        &[(README_NAME, README_TEXT.as_bytes())],
    )
    .context("create initial backup")?;
    Ok(Some(backup_path.to_path_buf()))
}

/// Writes the next free numbered archive of `kind` and returns its path.
pub fn create_numbered_archive(
    root: &Path,
    kind: ArchiveKind,
    inputs: &[PathBuf],
) -> Result<PathBuf> {
    let path = next_archive_path(root, kind);
    write_archive(root, &path, inputs, &[])
        .with_context(|| format!("create {} archive", kind.label().to_lowercase()))?;
    Ok(path)
}

pub fn next_archive_path(root: &Path, kind: ArchiveKind) -> PathBuf {
    let mut index = 0;
    loop {
        let candidate = root.join(kind.file_name(index));
        if !candidate.exists() {
            return candidate;
        }
        index += 1;
    }
}

/// Zips each input (directory trees or single files) under its path relative
/// to `root`. Missing inputs are skipped. Returns the number of entries written.
fn write_archive(
    root: &Path,
    zip_path: &Path,
    inputs: &[PathBuf],
    extra: &[(&str, &[u8])],
) -> Result<usize> {
    let file_name = zip_path.file_name().context("archive file name")?;
    let mut temp_name = std::ffi::OsString::from(file_name);
    temp_name.push(".tmp");
    let temp_path = zip_path.with_file_name(temp_name);

    let file = fs::File::create(&temp_path)
        .with_context(|| format!("create {}", temp_path.display()))?;
    let result = fill_archive(file, root, inputs, extra).and_then(|written| {
        fs::rename(&temp_path, zip_path)
            .with_context(|| format!("finalize {}", zip_path.display()))?;
        Ok(written)
    });
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn fill_archive(
    file: fs::File,
    root: &Path,
    inputs: &[PathBuf],
    extra: &[(&str, &[u8])],
) -> Result<usize> {
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut written = 0;

    for input in inputs {
        if !input.exists() {
            tracing::debug!("archive input missing, skipped: {}", input.display());
            continue;
        }
        for entry in WalkDir::new(input).follow_links(false).sort_by_file_name() {
            let entry = entry.with_context(|| format!("walk {}", input.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = archive_name(root, entry.path())?;
            writer
                .start_file(name.as_str(), options)
                .with_context(|| format!("zip entry {name}"))?;
            let mut source = fs::File::open(entry.path())
                .with_context(|| format!("open {}", entry.path().display()))?;
            io::copy(&mut source, &mut writer)
                .with_context(|| format!("compress {}", entry.path().display()))?;
            written += 1;
        }
    }

    for (name, bytes) in extra {
        writer
            .start_file(*name, options)
            .with_context(|| format!("zip entry {name}"))?;
        writer.write_all(bytes).context("write zip entry")?;
        written += 1;
    }

    writer.finish().context("finalize zip")?;
    Ok(written)
}

fn archive_name(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
    Ok(rel
        .components()
        .map(|part| part.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}
