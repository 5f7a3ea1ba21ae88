use crate::{config::MigrationConfig, error::MigrateError};
use std::path::{Component, Path, PathBuf};

pub const INITIAL_BACKUP_NAME: &str = "backup.zip";
pub const ABOUT_FILE_NAME: &str = "About.xml";

/// Every path a migration run reads or writes, resolved against the mod root.
#[derive(Debug, Clone)]
pub struct ModPaths {
    pub root: PathBuf,
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub metadata_dir: PathBuf,
    pub about_xml: PathBuf,
    pub log_path: PathBuf,
    pub initial_backup: PathBuf,
}

impl ModPaths {
    pub fn resolve(root: &Path, config: &MigrationConfig) -> Result<Self, MigrateError> {
        let from = folder_name("from_version", &config.from_version)?;
        let to = folder_name("to_version", &config.to_version)?;
        let metadata = folder_name("metadata_dir", &config.metadata_dir)?;
        if from == to {
            return Err(MigrateError::SameVersion(config.to_version.clone()));
        }

        let source_dir = root.join(from);
        let dest_dir = root.join(to);
        let metadata_dir = root.join(metadata);
        // The target is wiped before copying, so it must not touch any input.
        for (what, name, other) in [
            ("source directory", from, &source_dir),
            ("metadata directory", metadata, &metadata_dir),
        ] {
            // Case-folded too: `about` and `About` are one folder on Windows.
            if overlaps(&dest_dir, other) || to.eq_ignore_ascii_case(name) {
                return Err(MigrateError::OverlappingTarget {
                    target: dest_dir,
                    what,
                    other: other.clone(),
                });
            }
        }

        Ok(ModPaths {
            root: root.to_path_buf(),
            source_dir,
            dest_dir,
            about_xml: metadata_dir.join(ABOUT_FILE_NAME),
            metadata_dir,
            log_path: root.join(format!("{}_update_log.txt", config.to_version)),
            initial_backup: root.join(INITIAL_BACKUP_NAME),
        })
    }

    /// Fails before anything is written when a required input directory is absent.
    pub fn validate(&self) -> Result<(), MigrateError> {
        if !self.source_dir.is_dir() {
            return Err(MigrateError::MissingDirectory {
                kind: "source version",
                path: self.source_dir.clone(),
            });
        }
        if !self.metadata_dir.is_dir() {
            return Err(MigrateError::MissingDirectory {
                kind: "metadata",
                path: self.metadata_dir.clone(),
            });
        }
        Ok(())
    }

    /// Inputs captured by the rollback and per-run backup archives.
    pub fn snapshot_inputs(&self) -> Vec<PathBuf> {
        vec![self.source_dir.clone(), self.metadata_dir.clone()]
    }

    /// Everything captured by the per-run results archive.
    pub fn result_inputs(&self) -> Vec<PathBuf> {
        vec![
            self.source_dir.clone(),
            self.metadata_dir.clone(),
            self.dest_dir.clone(),
            self.log_path.clone(),
        ]
    }

    pub fn display_relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Accepts a plain folder name: no separators, no `.`/`..`, nothing absolute.
fn folder_name<'a>(field: &'static str, name: &'a str) -> Result<&'a str, MigrateError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part.to_str() == Some(name) => Ok(name),
        _ => Err(MigrateError::InvalidFolderName {
            field,
            name: name.to_string(),
        }),
    }
}

fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}
