use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("missing {kind} directory: {}", path.display())]
    MissingDirectory { kind: &'static str, path: PathBuf },
    #[error("source and target version are both {0}")]
    SameVersion(String),
    #[error("{field} must be a single folder name under the mod root, got {name:?}")]
    InvalidFolderName { field: &'static str, name: String },
    #[error("target {} overlaps {what} {}", target.display(), other.display())]
    OverlappingTarget {
        target: PathBuf,
        what: &'static str,
        other: PathBuf,
    },
    #[error("invalid replacement pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid config {}: {message}", path.display())]
    InvalidConfig { path: PathBuf, message: String },
}
