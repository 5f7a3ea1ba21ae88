use crate::error::MigrateError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

pub const CONFIG_FILE_NAME: &str = "xenomigrate.json";
pub const DEFAULT_FROM_VERSION: &str = "1.4";
pub const DEFAULT_TO_VERSION: &str = "1.5";

const RESEARCH_PREREQUISITE_PATTERN: &str =
    r"[ \t]*<researchPrerequisite>[^<]*</researchPrerequisite>[ \t]*(?:\r?\n)?";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplacementRule {
    Literal {
        find: String,
        replace: String,
    },
    Pattern {
        pattern: String,
        #[serde(default)]
        replace: String,
        #[serde(default)]
        label: Option<String>,
    },
}

impl ReplacementRule {
    pub fn literal(find: &str, replace: &str) -> Self {
        ReplacementRule::Literal {
            find: find.to_string(),
            replace: replace.to_string(),
        }
    }

    pub fn removal(pattern: &str, label: &str) -> Self {
        ReplacementRule::Pattern {
            pattern: pattern.to_string(),
            replace: String::new(),
            label: Some(label.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub from_version: String,
    pub to_version: String,
    pub metadata_dir: String,
    pub extensions: Vec<String>,
    pub replacements: Vec<ReplacementRule>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        MigrationConfig {
            from_version: DEFAULT_FROM_VERSION.to_string(),
            to_version: DEFAULT_TO_VERSION.to_string(),
            metadata_dir: "About".to_string(),
            extensions: vec!["xml".to_string()],
            replacements: default_replacements(),
        }
    }
}

impl MigrationConfig {
    /// Loads `explicit` if given, otherwise `<root>/xenomigrate.json` when it
    /// exists, otherwise the built-in 1.4 -> 1.5 defaults.
    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let candidate = root.join(CONFIG_FILE_NAME);
                if !candidate.is_file() {
                    tracing::debug!("no {CONFIG_FILE_NAME} in {}; using defaults", root.display());
                    return Ok(MigrationConfig::default());
                }
                candidate
            }
        };

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: MigrationConfig = serde_json::from_str(&raw).map_err(|err| {
            MigrateError::InvalidConfig {
                path: path.clone(),
                message: err.to_string(),
            }
        })?;
        config.validate(&path)?;
        tracing::info!("loaded config {}", path.display());
        Ok(config)
    }

    pub fn matches_extension(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().map(|ext| ext.to_string_lossy()) else {
            return false;
        };
        self.extensions
            .iter()
            .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    }

    fn validate(&self, path: &Path) -> Result<(), MigrateError> {
        let invalid = |message: &str| MigrateError::InvalidConfig {
            path: path.to_path_buf(),
            message: message.to_string(),
        };
        if self.from_version.trim().is_empty() || self.to_version.trim().is_empty() {
            return Err(invalid("version names must not be empty"));
        }
        if self.metadata_dir.trim().is_empty() {
            return Err(invalid("metadata_dir must not be empty"));
        }
        for rule in &self.replacements {
            if let ReplacementRule::Literal { find, .. } = rule {
                if find.is_empty() {
                    return Err(invalid("literal replacement with empty find text"));
                }
            }
        }
        Ok(())
    }
}

fn default_replacements() -> Vec<ReplacementRule> {
    vec![
        ReplacementRule::literal("<renderNodeProperties>", "<graphicData>"),
        ReplacementRule::literal("</renderNodeProperties>", "</graphicData>"),
        ReplacementRule::literal("<layer>80</layer>", "<layer>PostHeadgear</layer>"),
        ReplacementRule::literal(
            "<drawNorthAfterHair>false</drawNorthAfterHair>",
            "<drawNorthAfterHair>true</drawNorthAfterHair>",
        ),
        ReplacementRule::removal(RESEARCH_PREREQUISITE_PATTERN, "researchPrerequisite"),
    ]
}
