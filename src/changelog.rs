use anyhow::{Context, Result};
use std::{fs, path::Path};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// Ordered record of everything a migration run did, written next to the mod
/// as `<version>_update_log.txt`.
#[derive(Debug)]
pub struct ChangeLog {
    started_at: String,
    entries: Vec<LogEntry>,
}

impl ChangeLog {
    pub fn new() -> Self {
        let started_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown time".to_string());
        ChangeLog {
            started_at,
            entries: Vec::new(),
        }
    }

    pub fn info(&mut self, message: String) {
        self.push(LogLevel::Info, message);
    }

    pub fn warn(&mut self, message: String) {
        self.push(LogLevel::Warn, message);
    }

    pub fn error(&mut self, message: String) {
        self.push(LogLevel::Error, message);
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.level == level)
            .count()
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "xenomigrate v{} run started {}\n",
            env!("CARGO_PKG_VERSION"),
            self.started_at
        );
        for entry in &self.entries {
            out.push_str(&format!(
                "[{}] {}\n",
                log_level_label(entry.level),
                entry.message
            ));
        }
        out
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render())
            .with_context(|| format!("write change log {}", path.display()))
    }

    fn push(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
        self.entries.push(LogEntry { level, message });
    }
}

impl Default for ChangeLog {
    fn default() -> Self {
        ChangeLog::new()
    }
}

pub fn log_level_label(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "INFO",
        LogLevel::Warn => "WARN",
        LogLevel::Error => "ERROR",
    }
}
