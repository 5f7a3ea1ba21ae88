use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    Debug,
}

impl Verbosity {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "quiet" | "minimal" => Some(Verbosity::Quiet),
            "normal" | "info" => Some(Verbosity::Normal),
            "verbose" => Some(Verbosity::Verbose),
            "debug" | "trace" => Some(Verbosity::Debug),
            _ => None,
        }
    }

    fn default_filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose => "info",
            Verbosity::Debug => "debug",
        }
    }
}

/// Installs the stderr diagnostics subscriber. `RUST_LOG` wins over `verbosity`.
pub fn init(verbosity: Verbosity) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("install log subscriber: {err}"))
}
