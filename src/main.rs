mod backup;
mod changelog;
mod cli;
mod config;
mod error;
mod layout;
mod logging;
mod metadata;
mod migrate;
mod replace;
mod tree;

use anyhow::Result;

fn main() -> Result<()> {
    cli::run()
}
