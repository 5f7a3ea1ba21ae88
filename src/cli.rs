use crate::{
    config::MigrationConfig,
    logging::{self, Verbosity},
    migrate::{self, MigrationReport},
};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, PartialEq, Eq)]
enum CliAction {
    Help,
    Version,
    Migrate(MigrateOptions),
}

#[derive(Debug, PartialEq, Eq)]
struct MigrateOptions {
    root: Option<PathBuf>,
    config: Option<PathBuf>,
    from_version: Option<String>,
    to_version: Option<String>,
    verbosity: Verbosity,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match parse_args(&args)? {
        CliAction::Help => {
            print_help();
            Ok(())
        }
        CliAction::Version => {
            println!("xenomigrate v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliAction::Migrate(options) => run_migrate(options),
    }
}

fn run_migrate(options: MigrateOptions) -> Result<()> {
    logging::init(options.verbosity)?;

    let root = match options.root.clone() {
        Some(root) => root,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let mut config = MigrationConfig::load(&root, options.config.as_deref())?;
    apply_overrides(&mut config, &options);

    let report = migrate::migrate(&root, &config)?;
    if options.verbosity != Verbosity::Quiet {
        print_summary(&root, &config, &report);
    }
    Ok(())
}

/// Command-line versions win over whatever the config file set.
fn apply_overrides(config: &mut MigrationConfig, options: &MigrateOptions) {
    if let Some(from) = &options.from_version {
        config.from_version = from.clone();
    }
    if let Some(to) = &options.to_version {
        config.to_version = to.clone();
    }
}

fn parse_args(args: &[String]) -> Result<CliAction> {
    let mut options = MigrateOptions {
        root: None,
        config: None,
        from_version: None,
        to_version: None,
        verbosity: Verbosity::Normal,
    };
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        if let Some((flag, value)) = arg.split_once('=') {
            if flag.starts_with("--") {
                apply_value(&mut options, flag, value.to_string())?;
                continue;
            }
        }
        match arg.as_str() {
            "--help" | "-h" | "help" => return Ok(CliAction::Help),
            "--version" | "-V" | "version" => return Ok(CliAction::Version),
            "--root" | "--config" | "--from" | "--to" | "--verbosity" => {
                let Some(value) = iter.next() else {
                    bail!("{arg} requires a value");
                };
                apply_value(&mut options, arg, value.to_string())?;
            }
            "-q" | "--quiet" => options.verbosity = Verbosity::Quiet,
            "--verbose" => options.verbosity = Verbosity::Verbose,
            _ if arg.starts_with("-v") && arg[1..].chars().all(|ch| ch == 'v') => {
                let count = arg.chars().filter(|ch| *ch == 'v').count();
                options.verbosity = if count >= 2 {
                    Verbosity::Debug
                } else {
                    Verbosity::Verbose
                };
            }
            _ if !arg.starts_with('-') && options.root.is_none() => {
                options.root = Some(PathBuf::from(arg));
            }
            _ => bail!("Unknown argument: {arg} (see --help)"),
        }
    }

    Ok(CliAction::Migrate(options))
}

fn apply_value(options: &mut MigrateOptions, flag: &str, value: String) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{flag} requires a value");
    }
    match flag {
        "--root" => options.root = Some(PathBuf::from(value)),
        "--config" => options.config = Some(PathBuf::from(value)),
        "--from" => options.from_version = Some(value),
        "--to" => options.to_version = Some(value),
        "--verbosity" => {
            let Some(level) = Verbosity::parse(&value) else {
                bail!("Unknown verbosity: {value}");
            };
            options.verbosity = level;
        }
        _ => bail!("Unknown argument: {flag} (see --help)"),
    }
    Ok(())
}

fn print_summary(root: &Path, config: &MigrationConfig, report: &MigrationReport) {
    println!(
        "Migrated {} -> {} in {}",
        config.from_version,
        config.to_version,
        root.display()
    );
    println!("  files copied:   {}", report.files_copied);
    println!(
        "  files patched:  {} ({} substitution(s))",
        report.files_patched, report.substitutions
    );
    if let Some(path) = &report.initial_backup {
        println!("  rollback:       {}", path.display());
    }
    println!("  backup:         {}", report.backup_archive.display());
    println!("  results:        {}", report.results_archive.display());
    println!("  log:            {}", report.log_path.display());
    if report.warnings > 0 {
        println!("  warnings:       {} (see log)", report.warnings);
    }
}

fn print_help() {
    println!("xenomigrate v{}", env!("CARGO_PKG_VERSION"));
    println!("Copies a RimWorld mod's version folder to the next version and patches its XML.");
    println!();
    println!("Usage:");
    println!("  xenomigrate [options] [mod-root]");
    println!();
    println!("Options:");
    println!("  --root <dir>                 Mod root (default: current directory)");
    println!("  --from <version>             Source version folder (default: 1.4)");
    println!("  --to <version>               Target version folder (default: 1.5)");
    println!("  --config <file>              JSON config (default: <root>/xenomigrate.json)");
    println!("  -q, --quiet                  Errors only");
    println!("  -v, -vv                      Increase verbosity");
    println!("  --verbosity <level>          quiet | normal | verbose | debug");
    println!("  -h, --help                   Show help");
    println!("  -V, --version                Show version");
}
