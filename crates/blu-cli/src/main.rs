//! # blu-up CLI
//!
//! Command-line interface for deduplicating backups.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use blu_catalog::Catalog;
use blu_config::logging::{init_logging, LogLevel};
use blu_config::{expand_home, Config};
use clap::{Parser, Subcommand};

mod backup;
mod verify;
mod volume;

/// blu-up - deduplicating, content-addressed backups
#[derive(Parser)]
#[command(name = "blu-up")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Catalog directory (overrides config and BLU_DB)
    #[arg(long, global = true, value_name = "DIR")]
    db: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty catalog
    Init {
        /// Catalog directory (defaults to --db or storage.database)
        #[arg(value_name = "DB")]
        path: Option<PathBuf>,
    },

    /// Manage backup volumes
    #[command(visible_alias = "vol")]
    Volume {
        #[command(subcommand)]
        command: volume::VolumeCommands,
    },

    /// Back up a directory into a content store
    Backup(backup::BackupArgs),

    /// Check stored blobs against the catalog, optionally repairing them
    Verify(verify::VerifyArgs),

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Print version information
    Version,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(if cli.debug { LogLevel::Debug } else { LogLevel::Info });

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(db) = &cli.db {
        config.storage.database = expand_home(db);
    }

    match cli.command {
        Commands::Init { path } => {
            let path = path.as_deref().map(expand_home).unwrap_or_else(|| config.storage.database.clone());
            Catalog::open(&path).with_context(|| format!("Failed to create catalog at {}", path.display()))?;
            println!("Initialized catalog at {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Volume { command } => {
            let catalog = open_catalog(&config.storage.database)?;
            volume::run(&catalog, command)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Backup(args) => {
            let catalog = open_catalog(&config.storage.database)?;
            backup::run(&catalog, &config, args)
        }
        Commands::Verify(args) => {
            let catalog = open_catalog(&config.storage.database)?;
            verify::run(&catalog, &config, args)
        }
        Commands::Config {
            command: ConfigCommands::Show,
        } => {
            print!("{}", config.to_toml().context("Failed to render configuration")?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Version => {
            println!("blu-up {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_catalog(path: &Path) -> Result<Catalog> {
    Catalog::open_existing(path).with_context(|| {
        format!(
            "Failed to open catalog at {} (run `blu-up init` first)",
            path.display()
        )
    })
}

/// Resolve the store root from `--to` or `storage.store_root`.
fn store_root(to: Option<PathBuf>, config: &Config) -> Result<PathBuf> {
    to.or_else(|| config.storage.store_root.clone())
        .map(|p| expand_home(&p))
        .context("No content store given: pass --to or set storage.store_root")
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
    }

    #[test]
    fn test_backup_short_flags() {
        let cli = Cli::try_parse_from(["blu-up", "backup", "-f", "/src", "-t", "/store", "-v", "home"]).unwrap();
        match cli.command {
            Commands::Backup(args) => {
                assert_eq!(args.from, PathBuf::from("/src"));
                assert_eq!(args.to, Some(PathBuf::from("/store")));
                assert_eq!(args.vol, "home");
            }
            _ => panic!("expected backup"),
        }
    }

    #[test]
    fn test_verify_short_fix_flag() {
        let cli = Cli::try_parse_from(["blu-up", "verify", "-t", "/store", "-v", "home", "-f"]).unwrap();
        match cli.command {
            Commands::Verify(args) => {
                assert!(args.fix);
                assert_eq!(args.vol, "home");
            }
            _ => panic!("expected verify"),
        }
    }

    #[test]
    fn test_store_root_falls_back_to_config() {
        let mut config = Config::default();
        assert!(store_root(None, &config).is_err());
        config.storage.store_root = Some(PathBuf::from("/mnt/store"));
        assert_eq!(store_root(None, &config).unwrap(), PathBuf::from("/mnt/store"));
        assert_eq!(
            store_root(Some(PathBuf::from("/other")), &config).unwrap(),
            PathBuf::from("/other")
        );
    }
}
