//! `blu-up backup`

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use blu_catalog::Catalog;
use blu_config::Config;
use blu_engine::{BackupRun, TempFiles};
use clap::Args;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::warn;

use crate::{format_bytes, store_root};

#[derive(Args)]
pub struct BackupArgs {
    /// Directory to back up
    #[arg(short = 'f', long = "from", value_name = "DIR")]
    pub from: PathBuf,

    /// Content store root (defaults to storage.store_root)
    #[arg(short = 't', long = "to", value_name = "STORE")]
    pub to: Option<PathBuf>,

    /// Volume name or UUID
    #[arg(short = 'v', long = "vol", value_name = "VOLUME")]
    pub vol: String,
}

pub fn run(catalog: &Catalog, config: &Config, args: BackupArgs) -> Result<ExitCode> {
    let store = store_root(args.to, config)?;
    let volume = catalog
        .resolve_volume(&args.vol)?
        .with_context(|| format!("Volume not found: {}", args.vol))?;

    let run = BackupRun::new(catalog, volume, &args.from, &store, config).context("Backup setup failed")?;
    cleanup_on_signal(run.temp_files())?;

    let report = run.run().context("Backup failed")?;

    println!();
    println!("  Backup complete");
    println!("    Paths scanned:   {}", report.paths_scanned);
    println!("    Inodes saved:    {}", report.inodes_saved);
    println!("    New blobs:       {} ({})", report.blobs_copied, format_bytes(report.bytes_copied));
    println!("    Deduplicated:    {}", report.blobs_deduplicated);
    if report.failures() > 0 {
        println!("    Skipped/failed:  {} (see log)", report.failures());
    }
    println!("    Time:            {:.2}s", report.duration.as_secs_f64());
    Ok(ExitCode::SUCCESS)
}

/// Delete pending temporary files and exit on SIGINT/SIGTERM.
fn cleanup_on_signal(temp_files: Arc<TempFiles>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handler")?;
    thread::Builder::new()
        .name("blu-signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                warn!(signal, "Interrupted, deleting temporary files");
                temp_files.cleanup();
                std::process::exit(130);
            }
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}
