//! `blu-up verify`

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use blu_catalog::Catalog;
use blu_config::Config;
use blu_engine::VerifyRun;
use clap::Args;

use crate::store_root;

#[derive(Args)]
pub struct VerifyArgs {
    /// Content store root (defaults to storage.store_root)
    #[arg(short = 't', long = "to", value_name = "STORE")]
    pub to: Option<PathBuf>,

    /// Volume name or UUID
    #[arg(short = 'v', long = "vol", value_name = "VOLUME")]
    pub vol: String,

    /// Restore damaged blobs from live files that still match
    #[arg(short = 'f', long)]
    pub fix: bool,
}

pub fn run(catalog: &Catalog, config: &Config, args: VerifyArgs) -> Result<ExitCode> {
    let store = store_root(args.to, config)?;
    let volume = catalog
        .resolve_volume(&args.vol)?
        .with_context(|| format!("Volume not found: {}", args.vol))?;

    let report = VerifyRun::new(catalog, volume, &store, config, args.fix)
        .context("Verify setup failed")?
        .run()
        .context("Verify failed")?;

    println!();
    println!("  Verify complete");
    println!("    Blobs checked:   {}", report.blobs_checked);
    println!("    Mismatched:      {}", report.mismatches.len());
    for m in &report.mismatches {
        println!("      {}  {}", m.order.hash, m.failure);
    }
    if report.repair_enabled {
        println!("    Repaired:        {}", report.repaired.len());
        for r in &report.repaired {
            println!("      {}  <- {}", r.hash, r.source.display());
        }
        println!("    Unrepairable:    {}", report.unrepaired.len());
    }

    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
