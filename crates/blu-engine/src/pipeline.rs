//! Backup and verify runs.
//!
//! A run validates its inputs, spawns one named thread per stage inside a
//! [`std::thread::scope`], wires them with bounded queues and joins them.
//! Per-item failures stay inside the stages; only setup failures, catalog
//! enumeration failures and stage panics surface as errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::{Duration, Instant};

use blu_cas::{BlobStore, ContentHash, HashAlgorithm};
use blu_catalog::{Catalog, Volume};
use blu_config::{Config, PipelineConfig};
use tracing::{info, warn};

use crate::copier::{CopyStats, Copier};
use crate::inode::{BuildStats, InodeBuilder};
use crate::queue::stage_queue;
use crate::repair::{RepairStats, Repaired, Repairer};
use crate::saver::{SaveStats, Saver};
use crate::scan::{ScanRules, Scanner};
use crate::temp_files::TempFiles;
use crate::verify::{enqueue_volume, Mismatch, Verifier, VerifyStats};
use crate::{EngineError, Result};

/// Totals for one backup run.
#[derive(Debug, Clone, Default)]
pub struct BackupReport {
    pub paths_scanned: u64,
    pub inodes_built: u64,
    pub build_failures: u64,
    pub archives_created: u64,
    pub inodes_saved: u64,
    pub save_failures: u64,
    pub blobs_created: u64,
    pub blobs_deduplicated: u64,
    pub blobs_copied: u64,
    pub bytes_copied: u64,
    pub copy_failures: u64,
    pub temp_files_removed: usize,
    pub duration: Duration,
}

impl BackupReport {
    fn from_stages(scanned: u64, built: BuildStats, saved: SaveStats, copied: CopyStats) -> Self {
        Self {
            paths_scanned: scanned,
            inodes_built: built.inodes_built,
            build_failures: built.build_failures,
            archives_created: built.archives_created,
            inodes_saved: saved.inodes_saved,
            save_failures: saved.save_failures,
            blobs_created: saved.blobs_created,
            blobs_deduplicated: saved.blobs_deduplicated,
            blobs_copied: copied.blobs_copied,
            bytes_copied: copied.bytes_copied,
            copy_failures: copied.copy_failures,
            ..Self::default()
        }
    }

    /// Per-item failures across all stages.
    pub fn failures(&self) -> u64 {
        self.build_failures + self.save_failures + self.copy_failures
    }
}

/// A validated backup of one source tree into one volume.
pub struct BackupRun<'a> {
    catalog: &'a Catalog,
    volume: Volume,
    source: PathBuf,
    store: BlobStore,
    rules: ScanRules,
    algorithm: HashAlgorithm,
    pipeline: PipelineConfig,
    temp_dir: PathBuf,
    temp_files: Arc<TempFiles>,
}

impl<'a> BackupRun<'a> {
    /// Validate paths and settings. Creates the store root if needed.
    pub fn new(
        catalog: &'a Catalog,
        volume: Volume,
        source: &Path,
        store_root: &Path,
        config: &Config,
    ) -> Result<Self> {
        let source = source
            .canonicalize()
            .ok()
            .filter(|p| p.is_dir())
            .ok_or_else(|| EngineError::NotADirectory(source.to_path_buf()))?;

        let store = BlobStore::new(store_root)?;
        let store_root = store.root().canonicalize()?;
        if store_root == source {
            return Err(EngineError::SameRoots(source));
        }

        let algorithm: HashAlgorithm = config.hash.algorithm.parse()?;

        let mut rules = ScanRules::from_config(&config.scan);
        let temp_dir = config.scan.temp_dir();
        let internal = [Some(store_root), catalog.path().canonicalize().ok(), temp_dir.canonicalize().ok()];
        for path in internal.into_iter().flatten() {
            if path != source && path.starts_with(&source) {
                info!(path = %path.display(), "Excluding from scan");
                rules = rules.exclude(path);
            }
        }

        Ok(Self {
            catalog,
            volume,
            source,
            store,
            rules,
            algorithm,
            pipeline: config.pipeline.clone(),
            temp_dir,
            temp_files: Arc::new(TempFiles::new()),
        })
    }

    /// Collector of temporary files, for interrupt handlers.
    pub fn temp_files(&self) -> Arc<TempFiles> {
        Arc::clone(&self.temp_files)
    }

    /// Run every stage to completion. Temporary files are deleted before
    /// returning, whether or not the run succeeded.
    pub fn run(self) -> Result<BackupReport> {
        let started = Instant::now();
        info!(
            source = %self.source.display(),
            store = %self.store.root().display(),
            volume = %self.volume.name,
            algorithm = %self.algorithm,
            "Starting backup"
        );

        let result = self.run_stages();
        let removed = self.temp_files.cleanup();
        if let Err(e) = self.catalog.sync() {
            warn!(error = %e, "Failed to sync catalog");
        }

        let mut report = result?;
        report.temp_files_removed = removed;
        report.duration = started.elapsed();
        info!(
            paths = report.paths_scanned,
            new_blobs = report.blobs_created,
            deduplicated = report.blobs_deduplicated,
            bytes = report.bytes_copied,
            failures = report.failures(),
            elapsed_ms = report.duration.as_millis() as u64,
            "Backup finished"
        );
        Ok(report)
    }

    fn run_stages(&self) -> Result<BackupReport> {
        let (path_tx, path_rx) = crossbeam_channel::bounded(self.pipeline.path_queue.max(1));
        let (inode_tx, inode_input) = stage_queue(self.pipeline.inode_queue);
        let (copy_tx, copy_input) = stage_queue(self.pipeline.copy_queue);

        thread::scope(|s| -> Result<BackupReport> {
            let scanner = Scanner::new(&self.source, &self.rules, path_tx);
            let scan = spawn(s, "blu-scan".to_string(), move || scanner.run())?;

            let mut builders = Vec::new();
            for i in 0..self.pipeline.builders.max(1) {
                let builder = InodeBuilder::new(self.algorithm, &self.rules, &self.temp_dir, &self.temp_files);
                let (rx, tx) = (path_rx.clone(), inode_tx.clone());
                builders.push(spawn(s, format!("blu-build-{i}"), move || builder.run(rx, tx))?);
            }
            drop(path_rx);
            drop(inode_tx);

            let saver = Saver::new(self.catalog, &self.store, &self.volume.uuid, inode_input, copy_tx);
            let save = spawn(s, "blu-save".to_string(), move || saver.run())?;
            let copier = Copier::new(copy_input);
            let copy = spawn(s, "blu-copy".to_string(), move || copier.run())?;

            // Join everything before looking at results so no panicked
            // thread is left for the scope to re-raise.
            let scanned = join(scan, "scanner");
            let built: Vec<_> = builders.into_iter().map(|h| join(h, "inode builder")).collect();
            let saved = join(save, "saver");
            let copied = join(copy, "copier");

            let mut build_stats = BuildStats::default();
            for stats in built {
                build_stats.merge(&stats?);
            }
            Ok(BackupReport::from_stages(scanned?, build_stats, saved?, copied?))
        })
    }
}

/// Outcome of one verify run.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub blobs_checked: u64,
    pub mismatches: Vec<Mismatch>,
    pub repair_enabled: bool,
    pub repaired: Vec<Repaired>,
    pub unrepaired: Vec<ContentHash>,
    pub duration: Duration,
}

impl VerifyReport {
    fn from_stages(verified: VerifyStats, repaired: Option<RepairStats>) -> Self {
        let repair_enabled = repaired.is_some();
        let repaired = repaired.unwrap_or_default();
        Self {
            blobs_checked: verified.blobs_checked,
            mismatches: verified.mismatches,
            repair_enabled,
            repaired: repaired.repaired,
            unrepaired: repaired.unrepaired,
            duration: Duration::ZERO,
        }
    }

    /// Mismatches still outstanding after the run.
    pub fn unresolved(&self) -> usize {
        if self.repair_enabled {
            self.unrepaired.len()
        } else {
            self.mismatches.len()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.unresolved() == 0
    }
}

/// A validated verify (and optional repair) pass over one volume.
pub struct VerifyRun<'a> {
    catalog: &'a Catalog,
    volume: Volume,
    store: BlobStore,
    repair: bool,
    queue: usize,
}

impl<'a> VerifyRun<'a> {
    pub fn new(
        catalog: &'a Catalog,
        volume: Volume,
        store_root: &Path,
        config: &Config,
        repair: bool,
    ) -> Result<Self> {
        if !store_root.is_dir() {
            return Err(EngineError::NotADirectory(store_root.to_path_buf()));
        }
        Ok(Self {
            catalog,
            volume,
            store: BlobStore::new(store_root)?,
            repair,
            queue: config.pipeline.verify_queue,
        })
    }

    pub fn run(self) -> Result<VerifyReport> {
        let started = Instant::now();
        info!(
            store = %self.store.root().display(),
            volume = %self.volume.name,
            repair = self.repair,
            "Starting verify"
        );

        let (order_tx, order_input) = stage_queue(self.queue);
        let (repair_tx, repair_input) = if self.repair {
            let (tx, input) = stage_queue(self.queue);
            (Some(tx), Some(input))
        } else {
            (None, None)
        };

        let mut report = thread::scope(|s| -> Result<VerifyReport> {
            let enumerate = spawn(s, "blu-enumerate".to_string(), || {
                enqueue_volume(self.catalog, &self.store, &self.volume.uuid, order_tx)
            })?;
            let verifier = Verifier::new(order_input, repair_tx);
            let verify = spawn(s, "blu-verify".to_string(), move || verifier.run())?;
            let repair = match repair_input {
                Some(input) => {
                    let repairer = Repairer::new(self.catalog, input);
                    Some(spawn(s, "blu-repair".to_string(), move || repairer.run())?)
                }
                None => None,
            };

            let enumerated = join(enumerate, "blob enumeration");
            let verified = join(verify, "verifier");
            let repaired = repair.map(|h| join(h, "repairer")).transpose();

            enumerated??;
            Ok(VerifyReport::from_stages(verified?, repaired?))
        })?;

        report.duration = started.elapsed();
        info!(
            checked = report.blobs_checked,
            mismatched = report.mismatches.len(),
            repaired = report.repaired.len(),
            unresolved = report.unresolved(),
            "Verify finished"
        );
        Ok(report)
    }
}

fn spawn<'scope, 'env, T, F>(
    scope: &'scope Scope<'scope, 'env>,
    name: String,
    f: F,
) -> Result<ScopedJoinHandle<'scope, T>>
where
    F: FnOnce() -> T + Send + 'scope,
    T: Send + 'scope,
{
    Ok(thread::Builder::new().name(name).spawn_scoped(scope, f)?)
}

fn join<T>(handle: ScopedJoinHandle<'_, T>, stage: &'static str) -> Result<T> {
    handle.join().map_err(|_| EngineError::StagePanicked(stage))
}
