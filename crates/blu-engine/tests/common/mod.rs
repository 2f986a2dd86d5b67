//! Shared fixture for engine integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use blu_catalog::{Catalog, Volume};
use blu_config::Config;
use blu_engine::{BackupReport, BackupRun, VerifyReport, VerifyRun};
use tempfile::{tempdir, TempDir};
use walkdir::WalkDir;

pub struct Fixture {
    pub dir: TempDir,
    pub source: PathBuf,
    pub store: PathBuf,
    pub staging: PathBuf,
    pub catalog: Catalog,
    pub volume: Volume,
    pub config: Config,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempdir().expect("Failed to create temp dir");
        let source = dir.path().join("source");
        let store = dir.path().join("store");
        let staging = dir.path().join("staging");
        fs::create_dir_all(&source).unwrap();

        let catalog = Catalog::open(dir.path().join("catalog")).expect("Failed to open catalog");
        let volume = Volume::new("offsite", "test volume");
        catalog.add_volume(&volume).unwrap();

        let mut config = Config::default();
        config.scan.temp_dir = Some(staging.clone());

        Self {
            dir,
            source,
            store,
            staging,
            catalog,
            volume,
            config,
        }
    }

    /// Write `content` to `rel` under the source tree, creating parents.
    pub fn write(&self, rel: &str, content: &[u8]) -> PathBuf {
        let path = self.source.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn backup(&self) -> BackupReport {
        BackupRun::new(&self.catalog, self.volume.clone(), &self.source, &self.store, &self.config)
            .expect("backup setup failed")
            .run()
            .expect("backup failed")
    }

    pub fn verify(&self, fix: bool) -> VerifyReport {
        VerifyRun::new(&self.catalog, self.volume.clone(), &self.store, &self.config, fix)
            .expect("verify setup failed")
            .run()
            .expect("verify failed")
    }

    pub fn inode_paths(&self) -> Vec<PathBuf> {
        self.catalog
            .inodes()
            .unwrap()
            .into_iter()
            .map(|i| i.original_path)
            .collect()
    }
}

/// Every regular file below `root`.
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}
