//! # blu-engine
//!
//! Backup and verify pipelines for blu-up.
//!
//! # Architecture
//!
//! ```text
//! backup:  Scanner → Inode Builder(s) → Saver/Deduplicator → Copier
//! verify:  Blob enumeration → Verifier → Repairer (with --fix)
//! ```
//!
//! Each stage runs on its own thread and talks to its neighbours through
//! bounded queues, so a slow stage throttles everything upstream of it.
//! The Scanner, Saver and Copier are single-instance: the Saver's
//! lookup-then-insert dedup check is only sound with one writer.

mod archive;
pub mod copier;
pub mod inode;
pub mod pipeline;
pub mod queue;
pub mod repair;
pub mod saver;
pub mod scan;
pub mod temp_files;
pub mod verify;

pub use copier::{CopyStats, Copier};
pub use inode::{BuildStats, BuiltInode, InodeBuilder};
pub use pipeline::{BackupReport, BackupRun, VerifyReport, VerifyRun};
pub use queue::{stage_queue, StageInput};
pub use repair::{RepairStats, Repaired, Repairer};
pub use saver::{CopyOrder, SaveStats, Saver};
pub use scan::{ScanRules, Scanner, Walk};
pub use temp_files::TempFiles;
pub use verify::{Mismatch, VerifyFailure, VerifyOrder, VerifyStats, Verifier};

use std::io;
use std::path::PathBuf;

use blu_cas::{CasError, ContentHash};
use blu_catalog::CatalogError;
use thiserror::Error;

/// Errors raised by pipeline stages and run setup.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Cas(#[from] CasError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("unsupported entry type ({kind}) at {}", .path.display())]
    UnsupportedEntry { path: PathBuf, kind: &'static str },

    #[error("size mismatch for {}: expected {expected} bytes, got {actual}", .path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("hash mismatch for {}: expected {expected}, got {actual}", .path.display())]
    HashMismatch {
        path: PathBuf,
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("backup source and destination are the same directory: {}", .0.display())]
    SameRoots(PathBuf),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("{0} stage panicked")]
    StagePanicked(&'static str),
}

impl EngineError {
    /// Content was read or written but did not match the expected size or
    /// hash, as opposed to an I/O failure reaching it.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            EngineError::SizeMismatch { .. }
                | EngineError::HashMismatch { .. }
                | EngineError::Cas(CasError::SizeMismatch { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
