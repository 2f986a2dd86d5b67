//! Copier: moves new content into the store and checks it landed intact.

use std::fs;

use blu_cas::{copy_exact, hash_file};
use tracing::{debug, error, info, warn};

use crate::queue::StageInput;
use crate::saver::CopyOrder;
use crate::{EngineError, Result};

#[derive(Debug, Clone, Default)]
pub struct CopyStats {
    pub blobs_copied: u64,
    pub bytes_copied: u64,
    pub copy_failures: u64,
}

/// Single consumer of the copy queue.
pub struct Copier {
    input: StageInput<CopyOrder>,
}

impl Copier {
    pub fn new(input: StageInput<CopyOrder>) -> Self {
        Self { input }
    }

    pub fn run(self) -> CopyStats {
        let mut stats = CopyStats::default();
        for order in self.input {
            match copy_blob(&order) {
                Ok(bytes) => {
                    debug!(hash = %order.hash, dest = %order.dest.display(), bytes, "Copied blob");
                    stats.blobs_copied += 1;
                    stats.bytes_copied += bytes;
                }
                Err(e) if e.is_integrity_failure() => {
                    error!(
                        hash = %order.hash,
                        dest = %order.dest.display(),
                        error = %e,
                        "Stored blob failed integrity check"
                    );
                    stats.copy_failures += 1;
                }
                Err(e) => {
                    warn!(
                        hash = %order.hash,
                        source = %order.source.display(),
                        error = %e,
                        "Failed to store blob"
                    );
                    stats.copy_failures += 1;
                }
            }
        }
        info!(
            blobs = stats.blobs_copied,
            bytes = stats.bytes_copied,
            failed = stats.copy_failures,
            "Copier finished"
        );
        stats
    }
}

/// Copy one blob, then re-stat and re-hash the destination from disk.
pub fn copy_blob(order: &CopyOrder) -> Result<u64> {
    let written = copy_exact(&order.source, &order.dest, order.size)?;

    let on_disk = fs::symlink_metadata(&order.dest)?.len();
    if on_disk != order.size {
        return Err(EngineError::SizeMismatch {
            path: order.dest.clone(),
            expected: order.size,
            actual: on_disk,
        });
    }

    let (actual, read) = hash_file(order.hash.algorithm(), &order.dest)?;
    if read != order.size {
        return Err(EngineError::SizeMismatch {
            path: order.dest.clone(),
            expected: order.size,
            actual: read,
        });
    }
    if actual != order.hash {
        return Err(EngineError::HashMismatch {
            path: order.dest.clone(),
            expected: order.hash.clone(),
            actual,
        });
    }
    Ok(written)
}
