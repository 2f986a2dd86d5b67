//! Verifier: re-check every stored blob of a volume against the catalog.

use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

use blu_cas::{hash_file, BlobStore, ContentHash};
use blu_catalog::Catalog;
use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

use crate::queue::StageInput;
use crate::Result;

/// Expected state of one stored blob.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyOrder {
    pub hash: ContentHash,
    pub size: u64,
    pub path: PathBuf,
}

/// Why a stored blob failed verification.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyFailure {
    Missing,
    Unreadable(String),
    SizeMismatch { expected: u64, actual: u64 },
    HashMismatch { actual: ContentHash },
}

impl fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyFailure::Missing => f.write_str("file missing"),
            VerifyFailure::Unreadable(e) => write!(f, "unreadable: {e}"),
            VerifyFailure::SizeMismatch { expected, actual } => {
                write!(f, "size mismatch: expected {expected} bytes, found {actual}")
            }
            VerifyFailure::HashMismatch { actual } => write!(f, "hash mismatch: found {actual}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Mismatch {
    pub order: VerifyOrder,
    pub failure: VerifyFailure,
}

#[derive(Debug, Clone, Default)]
pub struct VerifyStats {
    pub blobs_checked: u64,
    pub mismatches: Vec<Mismatch>,
}

/// Queue a [`VerifyOrder`] for every blob row of `volume_uuid`.
///
/// The blob list is read up front so no read transaction stays open while
/// the queue applies backpressure.
pub fn enqueue_volume(
    catalog: &Catalog,
    store: &BlobStore,
    volume_uuid: &str,
    tx: Sender<VerifyOrder>,
) -> Result<u64> {
    let blobs = catalog.blobs_for_volume(volume_uuid)?;
    info!(volume = volume_uuid, blobs = blobs.len(), "Verifying volume");

    let mut sent = 0u64;
    for blob in blobs {
        let order = VerifyOrder {
            path: store.blob_path(&blob.hash),
            hash: blob.hash,
            size: blob.size,
        };
        if tx.send(order).is_err() {
            warn!("Verify queue closed early, stopping enumeration");
            break;
        }
        sent += 1;
    }
    Ok(sent)
}

/// Stat and rehash the stored file for `order`.
pub fn check_blob(order: &VerifyOrder) -> std::result::Result<(), VerifyFailure> {
    let meta = match fs::symlink_metadata(&order.path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(VerifyFailure::Missing),
        Err(e) => return Err(VerifyFailure::Unreadable(e.to_string())),
    };
    if !meta.is_file() {
        return Err(VerifyFailure::Unreadable("not a regular file".to_string()));
    }
    if meta.len() != order.size {
        return Err(VerifyFailure::SizeMismatch {
            expected: order.size,
            actual: meta.len(),
        });
    }

    let (actual, read) =
        hash_file(order.hash.algorithm(), &order.path).map_err(|e| VerifyFailure::Unreadable(e.to_string()))?;
    if read != order.size {
        return Err(VerifyFailure::SizeMismatch {
            expected: order.size,
            actual: read,
        });
    }
    if actual != order.hash {
        return Err(VerifyFailure::HashMismatch { actual });
    }
    Ok(())
}

/// Single consumer of the verify queue. Checks run strictly one at a time.
pub struct Verifier {
    input: StageInput<VerifyOrder>,
    repairs: Option<Sender<VerifyOrder>>,
}

impl Verifier {
    /// With `repairs` set, every mismatch is also forwarded there.
    pub fn new(input: StageInput<VerifyOrder>, repairs: Option<Sender<VerifyOrder>>) -> Self {
        Self { input, repairs }
    }

    pub fn run(mut self) -> VerifyStats {
        let mut stats = VerifyStats::default();
        for order in self.input.iter() {
            stats.blobs_checked += 1;
            let failure = match check_blob(&order) {
                Ok(()) => {
                    debug!(hash = %order.hash, "Blob ok");
                    continue;
                }
                Err(failure) => failure,
            };

            if self.repairs.is_some() {
                warn!(hash = %order.hash, path = %order.path.display(), %failure, "Blob failed verification");
            } else {
                error!(hash = %order.hash, path = %order.path.display(), %failure, "Blob failed verification");
            }

            let forwarded = match &self.repairs {
                Some(repairs) => repairs.send(order.clone()).is_ok(),
                None => true,
            };
            if !forwarded {
                warn!("Repair queue closed, reporting remaining mismatches only");
                self.repairs = None;
            }
            stats.mismatches.push(Mismatch { order, failure });
        }
        info!(
            checked = stats.blobs_checked,
            mismatched = stats.mismatches.len(),
            "Verifier finished"
        );
        stats
    }
}
