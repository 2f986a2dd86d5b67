//! Metadata Saver / Deduplicator.
//!
//! Persists every inode, then decides whether its content needs copying.
//! Must run as a single instance: the blob lookup and the blob insert are
//! separate steps, and two savers could both miss the same hash.

use std::path::PathBuf;

use blu_cas::{BlobStore, ContentHash};
use blu_catalog::{Blob, Catalog};
use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::inode::BuiltInode;
use crate::queue::StageInput;

/// One blob's worth of bytes to put into the content store.
#[derive(Debug, Clone)]
pub struct CopyOrder {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub size: u64,
    pub hash: ContentHash,
}

#[derive(Debug, Clone, Default)]
pub struct SaveStats {
    pub inodes_saved: u64,
    pub save_failures: u64,
    pub blobs_created: u64,
    pub blobs_deduplicated: u64,
}

pub struct Saver<'a> {
    catalog: &'a Catalog,
    store: &'a BlobStore,
    volume_uuid: &'a str,
    input: StageInput<BuiltInode>,
    copies: Sender<CopyOrder>,
}

impl<'a> Saver<'a> {
    pub fn new(
        catalog: &'a Catalog,
        store: &'a BlobStore,
        volume_uuid: &'a str,
        input: StageInput<BuiltInode>,
        copies: Sender<CopyOrder>,
    ) -> Self {
        Self {
            catalog,
            store,
            volume_uuid,
            input,
            copies,
        }
    }

    /// Drain the inode queue. Dropping `self` at the end closes the copy queue.
    pub fn run(self) -> SaveStats {
        let mut stats = SaveStats::default();
        for built in self.input.iter() {
            let Some(order) = self.save(built, &mut stats) else {
                continue;
            };
            if self.copies.send(order).is_err() {
                warn!("Copy queue closed early, stopping saver");
                break;
            }
        }
        info!(
            inodes = stats.inodes_saved,
            new_blobs = stats.blobs_created,
            deduplicated = stats.blobs_deduplicated,
            failed = stats.save_failures,
            "Saver finished"
        );
        stats
    }

    /// Persist one inode and return the copy it needs, if any.
    fn save(&self, built: BuiltInode, stats: &mut SaveStats) -> Option<CopyOrder> {
        let BuiltInode { inode, source } = built;
        if let Err(e) = self.catalog.insert_inode(&inode) {
            warn!(path = %inode.original_path.display(), error = %e, "Failed to save inode");
            stats.save_failures += 1;
            return None;
        }
        stats.inodes_saved += 1;

        let (Some(hash), Some(source)) = (inode.hash, source) else {
            return None;
        };

        match self.catalog.find_blob(&hash, self.volume_uuid) {
            Ok(Some(_)) => {
                debug!(path = %inode.original_path.display(), hash = %hash, "Content already stored");
                stats.blobs_deduplicated += 1;
                return None;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(hash = %hash, error = %e, "Blob lookup failed");
                stats.save_failures += 1;
                return None;
            }
        }

        let blob = Blob::new(hash.clone(), inode.size, self.volume_uuid);
        match self.catalog.insert_blob(&blob) {
            Ok(true) => {}
            Ok(false) => {
                debug!(hash = %hash, "Blob appeared since lookup");
                stats.blobs_deduplicated += 1;
                return None;
            }
            Err(e) => {
                warn!(hash = %hash, error = %e, "Failed to save blob");
                stats.save_failures += 1;
                return None;
            }
        }
        stats.blobs_created += 1;

        Some(CopyOrder {
            source,
            dest: self.store.blob_path(&hash),
            size: blob.size,
            hash,
        })
    }
}
