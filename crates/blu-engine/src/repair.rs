//! Repairer: restore damaged blobs from live files that still match.

use std::fs;
use std::path::{Path, PathBuf};

use blu_cas::{copy_exact, hash_file, ContentHash};
use blu_catalog::Catalog;
use tracing::{debug, error, info, warn};

use crate::queue::StageInput;
use crate::verify::VerifyOrder;

#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    pub hash: ContentHash,
    /// Live file the blob was restored from.
    pub source: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct RepairStats {
    pub repaired: Vec<Repaired>,
    pub unrepaired: Vec<ContentHash>,
}

pub struct Repairer<'a> {
    catalog: &'a Catalog,
    input: StageInput<VerifyOrder>,
}

impl<'a> Repairer<'a> {
    pub fn new(catalog: &'a Catalog, input: StageInput<VerifyOrder>) -> Self {
        Self { catalog, input }
    }

    pub fn run(self) -> RepairStats {
        let mut stats = RepairStats::default();
        for order in self.input.iter() {
            match self.repair(&order) {
                Some(source) => {
                    info!(hash = %order.hash, source = %source.display(), "Repaired blob");
                    stats.repaired.push(Repaired {
                        hash: order.hash,
                        source,
                    });
                }
                None => {
                    error!(hash = %order.hash, path = %order.path.display(), "Blob could not be repaired");
                    stats.unrepaired.push(order.hash);
                }
            }
        }
        info!(
            repaired = stats.repaired.len(),
            unrepaired = stats.unrepaired.len(),
            "Repairer finished"
        );
        stats
    }

    /// Try each candidate in catalog order; the first that still matches wins.
    pub fn repair(&self, order: &VerifyOrder) -> Option<PathBuf> {
        let candidates = match self.catalog.repair_candidates(&order.hash) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(hash = %order.hash, error = %e, "Failed to look up repair candidates");
                return None;
            }
        };
        debug!(hash = %order.hash, candidates = candidates.len(), "Looking for a live copy");

        for candidate in candidates {
            if !still_matches(&candidate, order) {
                continue;
            }
            match copy_exact(&candidate, &order.path, order.size) {
                Ok(_) => return Some(candidate),
                Err(e) => {
                    warn!(candidate = %candidate.display(), error = %e, "Repair copy failed");
                }
            }
        }
        None
    }
}

fn still_matches(candidate: &Path, order: &VerifyOrder) -> bool {
    match fs::symlink_metadata(candidate) {
        Ok(meta) if meta.is_file() && meta.len() == order.size => {}
        _ => {
            debug!(candidate = %candidate.display(), "Candidate missing or resized");
            return false;
        }
    }
    match hash_file(order.hash.algorithm(), candidate) {
        Ok((hash, read)) if read == order.size && hash == order.hash => true,
        Ok(_) => {
            debug!(candidate = %candidate.display(), "Candidate content changed since scan");
            false
        }
        Err(e) => {
            debug!(candidate = %candidate.display(), error = %e, "Candidate unreadable");
            false
        }
    }
}
