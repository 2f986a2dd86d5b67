//! # blu-catalog
//!
//! Metadata catalog for blu-up backups.
//!
//! Three record families are persisted:
//!
//! - [`Inode`]: one row per scanned filesystem entry, per scan. Append-only.
//! - [`Blob`]: one row per distinct content hash per volume. This is the
//!   deduplication ledger.
//! - [`Volume`]: named backup destinations that blobs are grouped under.
//!
//! ## Storage Backend
//!
//! - `Catalog`: LMDB-backed with ACID transactions (see [`lmdb`])

pub mod lmdb;
mod os_path;

pub use lmdb::{Catalog, CatalogError, CatalogResult};

use std::fmt;
use std::path::PathBuf;

use blu_cas::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entry type of a scanned path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InodeKind {
    #[serde(rename = "f")]
    File,
    #[serde(rename = "d")]
    Directory,
    #[serde(rename = "l")]
    Symlink,
}

impl InodeKind {
    /// Single-letter tag used in listings.
    pub fn tag(self) -> &'static str {
        match self {
            InodeKind::File => "f",
            InodeKind::Directory => "d",
            InodeKind::Symlink => "l",
        }
    }
}

impl fmt::Display for InodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// How an inode's content was packed before hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    /// The whole directory was archived as a gzip-compressed tarball.
    #[serde(rename = "tar.gz")]
    TarGz,
}

impl Compression {
    pub fn tag(self) -> &'static str {
        match self {
            Compression::TarGz => "tar.gz",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Metadata for one scanned filesystem entry.
///
/// Exactly one of these holds: `hash` is present (regular file, or an
/// archived directory), the entry is a plain directory, or the entry is a
/// symlink with a `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inode {
    pub id: Uuid,
    pub kind: InodeKind,
    pub hash: Option<ContentHash>,
    pub compression: Option<Compression>,
    /// Absolute path at scan time
    #[serde(with = "os_path")]
    pub original_path: PathBuf,
    /// Link target, symlinks only
    #[serde(with = "os_path::option")]
    pub target: Option<PathBuf>,
    /// Size in bytes (archive size for packed directories)
    pub size: u64,
    pub user: Option<String>,
    pub group: Option<String>,
    /// Permission bits (e.g. 0o644)
    pub mode: u32,
    pub mod_time: DateTime<Utc>,
    pub scan_time: DateTime<Utc>,
}

/// The single stored copy of one content hash within one volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    pub hash: ContentHash,
    pub size: u64,
    pub volume_uuid: String,
    pub first_added: DateTime<Utc>,
}

impl Blob {
    pub fn new(hash: ContentHash, size: u64, volume_uuid: impl Into<String>) -> Self {
        Self {
            hash,
            size,
            volume_uuid: volume_uuid.into(),
            first_added: Utc::now(),
        }
    }
}

/// A named backup destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub uuid: String,
    pub name: String,
    pub description: String,
}

impl Volume {
    /// New volume with a random v4 UUID.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
        }
    }
}
