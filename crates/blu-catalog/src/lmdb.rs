//! LMDB-backed catalog for persistent, crash-safe backup metadata.
//!
//! Named databases inside one environment:
//!
//! - `inodes`: inode UUID → [`Inode`]
//! - `file_paths`: `hash NUL original_path` → unit, the repair index
//! - `blobs`: `volume_uuid/hash` → [`Blob`]
//! - `volumes`: uuid → [`Volume`]
//! - `volume_names`: name → uuid

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use blu_cas::ContentHash;
use heed::types::{Bytes, SerdeBincode, Str, Unit};
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use thiserror::Error;
use tracing::debug;

use crate::{Blob, Inode, InodeKind, Volume};

/// Catalog errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("LMDB error: {0}")]
    Heed(#[from] heed::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog not initialized at {}", .0.display())]
    NotInitialized(PathBuf),

    #[error("volume already exists: {0}")]
    VolumeExists(String),

    #[error("volume not found: {0}")]
    VolumeNotFound(String),
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// LMDB-backed backup catalog.
///
/// Readers never block; all writes go through short write transactions,
/// which LMDB serializes.
pub struct Catalog {
    env: Env,
    inodes_db: Database<Bytes, SerdeBincode<Inode>>,
    file_paths_db: Database<Bytes, Unit>,
    blobs_db: Database<Str, SerdeBincode<Blob>>,
    volumes_db: Database<Str, SerdeBincode<Volume>>,
    volume_names_db: Database<Str, Str>,
    path: PathBuf,
}

impl Catalog {
    /// Default LMDB map size: 1GB (expandable)
    const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;

    /// Maximum readers
    const MAX_READERS: u32 = 128;

    const MAX_DBS: u32 = 5;

    /// Open or create a catalog in the directory `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> CatalogResult<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(Self::DEFAULT_MAP_SIZE)
                .max_readers(Self::MAX_READERS)
                .max_dbs(Self::MAX_DBS)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let inodes_db = env.create_database(&mut wtxn, Some("inodes"))?;
        let file_paths_db = env.create_database(&mut wtxn, Some("file_paths"))?;
        let blobs_db = env.create_database(&mut wtxn, Some("blobs"))?;
        let volumes_db = env.create_database(&mut wtxn, Some("volumes"))?;
        let volume_names_db = env.create_database(&mut wtxn, Some("volume_names"))?;
        wtxn.commit()?;

        debug!(path = %path.display(), "Opened catalog");

        Ok(Self {
            env,
            inodes_db,
            file_paths_db,
            blobs_db,
            volumes_db,
            volume_names_db,
            path: path.to_path_buf(),
        })
    }

    /// Open a catalog that `init` has already created.
    pub fn open_existing<P: AsRef<Path>>(path: P) -> CatalogResult<Self> {
        let path = path.as_ref();
        if !path.join("data.mdb").is_file() {
            return Err(CatalogError::NotInitialized(path.to_path_buf()));
        }
        Self::open(path)
    }

    /// Directory holding the LMDB files.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // Inodes
    // ========================================================================

    /// Persist one inode record. File inodes with a hash are also added to
    /// the repair index.
    pub fn insert_inode(&self, inode: &Inode) -> CatalogResult<()> {
        let mut wtxn = self.env.write_txn()?;
        self.inodes_db.put(&mut wtxn, inode.id.as_bytes(), inode)?;
        if inode.kind == InodeKind::File {
            if let Some(hash) = &inode.hash {
                let key = file_path_key(hash, &inode.original_path);
                self.file_paths_db.put(&mut wtxn, &key, &())?;
            }
        }
        wtxn.commit()?;
        Ok(())
    }

    pub fn inode_count(&self) -> CatalogResult<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.inodes_db.len(&rtxn)?)
    }

    /// All inode records, in id order.
    pub fn inodes(&self) -> CatalogResult<Vec<Inode>> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for item in self.inodes_db.iter(&rtxn)? {
            let (_, inode) = item?;
            out.push(inode);
        }
        Ok(out)
    }

    /// Distinct original paths ever recorded as a regular file with `hash`.
    pub fn repair_candidates(&self, hash: &ContentHash) -> CatalogResult<Vec<PathBuf>> {
        let prefix = file_path_prefix(hash);
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for item in self.file_paths_db.prefix_iter(&rtxn, &prefix)? {
            let (key, ()) = item?;
            out.push(PathBuf::from(OsStr::from_bytes(&key[prefix.len()..])));
        }
        Ok(out)
    }

    // ========================================================================
    // Blobs
    // ========================================================================

    /// Look up the blob for `hash` in `volume_uuid`. Absence is `Ok(None)`.
    pub fn find_blob(&self, hash: &ContentHash, volume_uuid: &str) -> CatalogResult<Option<Blob>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.blobs_db.get(&rtxn, &blob_key(volume_uuid, hash))?)
    }

    /// Insert a blob row. Returns `false`, leaving the stored row untouched,
    /// when one already exists for this (hash, volume).
    pub fn insert_blob(&self, blob: &Blob) -> CatalogResult<bool> {
        let key = blob_key(&blob.volume_uuid, &blob.hash);
        let mut wtxn = self.env.write_txn()?;
        if self.blobs_db.get(&wtxn, &key)?.is_some() {
            return Ok(false);
        }
        self.blobs_db.put(&mut wtxn, &key, blob)?;
        wtxn.commit()?;
        Ok(true)
    }

    /// Total blob rows across all volumes.
    pub fn blob_count(&self) -> CatalogResult<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.blobs_db.len(&rtxn)?)
    }

    /// Every blob row recorded for `volume_uuid`.
    pub fn blobs_for_volume(&self, volume_uuid: &str) -> CatalogResult<Vec<Blob>> {
        let rtxn = self.env.read_txn()?;
        self.collect_volume_blobs(&rtxn, volume_uuid)
    }

    fn collect_volume_blobs(&self, rtxn: &RoTxn, volume_uuid: &str) -> CatalogResult<Vec<Blob>> {
        let prefix = format!("{}/", volume_uuid);
        let mut out = Vec::new();
        for item in self.blobs_db.prefix_iter(rtxn, &prefix)? {
            let (_, blob) = item?;
            out.push(blob);
        }
        Ok(out)
    }

    // ========================================================================
    // Volumes
    // ========================================================================

    /// Register a volume. Names and UUIDs must both be unused.
    pub fn add_volume(&self, volume: &Volume) -> CatalogResult<()> {
        let mut wtxn = self.env.write_txn()?;
        if self.volumes_db.get(&wtxn, &volume.uuid)?.is_some() {
            return Err(CatalogError::VolumeExists(volume.uuid.clone()));
        }
        if self.volume_names_db.get(&wtxn, &volume.name)?.is_some() {
            return Err(CatalogError::VolumeExists(volume.name.clone()));
        }
        self.volumes_db.put(&mut wtxn, &volume.uuid, volume)?;
        self.volume_names_db.put(&mut wtxn, &volume.name, &volume.uuid)?;
        wtxn.commit()?;
        debug!(uuid = %volume.uuid, name = %volume.name, "Added volume");
        Ok(())
    }

    /// Resolve a volume by UUID or by name (UUID wins on ambiguity).
    pub fn resolve_volume(&self, name_or_uuid: &str) -> CatalogResult<Option<Volume>> {
        let rtxn = self.env.read_txn()?;
        self.resolve_in(&rtxn, name_or_uuid)
    }

    fn resolve_in(&self, rtxn: &RoTxn, name_or_uuid: &str) -> CatalogResult<Option<Volume>> {
        if let Some(volume) = self.volumes_db.get(rtxn, name_or_uuid)? {
            return Ok(Some(volume));
        }
        match self.volume_names_db.get(rtxn, name_or_uuid)? {
            Some(uuid) => Ok(self.volumes_db.get(rtxn, uuid)?),
            None => Ok(None),
        }
    }

    /// All volumes, sorted by name.
    pub fn list_volumes(&self) -> CatalogResult<Vec<Volume>> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for item in self.volumes_db.iter(&rtxn)? {
            let (_, volume) = item?;
            out.push(volume);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Remove a volume and its blob rows. Inode history is kept.
    ///
    /// Returns the removed volume and how many blob rows went with it.
    pub fn remove_volume(&self, name_or_uuid: &str) -> CatalogResult<(Volume, usize)> {
        let mut wtxn = self.env.write_txn()?;
        let volume = self
            .resolve_in(&wtxn, name_or_uuid)?
            .ok_or_else(|| CatalogError::VolumeNotFound(name_or_uuid.to_string()))?;

        let prefix = format!("{}/", volume.uuid);
        let mut blob_keys = Vec::new();
        for item in self.blobs_db.prefix_iter(&wtxn, &prefix)? {
            let (key, _) = item?;
            blob_keys.push(key.to_string());
        }
        for key in &blob_keys {
            self.blobs_db.delete(&mut wtxn, key)?;
        }
        self.volumes_db.delete(&mut wtxn, &volume.uuid)?;
        self.volume_names_db.delete(&mut wtxn, &volume.name)?;
        wtxn.commit()?;

        debug!(uuid = %volume.uuid, blobs = blob_keys.len(), "Removed volume");
        Ok((volume, blob_keys.len()))
    }

    /// Sync/flush LMDB to disk
    pub fn sync(&self) -> CatalogResult<()> {
        self.env.force_sync()?;
        Ok(())
    }
}

fn blob_key(volume_uuid: &str, hash: &ContentHash) -> String {
    format!("{}/{}", volume_uuid, hash)
}

fn file_path_prefix(hash: &ContentHash) -> Vec<u8> {
    let mut key = hash.to_string().into_bytes();
    key.push(0);
    key
}

fn file_path_key(hash: &ContentHash, path: &Path) -> Vec<u8> {
    let mut key = file_path_prefix(hash);
    key.extend_from_slice(path.as_os_str().as_bytes());
    key
}
