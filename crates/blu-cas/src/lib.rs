//! # blu-cas
//!
//! Content-addressed blob layout for blu-up.
//!
//! Every distinct payload is stored once, at a path derived purely from its
//! [`ContentHash`]. The digest's hex form is split into two 3-character
//! fan-out directories under a per-algorithm namespace:
//!
//! ```text
//! <store root>/
//! └── SHA3-512/
//!     └── a69/
//!         └── f73/
//!             └── a69f73cc...1dcd26
//! ```

mod copy;
mod hash;

pub use copy::copy_exact;
pub use hash::{hash_file, hash_reader, ContentHash, HashAlgorithm, DIGEST_LEN};

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Width of each fan-out directory name, in hex characters.
pub const FANOUT_WIDTH: usize = 3;

/// Number of fan-out directory levels below the algorithm namespace.
pub const FANOUT_LEVELS: usize = 2;

/// Errors that can occur during CAS operations
#[derive(Error, Debug)]
pub enum CasError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid content hash: {0:?}")]
    InvalidHash(String),

    #[error("unknown hash algorithm: {0:?}")]
    UnknownAlgorithm(String),

    #[error("size mismatch for {}: expected {expected} bytes, got {actual}", .path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}

pub type Result<T> = std::result::Result<T, CasError>;

/// Relative location of the blob for `hash`: `ALG/abc/def/<full hex>`.
///
/// Pure function of the hash; never depends on source path, volume or time.
pub fn store_path(hash: &ContentHash) -> PathBuf {
    let hex = hash.hex();
    let mut path = PathBuf::from(hash.algorithm().name());
    for level in 0..FANOUT_LEVELS {
        path.push(&hex[level * FANOUT_WIDTH..(level + 1) * FANOUT_WIDTH]);
    }
    path.push(&hex);
    path
}

/// Root of a content store on the local filesystem.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Get the root path of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path where the blob for `hash` lives (whether or not it exists).
    pub fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(store_path(hash))
    }

    /// Check if a blob file exists for `hash`.
    pub fn exists(&self, hash: &ContentHash) -> bool {
        self.blob_path(hash).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_path_layout() {
        let hash = ContentHash::of_bytes(HashAlgorithm::Sha3_512, b"");
        let hex = hash.hex();
        assert_eq!(
            store_path(&hash),
            PathBuf::from("SHA3-512").join("a69").join("f73").join(&hex)
        );
    }

    #[test]
    fn test_store_path_is_pure() {
        let a = ContentHash::of_bytes(HashAlgorithm::Blake3_512, b"content");
        let b: ContentHash = a.to_string().parse().unwrap();
        assert_eq!(store_path(&a), store_path(&b));
        assert!(store_path(&a).starts_with("BLAKE3-512"));
    }

    #[test]
    fn test_blob_path_under_root() {
        let temp = TempDir::new().unwrap();
        let store = BlobStore::new(temp.path().join("store")).unwrap();
        let hash = ContentHash::of_bytes(HashAlgorithm::Sha3_512, b"abc");

        let path = store.blob_path(&hash);
        assert!(path.starts_with(store.root()));
        assert_eq!(path.file_name().unwrap().to_string_lossy(), hash.hex());
        assert!(!store.exists(&hash));
    }
}
