//! Temporary files created during a backup run.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

/// Paths pending deletion at end of run.
///
/// The lock is held only while pushing or draining, never during file I/O.
#[derive(Debug, Default)]
pub struct TempFiles {
    paths: Mutex<Vec<PathBuf>>,
}

impl TempFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path` for deletion by the next [`cleanup`](Self::cleanup).
    pub fn track(&self, path: PathBuf) {
        self.lock().push(path);
    }

    /// Number of paths waiting for cleanup.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Delete every tracked path. Returns how many were removed.
    ///
    /// Safe to call more than once; later calls only see paths tracked since.
    pub fn cleanup(&self) -> usize {
        let paths = std::mem::take(&mut *self.lock());
        if paths.is_empty() {
            return 0;
        }

        info!(count = paths.len(), "Deleting temporary files created during backup");
        let mut removed = 0;
        for path in paths {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Deleted temporary file");
                    removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to delete temporary file");
                }
            }
        }
        removed
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cleanup_removes_tracked() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.tar.gz");
        let b = temp.path().join("b.tar.gz");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let files = TempFiles::new();
        files.track(a.clone());
        files.track(b.clone());
        assert_eq!(files.pending(), 2);

        assert_eq!(files.cleanup(), 2);
        assert!(!a.exists());
        assert!(!b.exists());
        assert_eq!(files.pending(), 0);
        assert_eq!(files.cleanup(), 0);
    }

    #[test]
    fn test_cleanup_tolerates_already_gone() {
        let temp = TempDir::new().unwrap();
        let files = TempFiles::new();
        files.track(temp.path().join("never-created"));
        assert_eq!(files.cleanup(), 0);
        assert_eq!(files.pending(), 0);
    }
}
