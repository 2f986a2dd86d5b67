//! Scanner: depth-first walk of the backup source.
//!
//! Every entry below the root is emitted in pre-order with siblings sorted
//! by name. The root itself is not emitted. Directories in the ignore or
//! archive sets are emitted but not descended into; excluded paths (the
//! content store or catalog when they live inside the source) are skipped
//! entirely.

use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use blu_config::ScanConfig;
use crossbeam_channel::Sender;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Directory-name policies shared by the Scanner and the Inode Builder.
#[derive(Debug, Clone, Default)]
pub struct ScanRules {
    ignore: HashSet<OsString>,
    archive: HashSet<OsString>,
    exclude: Vec<PathBuf>,
}

impl ScanRules {
    pub fn new<I, A>(ignore_dirs: I, archive_dirs: A) -> Self
    where
        I: IntoIterator,
        I::Item: Into<OsString>,
        A: IntoIterator,
        A::Item: Into<OsString>,
    {
        Self {
            ignore: ignore_dirs.into_iter().map(Into::into).collect(),
            archive: archive_dirs.into_iter().map(Into::into).collect(),
            exclude: Vec::new(),
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(config.ignore_dirs.iter(), config.archive_dirs.iter())
    }

    /// Never emit or descend into `path`.
    pub fn exclude(mut self, path: impl Into<PathBuf>) -> Self {
        self.exclude.push(path.into());
        self
    }

    /// Whether a directory with this name is archived whole.
    pub fn is_archived(&self, name: &OsStr) -> bool {
        self.archive.contains(name)
    }

    /// Whether a directory with this name is emitted but not descended.
    pub fn prunes(&self, name: &OsStr) -> bool {
        self.ignore.contains(name) || self.archive.contains(name)
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.exclude.iter().any(|e| e == path)
    }
}

/// Lazy pre-order walk over a source tree.
pub struct Walk<'a> {
    it: walkdir::IntoIter,
    rules: &'a ScanRules,
}

impl<'a> Walk<'a> {
    pub fn new(root: &Path, rules: &'a ScanRules) -> Self {
        let it = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        Self { it, rules }
    }
}

impl Iterator for Walk<'_> {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            let entry = match self.it.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(
                        path = ?e.path(),
                        error = %e,
                        "Failed to read directory, skipping subtree"
                    );
                    continue;
                }
            };

            let is_dir = entry.file_type().is_dir();
            if self.rules.is_excluded(entry.path()) {
                if is_dir {
                    self.it.skip_current_dir();
                }
                debug!(path = %entry.path().display(), "Excluded from scan");
                continue;
            }
            if is_dir && self.rules.prunes(entry.file_name()) {
                self.it.skip_current_dir();
            }
            return Some(entry.into_path());
        }
    }
}

/// Single sequential walker feeding the path queue.
pub struct Scanner<'a> {
    root: PathBuf,
    rules: &'a ScanRules,
    tx: Sender<PathBuf>,
}

impl<'a> Scanner<'a> {
    pub fn new(root: impl Into<PathBuf>, rules: &'a ScanRules, tx: Sender<PathBuf>) -> Self {
        Self {
            root: root.into(),
            rules,
            tx,
        }
    }

    /// Walk the tree, send every path, then close the queue by dropping the
    /// sender. Returns the number of paths sent.
    pub fn run(self) -> u64 {
        info!(root = %self.root.display(), "Scanner started");
        let mut sent = 0u64;
        for path in Walk::new(&self.root, self.rules) {
            if self.tx.send(path).is_err() {
                warn!("Path queue closed early, stopping scan");
                break;
            }
            sent += 1;
        }
        info!(paths = sent, "Scanner finished");
        sent
    }
}
