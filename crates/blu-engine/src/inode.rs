//! Inode Builder: turn one scanned path into one metadata record.

use std::fs::{self, FileType, Metadata};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

use blu_cas::{hash_file, ContentHash, HashAlgorithm};
use blu_catalog::{Compression, Inode, InodeKind};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use nix::unistd::{Gid, Group, Uid, User};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive::archive_directory;
use crate::scan::ScanRules;
use crate::temp_files::TempFiles;
use crate::{EngineError, Result};

/// A built record plus where its content can be read from.
#[derive(Debug, Clone)]
pub struct BuiltInode {
    pub inode: Inode,
    /// Original file or temporary archive; `None` when there is no content.
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    pub inodes_built: u64,
    pub build_failures: u64,
    pub archives_created: u64,
}

impl BuildStats {
    pub fn merge(&mut self, other: &BuildStats) {
        self.inodes_built += other.inodes_built;
        self.build_failures += other.build_failures;
        self.archives_created += other.archives_created;
    }
}

pub struct InodeBuilder<'a> {
    algorithm: HashAlgorithm,
    rules: &'a ScanRules,
    temp_dir: &'a Path,
    temp_files: &'a TempFiles,
}

impl<'a> InodeBuilder<'a> {
    pub fn new(
        algorithm: HashAlgorithm,
        rules: &'a ScanRules,
        temp_dir: &'a Path,
        temp_files: &'a TempFiles,
    ) -> Self {
        Self {
            algorithm,
            rules,
            temp_dir,
            temp_files,
        }
    }

    /// Build the record for `path` without following symlinks.
    pub fn build(&self, path: &Path) -> Result<BuiltInode> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let meta = fs::symlink_metadata(&path)?;
        let file_type = meta.file_type();

        let kind = if file_type.is_dir() {
            InodeKind::Directory
        } else if file_type.is_symlink() {
            InodeKind::Symlink
        } else if file_type.is_file() {
            InodeKind::File
        } else {
            return Err(EngineError::UnsupportedEntry {
                path,
                kind: describe(file_type),
            });
        };

        let (user, group) = owner_names(meta.uid(), meta.gid());
        let mut inode = Inode {
            id: Uuid::new_v4(),
            kind,
            hash: None,
            compression: None,
            original_path: path.clone(),
            target: None,
            size: meta.len(),
            user,
            group,
            mode: meta.mode() & 0o7777,
            mod_time: mod_time(&meta),
            scan_time: Utc::now(),
        };

        let source = match kind {
            InodeKind::Directory => {
                let archived = path
                    .file_name()
                    .is_some_and(|name| self.rules.is_archived(name));
                if !archived {
                    return Ok(BuiltInode { inode, source: None });
                }
                let archive = archive_directory(&path, self.temp_dir, self.temp_files)?;
                inode.size = fs::metadata(&archive)?.len();
                inode.compression = Some(Compression::TarGz);
                inode.hash = Some(self.hash_exact(&archive, inode.size)?);
                Some(archive)
            }
            InodeKind::Symlink => {
                inode.target = Some(fs::read_link(&path)?);
                None
            }
            InodeKind::File => {
                inode.hash = Some(self.hash_exact(&path, inode.size)?);
                Some(path)
            }
        };

        Ok(BuiltInode { inode, source })
    }

    /// Hash `path`, failing if the byte count differs from `expected`.
    fn hash_exact(&self, path: &Path, expected: u64) -> Result<ContentHash> {
        let (hash, read) = hash_file(self.algorithm, path)?;
        if read != expected {
            return Err(EngineError::SizeMismatch {
                path: path.to_path_buf(),
                expected,
                actual: read,
            });
        }
        Ok(hash)
    }

    /// Build records for every path on `input` until it closes.
    pub fn run(self, input: Receiver<PathBuf>, output: Sender<BuiltInode>) -> BuildStats {
        let mut stats = BuildStats::default();
        for path in input.iter() {
            match self.build(&path) {
                Ok(built) => {
                    if built.inode.compression.is_some() {
                        stats.archives_created += 1;
                    }
                    debug!(path = %path.display(), kind = %built.inode.kind, "Built inode");
                    stats.inodes_built += 1;
                    if output.send(built).is_err() {
                        warn!("Inode queue closed early, stopping builder");
                        break;
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping entry");
                    stats.build_failures += 1;
                }
            }
        }
        info!(
            built = stats.inodes_built,
            failed = stats.build_failures,
            "Inode builder finished"
        );
        stats
    }
}

fn owner_names(uid: u32, gid: u32) -> (Option<String>, Option<String>) {
    let user = User::from_uid(Uid::from_raw(uid)).ok().flatten().map(|u| u.name);
    let group = Group::from_gid(Gid::from_raw(gid)).ok().flatten().map(|g| g.name);
    (user, group)
}

fn mod_time(meta: &Metadata) -> DateTime<Utc> {
    DateTime::from_timestamp(meta.mtime(), meta.mtime_nsec() as u32).unwrap_or_default()
}

fn describe(file_type: FileType) -> &'static str {
    if file_type.is_fifo() {
        "fifo"
    } else if file_type.is_socket() {
        "socket"
    } else if file_type.is_char_device() {
        "character device"
    } else if file_type.is_block_device() {
        "block device"
    } else {
        "unknown"
    }
}
