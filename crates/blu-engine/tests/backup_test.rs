//! End-to-end backup runs against a real catalog and store.

mod common;

use std::fs;

use blu_cas::{hash_file, BlobStore, ContentHash, HashAlgorithm};
use blu_catalog::{Compression, InodeKind};
use blu_engine::{BackupRun, EngineError};
use common::{files_under, Fixture};

#[test]
fn test_duplicate_content_stored_once() {
    let fx = Fixture::new();
    let a = fx.write("a.txt", b"x");
    let b = fx.write("nested/b.txt", b"x");
    fx.write("c.txt", b"y");

    let report = fx.backup();

    // 3 files plus the "nested" directory; the root itself is not recorded
    assert_eq!(report.paths_scanned, 4);
    assert_eq!(fx.catalog.inode_count().unwrap(), 4);
    assert_eq!(report.blobs_created, 2);
    assert_eq!(report.blobs_deduplicated, 1);
    assert_eq!(report.blobs_copied, 2);
    assert_eq!(report.failures(), 0);

    assert_eq!(fx.catalog.blobs_for_volume(&fx.volume.uuid).unwrap().len(), 2);
    assert_eq!(files_under(&fx.store).len(), 2);

    let store = BlobStore::new(&fx.store).unwrap();
    let x = ContentHash::of_bytes(HashAlgorithm::Sha3_512, b"x");
    let stored = fs::read(store.blob_path(&x)).unwrap();
    assert_eq!(stored, fs::read(a).unwrap());
    assert_eq!(stored, fs::read(b).unwrap());
}

#[test]
fn test_second_run_copies_nothing() {
    let fx = Fixture::new();
    fx.write("a.txt", b"alpha");
    fx.write("b/c.txt", b"gamma");

    let first = fx.backup();
    assert_eq!(first.blobs_created, 2);
    let inodes_after_first = fx.catalog.inode_count().unwrap();

    let second = fx.backup();
    assert_eq!(second.blobs_created, 0);
    assert_eq!(second.blobs_copied, 0);
    assert_eq!(second.bytes_copied, 0);
    assert_eq!(second.blobs_deduplicated, 2);

    // inode history is append-only: one new row per scanned path
    assert_eq!(fx.catalog.inode_count().unwrap(), inodes_after_first * 2);
    assert_eq!(fx.catalog.blob_count().unwrap(), 2);
    assert_eq!(files_under(&fx.store).len(), 2);
}

#[test]
fn test_git_directory_archived_whole() {
    let fx = Fixture::new();
    fx.write(".git/HEAD", b"ref: refs/heads/main\n");
    fx.write(".git/objects/ab/cdef", b"object bytes");
    fx.write("README", b"readme");

    let report = fx.backup();
    assert_eq!(report.archives_created, 1);
    assert_eq!(report.temp_files_removed, 1);
    assert!(files_under(&fx.staging).is_empty(), "archive not cleaned up");

    let inodes = fx.catalog.inodes().unwrap();
    let git = inodes
        .iter()
        .find(|i| i.original_path.ends_with(".git"))
        .expect("no inode for .git");
    assert_eq!(git.kind, InodeKind::Directory);
    assert_eq!(git.compression, Some(Compression::TarGz));
    let hash = git.hash.clone().expect(".git has no content hash");

    // children of .git are not scanned separately
    let source = fx.source.canonicalize().unwrap();
    assert!(!inodes
        .iter()
        .any(|i| i.original_path.starts_with(source.join(".git/"))
            && i.original_path != source.join(".git")));
    assert_eq!(inodes.len(), 2);

    // the archive blob landed in the store with the recorded size
    let store = BlobStore::new(&fx.store).unwrap();
    let (stored_hash, stored_len) = hash_file(hash.algorithm(), store.blob_path(&hash)).unwrap();
    assert_eq!(stored_hash, hash);
    assert_eq!(stored_len, git.size);
}

#[test]
fn test_fifo_skipped_rest_backed_up() {
    let fx = Fixture::new();
    fx.write("keep.txt", b"keep");
    nix::unistd::mkfifo(&fx.source.join("pipe"), nix::sys::stat::Mode::S_IRWXU).unwrap();

    let report = fx.backup();
    assert_eq!(report.paths_scanned, 2);
    assert_eq!(report.build_failures, 1);
    assert_eq!(report.blobs_copied, 1);
    assert_eq!(fx.catalog.inode_count().unwrap(), 1);
}

#[test]
fn test_symlink_recorded_not_followed() {
    let fx = Fixture::new();
    fx.write("real/file.txt", b"data");
    std::os::unix::fs::symlink("real", fx.source.join("alias")).unwrap();

    fx.backup();
    let inodes = fx.catalog.inodes().unwrap();
    let link = inodes
        .iter()
        .find(|i| i.kind == InodeKind::Symlink)
        .expect("no symlink inode");
    assert_eq!(link.target.as_deref(), Some(std::path::Path::new("real")));
    assert!(link.hash.is_none());
    assert!(!inodes.iter().any(|i| i.original_path.ends_with("alias/file.txt")));
}

#[test]
fn test_store_inside_source_not_scanned() {
    let mut fx = Fixture::new();
    fx.write("a.txt", b"a");
    fx.store = fx.source.join("backups");

    fx.backup();
    let second = fx.backup();

    assert_eq!(second.paths_scanned, 1);
    let store = fx.store.canonicalize().unwrap();
    assert!(!fx.inode_paths().iter().any(|p| p.starts_with(&store)));
}

#[test]
fn test_same_source_and_store_rejected() {
    let fx = Fixture::new();
    let result = BackupRun::new(&fx.catalog, fx.volume.clone(), &fx.source, &fx.source, &fx.config);
    assert!(matches!(result, Err(EngineError::SameRoots(_))));
}

#[test]
fn test_missing_source_rejected() {
    let fx = Fixture::new();
    let missing = fx.dir.path().join("nope");
    let result = BackupRun::new(&fx.catalog, fx.volume.clone(), &missing, &fx.store, &fx.config);
    assert!(matches!(result, Err(EngineError::NotADirectory(_))));
}

#[test]
fn test_unknown_hash_algorithm_rejected() {
    let mut fx = Fixture::new();
    fx.config.hash.algorithm = "MD5".to_string();
    let result = BackupRun::new(&fx.catalog, fx.volume.clone(), &fx.source, &fx.store, &fx.config);
    assert!(matches!(result, Err(EngineError::Cas(_))));
}

#[test]
fn test_blake3_store_namespace() {
    let mut fx = Fixture::new();
    fx.config.hash.algorithm = "BLAKE3-512".to_string();
    fx.write("a.txt", b"blake");

    fx.backup();
    let files = files_under(&fx.store);
    assert_eq!(files.len(), 1);
    assert!(files[0].strip_prefix(&fx.store).unwrap().starts_with("BLAKE3-512"));
}

#[test]
fn test_multiple_builders() {
    let mut fx = Fixture::new();
    fx.config.pipeline.builders = 4;
    for i in 0..50 {
        fx.write(&format!("dir{}/file{}.txt", i % 5, i), format!("content {}", i % 10).as_bytes());
    }

    let report = fx.backup();
    assert_eq!(report.paths_scanned, 55);
    assert_eq!(report.inodes_saved, 55);
    assert_eq!(report.blobs_created, 10);
    assert_eq!(files_under(&fx.store).len(), 10);
}

#[test]
fn test_non_utf8_file_name_backed_up() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let fx = Fixture::new();
    let name = OsStr::from_bytes(b"caf\xe9.txt");
    fs::write(fx.source.join(name), b"latin-1 name").unwrap();

    let report = fx.backup();
    assert_eq!(report.paths_scanned, 1);
    assert_eq!(report.save_failures, 0);
    assert_eq!(report.blobs_copied, 1);
    assert_eq!(files_under(&fx.store).len(), 1);

    let source = fx.source.canonicalize().unwrap();
    assert_eq!(fx.inode_paths(), vec![source.join(name)]);
}

#[test]
fn test_failed_copies_still_remove_archives() {
    let fx = Fixture::new();
    fx.write(".git/HEAD", b"ref: refs/heads/main\n");
    fx.write("README", b"readme");
    // A file where the algorithm namespace directory belongs makes every
    // copy into the store fail after the archive has been built.
    fs::create_dir_all(&fx.store).unwrap();
    fs::write(fx.store.join("SHA3-512"), b"in the way").unwrap();

    let report = fx.backup();
    assert_eq!(report.archives_created, 1);
    assert_eq!(report.copy_failures, 2);
    assert_eq!(report.blobs_copied, 0);
    assert_eq!(report.temp_files_removed, 1);
    assert!(files_under(&fx.staging).is_empty(), "archive left behind");
}
