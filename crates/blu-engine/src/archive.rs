//! Whole-directory archives for version-control metadata.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use tracing::debug;

use crate::temp_files::TempFiles;
use crate::Result;

/// Pack `dir` into a gzip-compressed tar file inside `temp_dir`.
///
/// The archive path is tracked in `temp_files` before any bytes are written,
/// so a failure halfway through still leaves it scheduled for deletion.
/// Symlinks inside the directory are stored as links.
pub(crate) fn archive_directory(dir: &Path, temp_dir: &Path, temp_files: &TempFiles) -> Result<PathBuf> {
    fs::create_dir_all(temp_dir)?;
    let (file, path) = tempfile::Builder::new()
        .prefix("blu-archive-")
        .suffix(".tar.gz")
        .tempfile_in(temp_dir)?
        .keep()
        .map_err(|e| e.error)?;
    temp_files.track(path.clone());

    let name = dir
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let encoder = GzEncoder::new(BufWriter::new(file), GzLevel::default());
    let mut tar = tar::Builder::new(encoder);
    tar.follow_symlinks(false);
    tar.append_dir_all(&name, dir)?;

    let mut writer = tar.into_inner()?.finish()?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    debug!(dir = %dir.display(), archive = %path.display(), "Archived directory");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use tempfile::TempDir;

    #[test]
    fn test_archive_contains_children() {
        let temp = TempDir::new().unwrap();
        let git = temp.path().join("src/.git");
        fs::create_dir_all(git.join("refs")).unwrap();
        fs::write(git.join("HEAD"), b"ref: refs/heads/main\n").unwrap();
        fs::write(git.join("refs/main"), b"abc\n").unwrap();

        let staging = temp.path().join("staging");
        let files = TempFiles::new();
        let archive = archive_directory(&git, &staging, &files).unwrap();

        assert!(archive.starts_with(&staging));
        assert_eq!(files.pending(), 1);

        let mut tar = tar::Archive::new(GzDecoder::new(fs::File::open(&archive).unwrap()));
        let names: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n == ".git/HEAD"));
        assert!(names.iter().any(|n| n == ".git/refs/main"));

        assert_eq!(files.cleanup(), 1);
        assert!(!archive.exists());
    }

    #[test]
    fn test_failed_archive_still_tracked() {
        let temp = TempDir::new().unwrap();
        let files = TempFiles::new();
        let missing = temp.path().join("gone/.hg");

        assert!(archive_directory(&missing, temp.path(), &files).is_err());
        assert_eq!(files.pending(), 1);
        assert_eq!(files.cleanup(), 1);
    }
}
