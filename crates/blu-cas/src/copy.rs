//! Byte-counted file copy into the store.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::instrument;

use crate::{CasError, Result};

/// Copy `src` to `dest`, requiring exactly `expected_size` bytes.
///
/// Parent directories of `dest` are created as needed. Content goes to a
/// sibling temp file first and is renamed into place only after the byte
/// count checks out, so a short copy never lands at `dest`. An existing
/// file at `dest` is replaced.
///
/// Returns the number of bytes written.
#[instrument(level = "debug", skip_all, fields(src = %src.display(), dest = %dest.display()))]
pub fn copy_exact(src: &Path, dest: &Path, expected_size: u64) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_sibling(dest)?;
    let written = match write_temp(src, &temp_path) {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            return Err(CasError::Io(e));
        }
    };

    if written != expected_size {
        let _ = fs::remove_file(&temp_path);
        return Err(CasError::SizeMismatch {
            path: dest.to_path_buf(),
            expected: expected_size,
            actual: written,
        });
    }

    if let Err(e) = fs::rename(&temp_path, dest) {
        let _ = fs::remove_file(&temp_path);
        return Err(CasError::Io(e));
    }

    Ok(written)
}

fn write_temp(src: &Path, temp_path: &Path) -> io::Result<u64> {
    let mut reader = BufReader::new(File::open(src)?);
    let file = File::create(temp_path)?;
    let mut writer = BufWriter::new(&file);
    let written = io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    drop(writer);
    file.sync_all()?;
    Ok(written)
}

fn temp_sibling(dest: &Path) -> Result<PathBuf> {
    let name = dest.file_name().ok_or_else(|| {
        CasError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("destination has no file name: {}", dest.display()),
        ))
    })?;
    let temp_name = format!(
        "{}.{}.{:?}.tmp",
        name.to_string_lossy(),
        std::process::id(),
        std::thread::current().id()
    );
    Ok(dest.with_file_name(temp_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_creates_parents() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src.txt");
        fs::write(&src, b"hello").unwrap();
        let dest = temp.path().join("a").join("b").join("c").join("blob");

        let n = copy_exact(&src, &dest, 5).unwrap();
        assert_eq!(n, 5);
        assert_eq!(fs::read(&dest).unwrap(), b"hello");
    }

    #[test]
    fn test_copy_size_mismatch_leaves_no_file() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src.txt");
        fs::write(&src, b"hello").unwrap();
        let dest = temp.path().join("out").join("blob");

        let result = copy_exact(&src, &dest, 99);
        assert!(matches!(
            result,
            Err(CasError::SizeMismatch {
                expected: 99,
                actual: 5,
                ..
            })
        ));
        assert!(!dest.exists());
        // No stray temp files either.
        let leftovers: Vec<_> = fs::read_dir(temp.path().join("out")).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_copy_replaces_existing() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("good");
        fs::write(&src, b"good bytes").unwrap();
        let dest = temp.path().join("blob");
        fs::write(&dest, b"corrupt").unwrap();

        copy_exact(&src, &dest, 10).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"good bytes");
    }

    #[test]
    fn test_copy_missing_source() {
        let temp = TempDir::new().unwrap();
        let result = copy_exact(&temp.path().join("missing"), &temp.path().join("blob"), 0);
        assert!(matches!(result, Err(CasError::Io(_))));
    }
}
