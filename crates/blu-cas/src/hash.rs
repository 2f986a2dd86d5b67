//! Content hashing.
//!
//! A [`ContentHash`] is a tagged digest rendered as `ALGORITHM:hexdigest`.
//! That string is both the catalog column value and the input to the blob
//! layout, so rendering and parsing must round-trip exactly.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Sha3_512};

use crate::{CasError, Result};

/// Digest width in bytes for every supported algorithm (512 bits).
pub const DIGEST_LEN: usize = 64;

/// Read buffer used when streaming file content through a hasher.
const HASH_BUF_SIZE: usize = 64 * 1024;

/// Supported content digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA3-512, the on-disk default.
    #[default]
    Sha3_512,
    /// BLAKE3 in extended-output mode, truncated to 64 bytes.
    Blake3_512,
}

impl HashAlgorithm {
    pub const fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha3_512 => "SHA3-512",
            HashAlgorithm::Blake3_512 => "BLAKE3-512",
        }
    }

    fn hasher(self) -> StreamHasher {
        match self {
            HashAlgorithm::Sha3_512 => StreamHasher::Sha3(Sha3_512::new()),
            HashAlgorithm::Blake3_512 => StreamHasher::Blake3(blake3::Hasher::new()),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = CasError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SHA3-512" => Ok(HashAlgorithm::Sha3_512),
            "BLAKE3-512" => Ok(HashAlgorithm::Blake3_512),
            other => Err(CasError::UnknownAlgorithm(other.to_string())),
        }
    }
}

#[allow(clippy::large_enum_variant)]
enum StreamHasher {
    Sha3(Sha3_512),
    Blake3(blake3::Hasher),
}

impl StreamHasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            StreamHasher::Sha3(h) => h.update(data),
            StreamHasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize(self) -> [u8; DIGEST_LEN] {
        let mut out = [0u8; DIGEST_LEN];
        match self {
            StreamHasher::Sha3(h) => out.copy_from_slice(&h.finalize()),
            StreamHasher::Blake3(h) => h.finalize_xof().fill(&mut out),
        }
        out
    }
}

/// Algorithm-tagged content digest.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContentHash {
    algorithm: HashAlgorithm,
    digest: [u8; DIGEST_LEN],
}

impl ContentHash {
    pub fn new(algorithm: HashAlgorithm, digest: [u8; DIGEST_LEN]) -> Self {
        Self { algorithm, digest }
    }

    /// Hash an in-memory buffer.
    pub fn of_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(data);
        Self::new(algorithm, hasher.finalize())
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }

    /// Lowercase hex of the digest, without the algorithm tag.
    pub fn hex(&self) -> String {
        hex::encode(self.digest)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self)
    }
}

impl FromStr for ContentHash {
    type Err = CasError;

    fn from_str(s: &str) -> Result<Self> {
        let (alg, hex_digest) = s
            .split_once(':')
            .ok_or_else(|| CasError::InvalidHash(s.to_string()))?;
        let algorithm = alg.parse()?;
        // Upper-case hex would decode fine but break path derivation round-trips.
        if hex_digest.len() != DIGEST_LEN * 2
            || hex_digest.bytes().any(|b| b.is_ascii_uppercase())
        {
            return Err(CasError::InvalidHash(s.to_string()));
        }
        let mut digest = [0u8; DIGEST_LEN];
        hex::decode_to_slice(hex_digest, &mut digest)
            .map_err(|_| CasError::InvalidHash(s.to_string()))?;
        Ok(Self { algorithm, digest })
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Stream `reader` to EOF through `algorithm`, returning the digest and the
/// number of bytes consumed.
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, mut reader: R) -> io::Result<(ContentHash, u64)> {
    let mut hasher = algorithm.hasher();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    Ok((ContentHash::new(algorithm, hasher.finalize()), total))
}

/// Hash the full content of the file at `path`.
pub fn hash_file<P: AsRef<Path>>(algorithm: HashAlgorithm, path: P) -> Result<(ContentHash, u64)> {
    let file = File::open(path.as_ref())?;
    Ok(hash_reader(algorithm, file)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_same_bytes_same_hash() {
        let a = ContentHash::of_bytes(HashAlgorithm::Sha3_512, b"x");
        let b = ContentHash::of_bytes(HashAlgorithm::Sha3_512, b"x");
        let c = ContentHash::of_bytes(HashAlgorithm::Sha3_512, b"y");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_sha3_known_vector() {
        // SHA3-512 of the empty string.
        let h = ContentHash::of_bytes(HashAlgorithm::Sha3_512, b"");
        assert_eq!(
            h.to_string(),
            "SHA3-512:a69f73cca23a9ac5c8b567dc185a756e97c982164fe25859e0d1dcc1475c80a6\
             15b2123af1f5f94c11e3e9402c3ac558f500199d95b6d3e301758586281dcd26"
        );
    }

    #[test]
    fn test_render_and_parse() {
        let h = ContentHash::of_bytes(HashAlgorithm::Blake3_512, b"payload");
        let rendered = h.to_string();
        assert!(rendered.starts_with("BLAKE3-512:"));
        assert_eq!(rendered.len(), "BLAKE3-512:".len() + 128);
        assert_eq!(rendered.parse::<ContentHash>().unwrap(), h);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            "SHA3-512".parse::<ContentHash>(),
            Err(CasError::InvalidHash(_))
        ));
        assert!(matches!(
            "MD5:abcd".parse::<ContentHash>(),
            Err(CasError::UnknownAlgorithm(_))
        ));
        assert!(matches!(
            "SHA3-512:abcd".parse::<ContentHash>(),
            Err(CasError::InvalidHash(_))
        ));
        let upper = format!("SHA3-512:{}", "AB".repeat(64));
        assert!(upper.parse::<ContentHash>().is_err());
    }

    #[test]
    fn test_algorithms_differ() {
        let sha = ContentHash::of_bytes(HashAlgorithm::Sha3_512, b"data");
        let b3 = ContentHash::of_bytes(HashAlgorithm::Blake3_512, b"data");
        assert_ne!(sha, b3);
        assert_eq!(sha.algorithm(), HashAlgorithm::Sha3_512);
        assert_eq!(b3.algorithm(), HashAlgorithm::Blake3_512);
    }

    #[test]
    fn test_hash_file_counts_bytes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("big.bin");
        // Spans several read buffers.
        let data = vec![7u8; HASH_BUF_SIZE * 3 + 17];
        std::fs::write(&path, &data).unwrap();

        let (hash, size) = hash_file(HashAlgorithm::Sha3_512, &path).unwrap();
        assert_eq!(size, data.len() as u64);
        assert_eq!(hash, ContentHash::of_bytes(HashAlgorithm::Sha3_512, &data));
    }

    #[test]
    fn test_identical_files_at_different_paths() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("nested");
        std::fs::create_dir(&b).unwrap();
        let b = b.join("b");
        std::fs::write(&a, "same").unwrap();
        std::fs::write(&b, "same").unwrap();

        let (ha, _) = hash_file(HashAlgorithm::Sha3_512, &a).unwrap();
        let (hb, _) = hash_file(HashAlgorithm::Sha3_512, &b).unwrap();
        assert_eq!(ha, hb);
    }

    #[test]
    fn test_hash_file_missing() {
        let temp = TempDir::new().unwrap();
        let result = hash_file(HashAlgorithm::Sha3_512, temp.path().join("nope"));
        assert!(matches!(result, Err(CasError::Io(_))));
    }
}
