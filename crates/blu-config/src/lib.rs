//! # blu-config
//!
//! Configuration management for blu-up.
//!
//! Loads configuration from:
//! 1. `~/.blu/config.toml` (global)
//! 2. `.blu/config.toml` (project-local, overrides global key by key)
//! 3. Environment variables (highest priority)

pub mod logging;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub scan: ScanConfig,
    pub pipeline: PipelineConfig,
    pub hash: HashConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let mut config = Self::load_from(global.as_deref(), Some(Path::new(".blu/config.toml")))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load and layer the given files. Missing files are skipped.
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();

        for path in [global, project].into_iter().flatten() {
            if path.exists() {
                debug!("Loading config from {:?}", path);
                let contents = std::fs::read_to_string(path)?;
                let layer: toml::Table = toml::from_str(&contents)?;
                merge_tables(&mut merged, layer);
            }
        }

        let mut config: Config = toml::Value::Table(merged).try_into()?;
        config.storage.database = expand_home(&config.storage.database);
        Ok(config)
    }

    /// Global config path: ~/.blu/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".blu/config.toml"))
    }

    /// Apply `BLU_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("BLU_DB") {
            self.storage.database = expand_home(Path::new(&path));
        }
        if let Some(path) = lookup("BLU_STORE") {
            self.storage.store_root = Some(PathBuf::from(path));
        }
        if let Some(n) = lookup("BLU_BUILDERS").and_then(|s| s.parse().ok()) {
            self.pipeline.builders = n;
        }
        if let Some(alg) = lookup("BLU_HASH") {
            self.hash.algorithm = alg;
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Config::default().to_toml()
    }

    /// Render this config as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Catalog (LMDB) directory
    pub database: PathBuf,
    /// Default content store root when `--to` is omitted
    pub store_root: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: dirs::home_dir()
                .map(|h| h.join(".blu/catalog"))
                .unwrap_or_else(|| PathBuf::from(".blu/catalog")),
            store_root: None,
        }
    }
}

/// Scanner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory names that are recorded but never descended into
    pub ignore_dirs: Vec<String>,
    /// Directory names archived whole instead of scanned
    pub archive_dirs: Vec<String>,
    /// Where directory archives are staged (None = system temp dir)
    pub temp_dir: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            ignore_dirs: vec![
                ".git".to_string(),
                ".cvs".to_string(),
                ".svn".to_string(),
                ".cache".to_string(),
            ],
            archive_dirs: vec![".git".to_string(), ".svn".to_string(), ".hg".to_string()],
            temp_dir: None,
        }
    }
}

impl ScanConfig {
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Queue capacities and stage fan-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub path_queue: usize,
    pub inode_queue: usize,
    pub copy_queue: usize,
    pub verify_queue: usize,
    /// Number of inode builder threads
    pub builders: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            path_queue: 128,
            inode_queue: 256,
            copy_queue: 64,
            verify_queue: 128,
            builders: 1,
        }
    }
}

/// Hashing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    /// Digest used for new content: SHA3-512 or BLAKE3-512
    pub algorithm: String,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            algorithm: "SHA3-512".to_string(),
        }
    }
}

/// Replace a leading `~/` with the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

fn merge_tables(base: &mut toml::Table, layer: toml::Table) {
    for (key, value) in layer {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.scan.ignore_dirs.contains(&".git".to_string()));
        assert!(config.scan.archive_dirs.contains(&".hg".to_string()));
        assert_eq!(config.hash.algorithm, "SHA3-512");
        assert_eq!(config.pipeline.builders, 1);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml().unwrap();
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[scan]"));
        assert!(toml_str.contains("[pipeline]"));
        assert!(toml_str.contains("SHA3-512"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let parsed: Config = toml::from_str(&config.to_toml().unwrap()).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_to_toml_reports_unencodable_path() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let mut config = Config::default();
        config.scan.temp_dir = Some(PathBuf::from(OsStr::from_bytes(b"/tmp/caf\xe9")));
        assert!(matches!(config.to_toml(), Err(ConfigError::TomlSer(_))));
    }

    #[test]
    fn test_project_overrides_global_per_key() {
        let temp = TempDir::new().unwrap();
        let global = temp.path().join("global.toml");
        let project = temp.path().join("project.toml");
        std::fs::write(
            &global,
            "[pipeline]\nbuilders = 4\ncopy_queue = 10\n[hash]\nalgorithm = \"BLAKE3-512\"\n",
        )
        .unwrap();
        std::fs::write(&project, "[pipeline]\nbuilders = 2\n").unwrap();

        let config = Config::load_from(Some(&global), Some(&project)).unwrap();
        assert_eq!(config.pipeline.builders, 2);
        assert_eq!(config.pipeline.copy_queue, 10);
        assert_eq!(config.pipeline.path_queue, 128);
        assert_eq!(config.hash.algorithm, "BLAKE3-512");
    }

    #[test]
    fn test_missing_files_give_defaults() {
        let temp = TempDir::new().unwrap();
        let config = Config::load_from(Some(&temp.path().join("nope.toml")), None).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let temp = TempDir::new().unwrap();
        let bad = temp.path().join("bad.toml");
        std::fs::write(&bad, "[pipeline\nbuilders = ").unwrap();
        assert!(matches!(
            Config::load_from(Some(&bad), None),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "BLU_DB" => Some("/srv/blu/catalog".to_string()),
            "BLU_STORE" => Some("/mnt/store".to_string()),
            "BLU_BUILDERS" => Some("3".to_string()),
            _ => None,
        });
        assert_eq!(config.storage.database, PathBuf::from("/srv/blu/catalog"));
        assert_eq!(config.storage.store_root, Some(PathBuf::from("/mnt/store")));
        assert_eq!(config.pipeline.builders, 3);
        assert_eq!(config.hash.algorithm, "SHA3-512");
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home(Path::new("/abs/path")), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/x")), home.join("x"));
        }
    }
}
