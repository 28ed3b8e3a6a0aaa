//! Vault configuration
//!
//! Loaded from a TOML file, then overridden from the environment:
//!
//! | Variable | Effect |
//! |---|---|
//! | `COFFER_KEYS` | comma-separated keyring, newest first |
//! | `COFFER_STORAGE_DIR` | `storage.base_dir` |
//! | `COFFER_LOG_LEVEL` | `logging.default_level` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use coffer_crypto::Keyring;
use coffer_logging::LogConfig;
use coffer_storage::{BackendKind, LocalStorageConfig, MemoryStoreConfig, SignatureTable};
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

pub const ENV_KEYS: &str = "COFFER_KEYS";
pub const ENV_STORAGE_DIR: &str = "COFFER_STORAGE_DIR";
pub const ENV_LOG_LEVEL: &str = "COFFER_LOG_LEVEL";

/// Top-level configuration
#[derive(Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VaultConfig {
    /// Keyring entries, newest first: 64 hex chars, or any string which is
    /// padded/truncated to 32 bytes
    pub keys: Vec<String>,
    /// Storage backend selection and limits
    pub storage: StorageConfig,
    /// Logging setup
    pub logging: LogConfig,
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("keys", &format_args!("[{} redacted]", self.keys.len()))
            .field("storage", &self.storage)
            .field("logging", &self.logging)
            .finish()
    }
}

/// Storage section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Which backend to run
    pub backend: BackendKind,
    /// Base directory for the local backend
    pub base_dir: PathBuf,
    /// Directory sharding levels for the local backend
    pub shard_depth: u8,
    /// Maximum plaintext size of one upload (bytes)
    pub max_object_size: u64,
    /// Plaintext chunk size for reads (bytes)
    pub read_chunk_size: usize,
    /// Age in seconds after which gc removes abandoned partial files
    pub stale_partial_secs: u64,
    /// Restrict accepted upload formats by name; all known formats if unset
    pub accepted_formats: Option<Vec<String>>,
    /// Bucket name for the remote store
    pub bucket: String,
    /// Lifetime of transfer URLs in seconds
    pub url_ttl_secs: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let local = LocalStorageConfig::default();
        let memory = MemoryStoreConfig::default();
        Self {
            backend: BackendKind::Local,
            base_dir: local.base_dir,
            shard_depth: local.shard_depth,
            max_object_size: local.max_object_size,
            read_chunk_size: local.read_chunk_size,
            stale_partial_secs: local.stale_partial_after.as_secs(),
            accepted_formats: None,
            bucket: memory.bucket,
            url_ttl_secs: memory.url_ttl.num_seconds(),
        }
    }
}

impl StorageConfig {
    pub fn local(&self) -> LocalStorageConfig {
        LocalStorageConfig {
            base_dir: self.base_dir.clone(),
            shard_depth: self.shard_depth,
            max_object_size: self.max_object_size,
            read_chunk_size: self.read_chunk_size,
            stale_partial_after: Duration::from_secs(self.stale_partial_secs),
        }
    }

    pub fn memory(&self) -> MemoryStoreConfig {
        MemoryStoreConfig {
            bucket: self.bucket.clone(),
            url_ttl: chrono::Duration::seconds(self.url_ttl_secs),
        }
    }

    /// Accepted upload formats
    pub fn signatures(&self) -> VaultResult<SignatureTable> {
        match &self.accepted_formats {
            Some(names) => Ok(SignatureTable::only(names)?),
            None => Ok(SignatureTable::default()),
        }
    }
}

impl VaultConfig {
    /// Load from a TOML file and apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> VaultResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| VaultError::Config(format!("{}: {e}", path.display())))?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env();
        Ok(config)
    }

    /// Parse TOML without consulting the environment
    pub fn from_toml_str(text: &str) -> VaultResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable source
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(keys) = lookup(ENV_KEYS) {
            self.keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(dir) = lookup(ENV_STORAGE_DIR).filter(|d| !d.is_empty()) {
            self.storage.base_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|l| !l.is_empty()) {
            self.logging.default_level = level;
        }
    }

    /// Build the keyring from `keys`
    pub fn keyring(&self) -> VaultResult<Keyring> {
        if self.keys.is_empty() {
            return Err(VaultError::Config(format!(
                "no keys configured; set `keys` or {ENV_KEYS}"
            )));
        }
        Ok(Keyring::from_config(&self.keys)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const KEY_A: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_defaults() {
        let config = VaultConfig::default();
        assert!(config.keys.is_empty());
        assert_eq!(config.storage.backend, BackendKind::Local);
        assert_eq!(config.storage.read_chunk_size, 64 * 1024);
        assert_eq!(config.storage.url_ttl_secs, 15 * 60);
        assert!(config.keyring().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let config = VaultConfig::from_toml_str(&format!(
            r#"
            keys = ["{KEY_A}", "legacy passphrase"]

            [storage]
            backend = "local"
            base_dir = "/srv/coffer"
            max_object_size = 1048576
            accepted_formats = ["pdf", "zip"]

            [logging]
            default_level = "debug"
            "#
        ))
        .unwrap();

        assert_eq!(config.keys.len(), 2);
        assert_eq!(config.storage.base_dir, PathBuf::from("/srv/coffer"));
        assert_eq!(config.storage.max_object_size, 1_048_576);
        assert_eq!(config.storage.shard_depth, 2);
        assert_eq!(config.storage.signatures().unwrap().len(), 2);
        assert_eq!(config.logging.default_level, "debug");

        let keyring = config.keyring().unwrap();
        assert_eq!(keyring.len(), 2);
        assert_eq!(keyring.current().to_hex(), KEY_A);
    }

    #[test]
    fn test_memory_backend() {
        let config = VaultConfig::from_toml_str(
            r#"
            [storage]
            backend = "memory"
            bucket = "uploads"
            url_ttl_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.backend, BackendKind::Memory);
        let memory = config.storage.memory();
        assert_eq!(memory.bucket, "uploads");
        assert_eq!(memory.url_ttl, chrono::Duration::seconds(60));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let result = VaultConfig::from_toml_str("[storage]\nbackend = \"s3\"\n");
        assert!(matches!(result, Err(VaultError::Config(_))));
    }

    #[test]
    fn test_unknown_format_rejected() {
        let config =
            VaultConfig::from_toml_str("[storage]\naccepted_formats = [\"pdf\", \"exe\"]\n")
                .unwrap();
        assert!(config.storage.signatures().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_KEYS, " new-key , , old-key "),
            (ENV_STORAGE_DIR, "/var/lib/coffer"),
            (ENV_LOG_LEVEL, "trace"),
        ]);

        let mut config = VaultConfig::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.keys, vec!["new-key", "old-key"]);
        assert_eq!(config.storage.base_dir, PathBuf::from("/var/lib/coffer"));
        assert_eq!(config.logging.default_level, "trace");
    }

    #[test]
    fn test_empty_env_values_ignored() {
        let mut config = VaultConfig::default();
        config.storage.base_dir = PathBuf::from("/keep");
        config.apply_overrides(|name| (name == ENV_STORAGE_DIR).then(String::new));
        assert_eq!(config.storage.base_dir, PathBuf::from("/keep"));
    }

    #[test]
    fn test_debug_redacts_keys() {
        let config = VaultConfig {
            keys: vec![KEY_A.to_string()],
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains(KEY_A));
        assert!(rendered.contains("1 redacted"));
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("coffer.toml");
        std::fs::write(&path, format!("keys = [\"{KEY_A}\"]\n")).unwrap();

        let config = VaultConfig::load(&path).unwrap();
        assert!(!config.keys.is_empty());

        assert!(matches!(
            VaultConfig::load(temp.path().join("missing.toml")),
            Err(VaultError::Config(_))
        ));
    }
}
