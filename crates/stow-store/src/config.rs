use std::path::Path;

use serde::{Deserialize, Serialize};
use stow_types::MAX_SIGNED_URL_HORIZON_SECS;

use crate::compose::{ComposeOptions, BATCH_SIZE};
use crate::error::{StorageError, StorageResult};

/// Concurrent writes issued by bulk helpers such as `save_files`.
pub const DEFAULT_WRITE_CONCURRENCY: usize = 8;

/// Concurrent reads issued by bulk helpers such as `get_file_contents`.
pub const DEFAULT_READ_CONCURRENCY: usize = 16;

/// Backend configuration, usually loaded from a TOML file:
///
/// ```toml
/// write_concurrency = 8
/// read_concurrency = 16
///
/// [compose]
/// batch_size = 32
/// max_depth = 10
/// concurrency = 8
///
/// [signed_url]
/// host = "storage.localhost"
/// max_horizon_secs = 604800
/// ```
///
/// Every field is optional and falls back to its default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub compose: ComposeOptions,
    pub write_concurrency: usize,
    pub read_concurrency: usize,
    pub signed_url: SignedUrlConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            compose: ComposeOptions::default(),
            write_concurrency: DEFAULT_WRITE_CONCURRENCY,
            read_concurrency: DEFAULT_READ_CONCURRENCY,
            signed_url: SignedUrlConfig::default(),
        }
    }
}

impl StorageConfig {
    pub fn from_toml_str(s: &str) -> StorageResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| StorageError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> StorageResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> StorageResult<()> {
        self.compose.validate()?;
        if self.compose.batch_size > BATCH_SIZE {
            return Err(StorageError::Config(format!(
                "compose batch_size {} exceeds the native compose limit of {BATCH_SIZE}",
                self.compose.batch_size
            )));
        }
        if self.write_concurrency == 0 || self.read_concurrency == 0 {
            return Err(StorageError::Config(
                "read_concurrency and write_concurrency must be at least 1".into(),
            ));
        }
        if self.signed_url.host.is_empty() {
            return Err(StorageError::Config("signed_url.host must not be empty".into()));
        }
        let horizon = self.signed_url.max_horizon_secs;
        if horizon <= 0 || horizon > MAX_SIGNED_URL_HORIZON_SECS {
            return Err(StorageError::Config(format!(
                "signed_url.max_horizon_secs must be in 1..={MAX_SIGNED_URL_HORIZON_SECS}, \
                 got {horizon}"
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignedUrlConfig {
    /// Host name placed in generated URLs.
    pub host: String,
    pub max_horizon_secs: i64,
}

impl Default for SignedUrlConfig {
    fn default() -> Self {
        Self {
            host: "storage.localhost".into(),
            max_horizon_secs: MAX_SIGNED_URL_HORIZON_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::MAX_RECURSION_DEPTH;

    #[test]
    fn default_config() {
        let c = StorageConfig::default();
        assert_eq!(c.compose.batch_size, BATCH_SIZE);
        assert_eq!(c.compose.max_depth, MAX_RECURSION_DEPTH);
        assert_eq!(c.write_concurrency, 8);
        assert_eq!(c.read_concurrency, 16);
        assert_eq!(c.signed_url.max_horizon_secs, 7 * 24 * 3600);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(StorageConfig::from_toml_str("").unwrap(), StorageConfig::default());
    }

    #[test]
    fn partial_toml_overrides() {
        let c = StorageConfig::from_toml_str(
            r#"
            read_concurrency = 4

            [compose]
            batch_size = 4
            "#,
        )
        .unwrap();
        assert_eq!(c.read_concurrency, 4);
        assert_eq!(c.compose.batch_size, 4);
        assert_eq!(c.compose.max_depth, MAX_RECURSION_DEPTH);
        assert_eq!(c.write_concurrency, DEFAULT_WRITE_CONCURRENCY);
    }

    #[test]
    fn invalid_values_rejected() {
        for raw in [
            "[compose]\nbatch_size = 1",
            "write_concurrency = 0",
            "[signed_url]\nhost = \"\"",
            "[signed_url]\nmax_horizon_secs = 0",
            "[signed_url]\nmax_horizon_secs = 9223372036854775807",
            "[signed_url]\nmax_horizon_secs = 604801",
            "[compose]\nbatch_size = 64",
            "read_concurrency = \"many\"",
        ] {
            let err = StorageConfig::from_toml_str(raw).unwrap_err();
            assert!(matches!(err, StorageError::Config(_)), "{raw}: {err}");
        }
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stow.toml");
        std::fs::write(&path, "[signed_url]\nhost = \"cdn.example.com\"\n").unwrap();
        let c = StorageConfig::from_toml_file(&path).unwrap();
        assert_eq!(c.signed_url.host, "cdn.example.com");

        let missing = StorageConfig::from_toml_file(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, StorageError::Io(_)));
    }
}
