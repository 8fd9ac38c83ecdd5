use anyhow::Context;
use log::warn;
use once_cell::sync::OnceCell;
use serde_derive::Deserialize;
use std::path::PathBuf;

static INSTANCE: OnceCell<RuntimeConfig> = OnceCell::new();

/// Process-wide configuration. Falls back to defaults until [`install`] runs.
pub fn instance() -> &'static RuntimeConfig {
    INSTANCE.get_or_init(RuntimeConfig::new)
}

/// Makes `config` the process-wide configuration. Only the first call wins.
pub fn install(config: RuntimeConfig) -> &'static RuntimeConfig {
    if INSTANCE.set(config).is_err() {
        warn!("runtime config already installed, keeping the first one");
    }
    instance()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Journal,
    Mysql,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub journal_path: PathBuf,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: StorageBackend::Memory,
            journal_path: PathBuf::from("data/match.journal"),
            database_url: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RuntimeConfig {
    pub addr: String,
    pub metrics_addr: String,
    /// Levels returned by an order book query without `depth`
    pub default_depth: usize,
    /// Upper bound applied to any requested depth
    pub max_depth: usize,
    /// Largest request body the API reads
    pub max_body_bytes: usize,
    pub storage: StorageConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        RuntimeConfig {
            addr: "0.0.0.0:4000".to_string(),
            metrics_addr: "0.0.0.0:4010".to_string(),
            default_depth: 50,
            max_depth: 500,
            max_body_bytes: 64 * 1024,
            storage: StorageConfig::default(),
        }
    }

    /// Reads a TOML file. A missing file means defaults; a file that exists
    /// but cannot be read or parsed is an error.
    pub fn from_toml(path: &str) -> anyhow::Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("runtime config file {} not found, using defaults", path);
                return Ok(RuntimeConfig::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read runtime config {}", path))
            }
        };
        Self::parse(&contents).with_context(|| format!("failed to parse runtime config {}", path))
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Depth to serve for a query, clamped to `1..=max_depth`
    pub fn clamp_depth(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_depth)
            .clamp(1, self.max_depth.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_partial_config() {
        let config = RuntimeConfig::parse(
            r#"
            addr = "127.0.0.1:5000"

            [storage]
            backend = "journal"
            journal_path = "/tmp/book.journal"
            "#,
        )
        .unwrap();
        assert_eq!(config.addr, "127.0.0.1:5000");
        assert_eq!(config.metrics_addr, "0.0.0.0:4010");
        assert_eq!(config.storage.backend, StorageBackend::Journal);
        assert_eq!(config.storage.journal_path, PathBuf::from("/tmp/book.journal"));
        assert_eq!(config.storage.max_connections, 5);
    }

    #[test]
    fn test_unknown_backend_is_an_error() {
        assert!(RuntimeConfig::parse("[storage]\nbackend = \"redis\"").is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = RuntimeConfig::from_toml("/nonexistent/config.toml").unwrap();
        assert_eq!(config.default_depth, 50);
        assert_eq!(config.max_body_bytes, 64 * 1024);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_invalid_file_fails_startup() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[storage]\nbackend = \"jurnal\"").unwrap();
        let path = file.path().to_str().unwrap();
        let err = RuntimeConfig::from_toml(path).unwrap_err();
        assert!(err.to_string().contains("failed to parse runtime config"));
    }

    #[test]
    fn test_clamp_depth() {
        let config = RuntimeConfig::new();
        assert_eq!(config.clamp_depth(None), 50);
        assert_eq!(config.clamp_depth(Some(0)), 1);
        assert_eq!(config.clamp_depth(Some(10_000)), 500);
    }
}
