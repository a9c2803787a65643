//! Configuration for swachh-ledger

use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("swachh-ledger")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the ledger database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Address the HTTP API binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Bearer token identifying trusted service callers.
    /// When unset, no request is treated as a service caller.
    #[serde(default)]
    pub service_token: Option<String>,

    /// How long a write waits on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Seed default waste categories and badges into an empty database
    #[serde(default = "default_true")]
    pub seed_defaults: bool,
}

fn default_http_port() -> u16 {
    8095
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            http_port: default_http_port(),
            bind_address: default_bind_address(),
            service_token: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            seed_defaults: true,
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| LedgerError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), LedgerError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| LedgerError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get ledger database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join("ledger.db")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    /// Busy timeout as a Duration
    pub fn busy_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("http_port = 9000\n").unwrap();
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.busy_timeout_ms, 5000);
        assert!(config.seed_defaults);
        assert!(config.service_token.is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config {
            storage_dir: dir.path().to_path_buf(),
            service_token: Some("secret".into()),
            ..Config::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.service_token.as_deref(), Some("secret"));
        assert_eq!(loaded.database_path(), dir.path().join("ledger.db"));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "http_port = \"not a port\"\n").unwrap();

        assert!(matches!(Config::load(&path), Err(LedgerError::Config(_))));
        assert!(matches!(Config::load(dir.path().join("missing.toml")), Err(LedgerError::Io(_))));
    }
}
