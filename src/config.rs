//! Client configuration.
//!
//! Values come from defaults, overridden by `NOMAD_*` environment variables.
//! The CLI exposes the same settings as flags.

use crate::error::{NomadError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default relayer / indexer endpoint.
pub const DEFAULT_INDEXER_API: &str = "http://127.0.0.1:8888";

/// Default subdomain auth relayer.
pub const DEFAULT_AUTH_RELAYER: &str = "https://relayer.ddrp.network";

/// Default local data directory.
pub const DEFAULT_DATA_DIR: &str = "nomad_data";

/// Default HTTP timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

pub const ENV_INDEXER_API: &str = "NOMAD_INDEXER_API";
pub const ENV_AUTH_RELAYER: &str = "NOMAD_AUTH_RELAYER";
pub const ENV_DATA_DIR: &str = "NOMAD_DATA_DIR";
pub const ENV_REQUEST_TIMEOUT: &str = "NOMAD_REQUEST_TIMEOUT_SECS";

/// Settings shared by the CLI and library consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the relayer and indexer.
    pub indexer_api: String,
    /// Base URL of the subdomain auth relayer.
    pub auth_relayer_url: String,
    /// Directory of the local RocksDB store.
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            indexer_api: DEFAULT_INDEXER_API.to_string(),
            auth_relayer_url: DEFAULT_AUTH_RELAYER.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup(ENV_INDEXER_API) {
            config.indexer_api = url;
        }
        if let Some(url) = lookup(ENV_AUTH_RELAYER) {
            config.auth_relayer_url = url;
        }
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup(ENV_REQUEST_TIMEOUT) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                NomadError::config(format!(
                    "{} must be a number of seconds, got '{}'",
                    ENV_REQUEST_TIMEOUT, secs
                ))
            })?;
            if secs == 0 {
                return Err(NomadError::config(format!(
                    "{} must be positive",
                    ENV_REQUEST_TIMEOUT
                )));
            }
            config.request_timeout = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks that URLs look like HTTP endpoints.
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("indexer API", &self.indexer_api),
            ("auth relayer", &self.auth_relayer_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(NomadError::config(format!(
                    "Invalid {} URL '{}': expected http:// or https://",
                    name, url
                )));
            }
        }
        Ok(())
    }

    /// Path of the RocksDB store inside the data directory.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("local")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.indexer_api, "http://127.0.0.1:8888");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_INDEXER_API, "https://indexer.example"),
            (ENV_DATA_DIR, "/tmp/nomad"),
            (ENV_REQUEST_TIMEOUT, "30"),
            (ENV_AUTH_RELAYER, ""),
        ]))
        .unwrap();
        assert_eq!(config.indexer_api, "https://indexer.example");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/nomad"));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.auth_relayer_url, DEFAULT_AUTH_RELAYER);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[(ENV_REQUEST_TIMEOUT, "soon")])),
            Err(NomadError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[(ENV_REQUEST_TIMEOUT, "0")])),
            Err(NomadError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[(ENV_INDEXER_API, "ftp://x")])),
            Err(NomadError::Config(_))
        ));
    }
}
