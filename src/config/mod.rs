//! Runtime configuration.
//!
//! Configuration is a JSON document with kebab-case keys. Every key is
//! optional; missing keys take the defaults below, which describe a cache in
//! front of a local origin:
//!
//! ```json
//! {
//!   "listen": "127.0.0.1:8080",
//!   "origin": "http://127.0.0.1:8000",
//!   "store-name": "cache-5ht2-2.0.0",
//!   "storage-dir": ".offcache",
//!   "preload": ["/static/gruvbox.css", "/", "/static/elm.js"],
//!   "offline-page": "offline.html",
//!   "network-timeout-ms": 10000,
//!   "preload-policy": "all-or-nothing"
//! }
//! ```
//!
//! Changing `store-name` is how cached content is invalidated: the new name
//! opens an empty store and the old one is left for `offcache prune`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::fetcher::{DEFAULT_NETWORK_TIMEOUT, DEFAULT_OFFLINE_PAGE};
use crate::store::PreloadPolicy;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Address the proxy listens on.
    pub listen: String,
    /// Upstream origin; also the scope every cache key is built in.
    pub origin: String,
    /// Version-stamped store name.
    pub store_name: String,
    /// Root directory for on-disk stores.
    pub storage_dir: PathBuf,
    /// Paths fetched into the store on install.
    pub preload: Vec<String>,
    /// Key of the placeholder served when nothing else can answer.
    pub offline_page: String,
    pub network_timeout_ms: u64,
    pub preload_policy: PreloadPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_owned(),
            origin: "http://127.0.0.1:8000".to_owned(),
            store_name: "cache-5ht2-2.0.0".to_owned(),
            storage_dir: PathBuf::from(".offcache"),
            preload: ["/static/gruvbox.css", "/", "/static/elm.js"]
                .map(str::to_owned)
                .to_vec(),
            offline_page: DEFAULT_OFFLINE_PAGE.to_owned(),
            network_timeout_ms: DEFAULT_NETWORK_TIMEOUT.as_millis() as u64,
            preload_policy: PreloadPolicy::AllOrNothing,
        }
    }
}

impl Config {
    /// Reads and validates the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings that would otherwise only fail once traffic flows.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.origin.starts_with("http://") {
            return Err(ConfigError::Invalid {
                field: "origin",
                reason: format!("{:?} is not an http:// origin", self.origin),
            });
        }
        crate::store::validate_name(&self.store_name).map_err(|e| ConfigError::Invalid {
            field: "store-name",
            reason: e.to_string(),
        })?;
        if self.network_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "network-timeout-ms",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if self.offline_page.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "offline-page",
                reason: "must not be empty".to_owned(),
            });
        }
        Ok(())
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.store_name, "cache-5ht2-2.0.0");
        assert_eq!(config.preload, vec!["/static/gruvbox.css", "/", "/static/elm.js"]);
        assert_eq!(config.offline_page, "offline.html");
        assert_eq!(config.network_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"store-name": "cache-5ht2-2.1.0", "preload-policy": "best-effort"}"#,
        )
        .unwrap();
        assert_eq!(config.store_name, "cache-5ht2-2.1.0");
        assert_eq!(config.preload_policy, PreloadPolicy::BestEffort);
        assert_eq!(config.listen, "127.0.0.1:8080");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_json::from_str::<Config>(r#"{"cache-name": "x"}"#).is_err());
    }

    #[test]
    fn rejects_https_origin() {
        let config = Config {
            origin: "https://example.com".to_owned(),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "origin", .. })
        ));
    }

    #[test]
    fn rejects_zero_timeout() {
        let config = Config {
            network_timeout_ms: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "network-timeout-ms", .. })
        ));
    }

    #[test]
    fn load_reads_and_validates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offcache.json");

        std::fs::write(&path, r#"{"origin": "http://origin.local:9000"}"#).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.origin, "http://origin.local:9000");

        std::fs::write(&path, r#"{"store-name": "../escape"}"#).unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Invalid { field: "store-name", .. })
        ));

        assert!(matches!(
            Config::load(&dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
