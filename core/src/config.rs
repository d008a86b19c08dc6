// Push configuration: gateway endpoints, credentials and timing
//
// Stored as JSON. Every field has a default, so a partial file (or `{}`)
// loads cleanly and only overrides what it names.

use crate::channel::Endpoints;
use crate::delivery::DeliveryOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Gateway address per channel
    pub endpoints: Endpoints,

    /// PEM file holding the push certificate chain and private key
    pub certificate_path: Option<PathBuf>,

    /// Extra CA certificates to trust, for private gateways
    pub ca_path: Option<PathBuf>,

    /// Reconnect a connection idle for longer than this
    pub idle_reconnect_secs: u64,

    /// Reconnect-and-retry budget per send
    pub max_retries: u32,

    /// Pause before each reconnect
    pub retry_delay_ms: u64,

    /// Wait for an error response after a checked send
    pub error_read_timeout_ms: u64,

    pub connect_timeout_secs: u64,

    /// Check one in N sends for an error response
    pub debug_sample: Option<u32>,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            certificate_path: None,
            ca_path: None,
            idle_reconnect_secs: 120,
            max_retries: 2,
            retry_delay_ms: 1000,
            error_read_timeout_ms: 1000,
            connect_timeout_secs: 30,
            debug_sample: None,
        }
    }
}

impl PushConfig {
    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PushConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).map_err(write_err)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in crate::channel::ChannelKind::ALL {
            let endpoint = self.endpoints.get(kind);
            if endpoint.host.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} endpoint has no host", kind)));
            }
            if endpoint.port == 0 {
                return Err(ConfigError::Invalid(format!("{} endpoint has port 0", kind)));
            }
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid("connect_timeout_secs must be > 0".into()));
        }
        if self.debug_sample == Some(0) {
            return Err(ConfigError::Invalid("debug_sample must be > 0".into()));
        }
        Ok(())
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_reconnect_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn delivery_options(&self) -> DeliveryOptions {
        DeliveryOptions {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            error_read_timeout: Duration::from_millis(self.error_read_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelKind, GATEWAY_PORT, SANDBOX_HOST};
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_delivery_constants() {
        let config = PushConfig::default();
        assert_eq!(config.idle_interval(), crate::pool::IDLE_RECONNECTION_INTERVAL);
        assert_eq!(config.delivery_options(), DeliveryOptions::default());
        assert_eq!(config.connect_timeout(), crate::transport::tls::CONNECT_TIMEOUT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = PushConfig::default();
        config.certificate_path = Some(PathBuf::from("/etc/apn/push.pem"));
        config.max_retries = 5;
        config.debug_sample = Some(100);
        config.save(&path).unwrap();

        assert_eq!(PushConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let partial = r#"{
            "max_retries": 0,
            "endpoints": {"production": {"host": "localhost", "port": 9000}}
        }"#;
        fs::write(&path, partial).unwrap();

        let config = PushConfig::load(&path).unwrap();
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.retry_delay_ms, 1000);
        assert_eq!(config.endpoints.get(ChannelKind::Production).port, 9000);
        assert_eq!(config.endpoints.get(ChannelKind::Sandbox).host, SANDBOX_HOST);
        assert_eq!(config.endpoints.get(ChannelKind::Sandbox).port, GATEWAY_PORT);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = PushConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(PushConfig::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validate_rejects_empty_host() {
        let mut config = PushConfig::default();
        config.endpoints.get_mut(ChannelKind::Restricted).host = " ".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_sample() {
        let config = PushConfig {
            debug_sample: Some(0),
            ..PushConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
