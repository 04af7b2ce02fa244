//! Application configuration
//!
//! Loaded from `config.toml` in the platform config directory. Every field has
//! a default, so a missing file or a partial file is fine.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_SIGNALING_URL, DEFAULT_STUN_SERVER};
use crate::error::{Error, Result};
use crate::session::SdpType;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub signaling: SignalingConfig,
    pub ice: IceConfig,
    pub audio: AudioConfig,
    pub polling: PollingConfig,
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "comms-link").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, or from the default location when `path` is `None`.
    ///
    /// An explicit path must exist; the default location may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Route and field naming used by a signaling deployment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalingDialect {
    /// `/connectionOffer`, `/connectionAnswer`, keyed by `connectionName`
    #[default]
    Connection,
    /// `/sessionOffer`, `/sessionAnswer`, keyed by `sessionID`
    Session,
}

impl SignalingDialect {
    pub fn id_field(&self) -> &'static str {
        match self {
            SignalingDialect::Connection => "connectionName",
            SignalingDialect::Session => "sessionID",
        }
    }

    pub fn publish_path(&self, sdp_type: SdpType) -> &'static str {
        match (self, sdp_type) {
            (SignalingDialect::Connection, SdpType::Offer) => "/connectionOffer",
            (SignalingDialect::Connection, SdpType::Answer) => "/connectionAnswer",
            (SignalingDialect::Session, SdpType::Offer) => "/sessionOffer",
            (SignalingDialect::Session, SdpType::Answer) => "/sessionAnswer",
        }
    }
}

/// Signaling service endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub base_url: String,
    pub dialect: SignalingDialect,
    /// Per-request timeout; a request that exceeds it counts as no response.
    /// 0 disables the timeout.
    pub request_timeout_secs: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SIGNALING_URL.to_string(),
            dialect: SignalingDialect::default(),
            request_timeout_secs: 30,
        }
    }
}

/// ICE configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub stun_servers: Vec<String>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
        }
    }
}

/// Device selection. Empty names select the system default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: String,
    pub output_device: String,
}

/// Answer polling thresholds, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub initial_interval_secs: u64,
    pub medium_after_secs: u64,
    pub medium_interval_secs: u64,
    pub slow_after_secs: u64,
    pub slow_interval_secs: u64,
    pub max_duration_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_interval_secs: 1,
            medium_after_secs: 30,
            medium_interval_secs: 5,
            slow_after_secs: 5 * 60,
            slow_interval_secs: 30,
            max_duration_secs: 30 * 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.signaling.base_url, DEFAULT_SIGNALING_URL);
        assert_eq!(config.signaling.dialect, SignalingDialect::Connection);
        assert_eq!(config.ice.stun_servers, vec![DEFAULT_STUN_SERVER.to_string()]);
        assert_eq!(config.polling, PollingConfig::default());
        assert!(config.audio.input_device.is_empty());
    }

    #[test]
    fn test_partial_sections() {
        let config = AppConfig::from_toml_str(
            r#"
            [signaling]
            base_url = "http://127.0.0.1:8080"
            dialect = "session"

            [audio]
            output_device = "Speakers"
            "#,
        )
        .unwrap();

        assert_eq!(config.signaling.base_url, "http://127.0.0.1:8080");
        assert_eq!(config.signaling.dialect, SignalingDialect::Session);
        assert_eq!(config.signaling.request_timeout_secs, 30);
        assert_eq!(config.audio.output_device, "Speakers");
        assert_eq!(config.audio.input_device, "");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = AppConfig::from_toml_str("[signaling\nbase_url = 1").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_dialect_routes() {
        assert_eq!(SignalingDialect::Session.publish_path(SdpType::Offer), "/sessionOffer");
        assert_eq!(SignalingDialect::Connection.publish_path(SdpType::Answer), "/connectionAnswer");
        assert_eq!(SignalingDialect::Session.id_field(), "sessionID");
    }

    #[test]
    fn test_round_trips_through_toml() {
        let text = AppConfig::default().to_toml_string().unwrap();
        let parsed = AppConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.polling, PollingConfig::default());
    }
}
