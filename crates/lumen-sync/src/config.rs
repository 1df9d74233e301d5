//! # Sync Engine Configuration
//!
//! TOML-backed configuration for the sync engine.
//!
//! ## Example
//! ```toml
//! [remote]
//! base_url = "https://api.lumen.example/v1"
//! request_timeout_secs = 30
//! # api_token = "..."
//!
//! [sync]
//! batch_size = 50
//! sync_interval_secs = 60
//! backoff_base_secs = 2
//! backoff_factor = 2
//! backoff_max_secs = 300
//!
//! [device]
//! id = "0d9c2f6a-..."
//! name = "till-1"
//! ```
//!
//! Every field has a default, so a missing or partial file still yields a
//! working engine; only `remote.base_url` must be set before going online.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use lumen_core::RetryPolicy;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Sections
// =============================================================================

/// Remote authority connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// Base URL of the authoritative backend.
    pub base_url: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Optional bearer token.
    pub api_token: Option<String>,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            base_url: String::new(),
            request_timeout_secs: 30,
            api_token: None,
        }
    }
}

/// Sync pass tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Maximum entries drained per pass.
    pub batch_size: i64,

    /// Interval between periodic passes, in seconds.
    pub sync_interval_secs: u64,

    /// Base backoff delay after the first failed attempt, in seconds.
    pub backoff_base_secs: u64,

    /// Backoff multiplier per additional failed attempt.
    pub backoff_factor: u32,

    /// Backoff delay cap, in seconds.
    pub backoff_max_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            batch_size: 50,
            sync_interval_secs: 60,
            backoff_base_secs: 2,
            backoff_factor: 2,
            backoff_max_secs: 300,
        }
    }
}

/// Identity of this till.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Stable device identifier, generated on first run.
    pub id: Uuid,

    /// Human-readable device name.
    pub name: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            id: Uuid::new_v4(),
            name: "till".to_string(),
        }
    }
}

// =============================================================================
// Sync Config
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub remote: RemoteSettings,
    pub sync: SyncSettings,
    pub device: DeviceSettings,
}

impl SyncConfig {
    /// Default config file path under the platform config directory
    /// (`~/.config/lumen/pos/sync.toml` on Linux). `None` when the platform
    /// has no home directory.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "lumen", "pos")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    /// Loads from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: SyncConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from a TOML file, falling back to defaults when the file is
    /// absent. A fresh default (including the generated device ID) is
    /// written back so identity survives restarts.
    pub fn load_or_default(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            let config = Self::load(path)?;
            info!(path = %path.display(), "loaded sync config");
            Ok(config)
        } else {
            warn!(path = %path.display(), "no config file, writing defaults");
            let config = SyncConfig::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Writes the configuration as TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> SyncResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Checks internal consistency. Called on load and before start.
    pub fn validate(&self) -> SyncResult<()> {
        if !self.remote.base_url.is_empty() {
            url::Url::parse(&self.remote.base_url).map_err(|e| {
                SyncError::InvalidConfig(format!("remote.base_url is not a valid URL: {e}"))
            })?;
        }

        if self.sync.batch_size <= 0 {
            return Err(SyncError::InvalidConfig(
                "sync.batch_size must be positive".into(),
            ));
        }
        if self.sync.sync_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.sync_interval_secs must be positive".into(),
            ));
        }
        if self.sync.backoff_factor < 2 {
            return Err(SyncError::InvalidConfig(
                "sync.backoff_factor must be at least 2".into(),
            ));
        }
        if self.sync.backoff_max_secs < self.sync.backoff_base_secs {
            return Err(SyncError::InvalidConfig(
                "sync.backoff_max_secs must be >= sync.backoff_base_secs".into(),
            ));
        }

        Ok(())
    }

    /// The retry policy these settings describe.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.sync.backoff_base_secs),
            self.sync.backoff_factor,
            Duration::from_secs(self.sync.backoff_max_secs),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.request_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.sync_interval_secs)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sync.batch_size, 50);
        assert_eq!(config.sync.backoff_max_secs, 300);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [remote]
            base_url = "https://api.example.com/v1"
            "#,
        )
        .unwrap();

        assert_eq!(config.remote.base_url, "https://api.example.com/v1");
        assert_eq!(config.remote.request_timeout_secs, 30);
        assert_eq!(config.sync.sync_interval_secs, 60);
        assert_eq!(config.device.name, "till");
    }

    #[test]
    fn test_invalid_url_rejected() {
        let mut config = SyncConfig::default();
        config.remote.base_url = "not a url".into();
        assert!(matches!(
            config.validate(),
            Err(SyncError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_bad_backoff_rejected() {
        let mut config = SyncConfig::default();
        config.sync.backoff_factor = 1;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.sync.backoff_max_secs = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_mapping() {
        let config = SyncConfig::default();
        let policy = config.retry_policy();
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.factor, 2);
        assert_eq!(policy.max_delay, Duration::from_secs(300));
    }

    #[test]
    fn test_default_config_path_points_at_sync_toml() {
        let path = SyncConfig::default_config_path().unwrap();
        assert_eq!(path.file_name().unwrap(), "sync.toml");
        assert!(path.is_absolute());
    }

    #[test]
    fn test_save_and_reload_preserves_device_id() {
        let dir = std::env::temp_dir().join(format!("lumen-config-{}", Uuid::new_v4()));
        let path = dir.join("sync.toml");

        let first = SyncConfig::load_or_default(&path).unwrap();
        let second = SyncConfig::load_or_default(&path).unwrap();
        assert_eq!(first.device.id, second.device.id);

        std::fs::remove_dir_all(&dir).ok();
    }
}
