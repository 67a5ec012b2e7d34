//! Engine configuration.
//!
//! A small TOML file; every field has a default so an empty file (or no file
//! at all) yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};

/// Retry tuning, in config-friendly units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
    pub jitter_percent: f64,
    pub exponent_cap: u32,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self {
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            factor: policy.factor,
            jitter_percent: policy.jitter_percent,
            exponent_cap: policy.exponent_cap,
        }
    }
}

impl BackoffSettings {
    /// Materialize the runtime policy.
    #[must_use]
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            factor: self.factor,
            jitter_percent: self.jitter_percent,
            exponent_cap: self.exponent_cap,
        }
    }
}

/// Top-level CareSync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaresyncConfig {
    /// Base URL of the record and notification API.
    pub server_url: String,
    /// Directory holding the durable store; defaults to the platform data
    /// dir.
    pub data_dir: Option<PathBuf>,
    pub backoff: BackoffSettings,
}

impl Default for CaresyncConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8787".to_string(),
            data_dir: None,
            backoff: BackoffSettings::default(),
        }
    }
}

impl CaresyncConfig {
    /// Load from a TOML file; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|err| Error::Config(err.to_string()))
    }

    /// Path of the SQLite database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(default_data_dir)
            .join("caresync.db")
    }
}

/// Platform data directory for CareSync.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("caresync")
}

/// Platform config file path for CareSync.
#[must_use]
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("caresync")
        .join("config.toml")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: CaresyncConfig = toml::from_str("").unwrap();
        assert_eq!(config.server_url, "http://localhost:8787");
        assert_eq!(config.backoff.base_delay_ms, 2_000);
        assert_eq!(config.backoff.exponent_cap, 6);
    }

    #[test]
    fn partial_toml_overrides_selectively() {
        let config: CaresyncConfig = toml::from_str(
            r#"
            server_url = "https://api.care.example"

            [backoff]
            base_delay_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.server_url, "https://api.care.example");
        assert_eq!(config.backoff.base_delay_ms, 500);
        // Untouched fields keep their defaults.
        assert_eq!(config.backoff.max_delay_ms, 300_000);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaresyncConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn settings_round_trip_to_policy() {
        let settings = BackoffSettings {
            base_delay_ms: 100,
            ..BackoffSettings::default()
        };
        let policy = settings.policy();
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert_eq!(
            policy.without_jitter().delay_for_attempt(2),
            Duration::from_millis(200)
        );
    }
}
