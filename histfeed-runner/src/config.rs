//! Ingestion configuration.
//!
//! Loaded from a TOML file; every field has a default so a partial file (or
//! none at all) still yields a runnable config. Validation happens at parse
//! time, so a config that loads is a config the orchestrator can run with.

use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use histfeed_core::calendar::SessionHours;
use histfeed_core::provider::{ProviderKind, RelativePeriod};
use histfeed_core::schedule::RateBudget;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Rate-budget section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    pub batch_limit: u32,
    pub window_secs: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            batch_limit: 6,
            window_secs: 62,
        }
    }
}

impl RateConfig {
    pub fn budget(&self) -> RateBudget {
        RateBudget {
            batch_limit: self.batch_limit,
            window: std::time::Duration::from_secs(self.window_secs),
        }
    }
}

/// Trading-session guard boundaries, `HH:MM` in Eastern local time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub open: String,
    pub close: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            open: "09:30".into(),
            close: "16:00".into(),
        }
    }
}

impl GuardConfig {
    pub fn session_hours(&self) -> Result<SessionHours, ConfigError> {
        let parse = |value: &str, field: &str| {
            NaiveTime::parse_from_str(value, "%H:%M")
                .map_err(|_| ConfigError::Invalid(format!("guard.{field} '{value}' is not HH:MM")))
        };
        Ok(SessionHours {
            open: parse(&self.open, "open")?,
            close: parse(&self.close, "close")?,
        })
    }
}

/// Report delivery section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Comma-delimited recipient list.
    pub recipients: String,
    pub subject_prefix: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            recipients: "ops@localhost".into(),
            subject_prefix: "histfeed".into(),
        }
    }
}

/// The complete ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Storage bucket holding both artifacts.
    pub bucket: String,
    /// Key of the persisted close-price table.
    pub dataset_key: String,
    /// Key of the symbol-universe artifact.
    pub universe_key: String,
    /// Root directory of the local object store.
    pub store_root: PathBuf,
    /// Symbols per provider call.
    pub batch_size: usize,
    /// Calendar days of padding on each side of an update fetch window.
    pub buffer_days: i64,
    /// Relative lookback for first-time builds.
    pub period: RelativePeriod,
    /// Side the first batch of a run uses.
    pub first_provider: ProviderKind,
    pub rate: RateConfig,
    pub guard: GuardConfig,
    pub notify: NotifyConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bucket: "stocks-stats".into(),
            dataset_key: "stocks_historical_data.csv".into(),
            universe_key: "all_stocks.csv".into(),
            store_root: PathBuf::from("data"),
            batch_size: 20,
            buffer_days: 2,
            period: RelativePeriod::OneYear,
            first_provider: ProviderKind::Chart,
            rate: RateConfig::default(),
            guard: GuardConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.rate.batch_limit == 0 {
            return Err(ConfigError::Invalid(
                "rate.batch_limit must be at least 1".into(),
            ));
        }
        if self.rate.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "rate.window_secs must be positive".into(),
            ));
        }
        if self.buffer_days < 0 {
            return Err(ConfigError::Invalid("buffer_days must not be negative".into()));
        }
        let hours = self.guard.session_hours()?;
        if hours.open >= hours.close {
            return Err(ConfigError::Invalid(
                "guard.open must be earlier than guard.close".into(),
            ));
        }
        Ok(())
    }
}
