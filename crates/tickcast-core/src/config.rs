//! Engine configuration.
//!
//! Every tunable lives in [`EngineConfig`] and is handed to components at
//! construction. All sections deserialize with defaults, so a JSON file
//! only needs the keys it overrides:
//!
//! ```json
//! { "registry": { "ttl_secs": 600 }, "trainer": { "family": "gradient_descent" } }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::features::{validate_horizon, validate_window, MAX_HORIZON};
use crate::retry::RetryConfig;
use crate::trainer::{Hyperparameters, ModelFamilyId};
use crate::{Interval, Symbol, ValidationError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Yahoo,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub provider: ProviderKind,
    /// Overrides the provider's default endpoint.
    pub base_url: Option<String>,
    pub request_timeout_ms: u64,
    /// Budget for one whole fetch, retries included.
    pub fetch_deadline_ms: u64,
    pub retry: RetryConfig,
    /// Zero disables rate limiting.
    pub requests_per_minute: u32,
    /// Zero disables the series cache.
    pub cache_ttl_ms: u64,
    pub cache_max_entries: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Yahoo,
            base_url: None,
            request_timeout_ms: 10_000,
            fetch_deadline_ms: 20_000,
            retry: RetryConfig::default(),
            requests_per_minute: 120,
            cache_ttl_ms: 600_000,
            cache_max_entries: 100,
        }
    }
}

impl SourceConfig {
    pub fn fetch_deadline(&self) -> Duration {
        Duration::from_millis(self.fetch_deadline_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub family: ModelFamilyId,
    pub window: usize,
    pub min_samples: usize,
    pub timeout_ms: u64,
    pub hyperparameters: Hyperparameters,
    /// Random-search candidates per training run; zero trains the
    /// configured hyperparameters only.
    pub tune_candidates: usize,
    pub tune_seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            family: ModelFamilyId::Ridge,
            window: 20,
            min_samples: 30,
            timeout_ms: 30_000,
            hyperparameters: Hyperparameters::default(),
            tune_candidates: 0,
            tune_seed: 42,
        }
    }
}

impl TrainerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Models older than this are retrained on next use.
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 6 * 60 * 60,
            capacity: 256,
        }
    }
}

impl RegistryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub interval: Interval,
    /// History fetched before `as_of` for training and inference.
    pub lookback_days: u32,
    pub max_horizon: usize,
    pub max_steps: usize,
    /// Band half-width in residual standard deviations.
    pub band_z: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            interval: Interval::OneDay,
            lookback_days: 730,
            max_horizon: 30,
            max_steps: 30,
            band_z: 1.96,
        }
    }
}

impl ForecastConfig {
    pub fn lookback(&self) -> Duration {
        Duration::from_secs(u64::from(self.lookback_days) * 86_400)
    }
}

/// One key the refresh scheduler keeps warm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub symbol: Symbol,
    pub horizon: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    pub watchlist: Vec<WatchEntry>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30 * 60,
            watchlist: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub source: SourceConfig,
    pub trainer: TrainerConfig,
    pub registry: RegistryConfig,
    pub forecast: ForecastConfig,
    pub scheduler: SchedulerConfig,
}

impl EngineConfig {
    /// Load and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let source = &self.source;
        positive("source.request_timeout_ms", source.request_timeout_ms)?;
        positive("source.fetch_deadline_ms", source.fetch_deadline_ms)?;
        if source.cache_max_entries == 0 {
            return Err(ValidationError::out_of_range(
                "source.cache_max_entries",
                0,
                1,
                usize::MAX,
            ));
        }
        if !source.retry.factor.is_finite() || source.retry.factor < 1.0 {
            return Err(ValidationError::out_of_range(
                "source.retry.factor",
                source.retry.factor,
                1,
                f64::MAX,
            ));
        }

        let trainer = &self.trainer;
        validate_window(trainer.window)?;
        trainer.hyperparameters.validate()?;
        if trainer.min_samples < 2 {
            return Err(ValidationError::out_of_range(
                "trainer.min_samples",
                trainer.min_samples,
                2,
                usize::MAX,
            ));
        }
        positive("trainer.timeout_ms", trainer.timeout_ms)?;

        positive("registry.ttl_secs", self.registry.ttl_secs)?;
        if self.registry.capacity == 0 {
            return Err(ValidationError::out_of_range(
                "registry.capacity",
                0,
                1,
                usize::MAX,
            ));
        }

        let forecast = &self.forecast;
        validate_horizon(forecast.max_horizon)?;
        if forecast.max_steps == 0 || forecast.max_steps > MAX_HORIZON {
            return Err(ValidationError::out_of_range(
                "forecast.max_steps",
                forecast.max_steps,
                1,
                MAX_HORIZON,
            ));
        }
        if forecast.lookback_days == 0 || forecast.lookback_days > 3_650 {
            return Err(ValidationError::out_of_range(
                "forecast.lookback_days",
                forecast.lookback_days,
                1,
                3_650,
            ));
        }
        if !forecast.band_z.is_finite() {
            return Err(ValidationError::NonFiniteValue {
                field: "forecast.band_z",
            });
        }
        if forecast.band_z < 0.0 {
            return Err(ValidationError::NegativeValue {
                field: "forecast.band_z",
            });
        }

        if !self.scheduler.watchlist.is_empty() {
            positive("scheduler.interval_secs", self.scheduler.interval_secs)?;
        }
        for entry in &self.scheduler.watchlist {
            if entry.horizon == 0 || entry.horizon > forecast.max_horizon {
                return Err(ValidationError::out_of_range(
                    "scheduler.watchlist.horizon",
                    entry.horizon,
                    1,
                    forecast.max_horizon,
                ));
            }
        }

        Ok(())
    }
}

fn positive(field: &'static str, value: u64) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::out_of_range(field, value, 1, u64::MAX));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.trainer.window, 20);
        assert_eq!(config.forecast.lookback_days, 730);
        assert_eq!(config.registry.ttl(), Duration::from_secs(21_600));
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{
                "registry": {{ "ttl_secs": 600 }},
                "trainer": {{ "family": "gradient_descent", "hyperparameters": {{ "patience": 9 }} }},
                "scheduler": {{ "watchlist": [{{ "symbol": "acme", "horizon": 5 }}] }}
            }}"#
        )
        .expect("write config");

        let config = EngineConfig::from_json_file(file.path()).expect("config");

        assert_eq!(config.registry.ttl_secs, 600);
        assert_eq!(config.registry.capacity, 256);
        assert_eq!(config.trainer.family, ModelFamilyId::GradientDescent);
        assert_eq!(config.trainer.hyperparameters.patience, 9);
        assert_eq!(config.trainer.hyperparameters.max_epochs, 2_000);
        assert_eq!(config.scheduler.watchlist[0].symbol.as_str(), "ACME");
    }

    #[test]
    fn invalid_values_are_rejected_on_load() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{ "registry": {{ "capacity": 0 }} }}"#).expect("write config");

        let err = EngineConfig::from_json_file(file.path()).expect_err("capacity 0");
        assert!(matches!(
            err,
            ConfigError::Invalid(ValidationError::OutOfRange {
                field: "registry.capacity",
                ..
            })
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "{{ not json").expect("write config");

        let err = EngineConfig::from_json_file(file.path()).expect_err("parse");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = EngineConfig::from_json_file(dir.path().join("absent.json")).expect_err("io");
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn watchlist_horizons_respect_the_maximum() {
        let mut config = EngineConfig::default();
        config.scheduler.watchlist.push(WatchEntry {
            symbol: Symbol::parse("ACME").expect("symbol"),
            horizon: 99,
        });
        assert!(config.validate().is_err());
    }
}
