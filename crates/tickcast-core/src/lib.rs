//! # Tickcast Core
//!
//! Training-and-prediction engine for per-symbol stock forecasts.
//!
//! ## Overview
//!
//! - **Market data**: fetch bars from an upstream [`BarProvider`], normalize
//!   them into a gap-aware [`TimeSeries`]
//! - **Features**: turn a series into look-ahead-free [`Sample`]s
//! - **Training**: fit a [`ModelFamily`] and evaluate it
//! - **Registry**: cache trained models with TTL and coverage staleness,
//!   single-flight training, LRU eviction
//! - **Service**: answer `predict`/`invalidate` for the API layer
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Bar providers (Yahoo, synthetic) |
//! | [`cache`] | Short-lived TTL cache for fetched series |
//! | [`config`] | [`EngineConfig`] and its sections |
//! | [`data_source`] | Provider contract, normalization, [`MarketData`] |
//! | [`domain`] | Symbols, timestamps, bars, series |
//! | [`error`] | [`ForecastError`] and [`ValidationError`] |
//! | [`features`] | [`FeatureBuilder`] |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`registry`] | [`ModelRegistry`] |
//! | [`retry`] | Backoff for transient provider failures |
//! | [`scheduler`] | Background watch-list refresh |
//! | [`service`] | [`PredictionService`] |
//! | [`trainer`] | [`ModelTrainer`] and model families |
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────┐
//! │ PredictionService │
//! └─────────┬─────────┘
//!           │ get_or_train
//!           ▼
//! ┌───────────────────┐  miss/stale  ┌────────────────┐   ┌──────────────┐
//! │  ModelRegistry    │─────────────▶│ FeatureBuilder │──▶│ ModelTrainer │
//! └───────────────────┘              └────────────────┘   └──────────────┘
//!           ▲
//!           │ series
//! ┌─────────┴─────────┐     ┌──────────────────┐
//! │    MarketData     │────▶│   BarProvider    │
//! └───────────────────┘     └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tickcast_core::{EngineConfig, PredictionService, Symbol, UtcDateTime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = PredictionService::from_config(EngineConfig::default());
//!     let forecast = service
//!         .predict(&Symbol::parse("AAPL")?, 5, UtcDateTime::now())
//!         .await?;
//!     println!("{:.2}", forecast.points[0].price);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cache;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod features;
pub mod http_client;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod trainer;

pub use adapters::{provider_from_config, SyntheticProvider, YahooProvider};

pub use cache::TtlCache;

pub use config::{
    ConfigError, EngineConfig, ForecastConfig, ProviderKind, RegistryConfig, SchedulerConfig,
    SourceConfig, TrainerConfig, WatchEntry,
};

pub use data_source::{
    normalize, BarProvider, MarketData, MarketDataSource, ProviderError, ProviderErrorKind, RawBar,
};

pub use domain::{DateRange, Gap, Interval, PriceBar, Symbol, TimeSeries, UtcDateTime};

pub use error::{ForecastError, ValidationError};

pub use features::{FeatureBuilder, InferenceWindow, LabelKind, Sample};

pub use http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};

pub use registry::{ModelRegistry, RegistryStats};

pub use retry::RetryConfig;

pub use scheduler::{RefreshOutcome, RefreshScheduler, SchedulerHandle};

pub use service::{ForecastPoint, ForecastResult, PredictionService};

pub use trainer::{
    CancelFlag, EvaluationMetrics, FittedParams, Hyperparameters, ModelFamily, ModelFamilyId,
    ModelTrainer, TrainedModel, TrainingConfig,
};
