//! # Prediction Service
//!
//! Entry point for the API layer. A forecast request goes:
//!
//! ```text
//! fetch lookback series ─▶ registry.get_or_train ─▶ latest window ─▶ predict
//!                                   │ miss / stale
//!                                   ▼
//!                     FeatureBuilder ─▶ ModelTrainer
//! ```
//!
//! Errors from every stage are returned unchanged so callers can tell an
//! unknown symbol from a short history from a failed fit.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::adapters::provider_from_config;
use crate::config::EngineConfig;
use crate::data_source::{BarProvider, MarketData, MarketDataSource};
use crate::features::{FeatureBuilder, LabelKind};
use crate::registry::ModelRegistry;
use crate::trainer::{ModelTrainer, TrainedModel, TrainingConfig};
use crate::{DateRange, ForecastError, Interval, Symbol, TimeSeries, UtcDateTime, ValidationError};

/// One forecast price with its optional uncertainty band.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub step: usize,
    pub at: UtcDateTime,
    pub price: f64,
    /// `None` when the model reported no residual spread.
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastResult {
    pub symbol: Symbol,
    pub interval: Interval,
    pub horizon: usize,
    /// Request time the history was cut at.
    pub as_of: UtcDateTime,
    /// Timestamp of the last bar the prediction starts from.
    pub last_bar_at: UtcDateTime,
    pub last_close: f64,
    pub points: Vec<ForecastPoint>,
    pub model_id: Uuid,
    pub model_trained_at: UtcDateTime,
}

pub struct PredictionService {
    source: Arc<dyn MarketDataSource>,
    registry: ModelRegistry,
    features: FeatureBuilder,
    trainer: ModelTrainer,
    config: EngineConfig,
}

impl PredictionService {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        registry: ModelRegistry,
        config: EngineConfig,
    ) -> Self {
        Self {
            source,
            registry,
            features: FeatureBuilder::default(),
            trainer: ModelTrainer::new(config.trainer.min_samples),
            config,
        }
    }

    /// Wire a service from config: provider, market data layer and registry.
    pub fn from_config(config: EngineConfig) -> Self {
        let provider = provider_from_config(&config.source);
        Self::with_provider(provider, config)
    }

    pub fn with_provider(provider: Arc<dyn BarProvider>, config: EngineConfig) -> Self {
        let source = Arc::new(MarketData::from_config(provider, &config.source));
        let registry = ModelRegistry::from_config(&config.registry);
        Self::new(source, registry, config)
    }

    pub fn with_feature_builder(mut self, features: FeatureBuilder) -> Self {
        self.features = features;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The registry key for `symbol` at `horizon` under the configured
    /// defaults.
    pub fn training_config(
        &self,
        symbol: &Symbol,
        horizon: usize,
    ) -> Result<TrainingConfig, ForecastError> {
        let max = self.config.forecast.max_horizon;
        if horizon == 0 || horizon > max {
            return Err(ValidationError::out_of_range("horizon", horizon, 1, max).into());
        }
        let trainer = &self.config.trainer;
        let config = TrainingConfig::new(
            symbol.clone(),
            self.config.forecast.interval,
            trainer.window,
            horizon,
            trainer.family,
            trainer.hyperparameters,
        )?;
        Ok(config.with_label_kind(self.features.label_kind()))
    }

    /// Price `horizon` intervals after the last bar at or before `as_of`.
    pub async fn predict(
        &self,
        symbol: &Symbol,
        horizon: usize,
        as_of: UtcDateTime,
    ) -> Result<ForecastResult, ForecastError> {
        let config = self.training_config(symbol, horizon)?;
        let series = self.history(symbol, as_of).await?;
        let model = self.resolve(&config, series.clone()).await?;

        let window = self.features.latest(&series, config.window())?;
        let predicted = model.predict(&window.features)?;
        let spread = self.spread(&model, window.last_close, 1);

        let price = to_price(&model, window.last_close, predicted);
        let at = window
            .as_of
            .saturating_add(step_duration(config.interval(), horizon));
        let point = ForecastPoint {
            step: horizon,
            at,
            price,
            lower: spread.map(|half| price - half),
            upper: spread.map(|half| price + half),
        };

        tracing::info!(
            symbol = %symbol,
            horizon,
            last_close = window.last_close,
            price,
            model_id = %model.id(),
            "forecast produced"
        );
        Ok(self.result(symbol, horizon, as_of, &window.as_of, window.last_close, vec![point], &model))
    }

    /// `steps` one-interval forecasts from the horizon-1 model, each fed
    /// back into the window as if it had been observed.
    pub async fn predict_path(
        &self,
        symbol: &Symbol,
        steps: usize,
        as_of: UtcDateTime,
    ) -> Result<ForecastResult, ForecastError> {
        let max = self.config.forecast.max_steps;
        if steps == 0 || steps > max {
            return Err(ValidationError::out_of_range("steps", steps, 1, max).into());
        }
        let config = self.training_config(symbol, 1)?;
        let series = self.history(symbol, as_of).await?;
        let model = self.resolve(&config, series.clone()).await?;

        let mut window = self.features.latest(&series, config.window())?;
        let (last_bar_at, last_close) = (window.as_of, window.last_close);
        let step = config.interval().duration();
        let mut points = Vec::with_capacity(steps);
        for index in 1..=steps {
            let predicted = model.predict(&window.features)?;
            let price = to_price(&model, window.last_close, predicted);
            if !(price > 0.0 && price.is_finite()) {
                return Err(ForecastError::diverged(format!(
                    "forecast path reached price {price} at step {index}"
                )));
            }
            let spread = self.spread(&model, window.last_close, index);
            let at = window.as_of.saturating_add(step);
            points.push(ForecastPoint {
                step: index,
                at,
                price,
                lower: spread.map(|half| price - half),
                upper: spread.map(|half| price + half),
            });
            window.roll((price / window.last_close).ln(), at);
        }

        tracing::info!(symbol = %symbol, steps, model_id = %model.id(), "forecast path produced");
        Ok(self.result(symbol, 1, as_of, &last_bar_at, last_close, points, &model))
    }

    /// Drop the cached model for `symbol` at `horizon`.
    pub fn invalidate(&self, symbol: &Symbol, horizon: usize) -> Result<bool, ForecastError> {
        let config = self.training_config(symbol, horizon)?;
        Ok(self.registry.invalidate(&config))
    }

    /// Retrain `symbol` at `horizon` on data up to now, regardless of the
    /// cached model's age.
    pub async fn refresh(
        &self,
        symbol: &Symbol,
        horizon: usize,
    ) -> Result<Arc<TrainedModel>, ForecastError> {
        let config = self.training_config(symbol, horizon)?;
        self.registry.invalidate(&config);
        let series = self.history(symbol, UtcDateTime::now()).await?;
        self.resolve(&config, series).await
    }

    /// The lookback series ending at `as_of`.
    pub async fn history(
        &self,
        symbol: &Symbol,
        as_of: UtcDateTime,
    ) -> Result<TimeSeries, ForecastError> {
        let forecast = &self.config.forecast;
        let range = DateRange::trailing(as_of, forecast.lookback());
        self.source
            .fetch(symbol, range, forecast.interval, self.config.source.fetch_deadline())
            .await
    }

    async fn resolve(
        &self,
        config: &TrainingConfig,
        series: TimeSeries,
    ) -> Result<Arc<TrainedModel>, ForecastError> {
        let coverage = series.data_range();
        let features = FeatureBuilder::new(config.label_kind());
        let trainer = self.trainer.clone();
        let trainer_config = &self.config.trainer;
        let deadline = trainer_config.timeout();
        let candidates = match trainer_config.tune_candidates {
            0 => Vec::new(),
            count => config
                .hyperparameters()
                .random_candidates(count, trainer_config.tune_seed),
        };
        let task_config = config.clone();

        self.registry
            .get_or_train(config, coverage, move || async move {
                let samples =
                    features.build(&series, task_config.window(), task_config.horizon())?;
                trainer
                    .tune_with_deadline(samples, task_config, candidates, deadline)
                    .await
            })
            .await
    }

    /// Half-width of the band around a price `steps` intervals out.
    fn spread(&self, model: &TrainedModel, last_close: f64, steps: usize) -> Option<f64> {
        let sigma = model.metrics().residual_std * (steps as f64).sqrt();
        let half = self.config.forecast.band_z * sigma;
        if half <= 0.0 || !half.is_finite() {
            return None;
        }
        Some(match model.config().label_kind() {
            LabelKind::Relative => last_close * half,
            LabelKind::Absolute => half,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn result(
        &self,
        symbol: &Symbol,
        horizon: usize,
        as_of: UtcDateTime,
        last_bar_at: &UtcDateTime,
        last_close: f64,
        points: Vec<ForecastPoint>,
        model: &TrainedModel,
    ) -> ForecastResult {
        ForecastResult {
            symbol: symbol.clone(),
            interval: self.config.forecast.interval,
            horizon,
            as_of,
            last_bar_at: *last_bar_at,
            last_close,
            points,
            model_id: model.id(),
            model_trained_at: model.trained_at(),
        }
    }
}

/// Price implied by a model output, read in the model's own label units.
fn to_price(model: &TrainedModel, last_close: f64, predicted: f64) -> f64 {
    match model.config().label_kind() {
        LabelKind::Relative => last_close * (1.0 + predicted),
        LabelKind::Absolute => last_close + predicted,
    }
}

fn step_duration(interval: Interval, steps: usize) -> Duration {
    interval
        .duration()
        .saturating_mul(u32::try_from(steps).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SyntheticProvider;
    use crate::config::ProviderKind;

    fn engine_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.source.provider = ProviderKind::Synthetic;
        config.forecast.lookback_days = 200;
        config.trainer.window = 10;
        config
    }

    fn as_of() -> UtcDateTime {
        UtcDateTime::parse("2024-06-28T23:00:00Z").expect("as_of")
    }

    fn acme() -> Symbol {
        Symbol::parse("ACME").expect("symbol")
    }

    #[tokio::test]
    async fn predicts_one_point_after_the_last_bar() {
        let service = PredictionService::from_config(engine_config());

        let result = service.predict(&acme(), 5, as_of()).await.expect("forecast");

        assert_eq!(result.points.len(), 1);
        let point = &result.points[0];
        assert_eq!(point.step, 5);
        assert_eq!(
            point.at,
            result.last_bar_at.saturating_add(Duration::from_secs(5 * 86_400))
        );
        assert!(point.price.is_finite() && point.price > 0.0);
        if let (Some(lower), Some(upper)) = (point.lower, point.upper) {
            assert!(lower < point.price && point.price < upper);
        }
        assert_eq!(service.registry().len(), 1);
    }

    #[tokio::test]
    async fn horizon_outside_bounds_is_a_validation_error() {
        let service = PredictionService::from_config(engine_config());

        for horizon in [0, 31] {
            let err = service
                .predict(&acme(), horizon, as_of())
                .await
                .expect_err("out of range");
            assert_eq!(err.code(), "request.invalid");
        }
        assert!(service.registry().is_empty());
    }

    #[tokio::test]
    async fn unknown_symbol_is_data_unavailable() {
        let provider = SyntheticProvider::new().with_unknown(Symbol::parse("NOPE").expect("symbol"));
        let service = PredictionService::with_provider(Arc::new(provider), engine_config());

        let err = service
            .predict(&Symbol::parse("NOPE").expect("symbol"), 1, as_of())
            .await
            .expect_err("unknown");
        assert!(matches!(err, ForecastError::DataUnavailable { .. }));
    }

    #[tokio::test]
    async fn short_history_is_insufficient_data() {
        let mut config = engine_config();
        config.forecast.lookback_days = 20;
        let service = PredictionService::from_config(config);

        let err = service.predict(&acme(), 1, as_of()).await.expect_err("short");
        assert_eq!(err.code(), "data.insufficient");
    }

    #[tokio::test]
    async fn path_steps_one_interval_at_a_time() {
        let service = PredictionService::from_config(engine_config());

        let result = service.predict_path(&acme(), 4, as_of()).await.expect("path");

        assert_eq!(result.horizon, 1);
        assert_eq!(result.points.len(), 4);
        for (index, pair) in result.points.windows(2).enumerate() {
            assert_eq!(pair[0].step, index + 1);
            assert_eq!(pair[1].at, pair[0].at.saturating_add(Duration::from_secs(86_400)));
        }
        let single = service.predict(&acme(), 1, as_of()).await.expect("single");
        assert!((single.points[0].price - result.points[0].price).abs() < 1e-9);
        assert_eq!(single.model_id, result.model_id);
    }

    #[tokio::test]
    async fn refresh_replaces_the_cached_model() {
        let service = PredictionService::from_config(engine_config());
        let first = service.predict(&acme(), 2, as_of()).await.expect("forecast");

        let refreshed = service.refresh(&acme(), 2).await.expect("refresh");

        assert_ne!(refreshed.id(), first.model_id);
        let config = service.training_config(&acme(), 2).expect("config");
        assert_eq!(service.registry().peek(&config).expect("cached").id(), refreshed.id());
    }

    #[tokio::test]
    async fn services_with_different_label_kinds_never_share_a_model() {
        let registry = ModelRegistry::from_config(&engine_config().registry);
        let source: Arc<dyn MarketDataSource> =
            Arc::new(MarketData::new(Arc::new(SyntheticProvider::new())));
        let relative = PredictionService::new(Arc::clone(&source), registry.clone(), engine_config());
        let absolute = PredictionService::new(source, registry.clone(), engine_config())
            .with_feature_builder(FeatureBuilder::new(LabelKind::Absolute));

        let from_relative = relative.predict(&acme(), 5, as_of()).await.expect("relative");
        let from_absolute = absolute.predict(&acme(), 5, as_of()).await.expect("absolute");

        assert_ne!(from_relative.model_id, from_absolute.model_id);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.stats().trainings_started, 2);

        let standalone = PredictionService::from_config(engine_config())
            .with_feature_builder(FeatureBuilder::new(LabelKind::Absolute));
        let own = standalone.predict(&acme(), 5, as_of()).await.expect("own registry");
        assert!((own.points[0].price - from_absolute.points[0].price).abs() < 1e-9);
    }
}
