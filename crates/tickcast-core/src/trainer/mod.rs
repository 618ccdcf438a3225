//! # Model Training
//!
//! [`ModelTrainer`] turns samples into an immutable [`TrainedModel`]:
//!
//! 1. check statistical sufficiency (`min_samples`)
//! 2. standardize and split chronologically into a [`Dataset`]
//! 3. fit through the [`ModelFamily`] named by the config
//! 4. evaluate on both splits and reject anything non-finite
//!
//! Fitting is synchronous and CPU bound. [`ModelTrainer::train_with_deadline`]
//! moves it onto the blocking pool so async callers never stall a runtime
//! worker.

mod config;
mod family;
mod metrics;

use std::fmt::{Debug, Formatter};
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

pub use config::{Hyperparameters, ModelFamilyId, TrainingConfig};
pub use family::{
    CancelFlag, Dataset, Drift, FittedParams, GradientDescent, ModelFamily, Ridge,
};
pub use metrics::EvaluationMetrics;

use crate::features::Sample;
use crate::{DateRange, ForecastError, UtcDateTime, ValidationError};

/// A fitted model with everything needed to predict and to judge freshness.
#[derive(Clone, Serialize)]
pub struct TrainedModel {
    id: Uuid,
    config: TrainingConfig,
    hyperparameters: Hyperparameters,
    params: FittedParams,
    training_range: DateRange,
    trained_at: UtcDateTime,
    metrics: EvaluationMetrics,
    sample_count: usize,
}

impl TrainedModel {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The registry key this model was trained for. After tuning, the
    /// hyperparameters actually fitted are in
    /// [`hyperparameters`](Self::hyperparameters).
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    pub fn params(&self) -> &FittedParams {
        &self.params
    }

    /// First feature bar to last label bar seen in training.
    pub fn training_range(&self) -> DateRange {
        self.training_range
    }

    pub fn trained_at(&self) -> UtcDateTime {
        self.trained_at
    }

    pub fn metrics(&self) -> &EvaluationMetrics {
        &self.metrics
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Predicted label for one feature window.
    pub fn predict(&self, features: &[f64]) -> Result<f64, ForecastError> {
        let window = self.config.window();
        if features.len() != window {
            return Err(ValidationError::out_of_range("features", features.len(), window, window).into());
        }
        let value = self.config.family().family().predict(&self.params, features);
        if !value.is_finite() {
            return Err(ForecastError::diverged("model produced a non-finite prediction"));
        }
        Ok(value)
    }
}

impl Debug for TrainedModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainedModel")
            .field("id", &self.id)
            .field("config", &self.config.to_string())
            .field("trained_at", &self.trained_at)
            .field("training_range", &self.training_range)
            .field("sample_count", &self.sample_count)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ModelTrainer {
    min_samples: usize,
}

impl Default for ModelTrainer {
    fn default() -> Self {
        Self { min_samples: 30 }
    }
}

impl ModelTrainer {
    pub fn new(min_samples: usize) -> Self {
        Self {
            min_samples: min_samples.max(2),
        }
    }

    pub const fn min_samples(&self) -> usize {
        self.min_samples
    }

    pub fn train(
        &self,
        samples: &[Sample],
        config: &TrainingConfig,
    ) -> Result<TrainedModel, ForecastError> {
        self.train_cancellable(samples, config, &CancelFlag::new())
    }

    /// [`train`](Self::train), stopping at the next epoch once `cancel` is raised.
    pub fn train_cancellable(
        &self,
        samples: &[Sample],
        config: &TrainingConfig,
        cancel: &CancelFlag,
    ) -> Result<TrainedModel, ForecastError> {
        if samples.len() < self.min_samples {
            return Err(ForecastError::insufficient(
                "training samples",
                self.min_samples,
                samples.len(),
            ));
        }
        if let Some(sample) = samples.iter().find(|s| s.features.len() != config.window()) {
            return Err(ValidationError::out_of_range(
                "features",
                sample.features.len(),
                config.window(),
                config.window(),
            )
            .into());
        }

        let started = Instant::now();
        let hyperparameters = config.hyperparameters();
        let model_family = config.family().family();

        let dataset = Dataset::from_samples(samples, hyperparameters.validation_fraction)?;
        let params = model_family.fit(&dataset, hyperparameters, cancel)?;
        if !params.is_finite() {
            return Err(ForecastError::diverged("fit produced non-finite parameters"));
        }

        let split = family::holdout_split(samples.len(), hyperparameters.validation_fraction);
        let metrics = metrics::evaluate(model_family, &params, &samples[..split], &samples[split..])?;

        let training_range = training_range(samples)?;
        let model = TrainedModel {
            id: Uuid::new_v4(),
            config: config.clone(),
            hyperparameters: *hyperparameters,
            params,
            training_range,
            trained_at: UtcDateTime::now(),
            metrics,
            sample_count: samples.len(),
        };

        tracing::info!(
            config = %config,
            samples = samples.len(),
            train_mse = model.metrics.train_mse,
            validation_mse = ?model.metrics.validation_mse,
            epochs = model.metrics.epochs,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model trained"
        );
        Ok(model)
    }

    /// Train on the blocking pool, giving up after `deadline`.
    ///
    /// On expiry the fit is told to stop and [`ForecastError::TrainingTimeout`]
    /// is returned without waiting for it.
    pub async fn train_with_deadline(
        &self,
        samples: Vec<Sample>,
        config: TrainingConfig,
        deadline: Duration,
    ) -> Result<TrainedModel, ForecastError> {
        self.tune_with_deadline(samples, config, Vec::new(), deadline)
            .await
    }

    /// [`tune`](Self::tune) on the blocking pool under one shared deadline.
    pub async fn tune_with_deadline(
        &self,
        samples: Vec<Sample>,
        config: TrainingConfig,
        candidates: Vec<Hyperparameters>,
        deadline: Duration,
    ) -> Result<TrainedModel, ForecastError> {
        let trainer = self.clone();
        let cancel = CancelFlag::new();
        let task_cancel = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || {
            trainer.tune_cancellable(&samples, &config, &candidates, &task_cancel)
        });

        match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(ForecastError::TrainingAborted {
                reason: format!("training task failed: {join_error}"),
            }),
            Err(_) => {
                cancel.cancel();
                let timeout_ms = deadline.as_millis() as u64;
                tracing::warn!(timeout_ms, "training deadline exceeded");
                Err(ForecastError::TrainingTimeout { timeout_ms })
            }
        }
    }

    /// Train one model per candidate and keep the one with the lowest
    /// selection MSE. Candidates that fail are skipped; if all fail the last
    /// error is returned.
    pub fn tune(
        &self,
        samples: &[Sample],
        base_config: &TrainingConfig,
        candidates: &[Hyperparameters],
    ) -> Result<TrainedModel, ForecastError> {
        self.tune_cancellable(samples, base_config, candidates, &CancelFlag::new())
    }

    pub fn tune_cancellable(
        &self,
        samples: &[Sample],
        base_config: &TrainingConfig,
        candidates: &[Hyperparameters],
        cancel: &CancelFlag,
    ) -> Result<TrainedModel, ForecastError> {
        if candidates.is_empty() {
            return self.train_cancellable(samples, base_config, cancel);
        }

        let mut best: Option<TrainedModel> = None;
        let mut last_error = None;
        for candidate in candidates {
            let config = base_config.with_hyperparameters(*candidate)?;
            match self.train_cancellable(samples, &config, cancel) {
                Ok(model) => {
                    let better = best.as_ref().map_or(true, |current| {
                        model.metrics.selection_mse() < current.metrics.selection_mse()
                    });
                    if better {
                        best = Some(model);
                    }
                }
                // Not a candidate-specific failure; no other candidate can do better.
                Err(error @ (ForecastError::InsufficientData { .. }
                | ForecastError::TrainingAborted { .. })) => return Err(error),
                Err(error) => {
                    tracing::debug!(config = %config, error = %error, "tuning candidate rejected");
                    last_error = Some(error);
                }
            }
        }

        let mut best = best.ok_or_else(|| {
            last_error.unwrap_or_else(|| ForecastError::diverged("no tuning candidate succeeded"))
        })?;
        best.config = base_config.clone();
        Ok(best)
    }
}

fn training_range(samples: &[Sample]) -> Result<DateRange, ForecastError> {
    let start = samples.iter().map(|s| s.window_start).min();
    let end = samples.iter().map(|s| s.label_at).max();
    match (start, end) {
        (Some(start), Some(end)) => Ok(DateRange::new(start, end)?),
        _ => Err(ForecastError::insufficient("training samples", 1, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureBuilder;
    use crate::{Interval, PriceBar, Symbol, TimeSeries};

    fn series(n: usize) -> TimeSeries {
        let start = UtcDateTime::parse("2023-01-02T00:00:00Z").expect("start");
        let day = Duration::from_secs(86_400);
        let bars = (0..n)
            .map(|i| {
                let close = 100.0 * (1.0 + 0.05 * (i as f64 / 6.0).sin()) + i as f64 * 0.1;
                let ts = start.saturating_add(day * i as u32);
                PriceBar::new(ts, close, close * 1.01, close * 0.99, close, Some(1_000))
                    .expect("bar")
            })
            .collect::<Vec<_>>();
        let end = bars[n - 1].ts;
        TimeSeries::new(
            Symbol::parse("ACME").expect("symbol"),
            Interval::OneDay,
            DateRange::new(start, end).expect("range"),
            bars,
        )
        .expect("series")
    }

    fn config(family: ModelFamilyId) -> TrainingConfig {
        TrainingConfig::new(
            Symbol::parse("ACME").expect("symbol"),
            Interval::OneDay,
            10,
            1,
            family,
            Hyperparameters::default(),
        )
        .expect("config")
    }

    fn samples(n: usize) -> Vec<Sample> {
        FeatureBuilder::default()
            .build(&series(n), 10, 1)
            .expect("samples")
    }

    #[test]
    fn trains_every_family() {
        let samples = samples(200);
        let trainer = ModelTrainer::new(30);

        for family in ModelFamilyId::ALL {
            let model = trainer.train(&samples, &config(family)).expect("model");
            assert_eq!(model.sample_count(), samples.len());
            assert!(model.metrics().train_mse.is_finite());
            assert!(model.metrics().validation_mse.is_some());
            assert!(model.predict(&samples[0].features).is_ok());
        }
    }

    #[test]
    fn training_range_spans_the_samples() {
        let samples = samples(80);
        let model = ModelTrainer::new(10)
            .train(&samples, &config(ModelFamilyId::Ridge))
            .expect("model");

        assert_eq!(model.training_range().start(), samples[0].window_start);
        assert_eq!(
            model.training_range().end(),
            samples[samples.len() - 1].label_at
        );
    }

    #[test]
    fn too_few_samples_is_insufficient_data() {
        let samples = samples(30);
        let err = ModelTrainer::new(30)
            .train(&samples, &config(ModelFamilyId::Ridge))
            .expect_err("too few");
        assert!(matches!(
            err,
            ForecastError::InsufficientData {
                required: 30,
                available: 19,
                ..
            }
        ));
    }

    #[test]
    fn rejects_mismatched_feature_width() {
        let model = ModelTrainer::new(10)
            .train(&samples(80), &config(ModelFamilyId::Drift))
            .expect("model");
        let err = model.predict(&[0.0; 3]).expect_err("width");
        assert_eq!(err.code(), "request.invalid");
    }

    #[test]
    fn tuning_keeps_the_best_candidate() {
        let samples = samples(200);
        let base = config(ModelFamilyId::Ridge);
        let candidates = base.hyperparameters().random_candidates(5, 1);
        let trainer = ModelTrainer::new(30);

        let tuned = trainer.tune(&samples, &base, &candidates).expect("tuned");
        for candidate in &candidates {
            let single = trainer
                .train(&samples, &base.with_hyperparameters(*candidate).expect("config"))
                .expect("candidate");
            assert!(tuned.metrics().selection_mse() <= single.metrics().selection_mse() + 1e-15);
        }
    }

    #[test]
    fn tuning_skips_diverging_candidates() {
        let samples = samples(200);
        let base = config(ModelFamilyId::GradientDescent);
        // One epoch with zero tolerance can never converge.
        let stuck = Hyperparameters {
            max_epochs: 1,
            tolerance: 0.0,
            patience: 10_000,
            ..Hyperparameters::default()
        };
        let tuned = ModelTrainer::new(30)
            .tune(&samples, &base, &[stuck, Hyperparameters::default()])
            .expect("second candidate wins");

        assert_eq!(tuned.hyperparameters(), &Hyperparameters::default());
    }

    #[test]
    fn tuned_model_keeps_its_registry_key() {
        let samples = samples(200);
        let base = config(ModelFamilyId::Ridge);
        let heavy = Hyperparameters {
            l2_penalty: 1e4,
            ..Hyperparameters::default()
        };
        let light = Hyperparameters {
            l2_penalty: 1e-6,
            ..Hyperparameters::default()
        };

        let tuned = ModelTrainer::new(30)
            .tune(&samples, &base, &[heavy, light])
            .expect("tuned");

        assert_eq!(tuned.config(), &base);
        assert!([heavy, light].contains(tuned.hyperparameters()));
    }

    #[tokio::test]
    async fn deadline_produces_training_timeout() {
        let samples = samples(400);
        let slow = Hyperparameters {
            learning_rate: 1e-4,
            max_epochs: 1_000_000,
            tolerance: 0.0,
            patience: 10_000,
            validation_fraction: 0.0,
            ..Hyperparameters::default()
        };
        let config = config(ModelFamilyId::GradientDescent)
            .with_hyperparameters(slow)
            .expect("config");

        let err = ModelTrainer::new(30)
            .train_with_deadline(samples, config, Duration::from_millis(20))
            .await
            .expect_err("must time out");

        assert!(matches!(err, ForecastError::TrainingTimeout { timeout_ms: 20 }));
        assert!(err.retryable());
    }
}
