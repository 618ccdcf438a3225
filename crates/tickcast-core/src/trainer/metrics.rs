use serde::{Deserialize, Serialize};

use crate::trainer::family::{FittedParams, ModelFamily};
use crate::features::Sample;
use crate::ForecastError;

/// Fit quality reported with every trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub train_mse: f64,
    pub train_mae: f64,
    /// `None` when no holdout was large enough.
    pub validation_mse: Option<f64>,
    /// Share of samples whose predicted sign matches the label's.
    pub directional_accuracy: f64,
    /// Spread of the residuals, out-of-sample when a holdout exists.
    pub residual_std: f64,
    pub epochs: u32,
}

impl EvaluationMetrics {
    /// MSE used to rank candidates: validation when available.
    pub fn selection_mse(&self) -> f64 {
        self.validation_mse.unwrap_or(self.train_mse)
    }
}

pub(crate) fn evaluate(
    family: &dyn ModelFamily,
    params: &FittedParams,
    train: &[Sample],
    validation: &[Sample],
) -> Result<EvaluationMetrics, ForecastError> {
    let train_residuals = residuals(family, params, train);
    let validation_residuals = residuals(family, params, validation);

    let train_mse = mean(train_residuals.iter().map(|r| r * r));
    let train_mae = mean(train_residuals.iter().map(|r| r.abs()));
    let validation_mse = (!validation_residuals.is_empty())
        .then(|| mean(validation_residuals.iter().map(|r| r * r)));

    let hits = train
        .iter()
        .chain(validation)
        .filter(|sample| {
            let predicted = family.predict(params, &sample.features);
            (predicted >= 0.0) == (sample.label >= 0.0)
        })
        .count();
    let directional_accuracy = hits as f64 / (train.len() + validation.len()).max(1) as f64;

    let residual_std = if validation_residuals.len() >= 2 {
        std_dev(&validation_residuals)
    } else {
        std_dev(&train_residuals)
    };

    let metrics = EvaluationMetrics {
        train_mse,
        train_mae,
        validation_mse,
        directional_accuracy,
        residual_std,
        epochs: params.epochs,
    };

    let finite = [train_mse, train_mae, residual_std, directional_accuracy]
        .iter()
        .chain(validation_mse.iter())
        .all(|value| value.is_finite());
    if !finite {
        return Err(ForecastError::diverged("evaluation metrics are not finite"));
    }
    Ok(metrics)
}

fn residuals(family: &dyn ModelFamily, params: &FittedParams, samples: &[Sample]) -> Vec<f64> {
    samples
        .iter()
        .map(|sample| family.predict(params, &sample.features) - sample.label)
        .collect()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0_usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mu = mean(values.iter().copied());
    let variance = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
