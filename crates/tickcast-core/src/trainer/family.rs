//! Model families and the dataset they fit.
//!
//! Every family works on z-scored features: the standardization statistics
//! come from the training split only and travel with the fitted parameters,
//! so prediction applies exactly the transform training saw.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use linfa_linalg::cholesky::{Cholesky, SolveCInplace};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::features::Sample;
use crate::trainer::Hyperparameters;
use crate::ForecastError;

/// Cooperative cancellation for a running fit.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Parameters of a fitted linear predictor over standardized features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedParams {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub feature_mean: Vec<f64>,
    pub feature_scale: Vec<f64>,
    /// Optimizer epochs run; zero for closed-form fits.
    pub epochs: u32,
}

impl FittedParams {
    pub fn apply(&self, features: &[f64]) -> f64 {
        features
            .iter()
            .zip(&self.feature_mean)
            .zip(&self.feature_scale)
            .zip(&self.weights)
            .map(|(((value, mean), scale), weight)| (value - mean) / scale * weight)
            .sum::<f64>()
            + self.bias
    }

    pub fn is_finite(&self) -> bool {
        self.bias.is_finite() && self.weights.iter().all(|w| w.is_finite())
    }
}

/// Training split plus an optional chronological holdout.
#[derive(Debug, Clone)]
pub struct Dataset {
    x: Array2<f64>,
    y: Array1<f64>,
    validation: Option<(Array2<f64>, Array1<f64>)>,
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl Dataset {
    /// Standardize `samples` and hold out their trailing
    /// `validation_fraction`. Fewer than two held-out samples means no
    /// holdout at all.
    pub fn from_samples(samples: &[Sample], validation_fraction: f64) -> Result<Self, ForecastError> {
        let Some(first) = samples.first() else {
            return Err(ForecastError::insufficient("training samples", 1, 0));
        };
        let d = first.features.len();
        if samples.iter().any(|sample| sample.features.len() != d) {
            return Err(ForecastError::diverged("samples have inconsistent feature widths"));
        }
        if samples
            .iter()
            .any(|s| !s.label.is_finite() || s.features.iter().any(|v| !v.is_finite()))
        {
            return Err(ForecastError::diverged("training data contains non-finite values"));
        }

        let n = samples.len();
        let split = holdout_split(n, validation_fraction);
        let holdout = n - split;

        let (raw_x, y) = to_arrays(&samples[..split], d)?;
        let mean = raw_x
            .mean_axis(Axis(0))
            .ok_or_else(|| ForecastError::insufficient("training samples", 1, 0))?;
        let scale = raw_x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s < 1e-12 { 1.0 } else { s });
        let x = (&raw_x - &mean) / &scale;

        let validation = if holdout > 0 {
            let (raw_vx, vy) = to_arrays(&samples[split..], d)?;
            Some(((&raw_vx - &mean) / &scale, vy))
        } else {
            None
        };

        Ok(Self {
            x,
            y,
            validation,
            mean,
            scale,
        })
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.x
    }

    pub fn labels(&self) -> &Array1<f64> {
        &self.y
    }

    pub fn validation(&self) -> Option<(&Array2<f64>, &Array1<f64>)> {
        self.validation.as_ref().map(|(x, y)| (x, y))
    }

    pub fn train_len(&self) -> usize {
        self.x.nrows()
    }

    pub fn width(&self) -> usize {
        self.x.ncols()
    }

    /// Attach this dataset's standardization to standardized-space weights.
    pub fn params(&self, weights: Array1<f64>, bias: f64, epochs: u32) -> FittedParams {
        FittedParams {
            weights: weights.to_vec(),
            bias,
            feature_mean: self.mean.to_vec(),
            feature_scale: self.scale.to_vec(),
            epochs,
        }
    }
}

/// Index of the first held-out sample; `n` when nothing is held out.
pub(crate) fn holdout_split(n: usize, validation_fraction: f64) -> usize {
    let holdout = (n as f64 * validation_fraction).floor() as usize;
    if holdout < 2 || n - holdout.min(n) < 2 {
        n
    } else {
        n - holdout
    }
}

fn to_arrays(samples: &[Sample], d: usize) -> Result<(Array2<f64>, Array1<f64>), ForecastError> {
    let flat = samples
        .iter()
        .flat_map(|sample| sample.features.iter().copied())
        .collect::<Vec<_>>();
    let x = Array2::from_shape_vec((samples.len(), d), flat)
        .map_err(|e| ForecastError::diverged(format!("cannot shape feature matrix: {e}")))?;
    let y = samples.iter().map(|sample| sample.label).collect::<Array1<_>>();
    Ok((x, y))
}

fn mse(x: &Array2<f64>, y: &Array1<f64>, weights: &Array1<f64>, bias: f64) -> f64 {
    let residual = x.dot(weights) + bias - y;
    residual.mapv(|r| r * r).mean().unwrap_or(0.0)
}

/// A way of turning a dataset into parameters.
pub trait ModelFamily: Send + Sync {
    fn fit(
        &self,
        dataset: &Dataset,
        hyperparameters: &Hyperparameters,
        cancel: &CancelFlag,
    ) -> Result<FittedParams, ForecastError>;

    fn predict(&self, params: &FittedParams, features: &[f64]) -> f64 {
        params.apply(features)
    }
}

/// Predicts the mean training label regardless of features.
#[derive(Debug, Clone, Copy, Default)]
pub struct Drift;

impl ModelFamily for Drift {
    fn fit(
        &self,
        dataset: &Dataset,
        _hyperparameters: &Hyperparameters,
        _cancel: &CancelFlag,
    ) -> Result<FittedParams, ForecastError> {
        let bias = dataset
            .labels()
            .mean()
            .filter(|mean| mean.is_finite())
            .ok_or_else(|| ForecastError::diverged("mean label is not finite"))?;
        Ok(dataset.params(Array1::zeros(dataset.width()), bias, 0))
    }
}

/// Closed-form L2-regularized least squares.
///
/// Solves `(XᵀX / n + λI) w = Xᵀ(y - ȳ) / n` by Cholesky. Training
/// features are centred, so the intercept is the mean label.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ridge;

impl ModelFamily for Ridge {
    fn fit(
        &self,
        dataset: &Dataset,
        hyperparameters: &Hyperparameters,
        cancel: &CancelFlag,
    ) -> Result<FittedParams, ForecastError> {
        let x = dataset.features();
        let y = dataset.labels();
        let n = x.nrows() as f64;
        let d = x.ncols();

        let y_mean = y
            .mean()
            .ok_or_else(|| ForecastError::insufficient("training samples", 1, 0))?;
        let centred = y.mapv(|value| value - y_mean);
        let gram = x.t().dot(x) / n + Array2::<f64>::eye(d) * hyperparameters.l2_penalty;
        let rhs = x.t().dot(&centred) / n;

        if cancel.is_cancelled() {
            return Err(ForecastError::TrainingAborted {
                reason: String::from("cancelled"),
            });
        }

        let weights = solve_normal_equations(gram, rhs)?;
        let params = dataset.params(weights, y_mean, 0);
        if !params.is_finite() {
            return Err(ForecastError::diverged("ridge produced non-finite weights"));
        }
        Ok(params)
    }
}

/// Solve `gram · w = rhs` through a Cholesky factorization.
fn solve_normal_equations(mut gram: Array2<f64>, rhs: Array1<f64>) -> Result<Array1<f64>, ForecastError> {
    let not_definite = |_| ForecastError::diverged("normal equations are not positive definite");

    let factor = gram.cholesky().map_err(not_definite)?;
    let scale = gram.diag().iter().fold(1.0_f64, |acc, &value| acc.max(value.abs()));
    // Collinear columns leave a pivot at rounding noise rather than zero.
    if factor
        .diag()
        .iter()
        .any(|&pivot| !pivot.is_finite() || pivot * pivot <= 1e-10 * scale)
    {
        return Err(ForecastError::diverged(
            "normal equations are not positive definite",
        ));
    }

    let solution = gram
        .solvec_into(rhs.insert_axis(Axis(1)))
        .map_err(not_definite)?;
    Ok(solution.column(0).to_owned())
}

/// Full-batch gradient descent on the L2-penalized squared loss.
///
/// Stops early when the monitored loss (validation if held out, training
/// otherwise) drops below `target_loss`, when the training loss changes by
/// less than `tolerance`, or after `patience` epochs without improvement;
/// the best weights seen are kept. The learning rate halves whenever half
/// of `patience` passes without improvement.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradientDescent;

const EXPLOSION_FACTOR: f64 = 1e6;

impl ModelFamily for GradientDescent {
    fn fit(
        &self,
        dataset: &Dataset,
        hyperparameters: &Hyperparameters,
        cancel: &CancelFlag,
    ) -> Result<FittedParams, ForecastError> {
        let x = dataset.features();
        let y = dataset.labels();
        let n = x.nrows() as f64;
        let l2 = hyperparameters.l2_penalty;

        let mut weights = Array1::<f64>::zeros(x.ncols());
        let mut bias = 0.0;
        let mut learning_rate = hyperparameters.learning_rate;

        let monitor = |weights: &Array1<f64>, bias: f64, train_loss: f64| match dataset.validation() {
            Some((vx, vy)) => mse(vx, vy, weights, bias),
            None => train_loss,
        };

        let initial_loss = mse(x, y, &weights, bias);
        let mut previous_loss = initial_loss;
        let mut best_loss = monitor(&weights, bias, initial_loss);
        let mut best = (weights.clone(), bias, 0_u32);
        let mut stalled = 0_u32;
        let mut plateau = 0_u32;
        let plateau_patience = (hyperparameters.patience / 2).max(1);

        for epoch in 1..=hyperparameters.max_epochs {
            if cancel.is_cancelled() {
                return Err(ForecastError::TrainingAborted {
                    reason: format!("cancelled at epoch {epoch}"),
                });
            }

            let residual = x.dot(&weights) + bias - y;
            let grad_w = x.t().dot(&residual) * (2.0 / n) + &weights * (2.0 * l2);
            let grad_b = residual.sum() * 2.0 / n;
            weights = weights - grad_w * learning_rate;
            bias -= grad_b * learning_rate;

            let train_loss = mse(x, y, &weights, bias);
            if !train_loss.is_finite() || !bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
                return Err(ForecastError::diverged(format!(
                    "loss became non-finite at epoch {epoch}"
                )));
            }
            if train_loss > initial_loss.max(1e-12) * EXPLOSION_FACTOR {
                return Err(ForecastError::diverged(format!(
                    "loss exploded to {train_loss:.3e} at epoch {epoch}"
                )));
            }

            let monitored = monitor(&weights, bias, train_loss);
            if monitored < best_loss - hyperparameters.tolerance {
                best_loss = monitored;
                best = (weights.clone(), bias, epoch);
                stalled = 0;
                plateau = 0;
            } else {
                stalled += 1;
                plateau += 1;
            }

            if hyperparameters.target_loss > 0.0 && monitored < hyperparameters.target_loss {
                return Ok(dataset.params(weights, bias, epoch));
            }
            if (previous_loss - train_loss).abs() < hyperparameters.tolerance
                || stalled >= hyperparameters.patience
            {
                let (weights, bias, _) = best;
                return Ok(dataset.params(weights, bias, epoch));
            }
            if plateau >= plateau_patience {
                learning_rate *= 0.5;
                plateau = 0;
                tracing::debug!(epoch, learning_rate, "loss plateau, halving learning rate");
            }
            previous_loss = train_loss;
        }

        Err(ForecastError::diverged(format!(
            "no convergence within {} epochs",
            hyperparameters.max_epochs
        )))
    }
}
