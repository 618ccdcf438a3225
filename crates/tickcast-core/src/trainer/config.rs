use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::features::{validate_horizon, validate_window, LabelKind};
use crate::trainer::family::{Drift, GradientDescent, ModelFamily, Ridge};
use crate::{Interval, Symbol, ValidationError};

static DRIFT: Drift = Drift;
static RIDGE: Ridge = Ridge;
static GRADIENT_DESCENT: GradientDescent = GradientDescent;

/// Identifier of a registered model family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamilyId {
    Drift,
    #[default]
    Ridge,
    GradientDescent,
}

impl ModelFamilyId {
    pub const ALL: [Self; 3] = [Self::Drift, Self::Ridge, Self::GradientDescent];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Drift => "drift",
            Self::Ridge => "ridge",
            Self::GradientDescent => "gradient_descent",
        }
    }

    /// The fitting capability behind this identifier.
    pub fn family(self) -> &'static dyn ModelFamily {
        match self {
            Self::Drift => &DRIFT,
            Self::Ridge => &RIDGE,
            Self::GradientDescent => &GRADIENT_DESCENT,
        }
    }
}

impl Display for ModelFamilyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamilyId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|family| family.as_str() == normalized)
            .ok_or_else(|| ValidationError::InvalidModelFamily {
                value: value.to_owned(),
            })
    }
}

/// Fitting knobs shared by every family; each family reads the ones it
/// understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    /// L2 penalty on the weights (ridge, gradient descent).
    pub l2_penalty: f64,
    pub learning_rate: f64,
    pub max_epochs: u32,
    /// Loss change below which gradient descent counts as converged.
    pub tolerance: f64,
    /// Epochs without improvement before early stopping.
    pub patience: u32,
    /// Stop as soon as the monitored loss drops below this; zero disables.
    pub target_loss: f64,
    /// Trailing share of samples held out for validation.
    pub validation_fraction: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            l2_penalty: 1e-3,
            learning_rate: 0.05,
            max_epochs: 2_000,
            tolerance: 1e-9,
            patience: 5,
            target_loss: 0.0,
            validation_fraction: 0.2,
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_range("l2_penalty", self.l2_penalty, 0.0, 1e6)?;
        check_range("learning_rate", self.learning_rate, 1e-9, 10.0)?;
        check_range("tolerance", self.tolerance, 0.0, 1.0)?;
        check_range("target_loss", self.target_loss, 0.0, 1e6)?;
        check_range("validation_fraction", self.validation_fraction, 0.0, 0.5)?;
        if self.max_epochs == 0 || self.max_epochs > 1_000_000 {
            return Err(ValidationError::out_of_range(
                "max_epochs",
                self.max_epochs,
                1,
                1_000_000,
            ));
        }
        if self.patience == 0 || self.patience > 10_000 {
            return Err(ValidationError::out_of_range(
                "patience",
                self.patience,
                1,
                10_000,
            ));
        }
        Ok(())
    }

    /// Random search candidates around `self`, reproducible for a given
    /// `seed`. The first candidate is always `self`.
    pub fn random_candidates(&self, count: usize, seed: u64) -> Vec<Self> {
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut candidates = Vec::with_capacity(count);
        if count > 0 {
            candidates.push(*self);
        }
        while candidates.len() < count {
            candidates.push(Self {
                // log-uniform over [1e-5, 1]
                l2_penalty: 10_f64.powf(-5.0 + 5.0 * rng.f64()),
                learning_rate: 10_f64.powf(-3.0 + 2.0 * rng.f64()),
                ..*self
            });
        }
        candidates
    }

    fn bits(&self) -> [u64; 7] {
        [
            canonical_bits(self.l2_penalty),
            canonical_bits(self.learning_rate),
            u64::from(self.max_epochs),
            canonical_bits(self.tolerance),
            u64::from(self.patience),
            canonical_bits(self.target_loss),
            canonical_bits(self.validation_fraction),
        ]
    }
}

impl PartialEq for Hyperparameters {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Hyperparameters {}

impl Hash for Hyperparameters {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

// -0.0 and 0.0 must compare equal.
fn canonical_bits(value: f64) -> u64 {
    if value == 0.0 {
        0.0_f64.to_bits()
    } else {
        value.to_bits()
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value < min || value > max {
        return Err(ValidationError::out_of_range(field, value, min, max));
    }
    Ok(())
}

/// Everything that determines a trained model; the registry key.
///
/// The label kind is part of the key: a model trained on relative changes
/// predicts a different quantity than one trained on absolute changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TrainingConfig {
    symbol: Symbol,
    interval: Interval,
    window: usize,
    horizon: usize,
    family: ModelFamilyId,
    hyperparameters: Hyperparameters,
    label_kind: LabelKind,
}

impl TrainingConfig {
    pub fn new(
        symbol: Symbol,
        interval: Interval,
        window: usize,
        horizon: usize,
        family: ModelFamilyId,
        hyperparameters: Hyperparameters,
    ) -> Result<Self, ValidationError> {
        validate_window(window)?;
        validate_horizon(horizon)?;
        hyperparameters.validate()?;
        Ok(Self {
            symbol,
            interval,
            window,
            horizon,
            family,
            hyperparameters,
            label_kind: LabelKind::default(),
        })
    }

    /// Same key for labels of `label_kind`.
    pub fn with_label_kind(self, label_kind: LabelKind) -> Self {
        Self { label_kind, ..self }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub const fn interval(&self) -> Interval {
        self.interval
    }

    pub const fn window(&self) -> usize {
        self.window
    }

    pub const fn horizon(&self) -> usize {
        self.horizon
    }

    pub const fn family(&self) -> ModelFamilyId {
        self.family
    }

    pub const fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    pub const fn label_kind(&self) -> LabelKind {
        self.label_kind
    }

    /// Same key with different hyperparameters.
    pub fn with_hyperparameters(
        &self,
        hyperparameters: Hyperparameters,
    ) -> Result<Self, ValidationError> {
        hyperparameters.validate()?;
        Ok(Self {
            hyperparameters,
            ..self.clone()
        })
    }

    /// Same key with a different horizon.
    pub fn with_horizon(&self, horizon: usize) -> Result<Self, ValidationError> {
        validate_horizon(horizon)?;
        Ok(Self {
            horizon,
            ..self.clone()
        })
    }
}

impl Display for TrainingConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/w{}/h{}/{}/{}",
            self.symbol, self.interval, self.window, self.horizon, self.family, self.label_kind
        )
    }
}
