use thiserror::Error;

/// Construction-time invariant violations for domain values and configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter: '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("invalid interval '{value}', expected one of 1m, 5m, 15m, 1h, 1d")]
    InvalidInterval { value: String },
    #[error("invalid model family '{value}', expected one of drift, ridge, gradient_descent")]
    InvalidModelFamily { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("range start {start} is after end {end}")]
    InvertedRange { start: String, end: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },
    #[error("price '{field}' must be positive")]
    NonPositivePrice { field: &'static str },

    #[error("bar high must be >= low")]
    InvalidBarRange,
    #[error("bar open/close must be within high/low range")]
    InvalidBarBounds,
    #[error("bar {index} lies outside the requested range")]
    BarOutsideRange { index: usize },
    #[error("bar {index} is not strictly after its predecessor")]
    BarsNotIncreasing { index: usize },

    #[error("'{field}' must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: String,
        min: String,
        max: String,
    },
}

impl ValidationError {
    pub(crate) fn out_of_range(
        field: &'static str,
        value: impl ToString,
        min: impl ToString,
        max: impl ToString,
    ) -> Self {
        Self::OutOfRange {
            field,
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }
}

/// Failure kinds surfaced by the forecasting engine.
///
/// Every component returns the most specific variant that applies and no
/// component turns a failure into a placeholder prediction. The type is
/// `Clone` so a single training failure can be handed to every caller that
/// joined the same run.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ForecastError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no market data for '{symbol}': {message}")]
    DataUnavailable { symbol: String, message: String },

    #[error("market data for '{symbol}' not received within {timeout_ms}ms")]
    DataSourceTimeout { symbol: String, timeout_ms: u64 },

    #[error("market data provider failed for '{symbol}' after {attempts} attempt(s): {message}")]
    DataSourceError {
        symbol: String,
        message: String,
        attempts: u32,
    },

    #[error("insufficient data for {stage}: need {required}, have {available}")]
    InsufficientData {
        stage: &'static str,
        required: usize,
        available: usize,
    },

    #[error("model training diverged: {reason}")]
    TrainingDiverged { reason: String },

    #[error("model training exceeded {timeout_ms}ms")]
    TrainingTimeout { timeout_ms: u64 },

    #[error("model training aborted: {reason}")]
    TrainingAborted { reason: String },
}

impl ForecastError {
    /// Stable machine-readable code for the API layer.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "request.invalid",
            Self::DataUnavailable { .. } => "data.unavailable",
            Self::DataSourceTimeout { .. } => "data.timeout",
            Self::DataSourceError { .. } => "data.source_error",
            Self::InsufficientData { .. } => "data.insufficient",
            Self::TrainingDiverged { .. } => "training.diverged",
            Self::TrainingTimeout { .. } => "training.timeout",
            Self::TrainingAborted { .. } => "training.aborted",
        }
    }

    /// Whether a caller may retry the same request (with backoff) and
    /// reasonably expect a different outcome.
    pub const fn retryable(&self) -> bool {
        matches!(
            self,
            Self::DataSourceTimeout { .. }
                | Self::DataSourceError { .. }
                | Self::TrainingTimeout { .. }
                | Self::TrainingAborted { .. }
        )
    }

    pub(crate) fn insufficient(stage: &'static str, required: usize, available: usize) -> Self {
        Self::InsufficientData {
            stage,
            required,
            available,
        }
    }

    pub(crate) fn diverged(reason: impl Into<String>) -> Self {
        Self::TrainingDiverged {
            reason: reason.into(),
        }
    }
}
