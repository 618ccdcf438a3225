use thiserror::Error;

use tickcast_core::{ConfigError, ForecastError, ValidationError};

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0} [{code}]", code = .0.code())]
    Forecast(#[from] ForecastError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Config(_) => 3,
            Self::Forecast(error) => match error {
                ForecastError::Validation(_) => 2,
                ForecastError::DataUnavailable { .. } | ForecastError::InsufficientData { .. } => 4,
                ForecastError::TrainingDiverged { .. } => 5,
                ForecastError::DataSourceTimeout { .. }
                | ForecastError::DataSourceError { .. }
                | ForecastError::TrainingTimeout { .. }
                | ForecastError::TrainingAborted { .. } => 6,
            },
            Self::Serialization(_) => 7,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forecast_errors_map_to_distinct_exit_codes() {
        let unavailable = CliError::from(ForecastError::DataUnavailable {
            symbol: String::from("NOPE"),
            message: String::from("not found"),
        });
        let insufficient = CliError::from(ForecastError::InsufficientData {
            stage: "feature window",
            required: 31,
            available: 12,
        });
        let diverged = CliError::from(ForecastError::TrainingDiverged {
            reason: String::from("nan"),
        });
        let timeout = CliError::from(ForecastError::TrainingTimeout { timeout_ms: 10 });

        assert_eq!(unavailable.exit_code(), 4);
        assert_eq!(insufficient.exit_code(), 4);
        assert_eq!(diverged.exit_code(), 5);
        assert_eq!(timeout.exit_code(), 6);
        assert!(timeout.to_string().ends_with("[training.timeout]"));
    }
}
