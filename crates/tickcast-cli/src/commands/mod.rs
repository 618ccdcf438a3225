mod bars;
mod config;
mod path;
mod predict;
mod train;

use std::time::Instant;

use serde_json::Value;
use tickcast_core::{ConfigError, EngineConfig, PredictionService, ProviderKind, UtcDateTime};

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::metadata::{Envelope, Metadata};

pub async fn run(cli: &Cli) -> Result<Envelope<Value>, CliError> {
    let mut engine = effective_config(cli)?;
    if let Command::Bars(args) = &cli.command {
        engine.forecast.lookback_days = args.days;
        engine.validate().map_err(ConfigError::from)?;
    }
    let provider = match engine.source.provider {
        ProviderKind::Yahoo => "yahoo",
        ProviderKind::Synthetic => "synthetic",
    };

    let started = Instant::now();
    let data = match &cli.command {
        Command::Config => config::run(&engine)?,
        Command::Predict(args) => predict::run(args, &PredictionService::from_config(engine)).await?,
        Command::Path(args) => path::run(args, &PredictionService::from_config(engine)).await?,
        Command::Train(args) => train::run(args, &PredictionService::from_config(engine)).await?,
        Command::Bars(args) => bars::run(args, &PredictionService::from_config(engine)).await?,
    };
    let name = command_name(&cli.command);
    let latency_ms = started.elapsed().as_millis() as u64;
    tracing::debug!(command = name, latency_ms, "command finished");

    Ok(Envelope {
        meta: Metadata::new(name, provider, latency_ms),
        data,
    })
}

/// Config file (or defaults) with command-line flags applied on top.
pub fn effective_config(cli: &Cli) -> Result<EngineConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };

    if cli.mock {
        config.source.provider = ProviderKind::Synthetic;
    }
    if let Some(window) = cli.window {
        config.trainer.window = window;
    }
    if let Some(family) = cli.family {
        config.trainer.family = family;
    }
    if let Some(interval) = cli.interval {
        config.forecast.interval = interval;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.source.fetch_deadline_ms = timeout_ms;
        config.trainer.timeout_ms = timeout_ms;
    }

    config.validate().map_err(ConfigError::from)?;
    Ok(config)
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Predict(_) => "predict",
        Command::Path(_) => "path",
        Command::Train(_) => "train",
        Command::Bars(_) => "bars",
        Command::Config => "config",
    }
}

fn parse_as_of(raw: Option<&str>) -> Result<UtcDateTime, CliError> {
    match raw {
        Some(raw) => Ok(UtcDateTime::parse(raw)?),
        None => Ok(UtcDateTime::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tickcast_core::ModelFamilyId;

    #[test]
    fn flags_override_the_config_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{ "trainer": {{ "window": 30, "family": "drift" }}, "registry": {{ "capacity": 8 }} }}"#
        )
        .expect("write config");
        let path = file.path().to_string_lossy().into_owned();

        let cli = Cli::try_parse_from([
            "tickcast", "--config", &path, "--window", "12", "--mock", "config",
        ])
        .expect("parse");
        let config = effective_config(&cli).expect("config");

        assert_eq!(config.trainer.window, 12);
        assert_eq!(config.trainer.family, ModelFamilyId::Drift);
        assert_eq!(config.registry.capacity, 8);
        assert_eq!(config.source.provider, ProviderKind::Synthetic);
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let cli = Cli::try_parse_from(["tickcast", "--window", "0", "config"]).expect("parse");
        let err = effective_config(&cli).expect_err("window 0");
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn as_of_defaults_to_now_and_rejects_garbage() {
        assert!(parse_as_of(None).is_ok());
        assert!(parse_as_of(Some("2024-06-28T21:00:00Z")).is_ok());
        assert_eq!(parse_as_of(Some("yesterday")).expect_err("bad").exit_code(), 2);
    }

    #[tokio::test]
    async fn predict_runs_offline_with_mock() {
        let cli = Cli::try_parse_from([
            "tickcast",
            "--mock",
            "--window",
            "10",
            "predict",
            "ACME",
            "--horizon",
            "3",
            "--as-of",
            "2024-06-28T23:00:00Z",
        ])
        .expect("parse");

        let envelope = run(&cli).await.expect("predict");

        assert_eq!(envelope.meta.command, "predict");
        assert_eq!(envelope.meta.provider, "synthetic");
        assert_eq!(envelope.data["symbol"], "ACME");
        assert_eq!(envelope.data["points"].as_array().expect("points").len(), 1);
    }
}
