//! CLI argument definitions for tickcast.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `predict` | Forecast one price `--horizon` intervals ahead |
//! | `path` | Forecast a `--steps` long price path |
//! | `train` | Retrain a model now and print its metrics |
//! | `bars` | Fetch and print normalized bars |
//! | `config` | Print the effective configuration |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | none | JSON config file |
//! | `--mock` | `false` | Use the offline synthetic provider |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--log-level` | `info` | Log filter, overrides `RUST_LOG` |
//!
//! # Examples
//!
//! ```bash
//! tickcast predict AAPL --horizon 5 --pretty
//! tickcast path MSFT --steps 10 --mock
//! tickcast --config engine.json train AAPL --horizon 1
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tickcast_core::{Interval, ModelFamilyId};

/// Per-symbol stock forecasts from the command line.
#[derive(Debug, Parser)]
#[command(
    name = "tickcast",
    author,
    version,
    about = "Train and query per-symbol stock forecast models"
)]
pub struct Cli {
    /// JSON engine config; missing keys keep their defaults.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Use deterministic synthetic bars instead of the network.
    #[arg(long, global = true, default_value_t = false)]
    pub mock: bool,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Log filter directive, e.g. `debug` or `tickcast_core=trace`.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Feature window in bars.
    #[arg(long, global = true)]
    pub window: Option<usize>,

    /// Model family: drift, ridge or gradient-descent.
    #[arg(long, global = true)]
    pub family: Option<ModelFamilyId>,

    /// Bar interval: 1m, 5m, 15m, 1h or 1d.
    #[arg(long, global = true)]
    pub interval: Option<Interval>,

    /// Budget in milliseconds for each fetch and each training run.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Forecast the price `--horizon` intervals after the latest bar.
    ///
    /// # Examples
    ///
    ///   tickcast predict AAPL
    ///   tickcast predict AAPL --horizon 5 --as-of 2024-06-28T21:00:00Z
    Predict(PredictArgs),

    /// Forecast a path of one-interval steps from the horizon-1 model.
    Path(PathArgs),

    /// Retrain now, bypassing the cache, and print the model summary.
    Train(TrainArgs),

    /// Fetch normalized bars with their gaps.
    Bars(BarsArgs),

    /// Print the effective configuration after flags are applied.
    Config,
}

#[derive(Debug, Args)]
pub struct PredictArgs {
    pub symbol: String,

    #[arg(long, default_value_t = 1)]
    pub horizon: usize,

    /// RFC 3339 cut-off for the history; defaults to now.
    #[arg(long)]
    pub as_of: Option<String>,
}

#[derive(Debug, Args)]
pub struct PathArgs {
    pub symbol: String,

    #[arg(long, default_value_t = 5)]
    pub steps: usize,

    #[arg(long)]
    pub as_of: Option<String>,
}

#[derive(Debug, Args)]
pub struct TrainArgs {
    pub symbol: String,

    #[arg(long, default_value_t = 1)]
    pub horizon: usize,
}

#[derive(Debug, Args)]
pub struct BarsArgs {
    pub symbol: String,

    /// Calendar days of history ending now.
    #[arg(long, default_value_t = 30)]
    pub days: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_predict_with_global_flags() {
        let cli = Cli::try_parse_from([
            "tickcast",
            "predict",
            "aapl",
            "--horizon",
            "5",
            "--mock",
            "--family",
            "gradient-descent",
            "--interval",
            "1h",
        ])
        .expect("parse");

        assert!(cli.mock);
        assert_eq!(cli.family, Some(ModelFamilyId::GradientDescent));
        assert_eq!(cli.interval, Some(Interval::OneHour));
        match cli.command {
            Command::Predict(args) => {
                assert_eq!(args.symbol, "aapl");
                assert_eq!(args.horizon, 5);
                assert!(args.as_of.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_family() {
        let result = Cli::try_parse_from(["tickcast", "--family", "lstm", "config"]);
        assert!(result.is_err());
    }
}
