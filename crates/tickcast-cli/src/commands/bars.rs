use serde_json::Value;
use tickcast_core::{PredictionService, Symbol, UtcDateTime};

use crate::cli::BarsArgs;
use crate::error::CliError;

pub async fn run(args: &BarsArgs, service: &PredictionService) -> Result<Value, CliError> {
    let symbol = Symbol::parse(&args.symbol)?;

    let series = service.history(&symbol, UtcDateTime::now()).await?;
    tracing::debug!(
        symbol = %symbol,
        days = args.days,
        bars = series.len(),
        gaps = series.gaps().len(),
        "bars fetched"
    );
    Ok(serde_json::to_value(series)?)
}
