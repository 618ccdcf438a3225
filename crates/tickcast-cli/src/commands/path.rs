use serde_json::Value;
use tickcast_core::{PredictionService, Symbol};

use crate::cli::PathArgs;
use crate::error::CliError;

use super::parse_as_of;

pub async fn run(args: &PathArgs, service: &PredictionService) -> Result<Value, CliError> {
    let symbol = Symbol::parse(&args.symbol)?;
    let as_of = parse_as_of(args.as_of.as_deref())?;

    let forecast = service.predict_path(&symbol, args.steps, as_of).await?;
    Ok(serde_json::to_value(forecast)?)
}
