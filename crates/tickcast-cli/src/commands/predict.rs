use serde_json::Value;
use tickcast_core::{PredictionService, Symbol};

use crate::cli::PredictArgs;
use crate::error::CliError;

use super::parse_as_of;

pub async fn run(args: &PredictArgs, service: &PredictionService) -> Result<Value, CliError> {
    let symbol = Symbol::parse(&args.symbol)?;
    let as_of = parse_as_of(args.as_of.as_deref())?;

    let forecast = service.predict(&symbol, args.horizon, as_of).await?;
    Ok(serde_json::to_value(forecast)?)
}
