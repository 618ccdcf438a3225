use serde_json::Value;
use tickcast_core::EngineConfig;

use crate::error::CliError;

pub fn run(config: &EngineConfig) -> Result<Value, CliError> {
    Ok(serde_json::to_value(config)?)
}
