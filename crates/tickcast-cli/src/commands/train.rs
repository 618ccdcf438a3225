use serde::Serialize;
use serde_json::Value;
use tickcast_core::{
    DateRange, EvaluationMetrics, Hyperparameters, PredictionService, Symbol, UtcDateTime,
};
use uuid::Uuid;

use crate::cli::TrainArgs;
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct TrainSummary<'a> {
    model_id: Uuid,
    config: String,
    hyperparameters: &'a Hyperparameters,
    trained_at: UtcDateTime,
    training_range: DateRange,
    sample_count: usize,
    metrics: &'a EvaluationMetrics,
}

pub async fn run(args: &TrainArgs, service: &PredictionService) -> Result<Value, CliError> {
    let symbol = Symbol::parse(&args.symbol)?;

    let model = service.refresh(&symbol, args.horizon).await?;
    let summary = TrainSummary {
        model_id: model.id(),
        config: model.config().to_string(),
        hyperparameters: model.hyperparameters(),
        trained_at: model.trained_at(),
        training_range: model.training_range(),
        sample_count: model.sample_count(),
        metrics: model.metrics(),
    };
    Ok(serde_json::to_value(summary)?)
}
