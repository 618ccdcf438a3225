//! End-to-end behaviour of the prediction service over offline providers.

use std::sync::Arc;

use tickcast_core::{
    EngineConfig, ForecastError, Hyperparameters, ModelFamilyId, PredictionService,
    SyntheticProvider, UtcDateTime,
};
use tickcast_tests::{engine_config, symbol, ts, FixtureProvider, DAY};

fn as_of() -> UtcDateTime {
    ts("2024-06-01T00:00:00Z")
}

fn service_over(provider: Arc<FixtureProvider>, config: EngineConfig) -> PredictionService {
    PredictionService::with_provider(provider, config)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn when_two_identical_predictions_race_on_an_empty_cache_system_trains_once() {
    // Given: 80 days of ACME history and an empty registry
    let provider = Arc::new(FixtureProvider::with_days(80));
    let service = service_over(provider, engine_config());
    let acme = symbol("ACME");

    // When: predict("ACME", 5, T) is called twice concurrently
    let (left, right) = tokio::join!(
        service.predict(&acme, 5, as_of()),
        service.predict(&acme, 5, as_of()),
    );
    let (left, right) = (left.expect("left"), right.expect("right"));

    // Then: one training run, equal results from the same model
    assert_eq!(service.registry().stats().trainings_started, 1);
    assert_eq!(left, right);
    assert_eq!(left.model_trained_at, right.model_trained_at);
    assert_eq!(left.horizon, 5);
    assert_eq!(left.points[0].at, left.last_bar_at.saturating_add(DAY * 5));
}

#[tokio::test]
async fn when_a_fresh_model_is_invalidated_system_retrains_on_next_prediction() {
    // Given: a cached ACME horizon-5 model well inside its TTL
    let provider = Arc::new(FixtureProvider::with_days(80));
    let service = service_over(provider, engine_config());
    let acme = symbol("ACME");
    let before = service.predict(&acme, 5, as_of()).await.expect("first");

    // When: the key is invalidated and the same request repeats
    assert!(service.invalidate(&acme, 5).expect("valid key"));
    let after = service.predict(&acme, 5, as_of()).await.expect("second");

    // Then: a new model answered
    assert_ne!(before.model_id, after.model_id);
    assert_eq!(service.registry().stats().trainings_started, 2);
}

#[tokio::test]
async fn when_new_bars_arrive_system_retrains_once_to_cover_them() {
    // Given: a model trained on 80 days
    let provider = Arc::new(FixtureProvider::with_days(80));
    let service = service_over(Arc::clone(&provider), engine_config());
    let acme = symbol("ACME");
    let first = service.predict(&acme, 1, as_of()).await.expect("first");

    // When: five more sessions arrive and the request is repeated twice
    provider.append_days(5);
    let second = service.predict(&acme, 1, as_of()).await.expect("second");
    let third = service.predict(&acme, 1, as_of()).await.expect("third");

    // Then: exactly one retrain, and it saw the new bars
    assert_eq!(service.registry().stats().trainings_started, 2);
    assert_ne!(first.model_id, second.model_id);
    assert_eq!(second.model_id, third.model_id);
    assert_eq!(second.last_bar_at, first.last_bar_at.saturating_add(DAY * 5));
    let config = service.training_config(&acme, 1).expect("config");
    let model = service.registry().peek(&config).expect("cached");
    assert_eq!(model.training_range().end(), second.last_bar_at);
}

#[tokio::test]
async fn when_predictions_fail_system_keeps_the_failure_kinds_apart() {
    let acme = symbol("ACME");

    // Given: an unknown symbol
    let unknown = PredictionService::with_provider(
        Arc::new(SyntheticProvider::new().with_unknown(acme.clone())),
        engine_config(),
    );
    // Given: a symbol with only 25 sessions of history
    let young = service_over(Arc::new(FixtureProvider::with_days(25)), engine_config());
    // Given: a fit that cannot converge in one epoch
    let mut stubborn = engine_config();
    stubborn.trainer.family = ModelFamilyId::GradientDescent;
    stubborn.trainer.hyperparameters = Hyperparameters {
        max_epochs: 1,
        tolerance: 0.0,
        patience: 10_000,
        ..Hyperparameters::default()
    };
    let diverging = service_over(Arc::new(FixtureProvider::with_days(80)), stubborn);

    // When: each is asked for a forecast
    let no_symbol = unknown.predict(&acme, 1, as_of()).await.expect_err("unknown");
    let too_young = young.predict(&acme, 1, as_of()).await.expect_err("young");
    let no_fit = diverging.predict(&acme, 1, as_of()).await.expect_err("diverged");

    // Then: each failure keeps its own kind
    assert!(matches!(no_symbol, ForecastError::DataUnavailable { .. }));
    assert!(matches!(too_young, ForecastError::InsufficientData { .. }));
    assert!(matches!(no_fit, ForecastError::TrainingDiverged { .. }));
    assert!(young.registry().is_empty());
    assert!(diverging.registry().is_empty());
}

#[tokio::test]
async fn when_a_path_is_requested_system_steps_one_interval_at_a_time_from_the_horizon_one_model() {
    // Given: 120 days of history
    let provider = Arc::new(FixtureProvider::with_days(120));
    let service = service_over(provider, engine_config());
    let acme = symbol("ACME");

    // When: a 6 step path and a horizon-1 forecast are requested
    let path = service.predict_path(&acme, 6, as_of()).await.expect("path");
    let single = service.predict(&acme, 1, as_of()).await.expect("single");

    // Then: both come from one model and agree on the first step
    assert_eq!(path.points.len(), 6);
    assert_eq!(path.model_id, single.model_id);
    assert!((path.points[0].price - single.points[0].price).abs() < 1e-9);
    for (index, point) in path.points.iter().enumerate() {
        assert_eq!(point.step, index + 1);
        assert_eq!(point.at, path.last_bar_at.saturating_add(DAY * (index as u32 + 1)));
        assert!(point.price > 0.0);
    }
    assert_eq!(service.registry().stats().trainings_started, 1);
}

#[tokio::test]
async fn when_steps_exceed_the_limit_system_rejects_the_request_before_fetching() {
    // Given: a service limited to 30 path steps
    let provider = Arc::new(FixtureProvider::with_days(80));
    let service = service_over(Arc::clone(&provider), engine_config());

    // When: 31 steps are requested
    let err = service
        .predict_path(&symbol("ACME"), 31, as_of())
        .await
        .expect_err("too many steps");

    // Then: a validation error, and the provider was never called
    assert_eq!(err.code(), "request.invalid");
    assert_eq!(provider.calls(), 0);
}
