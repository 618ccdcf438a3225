//! Periodic retraining of a watch-list so hot keys are warm before the first
//! request of the day.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config::{SchedulerConfig, WatchEntry};
use crate::service::PredictionService;
use crate::{ForecastError, Symbol};

/// Result of refreshing one watch-list entry.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub symbol: Symbol,
    pub horizon: usize,
    pub result: Result<Uuid, ForecastError>,
}

pub struct RefreshScheduler {
    service: Arc<PredictionService>,
    watchlist: Vec<WatchEntry>,
    interval: Duration,
}

impl RefreshScheduler {
    pub fn new(service: Arc<PredictionService>, watchlist: Vec<WatchEntry>, interval: Duration) -> Self {
        Self {
            service,
            watchlist,
            interval,
        }
    }

    pub fn from_config(service: Arc<PredictionService>, config: &SchedulerConfig) -> Self {
        Self::new(service, config.watchlist.clone(), config.interval())
    }

    pub fn watchlist(&self) -> &[WatchEntry] {
        &self.watchlist
    }

    /// Refresh every entry once, in order. A failing entry is logged and
    /// does not stop the rest.
    pub async fn run_once(&self) -> Vec<RefreshOutcome> {
        let mut outcomes = Vec::with_capacity(self.watchlist.len());
        for entry in &self.watchlist {
            let result = self
                .service
                .refresh(&entry.symbol, entry.horizon)
                .await
                .map(|model| model.id());
            match &result {
                Ok(model_id) => tracing::info!(
                    symbol = %entry.symbol,
                    horizon = entry.horizon,
                    model_id = %model_id,
                    "scheduled refresh done"
                ),
                Err(error) => tracing::warn!(
                    symbol = %entry.symbol,
                    horizon = entry.horizon,
                    code = error.code(),
                    error = %error,
                    "scheduled refresh failed"
                ),
            }
            outcomes.push(RefreshOutcome {
                symbol: entry.symbol.clone(),
                horizon: entry.horizon,
                result,
            });
        }
        outcomes
    }

    /// Run [`run_once`](Self::run_once) immediately and then every
    /// interval until the handle is shut down.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let outcomes = self.run_once().await;
                        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
                        tracing::debug!(entries = outcomes.len(), failed, "refresh round finished");
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("refresh scheduler stopped");
        });
        SchedulerHandle { shutdown, task }
    }
}

pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop after the current round and wait for the task to end.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.task.await {
            tracing::warn!(error = %error, "refresh scheduler task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SyntheticProvider;
    use crate::config::EngineConfig;

    fn service(provider: SyntheticProvider) -> Arc<PredictionService> {
        let mut config = EngineConfig::default();
        config.forecast.lookback_days = 200;
        config.trainer.window = 10;
        Arc::new(PredictionService::with_provider(Arc::new(provider), config))
    }

    fn entry(symbol: &str, horizon: usize) -> WatchEntry {
        WatchEntry {
            symbol: Symbol::parse(symbol).expect("symbol"),
            horizon,
        }
    }

    #[tokio::test]
    async fn run_once_reports_each_entry() {
        let unknown = Symbol::parse("GONE").expect("symbol");
        let service = service(SyntheticProvider::new().with_unknown(unknown));
        let scheduler = RefreshScheduler::new(
            Arc::clone(&service),
            vec![entry("ACME", 1), entry("GONE", 1), entry("INIT", 3)],
            Duration::from_secs(60),
        );

        let outcomes = scheduler.run_once().await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].result.is_ok());
        assert_eq!(
            outcomes[1].result.as_ref().expect_err("unknown").code(),
            "data.unavailable"
        );
        assert!(outcomes[2].result.is_ok());
        assert_eq!(service.registry().len(), 2);
    }

    #[tokio::test]
    async fn spawned_scheduler_refreshes_then_stops() {
        let provider = SyntheticProvider::new();
        let service = service(provider.clone());
        let handle = RefreshScheduler::new(
            Arc::clone(&service),
            vec![entry("ACME", 1)],
            Duration::from_secs(3_600),
        )
        .spawn();

        while service.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.shutdown().await;

        assert_eq!(service.registry().len(), 1);
        assert!(provider.calls() >= 1);
    }
}
