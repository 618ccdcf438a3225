//! # Model Registry
//!
//! Caches trained models per [`TrainingConfig`] and makes sure concurrent
//! requests for one key share a single training run.
//!
//! ## Freshness
//!
//! A cached model is served while it is younger than the TTL and its
//! training range covers the range the caller asks for without reaching
//! past its end. A model that saw bars after a historical `as_of` is
//! therefore retrained on the shorter history. Otherwise the caller's
//! training function runs and the result replaces the entry.
//!
//! ## Single flight
//!
//! The first caller for a key registers a `watch` channel and spawns the
//! training on its own task; later callers subscribe to that channel.
//! Dropping any caller, the first included, leaves the run and the other
//! waiters untouched. Failures reach every waiter and are never cached.
//!
//! ## Locking
//!
//! One `std::sync::Mutex` guards the map. It is held only for map
//! operations, never across an `.await` and never while training.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::RegistryConfig;
use crate::trainer::{TrainedModel, TrainingConfig};
use crate::{DateRange, ForecastError};

type Outcome = Result<Arc<TrainedModel>, ForecastError>;

/// Counters for cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Served from cache.
    pub hits: u64,
    /// No entry for the key.
    pub misses: u64,
    /// Entry present but too old or not covering the request.
    pub stale: u64,
    /// Joined a run another caller started.
    pub joins: u64,
    pub trainings_started: u64,
    pub trainings_failed: u64,
    pub evictions: u64,
}

#[derive(Debug)]
struct Entry {
    model: Arc<TrainedModel>,
    stored_at: Instant,
    last_used: u64,
}

#[derive(Debug)]
struct Inflight {
    run_id: u64,
    receiver: watch::Receiver<Option<Outcome>>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<TrainingConfig, Entry>,
    inflight: HashMap<TrainingConfig, Inflight>,
    clock: u64,
    next_run_id: u64,
    stats: RegistryStats,
}

impl State {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn store(&mut self, key: TrainingConfig, model: Arc<TrainedModel>, capacity: usize) {
        let last_used = self.tick();
        self.entries.insert(
            key.clone(),
            Entry {
                model,
                stored_at: Instant::now(),
                last_used,
            },
        );

        while self.entries.len() > capacity {
            let victim = self
                .entries
                .iter()
                .filter(|(candidate, _)| **candidate != key)
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(candidate, _)| candidate.clone());
            let Some(victim) = victim else { break };
            self.entries.remove(&victim);
            self.stats.evictions += 1;
            tracing::debug!(config = %victim, "evicted least recently used model");
        }
    }
}

enum Lookup {
    Hit(Arc<TrainedModel>),
    Join(watch::Receiver<Option<Outcome>>),
    Lead {
        run_id: u64,
        sender: watch::Sender<Option<Outcome>>,
        receiver: watch::Receiver<Option<Outcome>>,
    },
}

/// Removes the in-flight registration if the training task ends without
/// doing so itself, e.g. when it panics.
struct InflightGuard {
    state: Arc<Mutex<State>>,
    key: TrainingConfig,
    run_id: u64,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if state.inflight.get(&self.key).map(|i| i.run_id) == Some(self.run_id) {
                state.inflight.remove(&self.key);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    ttl: Duration,
    capacity: usize,
    state: Arc<Mutex<State>>,
}

impl ModelRegistry {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(config.ttl(), config.capacity)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("registry lock is not poisoned")
    }

    /// The cached model for `config`, training it first if missing or stale.
    ///
    /// `coverage` is the data range the caller needs the model to have seen.
    /// `train` runs at most once per key at a time, however many callers
    /// arrive; it is not called at all on a fresh hit.
    pub async fn get_or_train<F, Fut>(
        &self,
        config: &TrainingConfig,
        coverage: Option<DateRange>,
        train: F,
    ) -> Result<Arc<TrainedModel>, ForecastError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TrainedModel, ForecastError>> + Send + 'static,
    {
        let receiver = match self.lookup(config, coverage) {
            Lookup::Hit(model) => return Ok(model),
            Lookup::Join(receiver) => receiver,
            Lookup::Lead {
                run_id,
                sender,
                receiver,
            } => {
                self.spawn_training(config.clone(), run_id, sender, train());
                receiver
            }
        };

        let model = wait_for_outcome(receiver).await?;
        if let Some(coverage) = coverage {
            if !fits(&model, &coverage) {
                tracing::warn!(
                    config = %config,
                    trained_until = %model.training_range().end(),
                    requested_until = %coverage.end(),
                    "retrained model does not match the requested range"
                );
            }
        }
        Ok(model)
    }

    fn lookup(&self, config: &TrainingConfig, coverage: Option<DateRange>) -> Lookup {
        let mut state = self.lock();
        let tick = state.tick();

        if let Some(entry) = state.entries.get_mut(config) {
            let expired = entry.stored_at.elapsed() > self.ttl;
            let unfit = coverage.is_some_and(|range| !fits(&entry.model, &range));
            if !expired && !unfit {
                entry.last_used = tick;
                let model = Arc::clone(&entry.model);
                state.stats.hits += 1;
                return Lookup::Hit(model);
            }
            state.stats.stale += 1;
            tracing::debug!(config = %config, expired, unfit, "cached model is stale");
        } else {
            state.stats.misses += 1;
        }

        if let Some(inflight) = state.inflight.get(config) {
            let receiver = inflight.receiver.clone();
            state.stats.joins += 1;
            return Lookup::Join(receiver);
        }

        state.next_run_id += 1;
        let run_id = state.next_run_id;
        let (sender, receiver) = watch::channel(None);
        state.inflight.insert(
            config.clone(),
            Inflight {
                run_id,
                receiver: receiver.clone(),
            },
        );
        state.stats.trainings_started += 1;
        Lookup::Lead {
            run_id,
            sender,
            receiver,
        }
    }

    fn spawn_training<Fut>(
        &self,
        key: TrainingConfig,
        run_id: u64,
        sender: watch::Sender<Option<Outcome>>,
        training: Fut,
    ) where
        Fut: Future<Output = Result<TrainedModel, ForecastError>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let capacity = self.capacity;
        tokio::spawn(async move {
            let _guard = InflightGuard {
                state: Arc::clone(&state),
                key: key.clone(),
                run_id,
            };
            tracing::debug!(config = %key, run_id, "training started");
            let outcome = training.await.map(Arc::new);

            {
                let mut state = state.lock().expect("registry lock is not poisoned");
                let current = state.inflight.get(&key).map(|i| i.run_id) == Some(run_id);
                if current {
                    state.inflight.remove(&key);
                }
                match &outcome {
                    Ok(model) if current => state.store(key.clone(), Arc::clone(model), capacity),
                    Ok(_) => {
                        tracing::debug!(config = %key, run_id, "key invalidated during training, result not cached")
                    }
                    Err(error) => {
                        state.stats.trainings_failed += 1;
                        tracing::warn!(config = %key, run_id, error = %error, "training failed");
                    }
                }
            }

            // Nobody waiting is fine.
            let _ = sender.send(Some(outcome));
        });
    }

    /// Drop the cached model for `config` and detach any run in flight so
    /// its result is not stored. Returns whether anything was removed.
    pub fn invalidate(&self, config: &TrainingConfig) -> bool {
        let mut state = self.lock();
        let removed_entry = state.entries.remove(config).is_some();
        let removed_run = state.inflight.remove(config).is_some();
        tracing::debug!(config = %config, removed_entry, removed_run, "invalidated");
        removed_entry || removed_run
    }

    /// Cached model without freshness checks or LRU bookkeeping.
    pub fn peek(&self, config: &TrainingConfig) -> Option<Arc<TrainedModel>> {
        self.lock()
            .entries
            .get(config)
            .map(|entry| Arc::clone(&entry.model))
    }

    pub fn is_training(&self, config: &TrainingConfig) -> bool {
        self.lock().inflight.contains_key(config)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Drop every cached model and detach every run in flight.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.inflight.clear();
    }

    pub fn stats(&self) -> RegistryStats {
        self.lock().stats
    }
}

/// True when the model saw every bar of `coverage` and none after it.
fn fits(model: &TrainedModel, coverage: &DateRange) -> bool {
    let trained = model.training_range();
    trained.covers(coverage) && trained.end() <= coverage.end()
}

async fn wait_for_outcome(mut receiver: watch::Receiver<Option<Outcome>>) -> Outcome {
    loop {
        if let Some(outcome) = receiver.borrow_and_update().clone() {
            return outcome;
        }
        if receiver.changed().await.is_err() {
            return Err(ForecastError::TrainingAborted {
                reason: String::from("training task ended without a result"),
            });
        }
    }
}
