//! Market data acquisition.
//!
//! Two contracts live here:
//!
//! | Trait | Role |
//! |-------|------|
//! | [`BarProvider`] | Raw upstream boundary; untrusted, may return duplicates, unordered or out-of-range bars |
//! | [`MarketDataSource`] | Canonical fetch returning a normalized [`TimeSeries`] or a [`ForecastError`] |
//!
//! [`MarketData`] implements [`MarketDataSource`] on top of any provider,
//! adding bounded retries for transient faults, a request-rate limit, a
//! caller-supplied deadline, and a short-lived cache for identical requests.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::cache::TtlCache;
use crate::config::SourceConfig;
use crate::retry::RetryConfig;
use crate::{DateRange, ForecastError, Interval, PriceBar, Symbol, TimeSeries, UtcDateTime};

/// Bar as delivered by a provider, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBar {
    pub ts: UtcDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<u64>,
}

/// Provider-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The provider does not know the symbol.
    NotFound,
    RateLimited,
    Unavailable,
    Timeout,
    /// The provider refused the request itself; repeating it cannot help.
    Rejected,
    /// The payload could not be decoded.
    Malformed,
}

impl ProviderErrorKind {
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::RateLimited | Self::Unavailable | Self::Timeout)
    }
}

/// Structured provider error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    kind: ProviderErrorKind,
    message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotFound, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RateLimited, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Rejected, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Malformed, message)
    }

    pub const fn kind(&self) -> ProviderErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?})", self.message, self.kind)
    }
}

impl std::error::Error for ProviderError {}

/// Upstream bar provider.
///
/// Implementations must be `Send + Sync`; a single provider is shared by
/// every concurrent request.
pub trait BarProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn fetch_bars<'a>(
        &'a self,
        symbol: &'a Symbol,
        range: DateRange,
        interval: Interval,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RawBar>, ProviderError>> + Send + 'a>>;
}

/// Canonical series fetch.
pub trait MarketDataSource: Send + Sync {
    /// Fetch bars for `symbol` within `range`.
    ///
    /// # Errors
    ///
    /// - [`ForecastError::DataUnavailable`] for unknown symbols or zero bars
    /// - [`ForecastError::DataSourceTimeout`] when `deadline` elapses
    /// - [`ForecastError::DataSourceError`] for other provider faults
    fn fetch<'a>(
        &'a self,
        symbol: &'a Symbol,
        range: DateRange,
        interval: Interval,
        deadline: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<TimeSeries, ForecastError>> + Send + 'a>>;
}

/// Turn an untrusted provider payload into a canonical series.
///
/// Drops bars outside `range` and bars failing validation, sorts by time,
/// and keeps the last bar delivered for a repeated timestamp.
pub fn normalize(
    symbol: &Symbol,
    range: DateRange,
    interval: Interval,
    raw: Vec<RawBar>,
) -> Result<TimeSeries, ForecastError> {
    let received = raw.len();
    let mut bars = raw
        .into_iter()
        .enumerate()
        .filter(|(_, bar)| range.contains(bar.ts))
        .filter_map(|(order, bar)| {
            PriceBar::new(bar.ts, bar.open, bar.high, bar.low, bar.close, bar.volume)
                .ok()
                .map(|bar| (order, bar))
        })
        .collect::<Vec<_>>();

    bars.sort_by(|(left_order, left), (right_order, right)| {
        left.ts.cmp(&right.ts).then(left_order.cmp(right_order))
    });

    let mut deduped: Vec<PriceBar> = Vec::with_capacity(bars.len());
    for (_, bar) in bars {
        match deduped.last_mut() {
            Some(last) if last.ts == bar.ts => *last = bar,
            _ => deduped.push(bar),
        }
    }

    if deduped.is_empty() {
        return Err(ForecastError::DataUnavailable {
            symbol: symbol.to_string(),
            message: format!("provider returned no usable bars in range ({received} received)"),
        });
    }

    if deduped.len() < received {
        tracing::debug!(
            symbol = %symbol,
            received,
            kept = deduped.len(),
            "dropped duplicate, invalid or out-of-range bars"
        );
    }

    Ok(TimeSeries::new(symbol.clone(), interval, range, deduped)?)
}

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;
type SeriesKey = (Symbol, Interval, UtcDateTime, UtcDateTime);

/// Requests whose bounds fall in the same interval slots share a key, so
/// repeated `now()`-anchored lookbacks hit the cache.
fn series_key(symbol: &Symbol, range: DateRange, interval: Interval) -> SeriesKey {
    let step = interval.duration();
    (
        symbol.clone(),
        interval,
        range.start().floor_to(step),
        range.end().floor_to(step),
    )
}

/// The cached bars that fall inside `range`; `None` when none do.
fn recut(cached: &TimeSeries, range: DateRange) -> Option<TimeSeries> {
    let bars = cached
        .bars()
        .iter()
        .filter(|bar| range.contains(bar.ts))
        .cloned()
        .collect::<Vec<_>>();
    if bars.is_empty() {
        return None;
    }
    TimeSeries::new(cached.symbol().clone(), cached.interval(), range, bars).ok()
}

/// [`MarketDataSource`] over a [`BarProvider`].
#[derive(Clone)]
pub struct MarketData {
    provider: Arc<dyn BarProvider>,
    retry: RetryConfig,
    limiter: Option<Arc<DirectRateLimiter>>,
    cache: TtlCache<SeriesKey, TimeSeries>,
}

impl MarketData {
    /// No retries, no rate limit, no cache.
    pub fn new(provider: Arc<dyn BarProvider>) -> Self {
        Self {
            provider,
            retry: RetryConfig::no_retry(),
            limiter: None,
            cache: TtlCache::disabled(),
        }
    }

    pub fn from_config(provider: Arc<dyn BarProvider>, config: &SourceConfig) -> Self {
        Self::new(provider)
            .with_retry(config.retry.clone())
            .with_rate_limit(config.requests_per_minute)
            .with_cache(
                Duration::from_millis(config.cache_ttl_ms),
                config.cache_max_entries,
            )
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Limit upstream calls per minute; zero disables the limit.
    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.limiter = NonZeroU32::new(requests_per_minute)
            .map(|limit| Arc::new(RateLimiter::direct(Quota::per_minute(limit))));
        self
    }

    pub fn with_cache(mut self, ttl: Duration, max_entries: usize) -> Self {
        self.cache = TtlCache::new(ttl, max_entries);
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    async fn fetch_with_retry(
        &self,
        symbol: &Symbol,
        range: DateRange,
        interval: Interval,
    ) -> Result<TimeSeries, ForecastError> {
        let key = series_key(symbol, range, interval);
        if let Some(series) = self.cache.get(&key).await.and_then(|hit| recut(&hit, range)) {
            tracing::debug!(symbol = %symbol, "series cache hit");
            return Ok(series);
        }

        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            match self.provider.fetch_bars(symbol, range, interval).await {
                Ok(raw) => {
                    let series = normalize(symbol, range, interval, raw)?;
                    self.cache.put(key, series.clone()).await;
                    return Ok(series);
                }
                Err(error) if error.kind() == ProviderErrorKind::NotFound => {
                    return Err(ForecastError::DataUnavailable {
                        symbol: symbol.to_string(),
                        message: error.message().to_owned(),
                    });
                }
                Err(error) if error.kind().is_transient() && attempt < self.retry.max_attempts() => {
                    let delay = self.retry.delay_for_retry(attempt - 1);
                    tracing::warn!(
                        provider = self.provider.name(),
                        symbol = %symbol,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient provider failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    tracing::warn!(
                        provider = self.provider.name(),
                        symbol = %symbol,
                        attempt,
                        error = %error,
                        "provider failure"
                    );
                    return Err(ForecastError::DataSourceError {
                        symbol: symbol.to_string(),
                        message: error.message().to_owned(),
                        attempts: attempt,
                    });
                }
            }
        }
    }
}

impl MarketDataSource for MarketData {
    fn fetch<'a>(
        &'a self,
        symbol: &'a Symbol,
        range: DateRange,
        interval: Interval,
        deadline: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<TimeSeries, ForecastError>> + Send + 'a>> {
        Box::pin(async move {
            // Dropping the inner future on expiry aborts the HTTP exchange
            // and any pending backoff sleep.
            match tokio::time::timeout(deadline, self.fetch_with_retry(symbol, range, interval))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ForecastError::DataSourceTimeout {
                    symbol: symbol.to_string(),
                    timeout_ms: deadline.as_millis() as u64,
                }),
            }
        })
    }
}
