use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use time::macros::time;
use time::{Date, Weekday};

use crate::data_source::{BarProvider, ProviderError, RawBar};
use crate::{DateRange, Interval, Symbol, UtcDateTime};

/// Offline provider producing a deterministic price path per symbol.
///
/// The close for a slot depends only on the symbol and the slot's
/// timestamp, so overlapping ranges agree bar for bar. Daily bars sit at
/// midnight UTC on weekdays; intraday bars cover 14:30-21:00 UTC.
#[derive(Debug, Clone, Default)]
pub struct SyntheticProvider {
    unknown: HashSet<Symbol>,
    dropped_dates: HashSet<Date>,
    latency: Duration,
    calls: Arc<AtomicUsize>,
}

impl SyntheticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `symbol` as unknown.
    pub fn with_unknown(mut self, symbol: Symbol) -> Self {
        self.unknown.insert(symbol);
        self
    }

    /// Omit every bar on `date`, leaving a gap.
    pub fn without_date(mut self, date: Date) -> Self {
        self.dropped_dates.insert(date);
        self
    }

    /// Delay every response.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of `fetch_bars` calls served so far, across clones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Bars for `symbol` in `range`, without the network-shaped wrapper.
    pub fn generate(&self, symbol: &Symbol, range: DateRange, interval: Interval) -> Vec<RawBar> {
        let seed = symbol_seed(symbol);
        let base = 20.0 + (seed % 180) as f64;
        let phase = (seed % 628) as f64 / 100.0;

        slots(range, interval)
            .filter(|ts| !self.dropped_dates.contains(&ts.date()))
            .map(|ts| {
                let k = slot_index(ts, interval);
                let mut rng = fastrand::Rng::with_seed(seed ^ k.wrapping_mul(0x9E37_79B9_7F4A_7C15));
                let k = k as f64;
                let level = 0.08 * (k / 23.0 + phase).sin() + 0.03 * (k / 7.0).sin();
                let close = base * level.exp() * (1.0 + 0.01 * (rng.f64() - 0.5));
                let open = close * (1.0 + 0.004 * (rng.f64() - 0.5));
                RawBar {
                    ts,
                    open,
                    high: open.max(close) * (1.0 + 0.003 * rng.f64()),
                    low: open.min(close) * (1.0 - 0.003 * rng.f64()),
                    close,
                    volume: Some(100_000 + rng.u64(0..900_000)),
                }
            })
            .collect()
    }
}

impl BarProvider for SyntheticProvider {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn fetch_bars<'a>(
        &'a self,
        symbol: &'a Symbol,
        range: DateRange,
        interval: Interval,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RawBar>, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if self.unknown.contains(symbol) {
                return Err(ProviderError::not_found(format!("unknown symbol '{symbol}'")));
            }
            Ok(self.generate(symbol, range, interval))
        })
    }
}

fn slots(range: DateRange, interval: Interval) -> impl Iterator<Item = UtcDateTime> {
    let step = interval.duration();
    weekdays(range.start().date(), range.end().date())
        .flat_map(move |date| {
            let (open, close) = if interval.is_intraday() {
                (
                    date.with_time(time!(14:30)).assume_utc(),
                    date.with_time(time!(21:00)).assume_utc(),
                )
            } else {
                let midnight = date.midnight().assume_utc();
                (midnight, midnight)
            };
            let mut next = Some(open);
            std::iter::from_fn(move || {
                let current = next?;
                let following = current + step;
                next = (following < close).then_some(following);
                Some(current)
            })
        })
        .filter_map(|ts| UtcDateTime::from_offset_datetime(ts).ok())
        .filter(move |ts| range.contains(*ts))
}

fn weekdays(first: Date, last: Date) -> impl Iterator<Item = Date> {
    std::iter::successors(Some(first), move |day| day.next_day().filter(|next| *next <= last))
        .filter(|day| !matches!(day.weekday(), Weekday::Saturday | Weekday::Sunday))
}

fn slot_index(ts: UtcDateTime, interval: Interval) -> u64 {
    (ts.unix_timestamp().max(0) as u64) / interval.duration().as_secs()
}

fn symbol_seed(symbol: &Symbol) -> u64 {
    symbol.as_str().bytes().fold(5381_u64, |acc, byte| {
        acc.wrapping_mul(33).wrapping_add(byte as u64)
    })
}
