use serde::{Deserialize, Serialize};

use crate::{Interval, Symbol, UtcDateTime, ValidationError};

/// Inclusive time range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: UtcDateTime,
    end: UtcDateTime,
}

impl DateRange {
    pub fn new(start: UtcDateTime, end: UtcDateTime) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvertedRange {
                start: start.format_rfc3339(),
                end: end.format_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    /// Range of `lookback` ending at `end`.
    pub fn trailing(end: UtcDateTime, lookback: std::time::Duration) -> Self {
        Self {
            start: end.saturating_sub(lookback),
            end,
        }
    }

    pub const fn start(&self) -> UtcDateTime {
        self.start
    }

    pub const fn end(&self) -> UtcDateTime {
        self.end
    }

    pub fn contains(&self, ts: UtcDateTime) -> bool {
        self.start <= ts && ts <= self.end
    }

    /// True when every instant of `other` lies inside `self`.
    pub fn covers(&self, other: &DateRange) -> bool {
        self.start <= other.start && self.end >= other.end
    }
}

/// OHLCV bar. Prices are finite, strictly positive, and `low <= open, close <= high`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub ts: UtcDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<u64>,
}

impl PriceBar {
    pub fn new(
        ts: UtcDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: Option<u64>,
    ) -> Result<Self, ValidationError> {
        validate_price("open", open)?;
        validate_price("high", high)?;
        validate_price("low", low)?;
        validate_price("close", close)?;

        if high < low {
            return Err(ValidationError::InvalidBarRange);
        }

        if open < low || open > high || close < low || close > high {
            return Err(ValidationError::InvalidBarBounds);
        }

        Ok(Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

/// Expected bars absent between two consecutive bars of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub after: UtcDateTime,
    pub before: UtcDateTime,
    pub missing: usize,
}

/// Canonical bar series for one symbol over a requested range.
///
/// Bars are strictly increasing in time and lie within `range`. Missing
/// trading periods are listed in `gaps` and are never filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    symbol: Symbol,
    interval: Interval,
    range: DateRange,
    bars: Vec<PriceBar>,
    gaps: Vec<Gap>,
}

impl TimeSeries {
    /// Build a series from bars that are already sorted and deduplicated.
    pub fn new(
        symbol: Symbol,
        interval: Interval,
        range: DateRange,
        bars: Vec<PriceBar>,
    ) -> Result<Self, ValidationError> {
        for (index, bar) in bars.iter().enumerate() {
            if !range.contains(bar.ts) {
                return Err(ValidationError::BarOutsideRange { index });
            }
            if index > 0 && bars[index - 1].ts >= bar.ts {
                return Err(ValidationError::BarsNotIncreasing { index });
            }
        }

        let gaps = detect_gaps(&bars, interval);
        Ok(Self {
            symbol,
            interval,
            range,
            bars,
            gaps,
        })
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub const fn interval(&self) -> Interval {
        self.interval
    }

    /// The range that was requested, not the span of the bars.
    pub const fn requested_range(&self) -> DateRange {
        self.range
    }

    /// Span from the first to the last bar, if any.
    pub fn data_range(&self) -> Option<DateRange> {
        let first = self.bars.first()?;
        let last = self.bars.last()?;
        Some(DateRange {
            start: first.ts,
            end: last.ts,
        })
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn gaps(&self) -> &[Gap] {
        &self.gaps
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> impl Iterator<Item = f64> + '_ {
        self.bars.iter().map(|bar| bar.close)
    }
}

fn detect_gaps(bars: &[PriceBar], interval: Interval) -> Vec<Gap> {
    bars.windows(2)
        .filter_map(|pair| {
            let (prev, next) = (&pair[0], &pair[1]);
            let missing = if interval.is_intraday() {
                missing_intraday_slots(prev.ts, next.ts, interval)
            } else {
                weekdays_between(prev.ts, next.ts)
            };
            (missing > 0).then_some(Gap {
                after: prev.ts,
                before: next.ts,
                missing,
            })
        })
        .collect()
}

// Only slots on the same UTC day count: overnight and weekend breaks are
// market closures, not missing data.
fn missing_intraday_slots(prev: UtcDateTime, next: UtcDateTime, interval: Interval) -> usize {
    if prev.date() != next.date() {
        return 0;
    }
    let step = interval.duration().as_secs();
    let elapsed = next.duration_since(prev).as_secs();
    (elapsed / step).saturating_sub(1) as usize
}

fn weekdays_between(prev: UtcDateTime, next: UtcDateTime) -> usize {
    let end = next.date();
    let mut day = prev.date();
    let mut missing = 0;
    while let Some(following) = day.next_day() {
        if following >= end {
            break;
        }
        if !matches!(
            following.weekday(),
            time::Weekday::Saturday | time::Weekday::Sunday
        ) {
            missing += 1;
        }
        day = following;
    }
    missing
}

// Returns are log ratios of closes, so zero is as unusable as negative.
fn validate_price(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value <= 0.0 {
        return Err(ValidationError::NonPositivePrice { field });
    }
    Ok(())
}
