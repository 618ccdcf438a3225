//! Windowed feature/label construction.
//!
//! For an anchor bar `t` the features are the `window` log returns ending
//! at `t`, computed from closes `t - window ..= t`. The label is the price
//! change from `t` to `t + horizon`. Nothing at or after the label bar ever
//! reaches the features.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{ForecastError, TimeSeries, UtcDateTime, ValidationError};

pub const MAX_WINDOW: usize = 1_024;
pub const MAX_HORIZON: usize = 1_024;

/// How the label measures the move from the anchor close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelKind {
    /// `close[t + h] / close[t] - 1`
    #[default]
    Relative,
    /// `close[t + h] - close[t]`
    Absolute,
}

impl Display for LabelKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Relative => "relative",
            Self::Absolute => "absolute",
        })
    }
}

/// One training example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub features: Vec<f64>,
    pub label: f64,
    /// Timestamp of the oldest close used by the features.
    pub window_start: UtcDateTime,
    /// Timestamp of the anchor bar; the newest data in the features.
    pub as_of: UtcDateTime,
    pub label_at: UtcDateTime,
    /// A recorded gap lies somewhere between `window_start` and `label_at`.
    pub spans_gap: bool,
}

/// Features for the most recent anchor of a series, used at prediction time.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceWindow {
    pub features: Vec<f64>,
    pub as_of: UtcDateTime,
    pub last_close: f64,
}

impl InferenceWindow {
    /// Shift the window one step forward as if a bar with log return
    /// `log_return` had closed at `at`.
    pub fn roll(&mut self, log_return: f64, at: UtcDateTime) {
        if !self.features.is_empty() {
            self.features.remove(0);
            self.features.push(log_return);
        }
        self.last_close *= log_return.exp();
        self.as_of = at;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureBuilder {
    label_kind: LabelKind,
}

impl FeatureBuilder {
    pub fn new(label_kind: LabelKind) -> Self {
        Self { label_kind }
    }

    pub const fn label_kind(&self) -> LabelKind {
        self.label_kind
    }

    /// Every sample the series can support, oldest first.
    ///
    /// A series of `n` bars yields `n - window - horizon` samples.
    ///
    /// # Errors
    ///
    /// [`ForecastError::InsufficientData`] when the series holds fewer than
    /// `window + horizon` bars.
    pub fn build(
        &self,
        series: &TimeSeries,
        window: usize,
        horizon: usize,
    ) -> Result<Vec<Sample>, ForecastError> {
        validate_window(window)?;
        validate_horizon(horizon)?;

        let bars = series.bars();
        let n = bars.len();
        let required = window + horizon;
        if n < required {
            return Err(ForecastError::insufficient("feature window", required, n));
        }

        let closes = series.closes().collect::<Vec<_>>();
        let returns = log_returns(&closes);
        let gap_prefix = gap_prefix_counts(series);

        let samples = (window..n - horizon)
            .map(|t| {
                let label_index = t + horizon;
                let label = match self.label_kind {
                    LabelKind::Relative => closes[label_index] / closes[t] - 1.0,
                    LabelKind::Absolute => closes[label_index] - closes[t],
                };
                Sample {
                    // returns[i - 1] is ln(close[i] / close[i - 1])
                    features: returns[t - window..t].to_vec(),
                    label,
                    window_start: bars[t - window].ts,
                    as_of: bars[t].ts,
                    label_at: bars[label_index].ts,
                    spans_gap: gap_prefix[label_index] > gap_prefix[t - window],
                }
            })
            .collect();

        Ok(samples)
    }

    /// Features for the last bar of the series.
    ///
    /// # Errors
    ///
    /// [`ForecastError::InsufficientData`] with fewer than `window + 1` bars.
    pub fn latest(
        &self,
        series: &TimeSeries,
        window: usize,
    ) -> Result<InferenceWindow, ForecastError> {
        validate_window(window)?;

        let bars = series.bars();
        let n = bars.len();
        if n < window + 1 {
            return Err(ForecastError::insufficient("inference window", window + 1, n));
        }

        let closes = bars[n - window - 1..]
            .iter()
            .map(|bar| bar.close)
            .collect::<Vec<_>>();
        Ok(InferenceWindow {
            features: log_returns(&closes),
            as_of: bars[n - 1].ts,
            last_close: closes[window],
        })
    }
}

// Closes are strictly positive by `PriceBar` construction.
fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .map(|pair| (pair[1] / pair[0]).ln())
        .collect()
}

// prefix[i] counts the gaps recorded between bars 0..=i, so a gap between
// bars a and b exists iff prefix[b] > prefix[a].
fn gap_prefix_counts(series: &TimeSeries) -> Vec<usize> {
    let bars = series.bars();
    let mut gaps = series.gaps().iter().peekable();
    let mut prefix = Vec::with_capacity(bars.len());
    let mut count = 0;
    for bar in bars {
        while gaps.next_if(|gap| gap.before <= bar.ts).is_some() {
            count += 1;
        }
        prefix.push(count);
    }
    prefix
}

pub(crate) fn validate_window(window: usize) -> Result<(), ValidationError> {
    if window == 0 || window > MAX_WINDOW {
        return Err(ValidationError::out_of_range("window", window, 1, MAX_WINDOW));
    }
    Ok(())
}

pub(crate) fn validate_horizon(horizon: usize) -> Result<(), ValidationError> {
    if horizon == 0 || horizon > MAX_HORIZON {
        return Err(ValidationError::out_of_range("horizon", horizon, 1, MAX_HORIZON));
    }
    Ok(())
}
