//! # Domain Models
//!
//! Canonical market-data types shared by every stage of the engine.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Validated, upper-cased ticker |
//! | [`UtcDateTime`] | UTC timestamp |
//! | [`DateRange`] | Inclusive `[start, end]` range |
//! | [`Interval`] | Bar spacing (1m, 5m, 15m, 1h, 1d) |
//! | [`PriceBar`] | OHLCV bar |
//! | [`TimeSeries`] | Ordered bars for one symbol with explicit [`Gap`]s |
//!
//! All constructors validate their invariants and return
//! [`ValidationError`](crate::ValidationError) instead of building an
//! invalid value:
//!
//! ```rust
//! use tickcast_core::{PriceBar, UtcDateTime, ValidationError};
//!
//! let ts = UtcDateTime::parse("2024-01-02T00:00:00Z").unwrap();
//! assert!(PriceBar::new(ts, 100.0, 105.0, 95.0, 102.0, Some(1_000)).is_ok());
//!
//! let inverted = PriceBar::new(ts, 100.0, 95.0, 105.0, 102.0, Some(1_000));
//! assert!(matches!(inverted, Err(ValidationError::InvalidBarRange)));
//! ```

mod interval;
mod models;
mod symbol;
mod timestamp;

pub use interval::Interval;
pub use models::{DateRange, Gap, PriceBar, TimeSeries};
pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
