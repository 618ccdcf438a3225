use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Bar spacing of a series. Daily bars are the default; the intraday
/// spacings follow the provider's chart codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    #[default]
    OneDay,
}

impl Interval {
    pub const ALL: [Self; 5] = [
        Self::OneMinute,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::OneHour,
        Self::OneDay,
    ];

    /// Provider code and spacing in minutes.
    const fn table(self) -> (&'static str, u64) {
        match self {
            Self::OneMinute => ("1m", 1),
            Self::FiveMinutes => ("5m", 5),
            Self::FifteenMinutes => ("15m", 15),
            Self::OneHour => ("1h", 60),
            Self::OneDay => ("1d", 24 * 60),
        }
    }

    pub const fn as_str(self) -> &'static str {
        self.table().0
    }

    /// Nominal spacing between two consecutive bars.
    pub const fn duration(self) -> Duration {
        Duration::from_secs(self.table().1 * 60)
    }

    pub const fn is_intraday(self) -> bool {
        !matches!(self, Self::OneDay)
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let code = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|interval| interval.as_str() == code)
            .ok_or(ValidationError::InvalidInterval { value: code })
    }
}

impl TryFrom<String> for Interval {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.as_str().to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_case_insensitive() {
        let interval = Interval::from_str(" 1H ").expect("hourly");
        assert_eq!(interval, Interval::OneHour);
        assert_eq!(interval.duration(), Duration::from_secs(3_600));
        assert_eq!(Interval::OneDay.duration(), Duration::from_secs(86_400));
    }

    #[test]
    fn unknown_code_is_rejected() {
        let err = Interval::from_str("2h").expect_err("no such spacing");
        assert!(matches!(err, ValidationError::InvalidInterval { .. }));
    }

    #[test]
    fn json_uses_provider_codes() {
        let json = serde_json::to_string(&Interval::FifteenMinutes).expect("serialize");
        assert_eq!(json, "\"15m\"");
        let back: Interval = serde_json::from_str("\"1d\"").expect("deserialize");
        assert_eq!(back, Interval::OneDay);
        assert!(serde_json::from_str::<Interval>("\"1w\"").is_err());
    }

    #[test]
    fn only_daily_is_not_intraday() {
        let intraday = Interval::ALL.iter().filter(|i| i.is_intraday()).count();
        assert_eq!(intraday, 4);
    }
}
