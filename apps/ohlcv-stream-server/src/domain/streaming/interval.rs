//! Bar Intervals
//!
//! The interval names accepted on the wire, and how each one is served by
//! the upstream source. Thirteen intervals are native upstream; the rest are
//! built by fetching a native base interval and resampling it.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A bar interval as named in the client protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    /// One-minute bars.
    #[serde(rename = "in_1_minute")]
    Min1,
    /// Three-minute bars.
    #[serde(rename = "in_3_minute")]
    Min3,
    /// Five-minute bars.
    #[serde(rename = "in_5_minute")]
    Min5,
    /// Ten-minute bars (resampled from five-minute bars).
    #[serde(rename = "in_10_minute")]
    Min10,
    /// Fifteen-minute bars.
    #[serde(rename = "in_15_minute")]
    Min15,
    /// Thirty-minute bars.
    #[serde(rename = "in_30_minute")]
    Min30,
    /// Forty-five-minute bars.
    #[serde(rename = "in_45_minute")]
    Min45,
    /// Seventy-five-minute bars (resampled from fifteen-minute bars).
    #[serde(rename = "in_75_minute")]
    Min75,
    /// 125-minute bars (resampled from five-minute bars).
    #[serde(rename = "in_125_minute")]
    Min125,
    /// One-hour bars.
    #[serde(rename = "in_1_hour")]
    Hour1,
    /// Two-hour bars.
    #[serde(rename = "in_2_hour")]
    Hour2,
    /// Three-hour bars.
    #[serde(rename = "in_3_hour")]
    Hour3,
    /// Four-hour bars.
    #[serde(rename = "in_4_hour")]
    Hour4,
    /// Five-hour bars (resampled from one-hour bars).
    #[serde(rename = "in_5_hour")]
    Hour5,
    /// Six-hour bars (resampled from three-hour bars).
    #[serde(rename = "in_6_hour")]
    Hour6,
    /// Eight-hour bars (resampled from four-hour bars).
    #[serde(rename = "in_8_hour")]
    Hour8,
    /// Ten-hour bars (resampled from one-hour bars).
    #[serde(rename = "in_10_hour")]
    Hour10,
    /// Twelve-hour bars (resampled from one-hour bars).
    #[serde(rename = "in_12_hour")]
    Hour12,
    /// Daily bars.
    #[serde(rename = "in_daily")]
    Daily,
    /// Weekly bars.
    #[serde(rename = "in_weekly")]
    Weekly,
    /// Monthly bars.
    #[serde(rename = "in_monthly")]
    Monthly,
}

/// How an interval is obtained from the upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamPlan {
    /// The native interval requested upstream.
    pub native: Interval,
    /// Number of native bars folded into one output bar (1 = no resampling).
    pub factor: u32,
}

impl UpstreamPlan {
    /// Whether bars must be resampled after fetching.
    #[must_use]
    pub const fn needs_resampling(&self) -> bool {
        self.factor > 1
    }

    /// Length of one resampled bucket, if resampling applies.
    #[must_use]
    pub fn bucket(&self) -> Option<Duration> {
        if !self.needs_resampling() {
            return None;
        }
        self.native
            .intraday_minutes()
            .map(|minutes| Duration::from_secs(minutes * 60 * u64::from(self.factor)))
    }
}

impl Interval {
    /// Every interval accepted by the protocol.
    pub const ALL: [Self; 21] = [
        Self::Min1,
        Self::Min3,
        Self::Min5,
        Self::Min10,
        Self::Min15,
        Self::Min30,
        Self::Min45,
        Self::Min75,
        Self::Min125,
        Self::Hour1,
        Self::Hour2,
        Self::Hour3,
        Self::Hour4,
        Self::Hour5,
        Self::Hour6,
        Self::Hour8,
        Self::Hour10,
        Self::Hour12,
        Self::Daily,
        Self::Weekly,
        Self::Monthly,
    ];

    /// Wire name of the interval.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Min1 => "in_1_minute",
            Self::Min3 => "in_3_minute",
            Self::Min5 => "in_5_minute",
            Self::Min10 => "in_10_minute",
            Self::Min15 => "in_15_minute",
            Self::Min30 => "in_30_minute",
            Self::Min45 => "in_45_minute",
            Self::Min75 => "in_75_minute",
            Self::Min125 => "in_125_minute",
            Self::Hour1 => "in_1_hour",
            Self::Hour2 => "in_2_hour",
            Self::Hour3 => "in_3_hour",
            Self::Hour4 => "in_4_hour",
            Self::Hour5 => "in_5_hour",
            Self::Hour6 => "in_6_hour",
            Self::Hour8 => "in_8_hour",
            Self::Hour10 => "in_10_hour",
            Self::Hour12 => "in_12_hour",
            Self::Daily => "in_daily",
            Self::Weekly => "in_weekly",
            Self::Monthly => "in_monthly",
        }
    }

    /// Bar length in minutes for intraday intervals.
    ///
    /// Daily, weekly and monthly bars follow the exchange calendar and have
    /// no fixed length, so they return `None`.
    #[must_use]
    pub const fn intraday_minutes(self) -> Option<u64> {
        let minutes = match self {
            Self::Min1 => 1,
            Self::Min3 => 3,
            Self::Min5 => 5,
            Self::Min10 => 10,
            Self::Min15 => 15,
            Self::Min30 => 30,
            Self::Min45 => 45,
            Self::Min75 => 75,
            Self::Min125 => 125,
            Self::Hour1 => 60,
            Self::Hour2 => 120,
            Self::Hour3 => 180,
            Self::Hour4 => 240,
            Self::Hour5 => 300,
            Self::Hour6 => 360,
            Self::Hour8 => 480,
            Self::Hour10 => 600,
            Self::Hour12 => 720,
            Self::Daily | Self::Weekly | Self::Monthly => return None,
        };
        Some(minutes)
    }

    /// How this interval is served by the upstream source.
    #[must_use]
    pub const fn upstream_plan(self) -> UpstreamPlan {
        let (native, factor) = match self {
            Self::Min10 => (Self::Min5, 2),
            Self::Min75 => (Self::Min15, 5),
            Self::Min125 => (Self::Min5, 25),
            Self::Hour5 => (Self::Hour1, 5),
            Self::Hour6 => (Self::Hour3, 2),
            Self::Hour8 => (Self::Hour4, 2),
            Self::Hour10 => (Self::Hour1, 10),
            Self::Hour12 => (Self::Hour1, 12),
            native => (native, 1),
        };
        UpstreamPlan { native, factor }
    }

    /// Whether the upstream source serves this interval directly.
    #[must_use]
    pub const fn is_native(self) -> bool {
        self.upstream_plan().factor == 1
    }
}

impl Default for Interval {
    /// Streaming subscriptions default to one-minute bars.
    fn default() -> Self {
        Self::Min1
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an interval name is not part of the protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid interval: {0}")]
pub struct UnknownInterval(pub String);

impl FromStr for Interval {
    type Err = UnknownInterval;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|interval| interval.as_str() == s)
            .ok_or_else(|| UnknownInterval(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("in_1_minute", Interval::Min1)]
    #[test_case("in_10_minute", Interval::Min10)]
    #[test_case("in_125_minute", Interval::Min125)]
    #[test_case("in_12_hour", Interval::Hour12)]
    #[test_case("in_daily", Interval::Daily)]
    #[test_case("in_monthly", Interval::Monthly)]
    fn parses_wire_names(name: &str, expected: Interval) {
        assert_eq!(name.parse::<Interval>().unwrap(), expected);
    }

    #[test_case("IN_DAILY" ; "case sensitive")]
    #[test_case("in_2_minute" ; "unsupported length")]
    #[test_case("" ; "empty")]
    fn rejects_unknown_names(name: &str) {
        let err = name.parse::<Interval>().unwrap_err();
        assert_eq!(err.to_string(), format!("Invalid interval: {name}"));
    }

    #[test]
    fn wire_names_round_trip_through_serde() {
        for interval in Interval::ALL {
            let json = serde_json::to_string(&interval).unwrap();
            assert_eq!(json, format!("\"{}\"", interval.as_str()));
            assert_eq!(interval.as_str().parse::<Interval>().unwrap(), interval);
        }
    }

    #[test_case(Interval::Min10, Interval::Min5, 2)]
    #[test_case(Interval::Min75, Interval::Min15, 5)]
    #[test_case(Interval::Min125, Interval::Min5, 25)]
    #[test_case(Interval::Hour5, Interval::Hour1, 5)]
    #[test_case(Interval::Hour6, Interval::Hour3, 2)]
    #[test_case(Interval::Hour8, Interval::Hour4, 2)]
    #[test_case(Interval::Hour10, Interval::Hour1, 10)]
    #[test_case(Interval::Hour12, Interval::Hour1, 12)]
    fn synthetic_intervals_resample_a_native_base(
        interval: Interval,
        native: Interval,
        factor: u32,
    ) {
        let plan = interval.upstream_plan();
        assert_eq!(plan.native, native);
        assert_eq!(plan.factor, factor);
        assert!(native.is_native());
        assert!(!interval.is_native());

        let bucket = plan.bucket().unwrap();
        let expected = interval.intraday_minutes().unwrap() * 60;
        assert_eq!(bucket.as_secs(), expected);
    }

    #[test]
    fn thirteen_intervals_are_native() {
        let native = Interval::ALL.iter().filter(|i| i.is_native()).count();
        assert_eq!(native, 13);
    }

    #[test]
    fn native_plan_has_no_bucket() {
        let plan = Interval::Daily.upstream_plan();
        assert_eq!(plan.native, Interval::Daily);
        assert!(plan.bucket().is_none());
    }
}
