//! Resampling of native bars into longer synthetic bars.
//!
//! Buckets are anchored at the first bar's timestamp, closed on the left and
//! labelled by their left edge. Within a bucket the open is the first open,
//! the high is the maximum, the low is the minimum, the close is the last
//! close and the volume is the sum. Buckets that receive no bars are omitted.

use std::time::Duration;

use chrono::TimeDelta;

use super::Bar;

/// Fold `bars` into buckets of length `bucket`.
///
/// Input order does not matter; bars are sorted by time first. A zero-length
/// bucket returns the sorted input unchanged.
#[must_use]
pub fn resample(bars: &[Bar], bucket: Duration) -> Vec<Bar> {
    let mut sorted = bars.to_vec();
    sorted.sort_by_key(|bar| bar.datetime);

    let Some(width) = TimeDelta::from_std(bucket).ok().filter(|w| !w.is_zero()) else {
        return sorted;
    };
    let Some(origin) = sorted.first().map(|bar| bar.datetime) else {
        return sorted;
    };

    let width_secs = width.num_seconds().max(1);
    let mut out: Vec<Bar> = Vec::new();
    let mut current_index: Option<i64> = None;

    for bar in sorted {
        let index = (bar.datetime - origin).num_seconds().div_euclid(width_secs);

        match out.last_mut() {
            Some(acc) if current_index == Some(index) => {
                acc.high = acc.high.max(bar.high);
                acc.low = acc.low.min(bar.low);
                acc.close = bar.close;
                acc.volume += bar.volume;
            }
            _ => {
                current_index = Some(index);
                out.push(Bar {
                    datetime: origin + TimeDelta::seconds(index * width_secs),
                    ..bar
                });
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, minute, 0).unwrap()
    }

    fn bar(minute: u32, open: Decimal, high: Decimal, low: Decimal, close: Decimal, volume: Decimal) -> Bar {
        Bar {
            datetime: at(minute),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn folds_pairs_of_five_minute_bars() {
        let bars = vec![
            bar(0, dec!(10), dec!(12), dec!(9), dec!(11), dec!(100)),
            bar(5, dec!(11), dec!(13), dec!(10), dec!(12), dec!(50)),
            bar(10, dec!(12), dec!(12.5), dec!(8), dec!(9), dec!(70)),
        ];

        let out = resample(&bars, Duration::from_secs(600));

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], bar(0, dec!(10), dec!(13), dec!(9), dec!(12), dec!(150)));
        assert_eq!(out[1], bar(10, dec!(12), dec!(12.5), dec!(8), dec!(9), dec!(70)));
    }

    #[test]
    fn anchors_at_first_bar_and_drops_empty_buckets() {
        let bars = vec![
            bar(3, dec!(1), dec!(1), dec!(1), dec!(1), dec!(1)),
            bar(45, dec!(2), dec!(2), dec!(2), dec!(2), dec!(2)),
        ];

        let out = resample(&bars, Duration::from_secs(600));

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].datetime, at(3));
        // 42 minutes past the origin lands in the bucket starting at +40.
        assert_eq!(out[1].datetime, at(43));
    }

    #[test]
    fn sorts_unordered_input() {
        let bars = vec![
            bar(5, dec!(11), dec!(13), dec!(10), dec!(12), dec!(50)),
            bar(0, dec!(10), dec!(12), dec!(9), dec!(11), dec!(100)),
        ];

        let out = resample(&bars, Duration::from_secs(600));

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].open, dec!(10));
        assert_eq!(out[0].close, dec!(12));
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(resample(&[], Duration::from_secs(600)).is_empty());
    }

    #[test]
    fn zero_bucket_only_sorts() {
        let bars = vec![
            bar(5, dec!(1), dec!(1), dec!(1), dec!(1), dec!(1)),
            bar(0, dec!(2), dec!(2), dec!(2), dec!(2), dec!(2)),
        ];
        let out = resample(&bars, Duration::ZERO);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].datetime, at(0));
    }
}
