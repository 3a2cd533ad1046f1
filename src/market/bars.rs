//! Fixed-interval OHLC bar construction from mid-price ticks.
//!
//! The ATR/ADX estimators consume completed bars; the collector drives one
//! builder per symbol from aggregated mids.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

/// A completed OHLC bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Folds price ticks into fixed-interval bars. A tick landing in a new
/// interval closes and returns the previous bar.
#[derive(Debug)]
pub struct BarBuilder {
    interval: TimeDelta,
    current: Option<Bar>,
}

impl BarBuilder {
    /// One-minute bars, the cadence the indicator stack runs on.
    pub fn minutely() -> Self {
        Self::with_interval(TimeDelta::minutes(1))
    }

    pub fn with_interval(interval: TimeDelta) -> Self {
        Self {
            interval,
            current: None,
        }
    }

    /// Fold in a tick. Returns the completed bar when `timestamp` falls
    /// past the current interval.
    pub fn update(&mut self, timestamp: DateTime<Utc>, price: f64) -> Option<Bar> {
        let bucket = timestamp
            .duration_trunc(self.interval)
            .unwrap_or(timestamp);

        match self.current.as_mut() {
            None => {
                self.current = Some(Bar {
                    start: bucket,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                });
                None
            }
            Some(bar) if bar.start == bucket => {
                bar.high = bar.high.max(price);
                bar.low = bar.low.min(price);
                bar.close = price;
                None
            }
            Some(_) => {
                let completed = self.current.take();
                self.current = Some(Bar {
                    start: bucket,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                });
                completed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, min, sec).unwrap()
    }

    #[test]
    fn test_ticks_within_interval_update_in_place() {
        let mut builder = BarBuilder::minutely();
        assert!(builder.update(ts(0, 1), 100.0).is_none());
        assert!(builder.update(ts(0, 20), 103.0).is_none());
        assert!(builder.update(ts(0, 45), 99.0).is_none());

        // Rolling into the next minute emits the completed bar
        let bar = builder.update(ts(1, 0), 101.0).unwrap();
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 103.0);
        assert_eq!(bar.low, 99.0);
        assert_eq!(bar.close, 99.0);
        assert_eq!(bar.start, ts(0, 0));
    }

    #[test]
    fn test_gap_spanning_multiple_intervals_still_emits_one_bar() {
        let mut builder = BarBuilder::minutely();
        builder.update(ts(0, 10), 100.0);
        let bar = builder.update(ts(5, 0), 105.0).unwrap();
        assert_eq!(bar.close, 100.0);
    }
}
