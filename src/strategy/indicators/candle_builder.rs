//! Candle Builder - Aggregates base bars into a higher timeframe
//!
//! Bars are bucketed by their open time. A higher timeframe candle is emitted
//! on the base bar that closes its bucket, never earlier, so indicators fed
//! from it only see data up to that bar's close. Weekly buckets start Monday
//! 00:00 UTC.

use chrono::{DateTime, TimeZone, Utc};

use super::Candle;
use crate::domain::snapshot::Timeframe;

/// Unix epoch is a Thursday; Monday 1970-01-05 is four days later
const WEEK_OFFSET_SECS: i64 = 4 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct CandleBuilder {
    base: Timeframe,
    target: Timeframe,
    bucket_start: Option<i64>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl CandleBuilder {
    pub fn new(base: Timeframe, target: Timeframe) -> Self {
        Self {
            base,
            target,
            bucket_start: None,
            open: 0.0,
            high: f64::MIN,
            low: f64::MAX,
            close: 0.0,
            volume: 0.0,
        }
    }

    pub fn target(&self) -> Timeframe {
        self.target
    }

    /// Feed one base bar. Returns every candle completed by it: usually none
    /// or one, two when a gap left the previous bucket unfinished.
    pub fn update(&mut self, bar: &Candle) -> Vec<Candle> {
        let mut completed = Vec::new();
        let bucket = self.bucket_of(bar.time.timestamp());

        match self.bucket_start {
            Some(current) if current == bucket => {
                self.high = self.high.max(bar.high);
                self.low = self.low.min(bar.low);
                self.close = bar.close;
                self.volume += bar.volume;
            }
            Some(_) => {
                // Gap in the base series: the previous bucket never saw its last bar
                if let Some(candle) = self.close_candle() {
                    completed.push(candle);
                }
                self.start_new_candle(bucket, bar);
            }
            None => self.start_new_candle(bucket, bar),
        }

        let bar_end = bar.time.timestamp() + self.base.seconds();
        if bar_end >= bucket + self.target.seconds() {
            if let Some(candle) = self.close_candle() {
                completed.push(candle);
            }
            self.reset();
        }
        completed
    }

    pub fn is_building(&self) -> bool {
        self.bucket_start.is_some()
    }

    pub fn reset(&mut self) {
        self.bucket_start = None;
        self.open = 0.0;
        self.high = f64::MIN;
        self.low = f64::MAX;
        self.close = 0.0;
        self.volume = 0.0;
    }

    fn bucket_of(&self, ts: i64) -> i64 {
        let len = self.target.seconds();
        let offset = if self.target == Timeframe::W1 { WEEK_OFFSET_SECS } else { 0 };
        (ts - offset).div_euclid(len) * len + offset
    }

    fn start_new_candle(&mut self, bucket: i64, bar: &Candle) {
        self.bucket_start = Some(bucket);
        self.open = bar.open;
        self.high = bar.high;
        self.low = bar.low;
        self.close = bar.close;
        self.volume = bar.volume;
    }

    fn close_candle(&self) -> Option<Candle> {
        let start = self.bucket_start?;
        let time: DateTime<Utc> = Utc.timestamp_opt(start, 0).single()?;
        Some(Candle::new(time, self.open, self.high, self.low, self.close, self.volume))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn hourly(start: DateTime<Utc>, hour: i64, close: f64) -> Candle {
        Candle::new(start + Duration::hours(hour), close, close + 1.0, close - 1.0, close, 10.0)
    }

    fn midnight() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_four_hour_aggregation() {
        let mut builder = CandleBuilder::new(Timeframe::H1, Timeframe::H4);
        let start = midnight();

        for hour in 0..3 {
            assert!(builder.update(&hourly(start, hour, 100.0 + hour as f64)).is_empty());
            assert!(builder.is_building());
        }
        let completed = builder.update(&hourly(start, 3, 99.0));
        assert_eq!(completed.len(), 1);

        let candle = completed[0];
        assert_eq!(candle.time, start);
        assert_eq!(candle.open, 100.0);
        assert_eq!(candle.high, 103.0);
        assert_eq!(candle.low, 98.0);
        assert_eq!(candle.close, 99.0);
        assert_eq!(candle.volume, 40.0);
        assert!(!builder.is_building());
    }

    #[test]
    fn test_same_timeframe_passthrough() {
        let mut builder = CandleBuilder::new(Timeframe::H1, Timeframe::H1);
        let completed = builder.update(&hourly(midnight(), 5, 100.0));
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].time, midnight() + Duration::hours(5));
    }

    #[test]
    fn test_gap_flushes_previous_bucket() {
        let mut builder = CandleBuilder::new(Timeframe::H1, Timeframe::H4);
        let start = midnight();
        builder.update(&hourly(start, 0, 100.0));
        builder.update(&hourly(start, 1, 101.0));

        // Hours 2 and 3 missing; hour 7 closes the second bucket as well
        let completed = builder.update(&hourly(start, 7, 105.0));
        assert_eq!(completed.len(), 2);
        assert_eq!(completed[0].time, start);
        assert_eq!(completed[0].close, 101.0);
        assert_eq!(completed[1].time, start + Duration::hours(4));
    }

    #[test]
    fn test_weekly_bucket_starts_monday() {
        // 2024-01-01 is a Monday
        let mut builder = CandleBuilder::new(Timeframe::D1, Timeframe::W1);
        let start = midnight();
        let mut completed = Vec::new();
        for day in 0..7 {
            let bar = Candle::new(start + Duration::days(day), 1.0, 2.0, 0.5, 1.5, 1.0);
            completed.extend(builder.update(&bar));
        }
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].time, start);
    }
}
