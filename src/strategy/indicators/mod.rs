//! Incremental indicators for the replay driver
//!
//! - `series`: EMA, RSI, ATR, MACD, Bollinger and rolling windows
//! - `adx`: Wilder's ADX
//! - `candle_builder`: aggregates base bars into higher timeframe candles
//!
//! `FrameState` bundles one of each per timeframe and produces a
//! `TimeframeIndicators` record once every component is warmed up.

pub mod adx;
pub mod candle_builder;
pub mod series;

pub use adx::{Adx, AdxResult};
pub use candle_builder::CandleBuilder;
pub use series::{Atr, Bollinger, Ema, Macd, RollingWindow, Rsi};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::snapshot::TimeframeIndicators;

/// OHLCV candle, `time` is the candle open
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    #[serde(alias = "timestamp")]
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    pub fn new(time: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self { time, open, high, low, close, volume }
    }

    /// Validate OHLC data integrity
    pub fn is_valid(&self) -> bool {
        self.high >= self.low
            && self.close >= self.low
            && self.close <= self.high
            && self.open >= self.low
            && self.open <= self.high
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.open.is_finite()
            && self.volume.is_finite()
    }
}

/// Indicator periods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub ema_fast: usize,
    pub ema_mid: usize,
    pub ema_slow: usize,
    pub adx_period: usize,
    pub rsi_period: usize,
    pub atr_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    pub bb_std_dev: f64,
    pub volume_period: usize,
    /// Candles in the highest-high breakout window
    pub breakout_lookback: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ema_fast: 20,
            ema_mid: 50,
            ema_slow: 200,
            adx_period: 14,
            rsi_period: 14,
            atr_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_std_dev: 2.0,
            volume_period: 20,
            breakout_lookback: 20,
        }
    }
}

/// Streaming indicator state for one timeframe
#[derive(Debug, Clone)]
pub struct FrameState {
    ema_fast: Ema,
    ema_mid: Ema,
    ema_slow: Ema,
    adx: Adx,
    rsi: Rsi,
    atr: Atr,
    macd: Macd,
    bollinger: Bollinger,
    volume: RollingWindow,
    highs: RollingWindow,
    latest: Option<TimeframeIndicators>,
    candles: usize,
}

impl FrameState {
    pub fn new(config: &IndicatorConfig) -> Self {
        Self {
            ema_fast: Ema::new(config.ema_fast),
            ema_mid: Ema::new(config.ema_mid),
            ema_slow: Ema::new(config.ema_slow),
            adx: Adx::new(config.adx_period),
            rsi: Rsi::new(config.rsi_period),
            atr: Atr::new(config.atr_period),
            macd: Macd::new(config.macd_fast, config.macd_slow, config.macd_signal),
            bollinger: Bollinger::new(config.bb_period, config.bb_std_dev),
            volume: RollingWindow::new(config.volume_period),
            highs: RollingWindow::new(config.breakout_lookback),
            latest: None,
            candles: 0,
        }
    }

    /// Feed one completed candle. Returns the record once warmed up.
    pub fn update(&mut self, candle: &Candle) -> Option<TimeframeIndicators> {
        self.candles += 1;
        let previous = self.latest;

        let ema_fast = self.ema_fast.update(candle.close);
        let ema_mid = self.ema_mid.update(candle.close);
        let ema_slow = self.ema_slow.update(candle.close);
        let adx = self.adx.update(candle);
        let rsi = self.rsi.update(candle.close);
        let atr = self.atr.update(candle);
        let macd = self.macd.update(candle.close);
        let bands = self.bollinger.update(candle.close);
        self.volume.push(candle.volume);
        self.highs.push(candle.high);

        let (Some(ema_fast), Some(ema_mid), Some(ema_slow), Some(rsi), Some(atr), Some(macd), Some(bands), Some(volume_avg)) =
            (ema_fast, ema_mid, ema_slow, rsi, atr, macd, bands, self.volume.mean())
        else {
            return None;
        };
        if !adx.is_valid {
            return None;
        }

        let highest_high = self.highs.max();
        // Nearest level above the close among the EMAs, upper band and recent high
        let resistance = [Some(ema_fast), Some(ema_mid), Some(ema_slow), Some(bands.upper), highest_high]
            .into_iter()
            .flatten()
            .filter(|level| *level > candle.close)
            .reduce(f64::min);

        let record = TimeframeIndicators {
            close: candle.close,
            ema_fast,
            ema_mid,
            ema_slow,
            adx: adx.adx,
            adx_prev: previous.map(|p| p.adx),
            rsi,
            atr,
            macd: macd.macd,
            macd_signal: macd.signal,
            macd_hist_prev: previous.map(|p| p.macd_hist()),
            bb_upper: bands.upper,
            bb_lower: bands.lower,
            volume: candle.volume,
            volume_avg,
            highest_high,
            resistance,
        };
        self.latest = Some(record);
        self.latest
    }

    pub fn latest(&self) -> Option<&TimeframeIndicators> {
        self.latest.as_ref()
    }

    pub fn candles(&self) -> usize {
        self.candles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn small_config() -> IndicatorConfig {
        IndicatorConfig {
            ema_fast: 3,
            ema_mid: 5,
            ema_slow: 8,
            adx_period: 3,
            rsi_period: 3,
            atr_period: 3,
            macd_fast: 3,
            macd_slow: 5,
            macd_signal: 2,
            bb_period: 4,
            bb_std_dev: 2.0,
            volume_period: 4,
            breakout_lookback: 4,
        }
    }

    #[test]
    fn test_candle_validation() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(Candle::new(t, 100.0, 105.0, 95.0, 102.0, 1000.0).is_valid());
        assert!(!Candle::new(t, 100.0, 95.0, 105.0, 100.0, 1000.0).is_valid());
        assert!(!Candle::new(t, 100.0, 105.0, 95.0, 110.0, 1000.0).is_valid());
    }

    #[test]
    fn test_frame_state_warmup_and_history() {
        let mut state = FrameState::new(&small_config());
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut records = Vec::new();
        for i in 0..20 {
            let close = 100.0 + i as f64;
            let candle = Candle::new(start + Duration::hours(i), close - 0.5, close + 1.0, close - 1.0, close, 10.0);
            records.push(state.update(&candle));
        }

        assert!(records[0].is_none());
        let first_ready = records.iter().position(Option::is_some).unwrap();
        // EMA8 and MACD(3,5,2) need the most history
        assert!(first_ready >= 7);
        assert!(records[first_ready].unwrap().adx_prev.is_none());

        let last = records[19].unwrap();
        assert!(last.ema_fast > last.ema_mid && last.ema_mid > last.ema_slow);
        assert!(last.adx_prev.is_some());
        assert!(last.macd_hist_prev.is_some());
        assert_eq!(last.highest_high, Some(120.0));
        assert_eq!(last.volume_avg, 10.0);
        assert!(last.is_well_formed());
        assert_eq!(state.candles(), 20);
    }
}
