//! Indicator Snapshot
//!
//! Immutable per-symbol bundle of precomputed indicator values, one record per
//! timeframe. A fresh snapshot is captured for every evaluation tick and is
//! shared read-only (usually behind an `Arc`) between the slow cycle and the
//! watchdog.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Candle timeframes the core understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl Timeframe {
    /// All timeframes, shortest first
    pub const ALL: [Timeframe; 5] = [
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
        Timeframe::W1,
    ];

    /// Length of one candle in seconds
    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::M15 => 15 * 60,
            Timeframe::H1 => 60 * 60,
            Timeframe::H4 => 4 * 60 * 60,
            Timeframe::D1 => 24 * 60 * 60,
            Timeframe::W1 => 7 * 24 * 60 * 60,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SnapshotError {
    #[error("Unknown timeframe: {0}")]
    UnknownTimeframe(String),
}

impl FromStr for Timeframe {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            "1w" => Ok(Timeframe::W1),
            other => Err(SnapshotError::UnknownTimeframe(other.to_string())),
        }
    }
}

/// Indicator values for a single timeframe
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeframeIndicators {
    pub close: f64,
    /// EMA20
    pub ema_fast: f64,
    /// EMA50
    pub ema_mid: f64,
    /// EMA200
    pub ema_slow: f64,
    pub adx: f64,
    /// ADX of the previous bar, when the producer tracks slope
    #[serde(default)]
    pub adx_prev: Option<f64>,
    pub rsi: f64,
    pub atr: f64,
    pub macd: f64,
    pub macd_signal: f64,
    /// MACD histogram of the previous bar
    #[serde(default)]
    pub macd_hist_prev: Option<f64>,
    pub bb_upper: f64,
    pub bb_lower: f64,
    pub volume: f64,
    pub volume_avg: f64,
    /// Highest high over the producer's breakout lookback
    #[serde(default)]
    pub highest_high: Option<f64>,
    /// Nearest resistance level above price
    #[serde(default)]
    pub resistance: Option<f64>,
}

impl TimeframeIndicators {
    pub fn macd_hist(&self) -> f64 {
        self.macd - self.macd_signal
    }

    /// ATR as a fraction of close (0.03 = 3%)
    pub fn atr_ratio(&self) -> f64 {
        if self.close > 0.0 {
            self.atr / self.close
        } else {
            0.0
        }
    }

    /// Bollinger band width as a fraction of the band midpoint
    pub fn bb_width(&self) -> f64 {
        let middle = (self.bb_upper + self.bb_lower) / 2.0;
        if middle > 0.0 {
            (self.bb_upper - self.bb_lower) / middle
        } else {
            0.0
        }
    }

    pub fn volume_ratio(&self) -> f64 {
        if self.volume_avg > 0.0 {
            self.volume / self.volume_avg
        } else {
            0.0
        }
    }

    /// Every required field is a finite number
    pub fn is_well_formed(&self) -> bool {
        [
            self.close,
            self.ema_fast,
            self.ema_mid,
            self.ema_slow,
            self.adx,
            self.rsi,
            self.atr,
            self.macd,
            self.macd_signal,
            self.bb_upper,
            self.bb_lower,
            self.volume,
            self.volume_avg,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// Immutable multi-timeframe snapshot for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub captured_at: DateTime<Utc>,
    /// Latest traded price at capture time
    pub price: f64,
    #[serde(default)]
    pub frames: BTreeMap<Timeframe, TimeframeIndicators>,
}

impl IndicatorSnapshot {
    pub fn new(symbol: impl Into<String>, captured_at: DateTime<Utc>, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            captured_at,
            price,
            frames: BTreeMap::new(),
        }
    }

    /// Builder method to attach a timeframe record
    pub fn with_frame(mut self, timeframe: Timeframe, indicators: TimeframeIndicators) -> Self {
        self.frames.insert(timeframe, indicators);
        self
    }

    pub fn frame(&self, timeframe: Timeframe) -> Option<&TimeframeIndicators> {
        self.frames.get(&timeframe)
    }

    /// UTC hour of capture, used by session filters
    pub fn utc_hour(&self) -> u32 {
        self.captured_at.hour()
    }

    pub fn is_well_formed(&self) -> bool {
        self.price.is_finite() && self.frames.values().all(TimeframeIndicators::is_well_formed)
    }
}
