//! Entry Conditions
//!
//! Condition vocabulary for tier entry rules. Each tier carries its own list
//! of conditions in the parameter table, so adding or tuning a setup is a
//! config change rather than a code change.
//!
//! All distances and widths are fractions (0.02 = 2%).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::snapshot::{IndicatorSnapshot, Timeframe, TimeframeIndicators};

/// Which EMA ordering an `EmaStack` condition requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmaOrder {
    /// EMA20 > EMA50
    FastOverMid,
    /// EMA50 > EMA200
    MidOverSlow,
    /// EMA20 > EMA50 > EMA200
    FullStack,
}

impl EmaOrder {
    fn holds(&self, ind: &TimeframeIndicators) -> bool {
        match self {
            EmaOrder::FastOverMid => ind.ema_fast > ind.ema_mid,
            EmaOrder::MidOverSlow => ind.ema_mid > ind.ema_slow,
            EmaOrder::FullStack => ind.ema_fast > ind.ema_mid && ind.ema_mid > ind.ema_slow,
        }
    }
}

/// A single entry requirement evaluated against one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    EmaStack {
        timeframe: Timeframe,
        order: EmaOrder,
        /// Passes when the timeframe is missing from the snapshot
        #[serde(default)]
        optional: bool,
    },
    AdxAtLeast {
        timeframe: Timeframe,
        min: f64,
    },
    /// Inclusive RSI band
    RsiWithin {
        timeframe: Timeframe,
        min: f64,
        max: f64,
    },
    /// RSI above the floor, or MACD above its signal line
    RsiOrMacdBullish {
        timeframe: Timeframe,
        rsi_floor: f64,
    },
    /// MACD histogram above the previous bar's; passes without history
    MacdHistogramRising {
        timeframe: Timeframe,
    },
    VolumeAtLeast {
        timeframe: Timeframe,
        multiple: f64,
    },
    /// Price within `max_distance` of the fast EMA, either side
    NearFastEma {
        timeframe: Timeframe,
        max_distance: f64,
    },
    /// Close at or above `highest_high * (1 - tolerance)`
    Breakout {
        timeframe: Timeframe,
        tolerance: f64,
    },
    BollingerWidthBelow {
        timeframe: Timeframe,
        max_width: f64,
    },
    /// Nearest resistance at least `min_distance` above price
    ResistanceClearance {
        timeframe: Timeframe,
        min_distance: f64,
    },
    /// Inclusive UTC hour window at capture time
    SessionHours {
        start_hour: u32,
        end_hour: u32,
    },
}

impl Condition {
    /// Timeframe the condition reads, if any
    pub fn timeframe(&self) -> Option<Timeframe> {
        match self {
            Condition::EmaStack { timeframe, .. }
            | Condition::AdxAtLeast { timeframe, .. }
            | Condition::RsiWithin { timeframe, .. }
            | Condition::RsiOrMacdBullish { timeframe, .. }
            | Condition::MacdHistogramRising { timeframe }
            | Condition::VolumeAtLeast { timeframe, .. }
            | Condition::NearFastEma { timeframe, .. }
            | Condition::Breakout { timeframe, .. }
            | Condition::BollingerWidthBelow { timeframe, .. }
            | Condition::ResistanceClearance { timeframe, .. } => Some(*timeframe),
            Condition::SessionHours { .. } => None,
        }
    }

    /// Check the condition. `Err` carries a human-readable reason.
    pub fn check(&self, snapshot: &IndicatorSnapshot) -> Result<(), String> {
        if let Condition::SessionHours { start_hour, end_hour } = self {
            let hour = snapshot.utc_hour();
            return if (*start_hour..=*end_hour).contains(&hour) {
                Ok(())
            } else {
                Err(format!(
                    "Outside session hours ({}:00 UTC, window {}-{})",
                    hour, start_hour, end_hour
                ))
            };
        }

        let Some(timeframe) = self.timeframe() else {
            return Ok(());
        };
        let Some(ind) = snapshot.frame(timeframe) else {
            if matches!(self, Condition::EmaStack { optional: true, .. }) {
                return Ok(());
            }
            return Err(format!("{} data missing", timeframe));
        };

        match self {
            Condition::EmaStack { order, .. } => {
                if order.holds(ind) {
                    Ok(())
                } else {
                    Err(format!(
                        "{} EMA order {:?} broken (EMA20={:.2}, EMA50={:.2}, EMA200={:.2})",
                        timeframe, order, ind.ema_fast, ind.ema_mid, ind.ema_slow
                    ))
                }
            }
            Condition::AdxAtLeast { min, .. } => {
                if ind.adx >= *min {
                    Ok(())
                } else {
                    Err(format!("{} ADX({:.1}) < {:.1}", timeframe, ind.adx, min))
                }
            }
            Condition::RsiWithin { min, max, .. } => {
                if ind.rsi >= *min && ind.rsi <= *max {
                    Ok(())
                } else {
                    Err(format!(
                        "{} RSI({:.1}) outside {:.0}-{:.0}",
                        timeframe, ind.rsi, min, max
                    ))
                }
            }
            Condition::RsiOrMacdBullish { rsi_floor, .. } => {
                if ind.rsi > *rsi_floor || ind.macd > ind.macd_signal {
                    Ok(())
                } else {
                    Err(format!(
                        "{} momentum not confirmed (RSI={:.1}, MACD below signal)",
                        timeframe, ind.rsi
                    ))
                }
            }
            Condition::MacdHistogramRising { .. } => match ind.macd_hist_prev {
                Some(prev) if ind.macd_hist() <= prev => Err(format!(
                    "{} MACD histogram not expanding ({:.4} <= {:.4})",
                    timeframe,
                    ind.macd_hist(),
                    prev
                )),
                _ => Ok(()),
            },
            Condition::VolumeAtLeast { multiple, .. } => {
                if ind.volume_avg > 0.0 && ind.volume >= ind.volume_avg * multiple {
                    Ok(())
                } else {
                    Err(format!(
                        "{} volume {:.2}x average, need {:.2}x",
                        timeframe,
                        ind.volume_ratio(),
                        multiple
                    ))
                }
            }
            Condition::NearFastEma { max_distance, .. } => {
                if ind.ema_fast <= 0.0 {
                    return Err(format!("{} EMA20 unavailable", timeframe));
                }
                let distance = (snapshot.price - ind.ema_fast).abs() / ind.ema_fast;
                if distance <= *max_distance {
                    Ok(())
                } else {
                    Err(format!(
                        "Price {:.2}% from {} EMA20 (need <= {:.2}%)",
                        distance * 100.0,
                        timeframe,
                        max_distance * 100.0
                    ))
                }
            }
            Condition::Breakout { tolerance, .. } => match ind.highest_high {
                Some(high) if high > 0.0 && ind.close < high * (1.0 - tolerance) => Err(format!(
                    "{} breakout confirmation missing (close {:.2}, high {:.2})",
                    timeframe, ind.close, high
                )),
                _ => Ok(()),
            },
            Condition::BollingerWidthBelow { max_width, .. } => {
                let width = ind.bb_width();
                if width > 0.0 && width < *max_width {
                    Ok(())
                } else {
                    Err(format!(
                        "{} Bollinger width {:.2}% not below {:.2}%",
                        timeframe,
                        width * 100.0,
                        max_width * 100.0
                    ))
                }
            }
            Condition::ResistanceClearance { min_distance, .. } => match ind.resistance {
                Some(level) if level > snapshot.price && snapshot.price > 0.0 => {
                    let distance = (level - snapshot.price) / snapshot.price;
                    if distance >= *min_distance {
                        Ok(())
                    } else {
                        Err(format!(
                            "Too close to {} resistance ({:.2}%)",
                            timeframe,
                            distance * 100.0
                        ))
                    }
                }
                _ => Ok(()),
            },
            Condition::SessionHours { .. } => Ok(()),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::EmaStack { timeframe, order, optional } => {
                write!(f, "{} EMA {:?}", timeframe, order)?;
                if *optional {
                    write!(f, " (optional)")?;
                }
                Ok(())
            }
            Condition::AdxAtLeast { timeframe, min } => write!(f, "{} ADX >= {}", timeframe, min),
            Condition::RsiWithin { timeframe, min, max } => {
                write!(f, "{} RSI in {}-{}", timeframe, min, max)
            }
            Condition::RsiOrMacdBullish { timeframe, rsi_floor } => {
                write!(f, "{} RSI > {} or MACD > signal", timeframe, rsi_floor)
            }
            Condition::MacdHistogramRising { timeframe } => {
                write!(f, "{} MACD histogram rising", timeframe)
            }
            Condition::VolumeAtLeast { timeframe, multiple } => {
                write!(f, "{} volume >= {}x avg", timeframe, multiple)
            }
            Condition::NearFastEma { timeframe, max_distance } => {
                write!(f, "price within {}% of {} EMA20", max_distance * 100.0, timeframe)
            }
            Condition::Breakout { timeframe, tolerance } => {
                write!(f, "{} close within {}% of high", timeframe, tolerance * 100.0)
            }
            Condition::BollingerWidthBelow { timeframe, max_width } => {
                write!(f, "{} BB width < {}%", timeframe, max_width * 100.0)
            }
            Condition::ResistanceClearance { timeframe, min_distance } => {
                write!(f, "{} resistance > {}% away", timeframe, min_distance * 100.0)
            }
            Condition::SessionHours { start_hour, end_hour } => {
                write!(f, "UTC hour {}-{}", start_hour, end_hour)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn frame() -> TimeframeIndicators {
        TimeframeIndicators {
            close: 100.0,
            ema_fast: 99.0,
            ema_mid: 97.0,
            ema_slow: 90.0,
            adx: 28.0,
            rsi: 60.0,
            atr: 2.0,
            macd: 1.2,
            macd_signal: 1.0,
            macd_hist_prev: Some(0.1),
            bb_upper: 101.0,
            bb_lower: 99.0,
            volume: 150.0,
            volume_avg: 100.0,
            highest_high: Some(100.2),
            resistance: Some(103.0),
            ..Default::default()
        }
    }

    fn snapshot_at(hour: u32) -> IndicatorSnapshot {
        IndicatorSnapshot::new("BTC/USDT", Utc.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap(), 100.0)
            .with_frame(Timeframe::H1, frame())
    }

    #[test]
    fn test_ema_stack() {
        let snap = snapshot_at(12);
        let full = Condition::EmaStack { timeframe: Timeframe::H1, order: EmaOrder::FullStack, optional: false };
        assert!(full.check(&snap).is_ok());

        let mut broken = frame();
        broken.ema_mid = 80.0;
        let snap = snap.with_frame(Timeframe::H1, broken);
        assert!(full.check(&snap).is_err());
    }

    #[test]
    fn test_missing_frame_fails_unless_optional() {
        let snap = snapshot_at(12);
        let weekly = Condition::EmaStack { timeframe: Timeframe::W1, order: EmaOrder::MidOverSlow, optional: false };
        let err = weekly.check(&snap).unwrap_err();
        assert!(err.contains("1w"));

        let optional = Condition::EmaStack { timeframe: Timeframe::W1, order: EmaOrder::MidOverSlow, optional: true };
        assert!(optional.check(&snap).is_ok());

        let adx = Condition::AdxAtLeast { timeframe: Timeframe::H4, min: 25.0 };
        assert!(adx.check(&snap).is_err());
    }

    #[test]
    fn test_rsi_band_inclusive() {
        let cond = Condition::RsiWithin { timeframe: Timeframe::H1, min: 55.0, max: 60.0 };
        assert!(cond.check(&snapshot_at(12)).is_ok());

        let cond = Condition::RsiWithin { timeframe: Timeframe::H1, min: 61.0, max: 70.0 };
        assert!(cond.check(&snapshot_at(12)).is_err());
    }

    #[test]
    fn test_macd_histogram_rising() {
        let cond = Condition::MacdHistogramRising { timeframe: Timeframe::H1 };
        assert!(cond.check(&snapshot_at(12)).is_ok());

        let mut falling = frame();
        falling.macd_hist_prev = Some(0.5);
        let snap = snapshot_at(12).with_frame(Timeframe::H1, falling);
        assert!(cond.check(&snap).is_err());

        let mut no_history = frame();
        no_history.macd_hist_prev = None;
        let snap = snapshot_at(12).with_frame(Timeframe::H1, no_history);
        assert!(cond.check(&snap).is_ok());
    }

    #[test]
    fn test_volume_and_bollinger() {
        let snap = snapshot_at(12);
        assert!(Condition::VolumeAtLeast { timeframe: Timeframe::H1, multiple: 1.2 }.check(&snap).is_ok());
        assert!(Condition::VolumeAtLeast { timeframe: Timeframe::H1, multiple: 2.0 }.check(&snap).is_err());
        assert!(Condition::BollingerWidthBelow { timeframe: Timeframe::H1, max_width: 0.04 }.check(&snap).is_ok());
        assert!(Condition::BollingerWidthBelow { timeframe: Timeframe::H1, max_width: 0.01 }.check(&snap).is_err());
    }

    #[test]
    fn test_price_relative_conditions() {
        let snap = snapshot_at(12);
        assert!(Condition::NearFastEma { timeframe: Timeframe::H1, max_distance: 0.02 }.check(&snap).is_ok());
        assert!(Condition::NearFastEma { timeframe: Timeframe::H1, max_distance: 0.005 }.check(&snap).is_err());
        assert!(Condition::Breakout { timeframe: Timeframe::H1, tolerance: 0.005 }.check(&snap).is_ok());
        assert!(Condition::ResistanceClearance { timeframe: Timeframe::H1, min_distance: 0.01 }.check(&snap).is_ok());
        assert!(Condition::ResistanceClearance { timeframe: Timeframe::H1, min_distance: 0.05 }.check(&snap).is_err());
    }

    #[test]
    fn test_session_hours() {
        let cond = Condition::SessionHours { start_hour: 8, end_hour: 20 };
        assert!(cond.check(&snapshot_at(8)).is_ok());
        assert!(cond.check(&snapshot_at(20)).is_ok());
        assert!(cond.check(&snapshot_at(21)).is_err());
        assert!(cond.check(&snapshot_at(3)).is_err());
    }

    #[test]
    fn test_condition_serde_tagged() {
        let cond: Condition = toml::from_str(
            r#"
            kind = "rsi_within"
            timeframe = "1h"
            min = 55.0
            max = 70.0
            "#,
        )
        .unwrap();
        assert_eq!(cond, Condition::RsiWithin { timeframe: Timeframe::H1, min: 55.0, max: 70.0 });
    }
}
