//! Regime Classifier
//!
//! Maps one snapshot to exactly one market regime plus a confidence in
//! [0, 1]. Rules are checked in order and the first match wins:
//!
//! 1. reference ADX >= strong threshold: STRONG_TREND
//! 2. reference ADX >= weak threshold: WEAK_TREND
//! 3. ATR / price >= volatile threshold: VOLATILE
//! 4. otherwise RANGING
//!
//! The classifier is total: a missing reference frame or non-finite inputs
//! fall through to RANGING with zero confidence.

use serde::{Deserialize, Serialize};

use super::params::RegimeThresholds;
use crate::domain::snapshot::IndicatorSnapshot;
use crate::domain::tier::Regime;

/// Classified regime with the metrics that produced it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeReading {
    pub regime: Regime,
    pub confidence: f64,
    pub adx: f64,
    pub atr_ratio: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RegimeClassifier {
    thresholds: RegimeThresholds,
}

impl RegimeClassifier {
    pub fn new(thresholds: RegimeThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &RegimeThresholds {
        &self.thresholds
    }

    pub fn classify(&self, snapshot: &IndicatorSnapshot) -> RegimeReading {
        let t = &self.thresholds;
        let Some(frame) = snapshot.frame(t.reference_timeframe) else {
            return RegimeReading {
                regime: Regime::Ranging,
                confidence: 0.0,
                adx: 0.0,
                atr_ratio: 0.0,
            };
        };

        let adx = frame.adx;
        let price = if snapshot.price > 0.0 { snapshot.price } else { frame.close };
        let atr_ratio = if price > 0.0 { frame.atr / price } else { 0.0 };

        let (regime, confidence) = if adx >= t.strong_adx {
            (Regime::StrongTrend, 0.5 + (adx - t.strong_adx) / t.adx_confidence_span)
        } else if adx >= t.weak_adx {
            (
                Regime::WeakTrend,
                0.5 + 0.5 * (adx - t.weak_adx) / (t.strong_adx - t.weak_adx),
            )
        } else if atr_ratio >= t.volatile_atr_ratio {
            (
                Regime::Volatile,
                0.5 + (atr_ratio - t.volatile_atr_ratio) / t.atr_confidence_span,
            )
        } else {
            // NaN comparisons land here too
            (Regime::Ranging, 0.5 + 0.5 * (t.weak_adx - adx) / t.weak_adx)
        };

        RegimeReading {
            regime,
            confidence: clamp_confidence(confidence),
            adx,
            atr_ratio,
        }
    }
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshot::{Timeframe, TimeframeIndicators};
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn snapshot(adx: f64, atr: f64) -> IndicatorSnapshot {
        IndicatorSnapshot::new("ETH/USDT", Utc::now(), 100.0).with_frame(
            Timeframe::H4,
            TimeframeIndicators {
                close: 100.0,
                adx,
                atr,
                ..Default::default()
            },
        )
    }

    fn classify(adx: f64, atr: f64) -> RegimeReading {
        RegimeClassifier::default().classify(&snapshot(adx, atr))
    }

    #[test]
    fn test_strong_trend() {
        let reading = classify(40.0, 1.0);
        assert_eq!(reading.regime, Regime::StrongTrend);
        assert_relative_eq!(reading.confidence, 1.0);

        let reading = classify(30.0, 1.0);
        assert_eq!(reading.regime, Regime::StrongTrend);
        assert_relative_eq!(reading.confidence, 0.5);
    }

    #[test]
    fn test_weak_trend() {
        let reading = classify(25.0, 5.0);
        assert_eq!(reading.regime, Regime::WeakTrend);
        assert_relative_eq!(reading.confidence, 0.75);
    }

    #[test]
    fn test_volatile_checked_after_adx() {
        let reading = classify(15.0, 4.5);
        assert_eq!(reading.regime, Regime::Volatile);
        assert_relative_eq!(reading.confidence, 1.0, epsilon = 1e-9);
        assert_relative_eq!(reading.atr_ratio, 0.045);
    }

    #[test]
    fn test_ranging() {
        let reading = classify(10.0, 1.0);
        assert_eq!(reading.regime, Regime::Ranging);
        assert_relative_eq!(reading.confidence, 0.75);
    }

    #[test]
    fn test_missing_reference_frame() {
        let snap = IndicatorSnapshot::new("ETH/USDT", Utc::now(), 100.0);
        let reading = RegimeClassifier::default().classify(&snap);
        assert_eq!(reading.regime, Regime::Ranging);
        assert_eq!(reading.confidence, 0.0);
    }

    #[test]
    fn test_nan_inputs_still_classified() {
        let reading = classify(f64::NAN, f64::NAN);
        assert_eq!(reading.regime, Regime::Ranging);
        assert_eq!(reading.confidence, 0.0);
    }

    #[test]
    fn test_custom_reference_timeframe() {
        let classifier = RegimeClassifier::new(RegimeThresholds {
            reference_timeframe: Timeframe::H1,
            ..Default::default()
        });
        // Only a 4h frame present
        let reading = classifier.classify(&snapshot(45.0, 1.0));
        assert_eq!(reading.regime, Regime::Ranging);
        assert_eq!(reading.confidence, 0.0);
    }
}
