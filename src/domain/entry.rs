use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::tier::{Regime, Tier};

/// Accepted entry setup, immutable once created.
///
/// Consumed once by sizing and once more to seed the position's exit plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryCandidate {
    pub symbol: String,
    pub tier: Tier,
    pub regime: Regime,
    pub regime_confidence: f64,
    /// Price the levels below were derived from
    pub entry_reference_price: f64,
    /// ATR of the tier's primary timeframe at classification time
    pub atr: f64,
    pub stop_loss: f64,
    pub partial_tp_price: Option<f64>,
    pub partial_tp_pct: f64,
    /// 0.0 when the tier takes no partial profit
    pub partial_tp_fraction: f64,
    pub final_target_price: f64,
    pub trailing_atr_multiple: f64,
    pub max_hold_duration: Duration,
    pub confidence: f64,
    /// Fraction of balance put at risk by this entry
    pub risk_fraction: f64,
    pub created_at: DateTime<Utc>,
}

impl EntryCandidate {
    pub fn stop_distance(&self) -> f64 {
        self.entry_reference_price - self.stop_loss
    }

    /// The same setup re-anchored at `price`: every level keeps its distance
    /// from the reference price.
    pub fn rebased(&self, price: f64) -> Self {
        let shift = price - self.entry_reference_price;
        Self {
            entry_reference_price: price,
            stop_loss: self.stop_loss + shift,
            partial_tp_price: self.partial_tp_price.map(|p| p + shift),
            final_target_price: self.final_target_price + shift,
            ..self.clone()
        }
    }

    /// Reward to risk of the final target
    pub fn reward_risk(&self) -> f64 {
        let risk = self.stop_distance();
        if risk > 0.0 {
            (self.final_target_price - self.entry_reference_price) / risk
        } else {
            0.0
        }
    }
}
