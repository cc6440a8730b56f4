//! Entry Classifier
//!
//! Walks the tier table in priority order and returns the first tier whose
//! regime gate and full condition set hold. Price levels are derived from the
//! snapshot price and the ATR of the tier's primary timeframe.

use std::fmt;

use super::params::{TierParams, TierTable};
use super::regime::RegimeReading;
use crate::domain::entry::EntryCandidate;
use crate::domain::risk::risk_fraction;
use crate::domain::snapshot::{IndicatorSnapshot, Timeframe};
use crate::domain::tier::{Regime, Tier};

/// Weight of the primary-timeframe ADX term in setup confidence
const ADX_CONFIDENCE_WEIGHT: f64 = 0.5;
/// ADX value treated as full trend strength for setup confidence
const ADX_CONFIDENCE_SCALE: f64 = 50.0;

/// Why a tier produced no candidate
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// Zero capital allocation
    Disabled,
    RegimeNotAllowed(Regime),
    ConditionFailed(String),
    /// Primary timeframe missing or ATR not positive
    MissingAtr(Timeframe),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Disabled => write!(f, "tier disabled (allocation 0)"),
            Rejection::RegimeNotAllowed(regime) => write!(f, "regime {} not allowed", regime),
            Rejection::ConditionFailed(reason) => f.write_str(reason),
            Rejection::MissingAtr(tf) => write!(f, "no usable ATR on {}", tf),
        }
    }
}

/// Per-tier outcome, used for diagnostics
#[derive(Debug, Clone)]
pub struct TierVerdict {
    pub tier: Tier,
    pub outcome: Result<EntryCandidate, Rejection>,
}

#[derive(Debug, Clone, Default)]
pub struct EntryClassifier {
    table: TierTable,
}

impl EntryClassifier {
    pub fn new(table: TierTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &TierTable {
        &self.table
    }

    /// First tier (in table order) whose full condition set holds
    pub fn classify(
        &self,
        reading: &RegimeReading,
        snapshot: &IndicatorSnapshot,
    ) -> Option<EntryCandidate> {
        for params in self.table.iter() {
            match self.assess(params, reading, snapshot) {
                Ok(candidate) => {
                    tracing::debug!(
                        "[{}] {} setup found: stop={:.4} target={:.4} conf={:.2}",
                        params.tier,
                        snapshot.symbol,
                        candidate.stop_loss,
                        candidate.final_target_price,
                        candidate.confidence
                    );
                    return Some(candidate);
                }
                Err(rejection) => {
                    tracing::debug!("[{}] {}: {}", params.tier, snapshot.symbol, rejection);
                }
            }
        }
        None
    }

    /// Verdict for every tier, without stopping at the first match
    pub fn explain(&self, reading: &RegimeReading, snapshot: &IndicatorSnapshot) -> Vec<TierVerdict> {
        self.table
            .iter()
            .map(|params| TierVerdict {
                tier: params.tier,
                outcome: self.assess(params, reading, snapshot),
            })
            .collect()
    }

    /// Evaluate a single tier
    pub fn assess(
        &self,
        params: &TierParams,
        reading: &RegimeReading,
        snapshot: &IndicatorSnapshot,
    ) -> Result<EntryCandidate, Rejection> {
        // Disabled tiers never reach their conditions
        if !params.is_enabled() {
            return Err(Rejection::Disabled);
        }
        if !params.allows(reading.regime) {
            return Err(Rejection::RegimeNotAllowed(reading.regime));
        }
        for condition in &params.conditions {
            condition.check(snapshot).map_err(Rejection::ConditionFailed)?;
        }

        let primary = snapshot
            .frame(params.primary_timeframe)
            .ok_or(Rejection::MissingAtr(params.primary_timeframe))?;
        let atr = primary.atr;
        if !(atr > 0.0) || !atr.is_finite() {
            return Err(Rejection::MissingAtr(params.primary_timeframe));
        }

        let reference = snapshot.price;
        let partial_tp_price = if params.has_partial() {
            Some(reference * (1.0 + params.partial_tp_pct))
        } else {
            None
        };

        Ok(EntryCandidate {
            symbol: snapshot.symbol.clone(),
            tier: params.tier,
            regime: reading.regime,
            regime_confidence: reading.confidence,
            entry_reference_price: reference,
            atr,
            stop_loss: reference - params.stop_atr_multiple * atr,
            partial_tp_price,
            partial_tp_pct: if params.has_partial() { params.partial_tp_pct } else { 0.0 },
            partial_tp_fraction: params.partial_tp_fraction,
            final_target_price: reference * (1.0 + params.final_target_pct),
            trailing_atr_multiple: params.trailing_atr_multiple,
            max_hold_duration: params.max_hold_duration(),
            confidence: setup_confidence(reading.confidence, primary.adx),
            risk_fraction: risk_fraction(
                params.capital_allocation,
                params.risk_per_trade,
                reading.confidence,
            ),
            created_at: snapshot.captured_at,
        })
    }
}

/// Weighted blend of regime confidence and trend strength, in [0, 1]
fn setup_confidence(regime_confidence: f64, adx: f64) -> f64 {
    let adx_term = if adx.is_finite() {
        (adx / ADX_CONFIDENCE_SCALE).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let blended =
        (regime_confidence + adx_term * ADX_CONFIDENCE_WEIGHT) / (1.0 + ADX_CONFIDENCE_WEIGHT);
    if blended.is_finite() {
        blended.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
