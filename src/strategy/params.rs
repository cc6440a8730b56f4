//! Strategy Parameters
//!
//! The tier parameter table and regime thresholds. Both are plain data
//! injected into the classifiers; the default table is the production
//! SWING / MOMENTUM / SCALP setup with SCALP disabled.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use super::conditions::{Condition, EmaOrder};
use crate::domain::snapshot::Timeframe;
use crate::domain::tier::{Regime, Tier};

/// Regime classification thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeThresholds {
    /// Timeframe whose ADX/ATR drive the classification
    pub reference_timeframe: Timeframe,
    /// ADX at or above this is a strong trend
    pub strong_adx: f64,
    /// ADX at or above this is a weak trend
    pub weak_adx: f64,
    /// ATR/price at or above this is volatile
    pub volatile_atr_ratio: f64,
    /// ADX excess over `strong_adx` that maps to full confidence above 0.5
    pub adx_confidence_span: f64,
    /// ATR ratio excess over `volatile_atr_ratio` that maps to full confidence above 0.5
    pub atr_confidence_span: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            reference_timeframe: Timeframe::H4,
            strong_adx: 30.0,
            weak_adx: 20.0,
            volatile_atr_ratio: 0.03,
            adx_confidence_span: 20.0,
            atr_confidence_span: 0.03,
        }
    }
}

impl RegimeThresholds {
    pub fn validate(&self) -> Result<(), ParamError> {
        for (name, value) in [
            ("strong_adx", self.strong_adx),
            ("weak_adx", self.weak_adx),
            ("volatile_atr_ratio", self.volatile_atr_ratio),
            ("adx_confidence_span", self.adx_confidence_span),
            ("atr_confidence_span", self.atr_confidence_span),
        ] {
            if !(value > 0.0) || !value.is_finite() {
                return Err(ParamError::NonPositiveThreshold(name, value));
            }
        }
        if self.weak_adx >= self.strong_adx {
            return Err(ParamError::ThresholdOrder {
                weak: self.weak_adx,
                strong: self.strong_adx,
            });
        }
        Ok(())
    }
}

/// One row of the tier table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierParams {
    pub tier: Tier,
    /// Timeframe whose ATR sets the stop and the trail
    pub primary_timeframe: Timeframe,
    /// Share of capital for this tier; 0.0 disables it
    pub capital_allocation: f64,
    pub risk_per_trade: f64,
    pub stop_atr_multiple: f64,
    /// Partial take-profit threshold as a fraction above entry
    #[serde(default)]
    pub partial_tp_pct: f64,
    /// Share of quantity closed at the partial threshold; 0.0 means none
    #[serde(default)]
    pub partial_tp_fraction: f64,
    pub final_target_pct: f64,
    pub trailing_atr_multiple: f64,
    pub max_hold_hours: u64,
    pub allowed_regimes: Vec<Regime>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl TierParams {
    pub fn is_enabled(&self) -> bool {
        self.capital_allocation > 0.0
    }

    pub fn has_partial(&self) -> bool {
        self.partial_tp_fraction > 0.0
    }

    pub fn allows(&self, regime: Regime) -> bool {
        self.allowed_regimes.contains(&regime)
    }

    pub fn max_hold_duration(&self) -> Duration {
        Duration::from_secs(self.max_hold_hours * 3600)
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        let tier = self.tier;
        if !(0.0..=1.0).contains(&self.capital_allocation) {
            return Err(ParamError::InvalidAllocation(tier, self.capital_allocation));
        }
        if !(self.risk_per_trade > 0.0 && self.risk_per_trade < 1.0) {
            return Err(ParamError::InvalidRisk(tier, self.risk_per_trade));
        }
        if !(self.stop_atr_multiple > 0.0) {
            return Err(ParamError::InvalidMultiple(tier, "stop_atr_multiple", self.stop_atr_multiple));
        }
        if !(self.trailing_atr_multiple > 0.0) {
            return Err(ParamError::InvalidMultiple(
                tier,
                "trailing_atr_multiple",
                self.trailing_atr_multiple,
            ));
        }
        if !(0.0..1.0).contains(&self.partial_tp_fraction) {
            return Err(ParamError::InvalidPartialFraction(tier, self.partial_tp_fraction));
        }
        if !(self.final_target_pct > 0.0) {
            return Err(ParamError::InvalidTarget {
                tier,
                partial: self.partial_tp_pct,
                final_target: self.final_target_pct,
            });
        }
        if self.has_partial()
            && (!(self.partial_tp_pct > 0.0) || self.final_target_pct <= self.partial_tp_pct)
        {
            return Err(ParamError::InvalidTarget {
                tier,
                partial: self.partial_tp_pct,
                final_target: self.final_target_pct,
            });
        }
        if self.max_hold_hours == 0 {
            return Err(ParamError::InvalidHold(tier));
        }
        if self.allowed_regimes.is_empty() {
            return Err(ParamError::NoRegimes(tier));
        }
        Ok(())
    }

    /// 4h swing: pullback to EMA20 inside an aligned uptrend
    pub fn swing() -> Self {
        Self {
            tier: Tier::Swing,
            primary_timeframe: Timeframe::H4,
            capital_allocation: 0.5,
            risk_per_trade: 0.015,
            stop_atr_multiple: 2.5,
            partial_tp_pct: 0.05,
            partial_tp_fraction: 0.5,
            final_target_pct: 0.08,
            trailing_atr_multiple: 2.5,
            max_hold_hours: 240,
            allowed_regimes: vec![Regime::StrongTrend, Regime::WeakTrend],
            conditions: vec![
                Condition::EmaStack {
                    timeframe: Timeframe::W1,
                    order: EmaOrder::MidOverSlow,
                    optional: true,
                },
                Condition::EmaStack {
                    timeframe: Timeframe::H4,
                    order: EmaOrder::FullStack,
                    optional: false,
                },
                Condition::AdxAtLeast { timeframe: Timeframe::H4, min: 25.0 },
                Condition::NearFastEma { timeframe: Timeframe::H4, max_distance: 0.02 },
                Condition::RsiOrMacdBullish { timeframe: Timeframe::H1, rsi_floor: 50.0 },
            ],
        }
    }

    /// 1h momentum continuation
    pub fn momentum() -> Self {
        Self {
            tier: Tier::Momentum,
            primary_timeframe: Timeframe::H1,
            capital_allocation: 0.5,
            risk_per_trade: 0.01,
            stop_atr_multiple: 1.8,
            partial_tp_pct: 0.02,
            partial_tp_fraction: 0.5,
            final_target_pct: 0.03,
            trailing_atr_multiple: 1.8,
            max_hold_hours: 24,
            allowed_regimes: vec![Regime::StrongTrend, Regime::WeakTrend, Regime::Volatile],
            conditions: vec![
                Condition::EmaStack {
                    timeframe: Timeframe::H4,
                    order: EmaOrder::FastOverMid,
                    optional: false,
                },
                Condition::RsiWithin { timeframe: Timeframe::H1, min: 55.0, max: 70.0 },
                Condition::MacdHistogramRising { timeframe: Timeframe::H1 },
                Condition::VolumeAtLeast { timeframe: Timeframe::H1, multiple: 1.2 },
                Condition::Breakout { timeframe: Timeframe::M15, tolerance: 0.005 },
            ],
        }
    }

    /// 15m squeeze breakout; ships disabled
    pub fn scalp() -> Self {
        Self {
            tier: Tier::Scalp,
            primary_timeframe: Timeframe::M15,
            capital_allocation: 0.0,
            risk_per_trade: 0.005,
            stop_atr_multiple: 1.2,
            partial_tp_pct: 0.0,
            partial_tp_fraction: 0.0,
            final_target_pct: 0.01,
            trailing_atr_multiple: 1.2,
            max_hold_hours: 4,
            allowed_regimes: vec![Regime::StrongTrend],
            conditions: vec![
                Condition::SessionHours { start_hour: 8, end_hour: 20 },
                Condition::EmaStack {
                    timeframe: Timeframe::H4,
                    order: EmaOrder::FastOverMid,
                    optional: false,
                },
                Condition::EmaStack {
                    timeframe: Timeframe::H1,
                    order: EmaOrder::FastOverMid,
                    optional: false,
                },
                Condition::BollingerWidthBelow { timeframe: Timeframe::M15, max_width: 0.04 },
                Condition::VolumeAtLeast { timeframe: Timeframe::M15, multiple: 2.0 },
                Condition::AdxAtLeast { timeframe: Timeframe::M15, min: 20.0 },
                Condition::ResistanceClearance { timeframe: Timeframe::H1, min_distance: 0.01 },
            ],
        }
    }
}

/// Tiers in priority order (strictest / highest timeframe first)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierTable(Vec<TierParams>);

impl Default for TierTable {
    fn default() -> Self {
        Self(vec![TierParams::swing(), TierParams::momentum(), TierParams::scalp()])
    }
}

impl TierTable {
    pub fn new(tiers: Vec<TierParams>) -> Self {
        Self(tiers)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TierParams> {
        self.0.iter()
    }

    pub fn get(&self, tier: Tier) -> Option<&TierParams> {
        self.0.iter().find(|p| p.tier == tier)
    }

    pub fn get_mut(&mut self, tier: Tier) -> Option<&mut TierParams> {
        self.0.iter_mut().find(|p| p.tier == tier)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Timeframes any tier reads
    pub fn timeframes(&self) -> Vec<Timeframe> {
        let mut frames: Vec<Timeframe> = self
            .0
            .iter()
            .flat_map(|p| {
                std::iter::once(p.primary_timeframe).chain(p.conditions.iter().filter_map(Condition::timeframe))
            })
            .collect();
        frames.sort();
        frames.dedup();
        frames
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        if self.0.is_empty() {
            return Err(ParamError::EmptyTable);
        }
        let mut seen = HashSet::new();
        for params in &self.0 {
            if !seen.insert(params.tier) {
                return Err(ParamError::DuplicateTier(params.tier));
            }
            params.validate()?;
        }
        let total: f64 = self.0.iter().map(|p| p.capital_allocation).sum();
        if total > 1.0 + 1e-9 {
            return Err(ParamError::AllocationOverflow(total));
        }
        Ok(())
    }
}

/// Parameter validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamError {
    #[error("Threshold {0} must be positive, got {1}")]
    NonPositiveThreshold(&'static str, f64),
    #[error("weak_adx ({weak}) must be below strong_adx ({strong})")]
    ThresholdOrder { weak: f64, strong: f64 },
    #[error("Tier table is empty")]
    EmptyTable,
    #[error("Tier {0} appears more than once")]
    DuplicateTier(Tier),
    #[error("{0}: capital allocation {1} outside [0, 1]")]
    InvalidAllocation(Tier, f64),
    #[error("Tier allocations sum to {0} (max 1.0)")]
    AllocationOverflow(f64),
    #[error("{0}: risk per trade {1} outside (0, 1)")]
    InvalidRisk(Tier, f64),
    #[error("{0}: {1} must be positive, got {2}")]
    InvalidMultiple(Tier, &'static str, f64),
    #[error("{0}: partial fraction {1} outside [0, 1)")]
    InvalidPartialFraction(Tier, f64),
    #[error("{tier}: final target {final_target} must exceed partial target {partial}")]
    InvalidTarget { tier: Tier, partial: f64, final_target: f64 },
    #[error("{0}: max hold must be positive")]
    InvalidHold(Tier),
    #[error("{0}: no allowed regimes")]
    NoRegimes(Tier),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let table = TierTable::default();
        assert_eq!(table.len(), 3);
        assert!(table.validate().is_ok());

        let order: Vec<Tier> = table.iter().map(|p| p.tier).collect();
        assert_eq!(order, vec![Tier::Swing, Tier::Momentum, Tier::Scalp]);

        let scalp = table.get(Tier::Scalp).unwrap();
        assert!(!scalp.is_enabled());
        assert!(!scalp.has_partial());
        assert_eq!(scalp.max_hold_duration(), Duration::from_secs(4 * 3600));
    }

    #[test]
    fn test_table_timeframes() {
        let frames = TierTable::default().timeframes();
        assert_eq!(
            frames,
            vec![Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::W1]
        );
    }

    #[test]
    fn test_default_thresholds() {
        let thresholds = RegimeThresholds::default();
        assert_eq!(thresholds.reference_timeframe, Timeframe::H4);
        assert!(thresholds.validate().is_ok());
    }

    #[test]
    fn test_threshold_order() {
        let thresholds = RegimeThresholds {
            weak_adx: 35.0,
            ..Default::default()
        };
        assert!(matches!(thresholds.validate(), Err(ParamError::ThresholdOrder { .. })));

        let thresholds = RegimeThresholds {
            volatile_atr_ratio: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            thresholds.validate(),
            Err(ParamError::NonPositiveThreshold("volatile_atr_ratio", _))
        ));
    }

    #[test]
    fn test_duplicate_tier() {
        let table = TierTable::new(vec![TierParams::swing(), TierParams::swing()]);
        assert_eq!(table.validate(), Err(ParamError::DuplicateTier(Tier::Swing)));
    }

    #[test]
    fn test_allocation_overflow() {
        let mut table = TierTable::default();
        if let Some(scalp) = table.get_mut(Tier::Scalp) {
            scalp.capital_allocation = 0.2;
        }
        assert!(matches!(table.validate(), Err(ParamError::AllocationOverflow(_))));
    }

    #[test]
    fn test_invalid_tier_params() {
        let mut params = TierParams::momentum();
        params.final_target_pct = 0.01;
        assert!(matches!(params.validate(), Err(ParamError::InvalidTarget { .. })));

        let mut params = TierParams::momentum();
        params.partial_tp_fraction = 1.0;
        assert!(matches!(params.validate(), Err(ParamError::InvalidPartialFraction(..))));

        let mut params = TierParams::momentum();
        params.stop_atr_multiple = 0.0;
        assert!(matches!(params.validate(), Err(ParamError::InvalidMultiple(..))));
    }
}
