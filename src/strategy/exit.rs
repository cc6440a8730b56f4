//! Exit State Machine
//!
//! One generic evaluation for every tier, driven by the exit plan frozen into
//! the position. `evaluate` is pure: it reads the position and returns a
//! decision, it never mutates. The live slow cycle, the watchdog and the
//! replay driver all call this same function.
//!
//! Rule order:
//! 1. partial take-profit (once, tiers with a partial fraction only)
//! 2. trailing ratchet while trailing is active
//! 3. stop hit (against the stop as it stood before this call)
//! 4. final target hit (strictly above the target)
//! 5. time exit when in profit
//! 6. hold

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

use super::params::TierTable;
use crate::domain::exit::{ExitAction, ExitDecision, ExitReason, TrailUpdate};
use crate::domain::position::Position;
use crate::domain::snapshot::{IndicatorSnapshot, Timeframe};
use crate::domain::tier::Tier;

#[derive(Debug, Clone)]
pub struct ExitStateMachine {
    /// Timeframe whose ATR drives each tier's trail
    atr_timeframes: HashMap<Tier, Timeframe>,
}

impl Default for ExitStateMachine {
    fn default() -> Self {
        Self::new(&TierTable::default())
    }
}

impl ExitStateMachine {
    pub fn new(table: &TierTable) -> Self {
        Self {
            atr_timeframes: table
                .iter()
                .map(|params| (params.tier, params.primary_timeframe))
                .collect(),
        }
    }

    /// ATR used for trailing, from the tier's primary timeframe
    pub fn trail_atr(&self, tier: Tier, snapshot: &IndicatorSnapshot) -> Option<f64> {
        let timeframe = self.atr_timeframes.get(&tier)?;
        let atr = snapshot.frame(*timeframe)?.atr;
        (atr > 0.0 && atr.is_finite()).then_some(atr)
    }

    /// Evaluate at `position.entry_time() + elapsed`
    pub fn evaluate(
        &self,
        position: &Position,
        price: f64,
        snapshot: &IndicatorSnapshot,
        elapsed: Duration,
    ) -> ExitDecision {
        let evaluated_at = chrono::Duration::from_std(elapsed)
            .ok()
            .and_then(|d| position.entry_time().checked_add_signed(d))
            .unwrap_or_else(|| position.entry_time());
        self.decide(position, price, snapshot, elapsed, evaluated_at)
    }

    /// Evaluate at wall-clock time `now`
    pub fn evaluate_at(
        &self,
        position: &Position,
        price: f64,
        snapshot: &IndicatorSnapshot,
        now: DateTime<Utc>,
    ) -> ExitDecision {
        self.decide(position, price, snapshot, position.elapsed_at(now), now)
    }

    fn decide(
        &self,
        position: &Position,
        price: f64,
        snapshot: &IndicatorSnapshot,
        elapsed: Duration,
        evaluated_at: DateTime<Utc>,
    ) -> ExitDecision {
        let hold = ExitDecision {
            symbol: position.symbol().to_string(),
            position_id: position.id().to_string(),
            action: ExitAction::Hold,
            reason: None,
            exit_price: price,
            quantity: 0.0,
            trail: None,
            basis: position.basis(),
            evaluated_at,
        };
        if position.is_closed() || !price.is_finite() {
            return hold;
        }

        let plan = position.plan();
        let atr = self.trail_atr(position.tier(), snapshot);
        let remaining = position.remaining_quantity();

        // 1. Partial take-profit, seeding the trail from this price
        if plan.has_partial()
            && !position.partial_tp_taken()
            && price >= plan.partial_target(position.entry_price())
        {
            return ExitDecision {
                action: ExitAction::PartialClose,
                reason: Some(ExitReason::PartialTarget),
                quantity: remaining * plan.partial_fraction,
                trail: ratchet(position, price, atr, plan.trail_atr_multiple),
                ..hold
            };
        }

        // 2. Trailing ratchet
        let trail = if position.trailing_active() {
            ratchet(position, price, atr, plan.trail_atr_multiple)
        } else {
            None
        };

        let close = |reason: ExitReason| ExitDecision {
            action: ExitAction::FullClose,
            reason: Some(reason),
            quantity: remaining,
            trail,
            ..hold.clone()
        };

        // 3. Stop wins over target
        if price <= position.stop_loss() {
            return close(ExitReason::StopHit);
        }
        // 4. Target
        if price > position.final_target_price() {
            return close(ExitReason::TargetHit);
        }
        // 5. Time exit, only in profit
        if elapsed >= position.max_hold_duration() && price > position.entry_price() {
            return close(ExitReason::TimeExit);
        }

        ExitDecision { trail, ..hold }
    }
}

/// Proposed trailing state, `None` when nothing would move
fn ratchet(position: &Position, price: f64, atr: Option<f64>, multiple: f64) -> Option<TrailUpdate> {
    let atr = atr?;
    if !(multiple > 0.0) {
        return None;
    }
    let highest = position.highest_close().max(price);
    let stop = position.stop_loss().max(highest - multiple * atr);
    if highest > position.highest_close() || stop > position.stop_loss() {
        Some(TrailUpdate {
            highest_close: highest,
            stop_loss: stop,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::{ExitPlan, Fill};
    use crate::domain::snapshot::TimeframeIndicators;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn snapshot(atr: f64) -> IndicatorSnapshot {
        IndicatorSnapshot::new("BTC/USDT", t0(), 50_000.0).with_frame(
            Timeframe::H1,
            TimeframeIndicators {
                close: 50_000.0,
                atr,
                ..Default::default()
            },
        )
    }

    fn position(plan: ExitPlan) -> Position {
        Position::open(
            "BTC-1",
            "BTC/USDT",
            Tier::Momentum,
            Fill::new(50_000.0, 2.0, t0()),
            48_560.0,
            52_000.0,
            Duration::from_secs(24 * 3600),
            plan,
        )
        .unwrap()
    }

    fn momentum_plan() -> ExitPlan {
        ExitPlan {
            partial_pct: 0.02,
            partial_fraction: 0.5,
            trail_atr_multiple: 1.8,
        }
    }

    #[test]
    fn test_hold_below_partial() {
        let machine = ExitStateMachine::default();
        let decision = machine.evaluate(&position(momentum_plan()), 50_500.0, &snapshot(800.0), Duration::ZERO);
        assert!(decision.is_hold());
        assert!(decision.trail.is_none());
        assert!(!decision.changes_state());
    }

    #[test]
    fn test_partial_seeds_trail() {
        let machine = ExitStateMachine::default();
        let decision = machine.evaluate(&position(momentum_plan()), 51_000.0, &snapshot(800.0), Duration::ZERO);
        assert_eq!(decision.action, ExitAction::PartialClose);
        assert_eq!(decision.reason, Some(ExitReason::PartialTarget));
        assert_relative_eq!(decision.quantity, 1.0);
        let trail = decision.trail.unwrap();
        assert_relative_eq!(trail.highest_close, 51_000.0);
        assert_relative_eq!(trail.stop_loss, 49_560.0);
    }

    #[test]
    fn test_stop_inclusive() {
        let machine = ExitStateMachine::default();
        let decision = machine.evaluate(&position(momentum_plan()), 48_560.0, &snapshot(800.0), Duration::ZERO);
        assert_eq!(decision.action, ExitAction::FullClose);
        assert_eq!(decision.reason, Some(ExitReason::StopHit));
        assert_relative_eq!(decision.quantity, 2.0);
    }

    #[test]
    fn test_target_is_strict() {
        let plan = ExitPlan {
            partial_pct: 0.0,
            partial_fraction: 0.0,
            trail_atr_multiple: 1.2,
        };
        let machine = ExitStateMachine::default();
        let pos = position(plan);
        assert!(machine.evaluate(&pos, 52_000.0, &snapshot(800.0), Duration::ZERO).is_hold());

        let decision = machine.evaluate(&pos, 52_000.5, &snapshot(800.0), Duration::ZERO);
        assert_eq!(decision.reason, Some(ExitReason::TargetHit));
    }

    #[test]
    fn test_time_exit_only_in_profit() {
        let machine = ExitStateMachine::default();
        let pos = position(momentum_plan());
        let day = Duration::from_secs(24 * 3600);

        let decision = machine.evaluate(&pos, 50_100.0, &snapshot(800.0), day);
        assert_eq!(decision.reason, Some(ExitReason::TimeExit));
        assert_eq!(decision.evaluated_at, t0() + chrono::Duration::hours(24));

        assert!(machine.evaluate(&pos, 49_900.0, &snapshot(800.0), day).is_hold());
        assert!(machine
            .evaluate(&pos, 50_100.0, &snapshot(800.0), day - Duration::from_secs(1))
            .is_hold());
    }

    #[test]
    fn test_missing_atr_keeps_stop() {
        let machine = ExitStateMachine::default();
        let empty = IndicatorSnapshot::new("BTC/USDT", t0(), 51_000.0);
        let decision = machine.evaluate(&position(momentum_plan()), 51_000.0, &empty, Duration::ZERO);
        assert_eq!(decision.action, ExitAction::PartialClose);
        assert!(decision.trail.is_none());
    }

    #[test]
    fn test_evaluate_does_not_mutate() {
        let machine = ExitStateMachine::default();
        let pos = position(momentum_plan());
        let before = pos.clone();
        let _ = machine.evaluate_at(&pos, 51_000.0, &snapshot(800.0), t0());
        assert_eq!(pos, before);
    }
}
