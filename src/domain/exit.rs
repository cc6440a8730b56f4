//! Exit decisions produced by the exit state machine
//!
//! An `ExitDecision` is computed fresh on every evaluation and never cached. It
//! records the position state it was computed against (`DecisionBasis`) so the
//! single mutation point can reject it once that state has moved on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitAction {
    Hold,
    PartialClose,
    FullClose,
}

/// Why quantity left the position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    /// Intermediate profit threshold reached
    #[serde(rename = "PARTIAL_TP")]
    PartialTarget,
    StopHit,
    TargetHit,
    TimeExit,
    /// Position force-closed on the last replay bar
    ReplayEnd,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::PartialTarget => "PARTIAL_TP",
            ExitReason::StopHit => "STOP_HIT",
            ExitReason::TargetHit => "TARGET_HIT",
            ExitReason::TimeExit => "TIME_EXIT",
            ExitReason::ReplayEnd => "REPLAY_END",
        }
    }

    pub fn is_stop_exit(&self) -> bool {
        matches!(self, ExitReason::StopHit)
    }

    pub fn is_profit_exit(&self) -> bool {
        matches!(self, ExitReason::PartialTarget | ExitReason::TargetHit)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("Unknown exit reason: {0}")]
pub struct UnknownExitReason(pub String);

impl FromStr for ExitReason {
    type Err = UnknownExitReason;

    /// Accepts the canonical names plus the legacy ledger spellings
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PARTIAL_TP" | "PARTIAL" => Ok(ExitReason::PartialTarget),
            "STOP_HIT" | "SL" | "STOP_LOSS" | "TRAIL_SL" | "TRAIL_STOP" => Ok(ExitReason::StopHit),
            "TARGET_HIT" | "TP" | "TAKE_PROFIT" => Ok(ExitReason::TargetHit),
            "TIME_EXIT" | "TIME_STOP" => Ok(ExitReason::TimeExit),
            "REPLAY_END" | "BACKTEST_END" => Ok(ExitReason::ReplayEnd),
            _ => Err(UnknownExitReason(s.to_string())),
        }
    }
}

/// Position state a decision was computed against
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionBasis {
    /// Position revision; bumped on every applied mutation
    pub revision: u64,
    pub remaining_quantity: f64,
    pub partial_tp_taken: bool,
}

/// Ratcheted trailing state proposed by an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailUpdate {
    pub highest_close: f64,
    pub stop_loss: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitDecision {
    pub symbol: String,
    pub position_id: String,
    pub action: ExitAction,
    pub reason: Option<ExitReason>,
    /// Price the decision was evaluated at (order price hint)
    pub exit_price: f64,
    pub quantity: f64,
    /// Trailing update to apply alongside the action, if the trail moved
    pub trail: Option<TrailUpdate>,
    pub basis: DecisionBasis,
    pub evaluated_at: DateTime<Utc>,
}

impl ExitDecision {
    pub fn is_hold(&self) -> bool {
        self.action == ExitAction::Hold
    }

    /// Whether applying this decision would mutate the position
    pub fn changes_state(&self) -> bool {
        !self.is_hold() || self.trail.is_some()
    }

    /// Idempotency key for the exchange: position id plus decision sequence
    pub fn idempotency_key(&self) -> String {
        format!("{}-{}", self.position_id, self.basis.revision)
    }
}
