//! Position
//!
//! The only mutable long-lived entity in the core. Every mutation goes through
//! [`Position::apply`], which either applies an exit decision completely or
//! rejects it without touching any field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::entry::EntryCandidate;
use super::exit::{DecisionBasis, ExitAction, ExitDecision, ExitReason};
use super::tier::Tier;
use super::trade::{ExitEvent, ExitEventKind, TradeRecord};

/// Relative tolerance when matching a fill against the remaining quantity
const QUANTITY_TOLERANCE: f64 = 1e-9;

/// Position id from the symbol's alphanumerics and the entry time, e.g.
/// `BTCUSDT-1704067200000`
pub fn position_id(symbol: &str, entry_time: DateTime<Utc>) -> String {
    let compact: String = symbol.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    format!("{}-{}", compact, entry_time.timestamp_millis())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    PartiallyClosed,
    Closed,
}

/// Tier exit parameters frozen into the position at entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitPlan {
    pub partial_pct: f64,
    pub partial_fraction: f64,
    pub trail_atr_multiple: f64,
}

impl ExitPlan {
    pub fn has_partial(&self) -> bool {
        self.partial_fraction > 0.0
    }

    pub fn partial_target(&self, entry_price: f64) -> f64 {
        entry_price * (1.0 + self.partial_pct)
    }
}

/// Confirmed execution reported by the execution collaborator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub price: f64,
    pub quantity: f64,
    pub time: DateTime<Utc>,
}

impl Fill {
    pub fn new(price: f64, quantity: f64, time: DateTime<Utc>) -> Self {
        Self { price, quantity, time }
    }
}

/// Result of a successfully applied decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    /// HOLD without a trailing change
    Unchanged,
    TrailRaised { previous_stop: f64, stop_loss: f64 },
    PartiallyClosed { quantity: f64, price: f64, stop_loss: f64 },
    Closed { reason: ExitReason, quantity: f64, price: f64 },
}

#[derive(Debug, Error, PartialEq)]
pub enum PositionError {
    #[error("Position is already closed")]
    AlreadyClosed,
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(f64),
    #[error("Invalid entry price: {0}")]
    InvalidEntryPrice(f64),
    #[error("Stop loss {stop} must be below entry {entry}")]
    InvalidStopLoss { stop: f64, entry: f64 },
    #[error("Final target {target} must be above entry {entry}")]
    InvalidTarget { target: f64, entry: f64 },
    #[error("Decision for position {found} applied to {expected}")]
    WrongPosition { expected: String, found: String },
    #[error("Stale decision: computed at revision {decision}, position is at revision {current}")]
    StaleDecision { current: u64, decision: u64 },
    #[error("Partial take-profit already taken")]
    PartialAlreadyTaken,
    #[error("Decision requires a confirmed fill")]
    MissingFill,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    id: String,
    symbol: String,
    tier: Tier,
    entry_price: f64,
    entry_time: DateTime<Utc>,
    original_quantity: f64,
    remaining_quantity: f64,
    stop_loss: f64,
    initial_stop_loss: f64,
    partial_tp_taken: bool,
    highest_close_since_entry: f64,
    final_target_price: f64,
    max_hold_duration: Duration,
    plan: ExitPlan,
    status: PositionStatus,
    revision: u64,
    exit_events: Vec<ExitEvent>,
    realized_pnl: f64,
}

impl Position {
    /// Open a position from a confirmed entry fill
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        id: impl Into<String>,
        symbol: impl Into<String>,
        tier: Tier,
        entry: Fill,
        stop_loss: f64,
        final_target_price: f64,
        max_hold_duration: Duration,
        plan: ExitPlan,
    ) -> Result<Self, PositionError> {
        if !(entry.quantity > 0.0) || !entry.quantity.is_finite() {
            return Err(PositionError::InvalidQuantity(entry.quantity));
        }
        if !(entry.price > 0.0) || !entry.price.is_finite() {
            return Err(PositionError::InvalidEntryPrice(entry.price));
        }
        if !(stop_loss < entry.price) {
            return Err(PositionError::InvalidStopLoss {
                stop: stop_loss,
                entry: entry.price,
            });
        }
        if !(final_target_price > entry.price) {
            return Err(PositionError::InvalidTarget {
                target: final_target_price,
                entry: entry.price,
            });
        }

        Ok(Self {
            id: id.into(),
            symbol: symbol.into(),
            tier,
            entry_price: entry.price,
            entry_time: entry.time,
            original_quantity: entry.quantity,
            remaining_quantity: entry.quantity,
            stop_loss,
            initial_stop_loss: stop_loss,
            partial_tp_taken: false,
            highest_close_since_entry: entry.price,
            final_target_price,
            max_hold_duration,
            plan,
            status: PositionStatus::Open,
            revision: 0,
            exit_events: Vec::new(),
            realized_pnl: 0.0,
        })
    }

    /// Open from an accepted candidate. Levels keep the candidate's absolute
    /// stop and final target; the partial threshold is re-derived from the
    /// fill price.
    pub fn from_candidate(
        id: impl Into<String>,
        candidate: &EntryCandidate,
        entry: Fill,
    ) -> Result<Self, PositionError> {
        Self::open(
            id,
            candidate.symbol.clone(),
            candidate.tier,
            entry,
            candidate.stop_loss,
            candidate.final_target_price,
            candidate.max_hold_duration,
            ExitPlan {
                partial_pct: candidate.partial_tp_pct,
                partial_fraction: candidate.partial_tp_fraction,
                trail_atr_multiple: candidate.trailing_atr_multiple,
            },
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    pub fn entry_time(&self) -> DateTime<Utc> {
        self.entry_time
    }

    pub fn original_quantity(&self) -> f64 {
        self.original_quantity
    }

    pub fn remaining_quantity(&self) -> f64 {
        self.remaining_quantity
    }

    pub fn stop_loss(&self) -> f64 {
        self.stop_loss
    }

    pub fn initial_stop_loss(&self) -> f64 {
        self.initial_stop_loss
    }

    pub fn partial_tp_taken(&self) -> bool {
        self.partial_tp_taken
    }

    pub fn highest_close(&self) -> f64 {
        self.highest_close_since_entry
    }

    pub fn final_target_price(&self) -> f64 {
        self.final_target_price
    }

    pub fn max_hold_duration(&self) -> Duration {
        self.max_hold_duration
    }

    pub fn plan(&self) -> &ExitPlan {
        &self.plan
    }

    pub fn status(&self) -> PositionStatus {
        self.status
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn exit_events(&self) -> &[ExitEvent] {
        &self.exit_events
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn is_closed(&self) -> bool {
        self.status == PositionStatus::Closed
    }

    /// Trailing runs once the partial is taken and the tier trails at all
    pub fn trailing_active(&self) -> bool {
        self.partial_tp_taken && self.plan.trail_atr_multiple > 0.0
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.remaining_quantity
    }

    /// Elapsed holding time at `now`, zero if `now` precedes entry
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.entry_time).to_std().unwrap_or_default()
    }

    /// Snapshot of the fields a decision depends on
    pub fn basis(&self) -> DecisionBasis {
        DecisionBasis {
            revision: self.revision,
            remaining_quantity: self.remaining_quantity,
            partial_tp_taken: self.partial_tp_taken,
        }
    }

    /// Apply an exit decision. Closing actions need the confirmed fill.
    ///
    /// Validation happens before any field is written, so an `Err` leaves the
    /// position exactly as it was.
    pub fn apply(
        &mut self,
        decision: &ExitDecision,
        fill: Option<&Fill>,
    ) -> Result<Transition, PositionError> {
        if self.is_closed() {
            return Err(PositionError::AlreadyClosed);
        }
        if decision.position_id != self.id {
            return Err(PositionError::WrongPosition {
                expected: self.id.clone(),
                found: decision.position_id.clone(),
            });
        }
        if decision.basis != self.basis() {
            return Err(PositionError::StaleDecision {
                current: self.revision,
                decision: decision.basis.revision,
            });
        }

        // Trailing values after this decision; the stop only ratchets up.
        let (highest, stop) = match decision.trail {
            Some(trail) => (
                self.highest_close_since_entry.max(trail.highest_close),
                self.stop_loss.max(trail.stop_loss),
            ),
            None => (self.highest_close_since_entry, self.stop_loss),
        };

        match decision.action {
            ExitAction::Hold => {
                if decision.trail.is_none() {
                    return Ok(Transition::Unchanged);
                }
                let previous_stop = self.stop_loss;
                self.highest_close_since_entry = highest;
                self.stop_loss = stop;
                self.revision += 1;
                Ok(Transition::TrailRaised {
                    previous_stop,
                    stop_loss: stop,
                })
            }
            ExitAction::PartialClose => {
                if self.partial_tp_taken {
                    return Err(PositionError::PartialAlreadyTaken);
                }
                let fill = fill.ok_or(PositionError::MissingFill)?;
                if !(fill.quantity > 0.0) || fill.quantity >= self.remaining_quantity {
                    return Err(PositionError::InvalidQuantity(fill.quantity));
                }

                self.remaining_quantity -= fill.quantity;
                self.realized_pnl += (fill.price - self.entry_price) * fill.quantity;
                self.partial_tp_taken = true;
                self.highest_close_since_entry = highest;
                self.stop_loss = stop;
                self.status = PositionStatus::PartiallyClosed;
                self.exit_events.push(ExitEvent {
                    time: fill.time,
                    kind: ExitEventKind::PartialClose,
                    price: fill.price,
                    quantity: fill.quantity,
                    reason: ExitReason::PartialTarget,
                    trailing: false,
                });
                self.revision += 1;

                Ok(Transition::PartiallyClosed {
                    quantity: fill.quantity,
                    price: fill.price,
                    stop_loss: stop,
                })
            }
            ExitAction::FullClose => {
                let fill = fill.ok_or(PositionError::MissingFill)?;
                let tolerance = QUANTITY_TOLERANCE * self.remaining_quantity.max(1.0);
                if (fill.quantity - self.remaining_quantity).abs() > tolerance {
                    return Err(PositionError::InvalidQuantity(fill.quantity));
                }
                let reason = decision.reason.unwrap_or(ExitReason::StopHit);
                let quantity = self.remaining_quantity;

                self.realized_pnl += (fill.price - self.entry_price) * quantity;
                self.remaining_quantity = 0.0;
                self.highest_close_since_entry = highest;
                self.stop_loss = stop;
                self.status = PositionStatus::Closed;
                self.exit_events.push(ExitEvent {
                    time: fill.time,
                    kind: ExitEventKind::FullClose,
                    price: fill.price,
                    quantity,
                    reason,
                    trailing: reason.is_stop_exit() && self.trailing_active(),
                });
                self.revision += 1;

                Ok(Transition::Closed {
                    reason,
                    quantity,
                    price: fill.price,
                })
            }
        }
    }

    /// Ledger view of this position
    pub fn trade_record(&self) -> TradeRecord {
        TradeRecord {
            symbol: self.symbol.clone(),
            tier: self.tier,
            position_id: self.id.clone(),
            entry_time: self.entry_time,
            entry_price: self.entry_price,
            quantity: self.original_quantity,
            exit_events: self.exit_events.clone(),
            realized_pnl: self.realized_pnl,
        }
    }
}
