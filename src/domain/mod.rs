//! Domain Layer - Core types for the position lifecycle
//!
//! Pure data and state transitions with no I/O. External interactions happen
//! through the ports layer.
//!
//! - `snapshot`: immutable multi-timeframe indicator snapshots
//! - `tier`: tier and regime enums
//! - `entry`: accepted entry candidates
//! - `exit`: exit decisions and reasons
//! - `position`: the mutable position and its single mutation point
//! - `trade`: trade ledger records
//! - `risk`: position sizing
//! - `circuit_breaker`: portfolio-level entry gate

pub mod snapshot;
pub mod tier;
pub mod entry;
pub mod exit;
pub mod position;
pub mod trade;
pub mod risk;
pub mod circuit_breaker;

pub use snapshot::{IndicatorSnapshot, SnapshotError, Timeframe, TimeframeIndicators};
pub use tier::{Regime, Tier};
pub use entry::EntryCandidate;
pub use exit::{DecisionBasis, ExitAction, ExitDecision, ExitReason, TrailUpdate, UnknownExitReason};
pub use position::{position_id, ExitPlan, Fill, Position, PositionError, PositionStatus, Transition};
pub use trade::{ExitEvent, ExitEventKind, LedgerSummary, TradeLedger, TradeRecord};
pub use risk::{risk_fraction, size, SizingError};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitBreakerStatus};
