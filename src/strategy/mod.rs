//! Strategy Layer - Regime, entry and exit logic
//!
//! Everything here is pure and driven by injected parameters:
//! - `params`: tier parameter table and regime thresholds
//! - `regime`: snapshot to regime + confidence
//! - `conditions`: entry condition vocabulary
//! - `entry`: tiered entry classifier
//! - `exit`: the exit state machine shared by live and replay paths
//! - `indicators`: incremental indicators and candle aggregation for replay

pub mod params;
pub mod regime;
pub mod conditions;
pub mod entry;
pub mod exit;
pub mod indicators;

pub use params::{ParamError, RegimeThresholds, TierParams, TierTable};
pub use regime::{RegimeClassifier, RegimeReading};
pub use conditions::{Condition, EmaOrder};
pub use entry::{EntryClassifier, Rejection, TierVerdict};
pub use exit::ExitStateMachine;
pub use indicators::{Candle, CandleBuilder, FrameState, IndicatorConfig};
