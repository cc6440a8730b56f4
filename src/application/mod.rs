//! Application Layer - Position lifecycle orchestration
//!
//! - `position_store`: per-symbol single-writer slots
//! - `engine`: entry and exit evaluation against the ports
//! - `orchestrator`: slow cycle and watchdog schedules
//! - `replay`: historical replay through the same decision path

pub mod position_store;
pub mod engine;
pub mod orchestrator;
pub mod replay;

pub use position_store::{Applied, PositionStore, StoreError, SymbolLock};
pub use engine::{CycleReport, EngineError, SymbolOutcome, TradingEngine, DEFAULT_PORTFOLIO_CAP_FRACTION};
pub use orchestrator::{OrchestratorError, OrchestratorStatus, TradingOrchestrator};
pub use replay::{
    replay, IntrabarPolicy, RegimeSample, ReplayConfig, ReplayDriver, ReplayError, ReplayReport,
};
