//! Tiered Trader - Regime-aware tiered position lifecycle library
//!
//! Classifies the market regime, matches tiered entry setups and manages each
//! open position through partial profit, trailing stop, target and time exits.
//! The same decision path runs live and in historical replay.
//!
//! # Modules
//!
//! - `domain`: Core types (IndicatorSnapshot, Position, ExitDecision, TradeLedger, CircuitBreaker)
//! - `ports`: Trait abstractions (MarketDataPort, ExecutionPort, PortfolioPort, NotifierPort)
//! - `strategy`: Regime classifier, tiered entry classifier, exit state machine, indicators
//! - `adapters`: Paper execution, snapshot file feed, bar files, CLI
//! - `config`: Configuration loading and validation
//! - `application`: Position store, engine, orchestrator and replay driver

pub mod domain;
pub mod ports;
pub mod strategy;
pub mod adapters;
pub mod config;
pub mod application;
