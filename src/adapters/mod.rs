//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - Paper: simulated execution and cash ledger
//! - Snapshot file: JSON indicator snapshot feed
//! - Bars: CSV bar loading and ledger export
//! - CLI: Command-line interface handlers

pub mod paper;
pub mod snapshot_file;
pub mod bars;
pub mod cli;

pub use paper::{PaperExecution, PaperPortfolio};
pub use snapshot_file::FileSnapshotFeed;
pub use bars::{export_csv, export_json, load_bars, read_bars, BarFileError};
pub use cli::CliApp;
