//! Ports Layer - Trait definitions for external collaborators
//!
//! Following hexagonal architecture, these traits abstract:
//! - Market data (indicator snapshots, latest prices)
//! - Order execution
//! - Portfolio balance
//! - Trade notifications

pub mod market_data;
pub mod execution;
pub mod portfolio;
pub mod notifier;
pub mod mocks;

pub use market_data::{MarketDataError, MarketDataPort};
pub use execution::{ExecutionError, ExecutionPort, OrderRequest, OrderResult, OrderSide};
pub use portfolio::{PortfolioError, PortfolioPort};
pub use notifier::{ChannelNotifier, LogNotifier, NotifierPort, TradeEvent};
