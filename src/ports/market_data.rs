//! Market data port
//!
//! Indicator computation and raw data retrieval live behind this trait; the
//! core only ever sees finished, immutable snapshots and a latest price.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::snapshot::IndicatorSnapshot;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketDataError {
    /// Transient; the symbol is skipped for this cycle
    #[error("Data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("Malformed market data for {symbol}: {reason}")]
    Malformed { symbol: String, reason: String },
}

impl MarketDataError {
    pub fn unavailable(symbol: &str, reason: impl Into<String>) -> Self {
        MarketDataError::DataUnavailable {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            MarketDataError::DataUnavailable { symbol, .. } | MarketDataError::Malformed { symbol, .. } => symbol,
        }
    }
}

#[async_trait]
pub trait MarketDataPort: Send + Sync {
    /// Fresh multi-timeframe snapshot for one symbol
    async fn indicator_snapshot(&self, symbol: &str) -> Result<IndicatorSnapshot, MarketDataError>;

    /// Latest traded price, used by the watchdog between full snapshots
    async fn latest_price(&self, symbol: &str) -> Result<f64, MarketDataError>;
}
