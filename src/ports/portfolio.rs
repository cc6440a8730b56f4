use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use super::execution::OrderRequest;
use crate::domain::position::Fill;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PortfolioError {
    #[error("Balance unavailable: {0}")]
    Unavailable(String),
    #[error("Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Decimal, available: Decimal },
}

#[async_trait]
pub trait PortfolioPort: Send + Sync {
    /// Quote-currency balance available for sizing
    async fn balance(&self) -> Result<Decimal, PortfolioError>;

    /// Book a confirmed fill. Ledgers that track fills on their own can
    /// ignore this.
    async fn record_fill(&self, _request: &OrderRequest, _fill: &Fill) -> Result<(), PortfolioError> {
        Ok(())
    }
}
