use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::position::Fill;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Order rejected: {0}")]
    Rejected(String),
    #[error("Order not confirmed within timeout: {0}")]
    Timeout(String),
    #[error("Exchange API error: {0}")]
    ApiError(String),
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => f.write_str("BUY"),
            OrderSide::Sell => f.write_str("SELL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    /// Price the decision was made at; market orders may fill elsewhere
    pub price_hint: f64,
    /// `{position_id}-{sequence}`; a retry with the same key must not fill twice
    pub idempotency_key: String,
}

/// Confirmed execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub fill: Fill,
}

#[async_trait]
pub trait ExecutionPort: Send + Sync {
    /// Submit and wait for confirmation. `Ok` means filled; anything that
    /// is not a confirmed fill must be an `Err`.
    async fn submit_order(&self, request: OrderRequest) -> Result<OrderResult, ExecutionError>;
}
