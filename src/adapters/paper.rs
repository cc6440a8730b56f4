//! Paper trading adapters
//!
//! Simulated execution that fills at the price hint, and a cash ledger that
//! books those fills. Both are idempotent on the order key, so a retried
//! submission never fills or books twice. Keys are remembered in a bounded
//! window; retries reuse a recent key and older keys are forgotten.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::domain::position::Fill;
use crate::ports::execution::{ExecutionError, ExecutionPort, OrderRequest, OrderResult, OrderSide};
use crate::ports::portfolio::{PortfolioError, PortfolioPort};

/// Order keys remembered for de-duplication by default
pub const DEFAULT_KEY_WINDOW: usize = 1024;

/// Insertion-ordered map that drops its oldest keys past `capacity`
#[derive(Debug)]
struct KeyWindow<V> {
    entries: HashMap<String, V>,
    order: VecDeque<String>,
    capacity: usize,
}

impl<V> KeyWindow<V> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    fn insert(&mut self, key: String, value: V) {
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Fills every order immediately at its price hint
#[derive(Debug, Clone)]
pub struct PaperExecution {
    filled: Arc<Mutex<KeyWindow<OrderResult>>>,
    sequence: Arc<AtomicU64>,
}

impl Default for PaperExecution {
    fn default() -> Self {
        Self::with_key_window(DEFAULT_KEY_WINDOW)
    }
}

impl PaperExecution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember at most `capacity` order keys
    pub fn with_key_window(capacity: usize) -> Self {
        Self {
            filled: Arc::new(Mutex::new(KeyWindow::new(capacity))),
            sequence: Arc::default(),
        }
    }

    /// Number of order keys currently remembered
    pub async fn order_count(&self) -> usize {
        self.filled.lock().await.len()
    }
}

#[async_trait]
impl ExecutionPort for PaperExecution {
    async fn submit_order(&self, request: OrderRequest) -> Result<OrderResult, ExecutionError> {
        if !(request.quantity > 0.0) || !request.quantity.is_finite() {
            return Err(ExecutionError::InvalidParameters(format!(
                "quantity must be positive, got {}",
                request.quantity
            )));
        }
        if !(request.price_hint > 0.0) || !request.price_hint.is_finite() {
            return Err(ExecutionError::InvalidParameters(format!(
                "price hint must be positive, got {}",
                request.price_hint
            )));
        }

        let mut filled = self.filled.lock().await;
        if let Some(existing) = filled.get(&request.idempotency_key) {
            tracing::debug!(
                "Paper order {} already filled as {}",
                request.idempotency_key,
                existing.order_id
            );
            return Ok(existing.clone());
        }

        let id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let result = OrderResult {
            order_id: format!("paper-{}", id),
            fill: Fill::new(request.price_hint, request.quantity, Utc::now()),
        };
        tracing::info!(
            "[PAPER] {} {} {:.8} @ {:.4} ({})",
            request.side,
            request.symbol,
            request.quantity,
            request.price_hint,
            result.order_id
        );
        filled.insert(request.idempotency_key.clone(), result.clone());
        Ok(result)
    }
}

/// Quote-currency cash ledger
#[derive(Debug, Clone)]
pub struct PaperPortfolio {
    cash: Arc<RwLock<Decimal>>,
    booked: Arc<Mutex<KeyWindow<()>>>,
}

impl PaperPortfolio {
    pub fn new(starting_balance: Decimal) -> Self {
        Self::with_key_window(starting_balance, DEFAULT_KEY_WINDOW)
    }

    /// Remember at most `capacity` booked order keys
    pub fn with_key_window(starting_balance: Decimal, capacity: usize) -> Self {
        Self {
            cash: Arc::new(RwLock::new(starting_balance)),
            booked: Arc::new(Mutex::new(KeyWindow::new(capacity))),
        }
    }

    /// Build from a float balance, as read from config
    pub fn from_f64(starting_balance: f64) -> Result<Self, PortfolioError> {
        Decimal::from_f64(starting_balance)
            .map(Self::new)
            .ok_or_else(|| {
                PortfolioError::Unavailable(format!("invalid starting balance {}", starting_balance))
            })
    }

    pub async fn cash(&self) -> Decimal {
        *self.cash.read().await
    }
}

#[async_trait]
impl PortfolioPort for PaperPortfolio {
    async fn balance(&self) -> Result<Decimal, PortfolioError> {
        Ok(*self.cash.read().await)
    }

    async fn record_fill(&self, request: &OrderRequest, fill: &Fill) -> Result<(), PortfolioError> {
        let mut booked = self.booked.lock().await;
        if booked.get(&request.idempotency_key).is_some() {
            return Ok(());
        }

        let notional = Decimal::from_f64(fill.price * fill.quantity).ok_or_else(|| {
            PortfolioError::Unavailable(format!(
                "fill notional not representable: {} x {}",
                fill.price, fill.quantity
            ))
        })?;

        let mut cash = self.cash.write().await;
        match request.side {
            OrderSide::Buy => {
                if notional > *cash {
                    return Err(PortfolioError::InsufficientBalance {
                        needed: notional,
                        available: *cash,
                    });
                }
                *cash -= notional;
            }
            OrderSide::Sell => *cash += notional,
        }
        booked.insert(request.idempotency_key.clone(), ());

        tracing::debug!(
            "[PAPER] cash after {} {}: {:.2}",
            request.side,
            request.symbol,
            cash.to_f64().unwrap_or_default()
        );
        Ok(())
    }
}
