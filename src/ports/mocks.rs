//! Recording mocks for the ports, shared by unit and integration tests
//!
//! Each mock records its calls and answers from configurable responses.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::execution::{ExecutionError, ExecutionPort, OrderRequest, OrderResult};
use super::market_data::{MarketDataError, MarketDataPort};
use super::notifier::{NotifierPort, TradeEvent};
use super::portfolio::{PortfolioError, PortfolioPort};
use crate::domain::position::Fill;
use crate::domain::snapshot::IndicatorSnapshot;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock market data port that records calls and allows controlled responses
#[derive(Debug, Default, Clone)]
pub struct MockMarketData {
    calls: Arc<Mutex<Vec<String>>>,
    snapshots: Arc<Mutex<HashMap<String, IndicatorSnapshot>>>,
    prices: Arc<Mutex<HashMap<String, f64>>>,
    unavailable: Arc<Mutex<HashSet<String>>>,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the snapshot for its symbol
    pub fn with_snapshot(self, snapshot: IndicatorSnapshot) -> Self {
        self.set_snapshot(snapshot);
        self
    }

    /// Builder method to set the latest price for a symbol
    pub fn with_price(self, symbol: &str, price: f64) -> Self {
        self.set_price(symbol, price);
        self
    }

    pub fn set_snapshot(&self, snapshot: IndicatorSnapshot) {
        lock(&self.snapshots).insert(snapshot.symbol.clone(), snapshot);
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        lock(&self.prices).insert(symbol.to_string(), price);
    }

    /// Make every call for `symbol` fail with `DataUnavailable`
    pub fn set_unavailable(&self, symbol: &str, unavailable: bool) {
        let mut set = lock(&self.unavailable);
        if unavailable {
            set.insert(symbol.to_string());
        } else {
            set.remove(symbol);
        }
    }

    /// Get all recorded calls
    pub fn get_calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn check_available(&self, symbol: &str) -> Result<(), MarketDataError> {
        if lock(&self.unavailable).contains(symbol) {
            Err(MarketDataError::unavailable(symbol, "feed offline"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MarketDataPort for MockMarketData {
    async fn indicator_snapshot(&self, symbol: &str) -> Result<IndicatorSnapshot, MarketDataError> {
        lock(&self.calls).push(format!("snapshot:{}", symbol));
        self.check_available(symbol)?;
        lock(&self.snapshots)
            .get(symbol)
            .cloned()
            .ok_or_else(|| MarketDataError::unavailable(symbol, "no snapshot configured"))
    }

    async fn latest_price(&self, symbol: &str) -> Result<f64, MarketDataError> {
        lock(&self.calls).push(format!("price:{}", symbol));
        self.check_available(symbol)?;
        if let Some(price) = lock(&self.prices).get(symbol) {
            return Ok(*price);
        }
        lock(&self.snapshots)
            .get(symbol)
            .map(|s| s.price)
            .ok_or_else(|| MarketDataError::unavailable(symbol, "no price configured"))
    }
}

/// Mock execution port: fills at the price hint unless told to fail
#[derive(Debug, Default, Clone)]
pub struct MockExecution {
    calls: Arc<Mutex<Vec<OrderRequest>>>,
    failure: Arc<Mutex<Option<ExecutionError>>>,
    // (price, quantity) multipliers applied to every fill
    fill_scale: Arc<Mutex<Option<(f64, f64)>>>,
    delay: Option<Duration>,
    sequence: Arc<AtomicU64>,
}

impl MockExecution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to fail every order with `error`
    pub fn with_failure(self, error: ExecutionError) -> Self {
        self.set_failure(Some(error));
        self
    }

    /// Builder method to hold each order for `delay` before confirming
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Builder method to fill at `price_factor` times the hint and
    /// `quantity_factor` times the requested quantity
    pub fn with_fill_scale(self, price_factor: f64, quantity_factor: f64) -> Self {
        self.set_fill_scale(Some((price_factor, quantity_factor)));
        self
    }

    pub fn set_failure(&self, error: Option<ExecutionError>) {
        *lock(&self.failure) = error;
    }

    pub fn set_fill_scale(&self, scale: Option<(f64, f64)>) {
        *lock(&self.fill_scale) = scale;
    }

    /// Get all recorded calls
    pub fn get_calls(&self) -> Vec<OrderRequest> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ExecutionPort for MockExecution {
    async fn submit_order(&self, request: OrderRequest) -> Result<OrderResult, ExecutionError> {
        lock(&self.calls).push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = lock(&self.failure).clone() {
            return Err(error);
        }
        let (price_factor, quantity_factor) = lock(&self.fill_scale).unwrap_or((1.0, 1.0));
        let id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(OrderResult {
            order_id: format!("mock-{}", id),
            fill: Fill::new(
                request.price_hint * price_factor,
                request.quantity * quantity_factor,
                chrono::Utc::now(),
            ),
        })
    }
}

/// Mock portfolio with a fixed balance
#[derive(Debug, Clone)]
pub struct MockPortfolio {
    balance: Arc<Mutex<Result<Decimal, PortfolioError>>>,
    fills: Arc<Mutex<Vec<(OrderRequest, Fill)>>>,
}

impl MockPortfolio {
    pub fn new(balance: Decimal) -> Self {
        Self {
            balance: Arc::new(Mutex::new(Ok(balance))),
            fills: Arc::default(),
        }
    }

    pub fn set_balance(&self, balance: Result<Decimal, PortfolioError>) {
        *lock(&self.balance) = balance;
    }

    pub fn get_fills(&self) -> Vec<(OrderRequest, Fill)> {
        lock(&self.fills).clone()
    }
}

#[async_trait]
impl PortfolioPort for MockPortfolio {
    async fn balance(&self) -> Result<Decimal, PortfolioError> {
        lock(&self.balance).clone()
    }

    async fn record_fill(&self, request: &OrderRequest, fill: &Fill) -> Result<(), PortfolioError> {
        lock(&self.fills).push((request.clone(), *fill));
        Ok(())
    }
}

/// Notifier that keeps every event
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<TradeEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TradeEvent> {
        lock(&self.events).clone()
    }
}

impl NotifierPort for RecordingNotifier {
    fn notify(&self, event: TradeEvent) {
        lock(&self.events).push(event);
    }
}
