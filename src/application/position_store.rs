//! Position Store
//!
//! One slot per symbol, each behind its own async mutex. Holding a
//! [`SymbolLock`] is the only way to open, mutate or close a position, so the
//! slow cycle and the watchdog can never interleave writes for a symbol.
//! Different symbols never contend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::domain::exit::ExitDecision;
use crate::domain::position::{Fill, Position, PositionError, Transition};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Symbol {0} is being mutated by another task")]
    Busy(String),
    #[error("Symbol {0} already has an open position")]
    AlreadyOpen(String),
}

type Slot = Arc<Mutex<Option<Position>>>;

#[derive(Debug, Default)]
pub struct PositionStore {
    slots: RwLock<HashMap<String, Slot>>,
    open: Arc<AtomicUsize>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, symbol: &str) -> Slot {
        if let Some(slot) = self.slots.read().await.get(symbol) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(symbol.to_string()).or_default())
    }

    /// Take the symbol's write lock, failing fast if another task holds it
    pub async fn try_lock(&self, symbol: &str) -> Result<SymbolLock, StoreError> {
        let guard = self
            .slot(symbol)
            .await
            .try_lock_owned()
            .map_err(|_| StoreError::Busy(symbol.to_string()))?;
        Ok(SymbolLock {
            symbol: symbol.to_string(),
            guard,
            open: Arc::clone(&self.open),
        })
    }

    /// Take the symbol's write lock, waiting for the current holder
    pub async fn lock(&self, symbol: &str) -> SymbolLock {
        let guard = self.slot(symbol).await.lock_owned().await;
        SymbolLock {
            symbol: symbol.to_string(),
            guard,
            open: Arc::clone(&self.open),
        }
    }

    /// Copy of the current position without waiting
    pub async fn peek(&self, symbol: &str) -> Result<Option<Position>, StoreError> {
        let slot = self.slot(symbol).await;
        let guard = slot.try_lock().map_err(|_| StoreError::Busy(symbol.to_string()))?;
        Ok(guard.clone())
    }

    /// Copy of the current position, waiting for any writer to finish
    pub async fn get(&self, symbol: &str) -> Option<Position> {
        let slot = self.slot(symbol).await;
        let guard = slot.lock().await;
        guard.clone()
    }

    /// Symbols that have ever had a slot
    pub async fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.slots.read().await.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Every open position. Waits on each slot in turn.
    pub async fn open_positions(&self) -> Vec<Position> {
        let mut positions = Vec::new();
        for symbol in self.symbols().await {
            if let Some(position) = self.get(&symbol).await {
                positions.push(position);
            }
        }
        positions
    }

    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

/// Result of an applied decision
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub transition: Transition,
    /// State after the decision. A closed position is no longer in the store
    /// and this is its final record.
    pub position: Position,
}

impl Applied {
    pub fn is_closed(&self) -> bool {
        self.position.is_closed()
    }
}

/// Exclusive write access to one symbol's slot
#[derive(Debug)]
pub struct SymbolLock {
    symbol: String,
    guard: OwnedMutexGuard<Option<Position>>,
    open: Arc<AtomicUsize>,
}

impl SymbolLock {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn position(&self) -> Option<&Position> {
        self.guard.as_ref()
    }

    /// Place a freshly opened position into the empty slot
    pub fn insert(&mut self, position: Position) -> Result<(), StoreError> {
        if self.guard.is_some() {
            return Err(StoreError::AlreadyOpen(self.symbol.clone()));
        }
        *self.guard = Some(position);
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// The single mutation point for open positions. A closed position is
    /// removed from the slot and handed back.
    pub fn apply_decision(
        &mut self,
        decision: &ExitDecision,
        fill: Option<&Fill>,
    ) -> Result<Applied, PositionError> {
        let position = self.guard.as_mut().ok_or(PositionError::AlreadyClosed)?;
        let transition = position.apply(decision, fill)?;
        let position = position.clone();

        if position.is_closed() {
            self.open.fetch_sub(1, Ordering::SeqCst);
            *self.guard = None;
        }
        Ok(Applied {
            transition,
            position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::exit::{ExitAction, ExitReason};
    use crate::domain::position::ExitPlan;
    use crate::domain::tier::Tier;
    use chrono::Utc;
    use std::time::Duration;

    fn position(symbol: &str) -> Position {
        Position::open(
            format!("{}-1", symbol),
            symbol,
            Tier::Swing,
            Fill::new(100.0, 1.0, Utc::now()),
            90.0,
            110.0,
            Duration::from_secs(3600),
            ExitPlan {
                partial_pct: 0.05,
                partial_fraction: 0.5,
                trail_atr_multiple: 2.0,
            },
        )
        .unwrap()
    }

    fn full_close(position: &Position) -> ExitDecision {
        ExitDecision {
            symbol: position.symbol().to_string(),
            position_id: position.id().to_string(),
            action: ExitAction::FullClose,
            reason: Some(ExitReason::StopHit),
            exit_price: 90.0,
            quantity: position.remaining_quantity(),
            trail: None,
            basis: position.basis(),
            evaluated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_close() {
        let store = PositionStore::new();
        let mut lock = store.lock("SOL/USDT").await;
        lock.insert(position("SOL/USDT")).unwrap();
        assert_eq!(store.open_count(), 1);
        assert!(matches!(
            lock.insert(position("SOL/USDT")),
            Err(StoreError::AlreadyOpen(_))
        ));

        let decision = full_close(lock.position().unwrap());
        let fill = Fill::new(90.0, 1.0, Utc::now());
        let applied = lock.apply_decision(&decision, Some(&fill)).unwrap();
        assert!(applied.is_closed());
        assert_eq!(applied.position.remaining_quantity(), 0.0);
        assert!(lock.position().is_none());
        assert_eq!(store.open_count(), 0);

        drop(lock);
        assert!(store.get("SOL/USDT").await.is_none());
    }

    #[tokio::test]
    async fn test_second_writer_is_rejected() {
        let store = PositionStore::new();
        let _held = store.try_lock("BTC/USDT").await.unwrap();

        assert!(matches!(
            store.try_lock("BTC/USDT").await,
            Err(StoreError::Busy(_))
        ));
        assert!(matches!(store.peek("BTC/USDT").await, Err(StoreError::Busy(_))));

        // Other symbols are unaffected
        assert!(store.try_lock("ETH/USDT").await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_apply_leaves_slot() {
        let store = PositionStore::new();
        let mut lock = store.lock("SOL/USDT").await;
        lock.insert(position("SOL/USDT")).unwrap();

        let decision = full_close(lock.position().unwrap());
        assert!(lock.apply_decision(&decision, None).is_err());
        assert!(lock.position().is_some());
        assert_eq!(store.open_count(), 1);
    }

    #[tokio::test]
    async fn test_open_positions_listing() {
        let store = PositionStore::new();
        store.lock("A").await.insert(position("A")).unwrap();
        store.lock("B").await;
        let open = store.open_positions().await;
        assert_eq!(open.len(), 1);
        assert_eq!(store.symbols().await, vec!["A".to_string(), "B".to_string()]);
    }
}
