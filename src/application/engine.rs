//! Trading Engine
//!
//! Wires the regime classifier, entry classifier and exit state machine to the
//! ports. Both schedules (the slow cycle and the watchdog) run through this
//! type and share one position store.
//!
//! Exits are evaluated against a copy of the position, then applied under the
//! symbol lock. The lock is held from the basis check through order
//! submission to `apply`, so a decision either lands completely or is
//! discarded.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use super::position_store::{Applied, PositionStore, StoreError};
use crate::domain::circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitBreakerStatus};
use crate::domain::entry::EntryCandidate;
use crate::domain::exit::ExitDecision;
use crate::domain::position::{position_id, Fill, Position, PositionError, Transition};
use crate::domain::risk::{size, SizingError};
use crate::domain::snapshot::IndicatorSnapshot;
use crate::domain::tier::Regime;
use crate::ports::{
    ExecutionError, ExecutionPort, MarketDataError, MarketDataPort, NotifierPort, OrderRequest,
    OrderSide, PortfolioError, PortfolioPort, TradeEvent,
};
use crate::strategy::{
    EntryClassifier, ExitStateMachine, RegimeClassifier, RegimeReading, RegimeThresholds, TierTable,
};

/// Default cap on a single position's notional, as a fraction of balance
pub const DEFAULT_PORTFOLIO_CAP_FRACTION: f64 = 0.10;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Data unavailable: {0}")]
    DataUnavailable(#[from] MarketDataError),

    #[error("Invalid stop distance for {symbol}: entry {entry_price}, stop {stop_loss}")]
    InvalidStopDistance {
        symbol: String,
        entry_price: f64,
        stop_loss: f64,
    },

    #[error("Sizing rejected for {symbol}: {source}")]
    Sizing {
        symbol: String,
        #[source]
        source: SizingError,
    },

    #[error("Order submission failed: {0}")]
    OrderSubmissionFailure(#[from] ExecutionError),

    #[error("Concurrent mutation on {symbol}: {reason}")]
    ConcurrentMutationConflict { symbol: String, reason: String },

    #[error("Entries halted: {0}")]
    TradingHalted(#[from] CircuitBreakerError),

    #[error("Portfolio error: {0}")]
    Portfolio(#[from] PortfolioError),

    #[error("Position error: {0}")]
    Position(#[from] PositionError),
}

impl EngineError {
    fn conflict(symbol: &str, reason: impl ToString) -> Self {
        EngineError::ConcurrentMutationConflict {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
        }
    }

    fn sizing(symbol: &str, error: SizingError) -> Self {
        match error {
            SizingError::InvalidStopDistance {
                entry_price,
                stop_loss,
            } => EngineError::InvalidStopDistance {
                symbol: symbol.to_string(),
                entry_price,
                stop_loss,
            },
            source => EngineError::Sizing {
                symbol: symbol.to_string(),
                source,
            },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::ConcurrentMutationConflict { .. })
    }
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match &error {
            StoreError::Busy(symbol) | StoreError::AlreadyOpen(symbol) => {
                EngineError::conflict(symbol, &error)
            }
        }
    }
}

/// What one symbol evaluation did
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolOutcome {
    /// Flat and no tier matched
    NoSetup,
    Entered(Position),
    Exit(Transition),
}

/// Counters for one slow cycle or watchdog pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub evaluated: usize,
    pub entries: usize,
    pub partial_closes: usize,
    pub closes: usize,
    pub trail_updates: usize,
    pub skipped: usize,
    pub conflicts: usize,
    pub errors: usize,
}

impl CycleReport {
    fn record_transition(&mut self, transition: &Transition) {
        match transition {
            Transition::Unchanged => {}
            Transition::TrailRaised { .. } => self.trail_updates += 1,
            Transition::PartiallyClosed { .. } => self.partial_closes += 1,
            Transition::Closed { .. } => self.closes += 1,
        }
    }

    fn record_error(&mut self, error: &EngineError) {
        match error {
            EngineError::DataUnavailable(_) => self.skipped += 1,
            EngineError::ConcurrentMutationConflict { .. } => self.conflicts += 1,
            _ => self.errors += 1,
        }
    }
}

pub struct TradingEngine {
    regime: RegimeClassifier,
    entries: EntryClassifier,
    exits: ExitStateMachine,
    portfolio_cap_fraction: f64,
    store: Arc<PositionStore>,
    gate: Mutex<CircuitBreaker>,
    market_data: Arc<dyn MarketDataPort>,
    execution: Arc<dyn ExecutionPort>,
    portfolio: Arc<dyn PortfolioPort>,
    notifier: Arc<dyn NotifierPort>,
    /// Last regime seen per symbol
    regimes: RwLock<HashMap<String, Regime>>,
    /// Last snapshot per symbol, reused by the watchdog
    snapshots: RwLock<HashMap<String, Arc<IndicatorSnapshot>>>,
}

impl TradingEngine {
    /// Engine with default thresholds, tier table and entry gate
    pub fn new(
        market_data: Arc<dyn MarketDataPort>,
        execution: Arc<dyn ExecutionPort>,
        portfolio: Arc<dyn PortfolioPort>,
        notifier: Arc<dyn NotifierPort>,
    ) -> Self {
        let table = TierTable::default();
        Self {
            regime: RegimeClassifier::default(),
            exits: ExitStateMachine::new(&table),
            entries: EntryClassifier::new(table),
            portfolio_cap_fraction: DEFAULT_PORTFOLIO_CAP_FRACTION,
            store: Arc::new(PositionStore::new()),
            gate: Mutex::new(CircuitBreaker::new()),
            market_data,
            execution,
            portfolio,
            notifier,
            regimes: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_thresholds(mut self, thresholds: RegimeThresholds) -> Self {
        self.regime = RegimeClassifier::new(thresholds);
        self
    }

    pub fn with_tier_table(mut self, table: TierTable) -> Self {
        self.exits = ExitStateMachine::new(&table);
        self.entries = EntryClassifier::new(table);
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.gate = Mutex::new(breaker);
        self
    }

    pub fn with_portfolio_cap(mut self, fraction: f64) -> Self {
        self.portfolio_cap_fraction = fraction;
        self
    }

    pub fn store(&self) -> &Arc<PositionStore> {
        &self.store
    }

    pub async fn breaker_status(&self) -> CircuitBreakerStatus {
        self.gate.lock().await.status()
    }

    pub async fn last_regime(&self, symbol: &str) -> Option<Regime> {
        self.regimes.read().await.get(symbol).copied()
    }

    pub async fn cached_snapshot(&self, symbol: &str) -> Option<Arc<IndicatorSnapshot>> {
        self.snapshots.read().await.get(symbol).cloned()
    }

    /// Fetch a fresh snapshot, classify the regime and look for an entry
    /// setup. Places no orders.
    pub async fn evaluate_entry(&self, symbol: &str) -> Result<Option<EntryCandidate>, EngineError> {
        let snapshot = self.refresh_snapshot(symbol).await?;
        let reading = self.observe_regime(&snapshot).await;
        Ok(self.entries.classify(&reading, &snapshot))
    }

    /// Exit decision for `position` at the latest price. Places no orders.
    pub async fn evaluate_exit(&self, position: &Position) -> Result<ExitDecision, EngineError> {
        self.evaluate_exit_at(position, Utc::now()).await
    }

    pub async fn evaluate_exit_at(
        &self,
        position: &Position,
        now: DateTime<Utc>,
    ) -> Result<ExitDecision, EngineError> {
        let symbol = position.symbol();
        let price = self.market_data.latest_price(symbol).await?;
        let snapshot = match self.cached_snapshot(symbol).await {
            Some(snapshot) => snapshot,
            None => self.refresh_snapshot(symbol).await?,
        };
        Ok(self.exits.evaluate_at(position, price, &snapshot, now))
    }

    /// Size, submit and record a new position for an accepted candidate
    pub async fn open_position(
        &self,
        candidate: &EntryCandidate,
        now: DateTime<Utc>,
    ) -> Result<Position, EngineError> {
        let symbol = candidate.symbol.as_str();
        let mut slot = self.store.try_lock(symbol).await?;
        if slot.position().is_some() {
            return Err(EngineError::conflict(symbol, "position already open"));
        }

        let balance = self.portfolio.balance().await?.to_f64().unwrap_or(0.0);
        self.gate
            .lock()
            .await
            .validate_entry(now, self.store.open_count(), balance)?;

        let quantity = size(
            balance,
            candidate.risk_fraction,
            candidate.entry_reference_price,
            candidate.stop_loss,
            self.portfolio_cap_fraction,
        )
        .map_err(|e| EngineError::sizing(symbol, e))?;

        let id = position_id(symbol, now);
        let request = OrderRequest {
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            quantity,
            price_hint: candidate.entry_reference_price,
            idempotency_key: format!("{}-open", id),
        };
        let fill = self.submit(&request).await?;
        let position = match Position::from_candidate(id.clone(), candidate, fill) {
            Ok(position) => position,
            Err(e) => {
                // The fill gapped through the planned levels
                tracing::warn!(
                    "[ENTRY] {} filled @ {:.4} against reference {:.4} ({}), re-anchoring levels at the fill",
                    symbol,
                    fill.price,
                    candidate.entry_reference_price,
                    e
                );
                Position::from_candidate(id, &candidate.rebased(fill.price), fill)
                    .map_err(|e| self.unrecorded(&request, &fill, e))?
            }
        };
        slot.insert(position.clone())?;

        tracing::info!(
            "[{}] {} entry: {:.8} @ {:.4}, stop {:.4}, target {:.4} ({} conf {:.2})",
            position.tier(),
            symbol,
            position.original_quantity(),
            position.entry_price(),
            position.stop_loss(),
            position.final_target_price(),
            candidate.regime,
            candidate.confidence
        );
        self.notifier.notify(TradeEvent::EntryOpened {
            symbol: symbol.to_string(),
            tier: position.tier(),
            position_id: position.id().to_string(),
            price: position.entry_price(),
            quantity: position.original_quantity(),
            stop_loss: position.stop_loss(),
            target: position.final_target_price(),
        });
        Ok(position)
    }

    /// Apply an exit decision under the symbol lock.
    ///
    /// A busy lock or a basis that no longer matches the stored position is a
    /// `ConcurrentMutationConflict`; the decision is dropped, not retried.
    /// Closing actions submit an order first and only apply on a confirmed
    /// fill. Returns the transition with the position as it stands after the
    /// decision.
    pub async fn apply_decision(&self, decision: &ExitDecision) -> Result<Applied, EngineError> {
        let symbol = decision.symbol.as_str();
        let mut slot = self.store.try_lock(symbol).await?;

        let current = slot
            .position()
            .ok_or_else(|| EngineError::conflict(symbol, "no open position"))?;
        if current.id() != decision.position_id || current.basis() != decision.basis {
            return Err(EngineError::conflict(
                symbol,
                format!(
                    "stale decision for {} at revision {}, position {} is at revision {}",
                    decision.position_id,
                    decision.basis.revision,
                    current.id(),
                    current.revision()
                ),
            ));
        }

        let request = (!decision.is_hold()).then(|| OrderRequest {
            symbol: symbol.to_string(),
            side: OrderSide::Sell,
            quantity: decision.quantity,
            price_hint: decision.exit_price,
            idempotency_key: decision.idempotency_key(),
        });
        let fill = match &request {
            Some(request) => Some(self.submit(request).await?),
            None => None,
        };

        let applied = match (slot.apply_decision(decision, fill.as_ref()), &request, &fill) {
            (Ok(applied), _, _) => applied,
            (Err(e), Some(request), Some(fill)) => return Err(self.unrecorded(request, fill, e)),
            (Err(e), _, _) => return Err(e.into()),
        };
        drop(slot);

        self.report(decision, &applied).await;
        Ok(applied)
    }

    /// Full evaluation of one symbol: exits for an open position, entries
    /// when flat
    pub async fn process_symbol(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<SymbolOutcome, EngineError> {
        let snapshot = self.refresh_snapshot(symbol).await?;
        let reading = self.observe_regime(&snapshot).await;

        if let Some(position) = self.store.peek(symbol).await? {
            let decision = self.exits.evaluate_at(&position, snapshot.price, &snapshot, now);
            if !decision.changes_state() {
                return Ok(SymbolOutcome::Exit(Transition::Unchanged));
            }
            let applied = self.apply_decision(&decision).await?;
            return Ok(SymbolOutcome::Exit(applied.transition));
        }

        let Some(candidate) = self.entries.classify(&reading, &snapshot) else {
            return Ok(SymbolOutcome::NoSetup);
        };

        match self.open_position(&candidate, now).await {
            Ok(position) => Ok(SymbolOutcome::Entered(position)),
            Err(e) => {
                if matches!(
                    e,
                    EngineError::InvalidStopDistance { .. }
                        | EngineError::Sizing { .. }
                        | EngineError::TradingHalted(_)
                ) {
                    self.notifier.notify(TradeEvent::CandidateRejected {
                        symbol: symbol.to_string(),
                        tier: candidate.tier,
                        reason: e.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    /// Slow cycle over every watched symbol
    pub async fn run_cycle(&self, symbols: &[String]) -> CycleReport {
        self.run_cycle_at(symbols, Utc::now()).await
    }

    pub async fn run_cycle_at(&self, symbols: &[String], now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::default();
        for symbol in symbols {
            report.evaluated += 1;
            match self.process_symbol(symbol, now).await {
                Ok(SymbolOutcome::NoSetup) => {}
                Ok(SymbolOutcome::Entered(_)) => report.entries += 1,
                Ok(SymbolOutcome::Exit(transition)) => report.record_transition(&transition),
                Err(e) => {
                    self.log_failure(symbol, &e);
                    report.record_error(&e);
                }
            }
        }
        report
    }

    /// Watchdog pass: fresh price plus the cached snapshot, exits only
    pub async fn watchdog_pass(&self) -> CycleReport {
        self.watchdog_pass_at(Utc::now()).await
    }

    pub async fn watchdog_pass_at(&self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::default();
        for symbol in self.store.symbols().await {
            let position = match self.store.peek(&symbol).await {
                Ok(Some(position)) => position,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!("[WATCHDOG] {} skipped: {}", symbol, e);
                    report.conflicts += 1;
                    continue;
                }
            };
            let Some(snapshot) = self.cached_snapshot(&symbol).await else {
                tracing::debug!("[WATCHDOG] {} has no cached snapshot yet", symbol);
                continue;
            };
            report.evaluated += 1;

            let price = match self.market_data.latest_price(&symbol).await {
                Ok(price) => price,
                Err(e) => {
                    let e = EngineError::from(e);
                    self.log_failure(&symbol, &e);
                    report.record_error(&e);
                    continue;
                }
            };

            let decision = self.exits.evaluate_at(&position, price, &snapshot, now);
            if !decision.changes_state() {
                continue;
            }
            match self.apply_decision(&decision).await {
                Ok(applied) => report.record_transition(&applied.transition),
                Err(e) => {
                    self.log_failure(&symbol, &e);
                    report.record_error(&e);
                }
            }
        }
        report
    }

    async fn refresh_snapshot(&self, symbol: &str) -> Result<Arc<IndicatorSnapshot>, EngineError> {
        let snapshot = self.market_data.indicator_snapshot(symbol).await?;
        if !snapshot.is_well_formed() {
            return Err(MarketDataError::Malformed {
                symbol: symbol.to_string(),
                reason: "non-finite indicator values".to_string(),
            }
            .into());
        }
        let snapshot = Arc::new(snapshot);
        self.snapshots
            .write()
            .await
            .insert(symbol.to_string(), Arc::clone(&snapshot));
        Ok(snapshot)
    }

    async fn observe_regime(&self, snapshot: &IndicatorSnapshot) -> RegimeReading {
        let reading = self.regime.classify(snapshot);
        let previous = self
            .regimes
            .write()
            .await
            .insert(snapshot.symbol.clone(), reading.regime);

        match previous {
            None => tracing::info!(
                "[REGIME] {} detected {} (confidence {:.2}, ADX {:.1}, ATR ratio {:.4})",
                snapshot.symbol,
                reading.regime,
                reading.confidence,
                reading.adx,
                reading.atr_ratio
            ),
            Some(previous) if previous != reading.regime => tracing::warn!(
                "[REGIME] {} changed {} -> {} (confidence {:.2}, ADX {:.1})",
                snapshot.symbol,
                previous,
                reading.regime,
                reading.confidence,
                reading.adx
            ),
            Some(_) => tracing::debug!(
                "[REGIME] {} {} (confidence {:.2})",
                snapshot.symbol,
                reading.regime,
                reading.confidence
            ),
        }
        reading
    }

    async fn submit(&self, request: &OrderRequest) -> Result<Fill, EngineError> {
        let result = self.execution.submit_order(request.clone()).await?;
        tracing::debug!(
            "Order {} confirmed: {} {} {:.8} @ {:.4} (key {})",
            result.order_id,
            request.side,
            request.symbol,
            result.fill.quantity,
            result.fill.price,
            request.idempotency_key
        );
        // Bookkeeping failures never undo a confirmed fill
        if let Err(e) = self.portfolio.record_fill(request, &result.fill).await {
            tracing::error!("Failed to record fill for {}: {}", request.idempotency_key, e);
        }
        Ok(result.fill)
    }

    async fn report(&self, decision: &ExitDecision, applied: &Applied) {
        let symbol = decision.symbol.clone();
        let position_id = decision.position_id.clone();

        match applied.transition {
            Transition::Unchanged => {}
            Transition::TrailRaised {
                previous_stop,
                stop_loss,
            } => {
                tracing::info!(
                    "[TRAIL] {} stop raised {:.4} -> {:.4} @ {:.4}",
                    symbol,
                    previous_stop,
                    stop_loss,
                    decision.exit_price
                );
            }
            Transition::PartiallyClosed {
                quantity,
                price,
                stop_loss,
            } => {
                tracing::info!(
                    "[PARTIAL] {} sold {:.8} @ {:.4}, stop now {:.4}",
                    symbol,
                    quantity,
                    price,
                    stop_loss
                );
                self.notifier.notify(TradeEvent::PartialClose {
                    symbol,
                    position_id,
                    price,
                    quantity,
                    stop_loss,
                });
            }
            Transition::Closed {
                reason,
                quantity,
                price,
            } => {
                let realized_pnl = applied.position.realized_pnl();
                tracing::info!(
                    "[EXIT] {} closed {:.8} @ {:.4} ({}), realized PnL {:.2}",
                    symbol,
                    quantity,
                    price,
                    reason,
                    realized_pnl
                );
                self.gate
                    .lock()
                    .await
                    .record_trade(realized_pnl, decision.evaluated_at);
                self.notifier.notify(TradeEvent::PositionClosed {
                    symbol,
                    position_id,
                    reason,
                    price,
                    quantity,
                    realized_pnl,
                });
            }
        }
    }

    /// A confirmed fill the position refused. The exchange state and the
    /// store now disagree, so raise it loudly.
    fn unrecorded(&self, request: &OrderRequest, fill: &Fill, error: PositionError) -> EngineError {
        tracing::error!(
            "[UNRECORDED] {} {} fill {:.8} @ {:.4} (key {}) could not be applied: {}",
            request.symbol,
            request.side,
            fill.quantity,
            fill.price,
            request.idempotency_key,
            error
        );
        self.notifier.notify(TradeEvent::UnrecordedFill {
            symbol: request.symbol.clone(),
            idempotency_key: request.idempotency_key.clone(),
            side: request.side,
            price: fill.price,
            quantity: fill.quantity,
            reason: error.to_string(),
        });
        EngineError::Position(error)
    }

    fn log_failure(&self, symbol: &str, error: &EngineError) {
        match error {
            EngineError::DataUnavailable(_) => {
                tracing::warn!("[SKIP] {}: {}", symbol, error);
                self.notifier.notify(TradeEvent::SymbolSkipped {
                    symbol: symbol.to_string(),
                    reason: error.to_string(),
                });
            }
            EngineError::ConcurrentMutationConflict { .. } => {
                tracing::debug!("[DISCARD] {}: {}", symbol, error);
            }
            EngineError::InvalidStopDistance { .. }
            | EngineError::Sizing { .. }
            | EngineError::TradingHalted(_) => {
                tracing::warn!("[REJECT] {}: {}", symbol, error);
            }
            EngineError::OrderSubmissionFailure(_) => {
                tracing::error!("[ORDER] {}: {} (position unchanged)", symbol, error);
            }
            EngineError::Portfolio(_) | EngineError::Position(_) => {
                tracing::error!("{}: {}", symbol, error);
            }
        }
    }
}
