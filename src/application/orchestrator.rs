//! Trading Orchestrator
//!
//! Drives the engine on two schedules: the slow cycle (full evaluation of
//! every watched symbol) and the watchdog (price refresh plus exits for open
//! positions). Both share the engine and its position store.
//!
//! Shutdown is a cancellation token, so a stop issued mid-tick is still seen
//! by the next pause. A tick in flight always runs to completion.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::engine::{CycleReport, TradingEngine};
use crate::domain::circuit_breaker::CircuitBreakerStatus;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Watchdog task failed: {0}")]
    WatchdogFailed(String),
}

/// Status snapshot of the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorStatus {
    pub is_running: bool,
    pub open_positions: Vec<String>,
    pub cycles: u64,
    pub watchdog_passes: u64,
    pub last_cycle: Option<CycleReport>,
    pub breaker: CircuitBreakerStatus,
}

#[derive(Debug, Default)]
struct Counters {
    cycles: u64,
    watchdog_passes: u64,
    last_cycle: Option<CycleReport>,
}

pub struct TradingOrchestrator {
    engine: Arc<TradingEngine>,
    symbols: Arc<Vec<String>>,
    is_running: Arc<RwLock<bool>>,
    shutdown: CancellationToken,
    counters: Arc<RwLock<Counters>>,
    paper_mode: bool,
    cycle_interval: Duration,
    watchdog_interval: Duration,
}

impl TradingOrchestrator {
    pub fn new(
        engine: Arc<TradingEngine>,
        symbols: Vec<String>,
        paper_mode: bool,
    ) -> Result<Self, OrchestratorError> {
        if symbols.is_empty() {
            return Err(OrchestratorError::ConfigError(
                "no symbols to watch".to_string(),
            ));
        }
        Ok(Self {
            engine,
            symbols: Arc::new(symbols),
            is_running: Arc::new(RwLock::new(false)),
            shutdown: CancellationToken::new(),
            counters: Arc::new(RwLock::new(Counters::default())),
            paper_mode,
            cycle_interval: Duration::from_secs(900),
            watchdog_interval: Duration::from_secs(30),
        })
    }

    /// Set the slow cycle interval
    pub fn with_cycle_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval = interval;
        self
    }

    /// Set the watchdog interval
    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    pub fn engine(&self) -> &Arc<TradingEngine> {
        &self.engine
    }

    /// Run both schedules until `stop` is called. Returns at once if the
    /// orchestrator was already stopped.
    pub async fn run(&self) -> Result<(), OrchestratorError> {
        if self.shutdown.is_cancelled() {
            tracing::warn!("Orchestrator already stopped, not starting");
            return Ok(());
        }
        *self.is_running.write().await = true;

        tracing::info!(
            "Starting trading orchestrator - Paper mode: {}, {} symbols, cycle {:?}, watchdog {:?}",
            self.paper_mode,
            self.symbols.len(),
            self.cycle_interval,
            self.watchdog_interval
        );

        let watchdog = {
            let this = self.clone();
            tokio::spawn(async move { this.run_watchdog().await })
        };

        while !self.shutdown.is_cancelled() {
            self.tick().await;
            if self.shutdown.is_cancelled() {
                break;
            }
            self.pause(self.cycle_interval).await;
        }

        let joined = watchdog.await;
        *self.is_running.write().await = false;
        joined.map_err(|e| OrchestratorError::WatchdogFailed(e.to_string()))?;
        tracing::info!("Trading orchestrator stopped");
        Ok(())
    }

    async fn run_watchdog(&self) {
        while !self.shutdown.is_cancelled() {
            self.pause(self.watchdog_interval).await;
            if self.shutdown.is_cancelled() {
                break;
            }
            self.watchdog_tick().await;
        }
        tracing::debug!("Watchdog stopped");
    }

    /// Sleep for `interval`, waking early on stop
    async fn pause(&self, interval: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }

    /// Execute one slow cycle
    pub async fn tick(&self) -> CycleReport {
        let report = self.engine.run_cycle(&self.symbols).await;

        tracing::info!(
            "Cycle: {} evaluated | {} entries | {} partials | {} closes | {} trail | {} skipped | {} conflicts | {} errors",
            report.evaluated,
            report.entries,
            report.partial_closes,
            report.closes,
            report.trail_updates,
            report.skipped,
            report.conflicts,
            report.errors
        );

        let mut counters = self.counters.write().await;
        counters.cycles += 1;
        counters.last_cycle = Some(report.clone());
        report
    }

    /// Execute one watchdog pass
    pub async fn watchdog_tick(&self) -> CycleReport {
        let report = self.engine.watchdog_pass().await;
        if report.partial_closes + report.closes + report.trail_updates > 0 {
            tracing::info!(
                "Watchdog: {} partials | {} closes | {} trail",
                report.partial_closes,
                report.closes,
                report.trail_updates
            );
        }
        self.counters.write().await.watchdog_passes += 1;
        report
    }

    /// Stop both loops
    pub async fn stop(&self) {
        *self.is_running.write().await = false;
        self.shutdown.cancel();
        tracing::info!("Stop signal sent to orchestrator");
    }

    /// Get current status snapshot
    pub async fn status(&self) -> OrchestratorStatus {
        let is_running = *self.is_running.read().await;
        let open_positions = self
            .engine
            .store()
            .open_positions()
            .await
            .iter()
            .map(|p| {
                format!(
                    "{} {} @ {:.4} (stop {:.4}, qty {:.8})",
                    p.symbol(),
                    p.tier(),
                    p.entry_price(),
                    p.stop_loss(),
                    p.remaining_quantity()
                )
            })
            .collect();
        let counters = self.counters.read().await;

        OrchestratorStatus {
            is_running,
            open_positions,
            cycles: counters.cycles,
            watchdog_passes: counters.watchdog_passes,
            last_cycle: counters.last_cycle.clone(),
            breaker: self.engine.breaker_status().await,
        }
    }
}

// Shared across the slow loop and the watchdog task
impl Clone for TradingOrchestrator {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            symbols: Arc::clone(&self.symbols),
            is_running: Arc::clone(&self.is_running),
            shutdown: self.shutdown.clone(),
            counters: Arc::clone(&self.counters),
            paper_mode: self.paper_mode,
            cycle_interval: self.cycle_interval,
            watchdog_interval: self.watchdog_interval,
        }
    }
}
