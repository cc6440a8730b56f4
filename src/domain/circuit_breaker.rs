//! Circuit Breaker
//!
//! Portfolio-level gate in front of new entries. Trips on consecutive losses
//! or a daily loss limit and stays tripped for a cooldown; also caps the number
//! of concurrently open positions. Exits are never gated.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum daily loss as a fraction of balance
pub const DEFAULT_MAX_DAILY_LOSS_FRACTION: f64 = 0.05;

/// Default maximum consecutive losses
pub const DEFAULT_MAX_CONSECUTIVE_LOSSES: u32 = 4;

/// Default maximum concurrently open positions
pub const DEFAULT_MAX_OPEN_POSITIONS: usize = 3;

/// Default cooldown period in minutes
pub const DEFAULT_COOLDOWN_MINUTES: i64 = 60;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CircuitBreakerError {
    #[error("Daily loss {0:.2} reached maximum {1:.2}")]
    DailyLossExceeded(f64, f64),

    #[error("{0} consecutive losses reached maximum {1}")]
    ConsecutiveLossesExceeded(u32, u32),

    #[error("{0} open positions reached maximum {1}")]
    MaxOpenPositions(usize, usize),

    #[error("Trading halted - circuit breaker active, cooldown remaining: {0} minutes")]
    TradingHalted(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitBreakerStatus {
    /// New entries allowed
    Active,
    /// Tripped, waiting out the cooldown
    Cooldown,
}

impl CircuitBreakerStatus {
    pub fn can_trade(&self) -> bool {
        matches!(self, CircuitBreakerStatus::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreaker {
    max_daily_loss_fraction: f64,
    max_consecutive_losses: u32,
    max_open_positions: usize,
    cooldown_minutes: i64,

    /// Realized losses today (positive number)
    daily_loss: f64,
    consecutive_losses: u32,
    tripped_at: Option<DateTime<Utc>>,
    trip_reason: Option<String>,
    day: Option<NaiveDate>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            max_daily_loss_fraction: DEFAULT_MAX_DAILY_LOSS_FRACTION,
            max_consecutive_losses: DEFAULT_MAX_CONSECUTIVE_LOSSES,
            max_open_positions: DEFAULT_MAX_OPEN_POSITIONS,
            cooldown_minutes: DEFAULT_COOLDOWN_MINUTES,
            daily_loss: 0.0,
            consecutive_losses: 0,
            tripped_at: None,
            trip_reason: None,
            day: None,
        }
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(
        max_daily_loss_fraction: f64,
        max_consecutive_losses: u32,
        max_open_positions: usize,
        cooldown_minutes: i64,
    ) -> Self {
        Self {
            max_daily_loss_fraction,
            max_consecutive_losses,
            max_open_positions,
            cooldown_minutes,
            ..Self::default()
        }
    }

    /// Record the realized PnL of a closed trade
    pub fn record_trade(&mut self, pnl: f64, timestamp: DateTime<Utc>) {
        self.check_day_rollover(timestamp);

        if pnl < 0.0 {
            self.consecutive_losses += 1;
            self.daily_loss += pnl.abs();
            tracing::debug!(
                "Loss recorded: {:.2} (consecutive: {}, daily: {:.2})",
                pnl.abs(),
                self.consecutive_losses,
                self.daily_loss
            );
        } else {
            self.consecutive_losses = 0;
            tracing::debug!("Win recorded: {:.2} (consecutive losses reset)", pnl);
        }

        if self.tripped_at.is_none() && self.consecutive_losses >= self.max_consecutive_losses {
            let reason = CircuitBreakerError::ConsecutiveLossesExceeded(
                self.consecutive_losses,
                self.max_consecutive_losses,
            );
            self.trip(timestamp, reason);
        }
    }

    /// Gate for a new entry. Clears an expired trip before checking.
    pub fn validate_entry(
        &mut self,
        now: DateTime<Utc>,
        open_positions: usize,
        balance: f64,
    ) -> Result<(), CircuitBreakerError> {
        self.check_day_rollover(now);
        self.try_auto_reset(now);

        if let Some(remaining) = self.cooldown_remaining(now) {
            return Err(CircuitBreakerError::TradingHalted(remaining));
        }

        let daily_limit = self.max_daily_loss_fraction * balance;
        if balance > 0.0 && self.daily_loss >= daily_limit {
            let reason = CircuitBreakerError::DailyLossExceeded(self.daily_loss, daily_limit);
            self.trip(now, reason.clone());
            return Err(reason);
        }

        if open_positions >= self.max_open_positions {
            return Err(CircuitBreakerError::MaxOpenPositions(
                open_positions,
                self.max_open_positions,
            ));
        }

        Ok(())
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        if self.tripped_at.is_some() {
            CircuitBreakerStatus::Cooldown
        } else {
            CircuitBreakerStatus::Active
        }
    }

    /// Minutes until the cooldown ends, if tripped and not yet expired
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        let tripped_at = self.tripped_at?;
        let ends = tripped_at + Duration::minutes(self.cooldown_minutes);
        if now < ends {
            Some((ends - now).num_minutes())
        } else {
            None
        }
    }

    /// Clear the trip once the cooldown has passed
    pub fn try_auto_reset(&mut self, now: DateTime<Utc>) -> bool {
        if self.tripped_at.is_some() && self.cooldown_remaining(now).is_none() {
            tracing::info!("Circuit breaker cooldown complete, auto-resetting");
            self.tripped_at = None;
            self.trip_reason = None;
            self.consecutive_losses = 0;
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.daily_loss = 0.0;
        self.consecutive_losses = 0;
        self.tripped_at = None;
        self.trip_reason = None;
        tracing::info!("Circuit breaker reset");
    }

    pub fn daily_loss(&self) -> f64 {
        self.daily_loss
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn trip_reason(&self) -> Option<&str> {
        self.trip_reason.as_deref()
    }

    fn trip(&mut self, timestamp: DateTime<Utc>, reason: CircuitBreakerError) {
        tracing::error!("CIRCUIT BREAKER TRIPPED: {}", reason);
        self.tripped_at = Some(timestamp);
        self.trip_reason = Some(reason.to_string());
    }

    /// Daily loss resets at UTC midnight; consecutive losses span days
    fn check_day_rollover(&mut self, timestamp: DateTime<Utc>) {
        let today = timestamp.date_naive();
        match self.day {
            Some(day) if day >= today => {}
            Some(_) => {
                tracing::info!("Day rollover detected, resetting daily loss counter");
                self.day = Some(today);
                self.daily_loss = 0.0;
            }
            None => self.day = Some(today),
        }
    }
}
