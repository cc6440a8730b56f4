//! Configuration Loader
//!
//! Loads and validates the TOML configuration. Every section has defaults, so
//! a file only needs to name what it changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::circuit_breaker::{
    CircuitBreaker, DEFAULT_COOLDOWN_MINUTES, DEFAULT_MAX_CONSECUTIVE_LOSSES,
    DEFAULT_MAX_DAILY_LOSS_FRACTION, DEFAULT_MAX_OPEN_POSITIONS,
};
use crate::strategy::{IndicatorConfig, RegimeThresholds, TierTable};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub regime: RegimeThresholds,
    #[serde(default)]
    pub risk: RiskSection,
    /// Tier table in priority order
    #[serde(default)]
    pub tiers: TierTable,
    /// Indicator periods for replay
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Live engine section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Symbols evaluated every slow cycle
    pub symbols: Vec<String>,
    /// Slow cycle period in seconds
    pub cycle_interval_secs: u64,
    /// Watchdog period in seconds
    pub watchdog_interval_secs: u64,
    /// Paper trading (simulated fills)
    pub paper: bool,
    /// JSON file the snapshot feed reads
    pub snapshot_file: String,
    /// Opening cash for the paper portfolio
    pub starting_balance: f64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            symbols: vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()],
            cycle_interval_secs: 900,
            watchdog_interval_secs: 30,
            paper: true,
            snapshot_file: "data/snapshots.json".to_string(),
            starting_balance: 10_000.0,
        }
    }
}

impl EngineSection {
    /// Snapshot file path with environment variable override and `~` expansion.
    /// Checks TIERED_SNAPSHOT_FILE first, falls back to the config value.
    pub fn get_snapshot_file(&self) -> PathBuf {
        let raw = std::env::var("TIERED_SNAPSHOT_FILE").unwrap_or_else(|_| self.snapshot_file.clone());
        PathBuf::from(shellexpand::tilde(&raw).into_owned())
    }
}

/// Sizing and entry gate section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSection {
    /// Cap on one position's notional as a fraction of balance
    pub portfolio_cap_fraction: f64,
    pub max_open_positions: usize,
    pub max_consecutive_losses: u32,
    /// Daily realized loss limit as a fraction of balance
    pub max_daily_loss_fraction: f64,
    pub cooldown_minutes: i64,
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            portfolio_cap_fraction: 0.10,
            max_open_positions: DEFAULT_MAX_OPEN_POSITIONS,
            max_consecutive_losses: DEFAULT_MAX_CONSECUTIVE_LOSSES,
            max_daily_loss_fraction: DEFAULT_MAX_DAILY_LOSS_FRACTION,
            cooldown_minutes: DEFAULT_COOLDOWN_MINUTES,
        }
    }
}

impl RiskSection {
    pub fn circuit_breaker(&self) -> CircuitBreaker {
        CircuitBreaker::with_config(
            self.max_daily_loss_fraction,
            self.max_consecutive_losses,
            self.max_open_positions,
            self.cooldown_minutes,
        )
    }
}

/// Logging configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingSection {
    /// Log level with environment variable override.
    /// Checks TIERED_LOG_LEVEL first, falls back to the config value.
    pub fn get_level(&self) -> String {
        std::env::var("TIERED_LOG_LEVEL").unwrap_or_else(|_| self.level.clone())
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Engine section
        if self.engine.symbols.is_empty() {
            return Err(ConfigError::ValidationError(
                "engine.symbols must not be empty".to_string(),
            ));
        }
        if self.engine.cycle_interval_secs == 0 || self.engine.watchdog_interval_secs == 0 {
            return Err(ConfigError::ValidationError(format!(
                "intervals must be > 0, got cycle {} / watchdog {}",
                self.engine.cycle_interval_secs, self.engine.watchdog_interval_secs
            )));
        }
        if self.engine.watchdog_interval_secs >= self.engine.cycle_interval_secs {
            return Err(ConfigError::ValidationError(format!(
                "watchdog_interval_secs ({}) must be shorter than cycle_interval_secs ({})",
                self.engine.watchdog_interval_secs, self.engine.cycle_interval_secs
            )));
        }
        if !(self.engine.starting_balance > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "starting_balance must be > 0, got {}",
                self.engine.starting_balance
            )));
        }

        // Regime thresholds and tier table
        self.regime
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        self.tiers
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        // Risk section
        if !(self.risk.portfolio_cap_fraction > 0.0) || self.risk.portfolio_cap_fraction > 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "portfolio_cap_fraction must be in (0, 1], got {}",
                self.risk.portfolio_cap_fraction
            )));
        }
        if !(self.risk.max_daily_loss_fraction > 0.0) || self.risk.max_daily_loss_fraction > 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "max_daily_loss_fraction must be in (0, 1], got {}",
                self.risk.max_daily_loss_fraction
            )));
        }
        if self.risk.max_open_positions == 0 || self.risk.max_consecutive_losses == 0 {
            return Err(ConfigError::ValidationError(
                "max_open_positions and max_consecutive_losses must be > 0".to_string(),
            ));
        }
        if self.risk.cooldown_minutes < 0 {
            return Err(ConfigError::ValidationError(format!(
                "cooldown_minutes must be >= 0, got {}",
                self.risk.cooldown_minutes
            )));
        }

        // Indicator periods
        let ind = &self.indicators;
        let periods = [
            ind.ema_fast,
            ind.ema_mid,
            ind.ema_slow,
            ind.adx_period,
            ind.rsi_period,
            ind.atr_period,
            ind.macd_fast,
            ind.macd_slow,
            ind.macd_signal,
            ind.bb_period,
            ind.volume_period,
            ind.breakout_lookback,
        ];
        if periods.contains(&0) {
            return Err(ConfigError::ValidationError(
                "indicator periods must be > 0".to_string(),
            ));
        }
        if ind.macd_fast >= ind.macd_slow {
            return Err(ConfigError::ValidationError(format!(
                "macd_fast ({}) must be below macd_slow ({})",
                ind.macd_fast, ind.macd_slow
            )));
        }

        Ok(())
    }
}
