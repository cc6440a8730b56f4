//! Replay Driver
//!
//! Feeds historical base bars through the same regime classifier, entry
//! classifier, exit state machine and `Position::apply` the live engine uses.
//! Higher timeframes are aggregated from the base series and only ever see
//! completed candles, so no bar reads data from its future.
//!
//! Each bar either looks for an entry (when flat) or evaluates the open
//! position, never both.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::exit::{ExitAction, ExitDecision, ExitReason};
use crate::domain::position::{position_id, Fill, Position, PositionError, Transition};
use crate::domain::risk::{size, SizingError};
use crate::domain::snapshot::{IndicatorSnapshot, Timeframe};
use crate::domain::tier::Regime;
use crate::domain::trade::{LedgerSummary, TradeLedger};
use crate::strategy::indicators::{Candle, CandleBuilder, FrameState, IndicatorConfig};
use crate::strategy::{
    EntryClassifier, ExitStateMachine, ParamError, RegimeClassifier, RegimeThresholds, TierTable,
};

/// Which prices inside a bar the exit state machine sees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntrabarPolicy {
    /// One evaluation at the bar close. Stops and targets touched only
    /// intrabar are missed.
    #[default]
    CloseOnly,
    /// Evaluate at the low, then the high, then the close. A bar that
    /// spans both the stop and the target exits at the stop.
    WorstCase,
}

impl IntrabarPolicy {
    fn probes(&self, bar: &Candle) -> Vec<f64> {
        match self {
            IntrabarPolicy::CloseOnly => vec![bar.close],
            IntrabarPolicy::WorstCase => vec![bar.low, bar.high, bar.close],
        }
    }
}

impl fmt::Display for IntrabarPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntrabarPolicy::CloseOnly => f.write_str("close-only"),
            IntrabarPolicy::WorstCase => f.write_str("worst-case"),
        }
    }
}

impl FromStr for IntrabarPolicy {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "close-only" | "close" => Ok(IntrabarPolicy::CloseOnly),
            "worst-case" | "worst" => Ok(IntrabarPolicy::WorstCase),
            other => Err(ReplayError::UnknownPolicy(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("No bars to replay")]
    NoBars,

    #[error("Invalid OHLC data in bar {index} at {time}")]
    InvalidBar { index: usize, time: DateTime<Utc> },

    #[error("Bar {index} at {time} is not after the previous bar")]
    OutOfOrder { index: usize, time: DateTime<Utc> },

    #[error("Unknown intrabar policy: {0}")]
    UnknownPolicy(String),

    #[error("Invalid parameters: {0}")]
    Params(#[from] ParamError),

    #[error("Position error: {0}")]
    Position(#[from] PositionError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub symbol: String,
    /// Timeframe of the input bars
    pub base_timeframe: Timeframe,
    pub starting_balance: f64,
    pub portfolio_cap_fraction: f64,
    pub intrabar: IntrabarPolicy,
    /// Close a still-open position on the last bar with `REPLAY_END`
    pub force_close_at_end: bool,
    pub indicators: IndicatorConfig,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            symbol: "REPLAY".to_string(),
            base_timeframe: Timeframe::H1,
            starting_balance: 10_000.0,
            portfolio_cap_fraction: 0.10,
            intrabar: IntrabarPolicy::CloseOnly,
            force_close_at_end: true,
            indicators: IndicatorConfig::default(),
        }
    }
}

/// Regime seen at one bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeSample {
    pub time: DateTime<Utc>,
    pub regime: Regime,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub symbol: String,
    pub bars: usize,
    pub ledger: TradeLedger,
    pub summary: LedgerSummary,
    pub starting_balance: f64,
    /// Cash plus any still-open position marked at the last close
    pub final_balance: f64,
    /// Candidates that sizing turned down
    pub rejected_entries: usize,
    pub regimes: Vec<RegimeSample>,
    pub open_position: Option<Position>,
}

impl ReplayReport {
    pub fn return_pct(&self) -> f64 {
        if self.starting_balance > 0.0 {
            (self.final_balance - self.starting_balance) / self.starting_balance * 100.0
        } else {
            0.0
        }
    }

    /// Bars spent in each regime
    pub fn regime_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for sample in &self.regimes {
            *counts.entry(sample.regime.to_string()).or_insert(0) += 1;
        }
        counts
    }
}

/// Replay with the default configuration
pub fn replay(
    bars: &[Candle],
    tiers: &TierTable,
    thresholds: &RegimeThresholds,
) -> Result<ReplayReport, ReplayError> {
    ReplayDriver::new(ReplayConfig::default(), tiers.clone(), thresholds.clone())?.run(bars)
}

pub struct ReplayDriver {
    config: ReplayConfig,
    regime: RegimeClassifier,
    entries: EntryClassifier,
    exits: ExitStateMachine,
    timeframes: Vec<Timeframe>,
}

impl ReplayDriver {
    pub fn new(
        config: ReplayConfig,
        tiers: TierTable,
        thresholds: RegimeThresholds,
    ) -> Result<Self, ReplayError> {
        tiers.validate()?;
        thresholds.validate()?;

        let mut timeframes = tiers.timeframes();
        if !timeframes.contains(&thresholds.reference_timeframe) {
            timeframes.push(thresholds.reference_timeframe);
        }
        timeframes.sort();
        // Finer timeframes cannot be built from the base bars
        timeframes.retain(|tf| {
            let usable = *tf >= config.base_timeframe;
            if !usable {
                tracing::warn!(
                    "{} is finer than the {} base bars; conditions on it will fail",
                    tf,
                    config.base_timeframe
                );
            }
            usable
        });

        Ok(Self {
            exits: ExitStateMachine::new(&tiers),
            entries: EntryClassifier::new(tiers),
            regime: RegimeClassifier::new(thresholds),
            config,
            timeframes,
        })
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn run(&self, bars: &[Candle]) -> Result<ReplayReport, ReplayError> {
        if bars.is_empty() {
            return Err(ReplayError::NoBars);
        }

        let cfg = &self.config;
        let base_len = Duration::seconds(cfg.base_timeframe.seconds());
        let mut frames: Vec<(Timeframe, CandleBuilder, FrameState)> = self
            .timeframes
            .iter()
            .map(|tf| {
                (
                    *tf,
                    CandleBuilder::new(cfg.base_timeframe, *tf),
                    FrameState::new(&cfg.indicators),
                )
            })
            .collect();

        let mut ledger = TradeLedger::new();
        let mut regimes = Vec::with_capacity(bars.len());
        let mut cash = cfg.starting_balance;
        let mut position: Option<Position> = None;
        let mut rejected_entries = 0;
        let mut previous_time: Option<DateTime<Utc>> = None;

        tracing::info!(
            "Replaying {} {} bars of {} ({} intrabar)",
            bars.len(),
            cfg.base_timeframe,
            cfg.symbol,
            cfg.intrabar
        );

        for (index, bar) in bars.iter().enumerate() {
            if !bar.is_valid() {
                return Err(ReplayError::InvalidBar { index, time: bar.time });
            }
            if previous_time.is_some_and(|prev| bar.time <= prev) {
                return Err(ReplayError::OutOfOrder { index, time: bar.time });
            }
            previous_time = Some(bar.time);

            for (_, builder, state) in frames.iter_mut() {
                for candle in builder.update(bar) {
                    state.update(&candle);
                }
            }

            // The bar is complete at its close
            let now = bar.time + base_len;
            let snapshot = frames.iter().fold(
                IndicatorSnapshot::new(cfg.symbol.clone(), now, bar.close),
                |snapshot, (tf, _, state)| match state.latest() {
                    Some(indicators) => snapshot.with_frame(*tf, *indicators),
                    None => snapshot,
                },
            );

            let reading = self.regime.classify(&snapshot);
            regimes.push(RegimeSample {
                time: now,
                regime: reading.regime,
                confidence: reading.confidence,
            });

            if let Some(open) = position.as_mut() {
                for price in cfg.intrabar.probes(bar) {
                    let decision = self.exits.evaluate_at(open, price, &snapshot, now);
                    cash += apply_simulated(open, &decision, now)?;
                    if open.is_closed() {
                        break;
                    }
                }
                if open.is_closed() {
                    ledger.push(open.trade_record());
                    position = None;
                }
                continue;
            }

            let Some(candidate) = self.entries.classify(&reading, &snapshot) else {
                continue;
            };
            let quantity = match size(
                cash,
                candidate.risk_fraction,
                candidate.entry_reference_price,
                candidate.stop_loss,
                cfg.portfolio_cap_fraction,
            ) {
                Ok(quantity) => quantity,
                Err(e) => {
                    rejected_entries += 1;
                    match e {
                        SizingError::InvalidStopDistance { .. } => {
                            tracing::warn!("[{}] {} rejected at {}: {}", candidate.tier, cfg.symbol, now, e)
                        }
                        _ => tracing::debug!("[{}] {} rejected at {}: {}", candidate.tier, cfg.symbol, now, e),
                    }
                    continue;
                }
            };

            let fill = Fill::new(bar.close, quantity, now);
            let opened = Position::from_candidate(position_id(&cfg.symbol, now), &candidate, fill)?;
            cash -= fill.price * fill.quantity;
            tracing::debug!(
                "[{}] {} entry at {}: {:.8} @ {:.4}, stop {:.4}",
                opened.tier(),
                cfg.symbol,
                now,
                quantity,
                fill.price,
                opened.stop_loss()
            );
            position = Some(opened);
        }

        let last = bars[bars.len() - 1];
        let end_time = last.time + base_len;
        if cfg.force_close_at_end {
            if let Some(mut open) = position.take() {
                let decision = ExitDecision {
                    symbol: open.symbol().to_string(),
                    position_id: open.id().to_string(),
                    action: ExitAction::FullClose,
                    reason: Some(ExitReason::ReplayEnd),
                    exit_price: last.close,
                    quantity: open.remaining_quantity(),
                    trail: None,
                    basis: open.basis(),
                    evaluated_at: end_time,
                };
                cash += apply_simulated(&mut open, &decision, end_time)?;
                ledger.push(open.trade_record());
            }
        }

        let final_balance = cash
            + position
                .as_ref()
                .map(|p| p.remaining_quantity() * last.close)
                .unwrap_or(0.0);
        let summary = ledger.summary();

        tracing::info!(
            "Replay complete: {} trades, win rate {:.1}%, PnL {:.2}, final balance {:.2}",
            summary.trades,
            summary.win_rate * 100.0,
            summary.total_pnl,
            final_balance
        );

        Ok(ReplayReport {
            symbol: cfg.symbol.clone(),
            bars: bars.len(),
            ledger,
            summary,
            starting_balance: cfg.starting_balance,
            final_balance,
            rejected_entries,
            regimes,
            open_position: position,
        })
    }
}

/// Apply a decision with an immediate fill at the decision price. Returns the
/// cash released by the fill.
fn apply_simulated(
    position: &mut Position,
    decision: &ExitDecision,
    now: DateTime<Utc>,
) -> Result<f64, ReplayError> {
    if !decision.changes_state() {
        return Ok(0.0);
    }
    let fill = (!decision.is_hold()).then(|| Fill::new(decision.exit_price, decision.quantity, now));
    let transition = position.apply(decision, fill.as_ref())?;

    Ok(match transition {
        Transition::PartiallyClosed { quantity, price, .. } | Transition::Closed { quantity, price, .. } => {
            tracing::debug!(
                "{} {:?} {:.8} @ {:.4} at {}",
                position.id(),
                decision.reason,
                quantity,
                price,
                now
            );
            quantity * price
        }
        Transition::Unchanged | Transition::TrailRaised { .. } => 0.0,
    })
}
