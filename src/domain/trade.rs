//! Trade ledger
//!
//! One `TradeRecord` per position, written identically by the live engine and
//! the replay driver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::exit::ExitReason;
use super::tier::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitEventKind {
    PartialClose,
    FullClose,
}

/// A confirmed reduction of position quantity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: ExitEventKind,
    pub price: f64,
    pub quantity: f64,
    pub reason: ExitReason,
    /// Stop hit while the trailing stop was active
    #[serde(default)]
    pub trailing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub tier: Tier,
    pub position_id: String,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub quantity: f64,
    pub exit_events: Vec<ExitEvent>,
    pub realized_pnl: f64,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.realized_pnl > 0.0
    }

    /// Reason on the closing event, if the trade is closed
    pub fn final_reason(&self) -> Option<ExitReason> {
        self.exit_events
            .iter()
            .rev()
            .find(|e| e.kind == ExitEventKind::FullClose)
            .map(|e| e.reason)
    }

    pub fn return_pct(&self) -> f64 {
        let cost = self.entry_price * self.quantity;
        if cost > 0.0 {
            self.realized_pnl / cost * 100.0
        } else {
            0.0
        }
    }
}

impl fmt::Display for TradeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {:.4} x {:.8} -> {} events, pnl {:.2}",
            self.symbol,
            self.tier,
            self.entry_price,
            self.quantity,
            self.exit_events.len(),
            self.realized_pnl
        )
    }
}

/// Aggregate statistics over a ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub partial_exits: usize,
    pub stop_exits: usize,
    pub trailing_stop_exits: usize,
    pub target_exits: usize,
    pub time_exits: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeLedger {
    pub records: Vec<TradeRecord>,
}

impl TradeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: TradeRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_pnl(&self) -> f64 {
        self.records.iter().map(|r| r.realized_pnl).sum()
    }

    pub fn summary(&self) -> LedgerSummary {
        let mut summary = LedgerSummary {
            trades: self.records.len(),
            total_pnl: self.total_pnl(),
            ..Default::default()
        };

        for record in &self.records {
            if record.is_win() {
                summary.wins += 1;
            } else {
                summary.losses += 1;
            }
            for event in &record.exit_events {
                match event.reason {
                    ExitReason::PartialTarget => summary.partial_exits += 1,
                    ExitReason::StopHit if event.trailing => summary.trailing_stop_exits += 1,
                    ExitReason::StopHit => summary.stop_exits += 1,
                    ExitReason::TargetHit => summary.target_exits += 1,
                    ExitReason::TimeExit => summary.time_exits += 1,
                    ExitReason::ReplayEnd => {}
                }
            }
        }

        if summary.trades > 0 {
            summary.win_rate = summary.wins as f64 / summary.trades as f64;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(kind: ExitEventKind, reason: ExitReason, trailing: bool) -> ExitEvent {
        ExitEvent {
            time: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            kind,
            price: 101.0,
            quantity: 1.0,
            reason,
            trailing,
        }
    }

    fn record(pnl: f64, events: Vec<ExitEvent>) -> TradeRecord {
        TradeRecord {
            symbol: "ETH/USDT".to_string(),
            tier: Tier::Momentum,
            position_id: "ETH/USDT-1".to_string(),
            entry_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            entry_price: 100.0,
            quantity: 2.0,
            exit_events: events,
            realized_pnl: pnl,
        }
    }

    #[test]
    fn test_final_reason() {
        let r = record(
            3.0,
            vec![
                event(ExitEventKind::PartialClose, ExitReason::PartialTarget, false),
                event(ExitEventKind::FullClose, ExitReason::StopHit, true),
            ],
        );
        assert_eq!(r.final_reason(), Some(ExitReason::StopHit));
        assert!(r.is_win());
        assert!((r.return_pct() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_open_record_has_no_final_reason() {
        let r = record(
            1.0,
            vec![event(ExitEventKind::PartialClose, ExitReason::PartialTarget, false)],
        );
        assert_eq!(r.final_reason(), None);
    }

    #[test]
    fn test_summary_counts() {
        let mut ledger = TradeLedger::new();
        ledger.push(record(
            5.0,
            vec![
                event(ExitEventKind::PartialClose, ExitReason::PartialTarget, false),
                event(ExitEventKind::FullClose, ExitReason::StopHit, true),
            ],
        ));
        ledger.push(record(
            -2.0,
            vec![event(ExitEventKind::FullClose, ExitReason::StopHit, false)],
        ));
        ledger.push(record(
            4.0,
            vec![event(ExitEventKind::FullClose, ExitReason::TargetHit, false)],
        ));

        let s = ledger.summary();
        assert_eq!(s.trades, 3);
        assert_eq!(s.wins, 2);
        assert_eq!(s.losses, 1);
        assert_eq!(s.partial_exits, 1);
        assert_eq!(s.trailing_stop_exits, 1);
        assert_eq!(s.stop_exits, 1);
        assert_eq!(s.target_exits, 1);
        assert!((s.total_pnl - 7.0).abs() < 1e-9);
        assert!((s.win_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_event_type_field_name() {
        let e = event(ExitEventKind::FullClose, ExitReason::TimeExit, false);
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"type\":\"FULL_CLOSE\""));
        assert!(json.contains("\"reason\":\"TIME_EXIT\""));
    }

    #[test]
    fn test_empty_summary() {
        let s = TradeLedger::new().summary();
        assert_eq!(s.trades, 0);
        assert_eq!(s.win_rate, 0.0);
    }
}
