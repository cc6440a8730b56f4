//! Notifier port
//!
//! Fire-and-forget trade events. `notify` is synchronous and infallible so
//! alert delivery can never block or fail an evaluation.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::execution::OrderSide;
use crate::domain::exit::ExitReason;
use crate::domain::tier::Tier;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TradeEvent {
    EntryOpened {
        symbol: String,
        tier: Tier,
        position_id: String,
        price: f64,
        quantity: f64,
        stop_loss: f64,
        target: f64,
    },
    PartialClose {
        symbol: String,
        position_id: String,
        price: f64,
        quantity: f64,
        stop_loss: f64,
    },
    PositionClosed {
        symbol: String,
        position_id: String,
        reason: ExitReason,
        price: f64,
        quantity: f64,
        realized_pnl: f64,
    },
    CandidateRejected {
        symbol: String,
        tier: Tier,
        reason: String,
    },
    SymbolSkipped {
        symbol: String,
        reason: String,
    },
    /// The exchange confirmed a fill that could not be applied to the
    /// position. Needs manual reconciliation.
    UnrecordedFill {
        symbol: String,
        idempotency_key: String,
        side: OrderSide,
        price: f64,
        quantity: f64,
        reason: String,
    },
}

impl TradeEvent {
    pub fn symbol(&self) -> &str {
        match self {
            TradeEvent::EntryOpened { symbol, .. }
            | TradeEvent::PartialClose { symbol, .. }
            | TradeEvent::PositionClosed { symbol, .. }
            | TradeEvent::CandidateRejected { symbol, .. }
            | TradeEvent::SymbolSkipped { symbol, .. }
            | TradeEvent::UnrecordedFill { symbol, .. } => symbol,
        }
    }
}

pub trait NotifierPort: Send + Sync {
    fn notify(&self, event: TradeEvent);
}

/// Writes every event to the log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl NotifierPort for LogNotifier {
    fn notify(&self, event: TradeEvent) {
        match &event {
            TradeEvent::EntryOpened { symbol, tier, price, quantity, .. } => {
                tracing::info!("[NOTIFY] {} {} entry: {:.8} @ {:.4}", symbol, tier, quantity, price)
            }
            TradeEvent::PartialClose { symbol, price, quantity, .. } => {
                tracing::info!("[NOTIFY] {} partial close: {:.8} @ {:.4}", symbol, quantity, price)
            }
            TradeEvent::PositionClosed { symbol, reason, price, realized_pnl, .. } => {
                tracing::info!(
                    "[NOTIFY] {} closed ({}) @ {:.4}, PnL {:.2}",
                    symbol,
                    reason,
                    price,
                    realized_pnl
                )
            }
            TradeEvent::CandidateRejected { symbol, tier, reason } => {
                tracing::info!("[NOTIFY] {} {} candidate rejected: {}", symbol, tier, reason)
            }
            TradeEvent::SymbolSkipped { symbol, reason } => {
                tracing::debug!("[NOTIFY] {} skipped: {}", symbol, reason)
            }
            TradeEvent::UnrecordedFill {
                symbol,
                idempotency_key,
                side,
                price,
                quantity,
                reason,
            } => {
                tracing::error!(
                    "[NOTIFY] {} {} fill {:.8} @ {:.4} not recorded (key {}): {}",
                    symbol,
                    side,
                    quantity,
                    price,
                    idempotency_key,
                    reason
                )
            }
        }
    }
}

/// Forwards events to a bounded channel; drops them when the receiver lags
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::Sender<TradeEvent>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TradeEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl NotifierPort for ChannelNotifier {
    fn notify(&self, event: TradeEvent) {
        if let Err(e) = self.sender.try_send(event) {
            tracing::debug!("Notification dropped: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skipped(symbol: &str) -> TradeEvent {
        TradeEvent::SymbolSkipped {
            symbol: symbol.to_string(),
            reason: "no data".to_string(),
        }
    }

    #[tokio::test]
    async fn test_channel_notifier_delivers() {
        let (notifier, mut rx) = ChannelNotifier::new(4);
        notifier.notify(skipped("BTC/USDT"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.symbol(), "BTC/USDT");
    }

    #[test]
    fn test_channel_notifier_never_blocks_when_full() {
        let (notifier, _rx) = ChannelNotifier::new(1);
        notifier.notify(skipped("A"));
        // Full channel: dropped, not blocked
        notifier.notify(skipped("B"));
    }

    #[test]
    fn test_channel_notifier_survives_closed_receiver() {
        let (notifier, rx) = ChannelNotifier::new(1);
        drop(rx);
        notifier.notify(skipped("A"));
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&TradeEvent::PositionClosed {
            symbol: "ETH/USDT".to_string(),
            position_id: "ETH-1".to_string(),
            reason: ExitReason::StopHit,
            price: 1.0,
            quantity: 2.0,
            realized_pnl: -3.0,
        })
        .unwrap();
        assert!(json.contains("\"event\":\"position_closed\""));
        assert!(json.contains("\"reason\":\"STOP_HIT\""));
    }

    #[test]
    fn test_unrecorded_fill_serialization() {
        let json = serde_json::to_string(&TradeEvent::UnrecordedFill {
            symbol: "ETH/USDT".to_string(),
            idempotency_key: "ETHUSDT-1-2".to_string(),
            side: OrderSide::Sell,
            price: 1.0,
            quantity: 2.0,
            reason: "quantity mismatch".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"event\":\"unrecorded_fill\""));
        assert!(json.contains("\"side\":\"SELL\""));
    }
}
