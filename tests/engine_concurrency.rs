//! Single-writer behavior of the engine: racing writers on one symbol,
//! watchdog passes overlapping an in-flight order, independent symbols.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use tiered_trader::application::{Applied, EngineError, TradingEngine};
use tiered_trader::domain::{IndicatorSnapshot, Timeframe, TimeframeIndicators, Transition};
use tiered_trader::ports::mocks::{MockExecution, MockMarketData, MockPortfolio, RecordingNotifier};
use tiered_trader::ports::OrderSide;

const SYMBOL: &str = "BTC/USDT";
const ORDER_DELAY: Duration = Duration::from_millis(50);

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()
}

fn momentum_snapshot(symbol: &str) -> IndicatorSnapshot {
    let h4 = TimeframeIndicators {
        close: 50_000.0,
        ema_fast: 47_000.0,
        ema_mid: 46_000.0,
        ema_slow: 45_000.0,
        adx: 35.0,
        rsi: 60.0,
        atr: 1_000.0,
        volume: 100.0,
        volume_avg: 100.0,
        ..Default::default()
    };
    let h1 = TimeframeIndicators {
        rsi: 62.0,
        atr: 500.0,
        macd: 12.0,
        macd_signal: 10.0,
        macd_hist_prev: Some(1.0),
        volume: 150.0,
        volume_avg: 100.0,
        ..h4
    };
    let m15 = TimeframeIndicators {
        atr: 200.0,
        highest_high: Some(50_100.0),
        ..h1
    };
    IndicatorSnapshot::new(symbol, t0(), 50_000.0)
        .with_frame(Timeframe::H4, h4)
        .with_frame(Timeframe::H1, h1)
        .with_frame(Timeframe::M15, m15)
}

struct Harness {
    engine: TradingEngine,
    market: MockMarketData,
    execution: MockExecution,
}

fn slow_harness(symbols: &[&str]) -> Harness {
    let market = symbols
        .iter()
        .fold(MockMarketData::new(), |market, symbol| {
            market.with_snapshot(momentum_snapshot(symbol))
        });
    let execution = MockExecution::new().with_delay(ORDER_DELAY);
    let engine = TradingEngine::new(
        Arc::new(market.clone()),
        Arc::new(execution.clone()),
        Arc::new(MockPortfolio::new(dec!(100000))),
        Arc::new(RecordingNotifier::new()),
    );
    Harness {
        engine,
        market,
        execution,
    }
}

fn sells(execution: &MockExecution) -> usize {
    execution
        .get_calls()
        .iter()
        .filter(|call| call.side == OrderSide::Sell)
        .count()
}

#[tokio::test]
async fn test_racing_exits_one_wins() {
    let h = slow_harness(&[SYMBOL]);
    h.engine.run_cycle_at(&[SYMBOL.to_string()], t0()).await;
    let position = h.engine.store().get(SYMBOL).await.unwrap();

    h.market.set_price(SYMBOL, 48_000.0);
    let decision = h.engine.evaluate_exit_at(&position, t0()).await.unwrap();

    let (first, second) = tokio::join!(
        h.engine.apply_decision(&decision),
        h.engine.apply_decision(&decision)
    );

    assert!(matches!(
        first,
        Ok(Applied {
            transition: Transition::Closed { .. },
            ..
        })
    ));
    assert!(matches!(second, Err(EngineError::ConcurrentMutationConflict { .. })));
    assert_eq!(sells(&h.execution), 1);
    assert!(h.engine.store().get(SYMBOL).await.is_none());
    assert_eq!(h.engine.store().open_count(), 0);

    // Once closed, the same decision is still refused
    let late = h.engine.apply_decision(&decision).await;
    assert!(matches!(late, Err(ref e) if e.is_conflict()));
    assert_eq!(sells(&h.execution), 1);
}

#[tokio::test]
async fn test_watchdog_skips_symbol_being_written() {
    let h = slow_harness(&[SYMBOL]);
    h.engine.run_cycle_at(&[SYMBOL.to_string()], t0()).await;
    let position = h.engine.store().get(SYMBOL).await.unwrap();

    // Partial at +2% goes out while the watchdog looks at the same symbol
    h.market.set_price(SYMBOL, 51_000.0);
    let decision = h.engine.evaluate_exit_at(&position, t0()).await.unwrap();

    let (applied, watchdog) = tokio::join!(
        h.engine.apply_decision(&decision),
        h.engine.watchdog_pass_at(t0())
    );

    assert!(matches!(
        applied,
        Ok(Applied {
            transition: Transition::PartiallyClosed { .. },
            ..
        })
    ));
    assert_eq!(watchdog.conflicts, 1);
    assert_eq!(watchdog.evaluated, 0);
    assert_eq!(sells(&h.execution), 1);

    let after = h.engine.store().get(SYMBOL).await.unwrap();
    assert!(after.partial_tp_taken());
    assert_eq!(after.revision(), position.revision() + 1);
}

#[tokio::test]
async fn test_decision_from_before_a_partial_is_stale() {
    let h = slow_harness(&[SYMBOL]);
    h.engine.run_cycle_at(&[SYMBOL.to_string()], t0()).await;
    let position = h.engine.store().get(SYMBOL).await.unwrap();

    h.market.set_price(SYMBOL, 51_000.0);
    let partial = h.engine.evaluate_exit_at(&position, t0()).await.unwrap();

    // Evaluated against the same pre-partial state
    h.market.set_price(SYMBOL, 48_000.0);
    let stop = h.engine.evaluate_exit_at(&position, t0()).await.unwrap();

    h.engine.apply_decision(&partial).await.unwrap();
    let result = h.engine.apply_decision(&stop).await;

    assert!(matches!(result, Err(ref e) if e.is_conflict()));
    assert_eq!(sells(&h.execution), 1);
    assert!(h.engine.store().get(SYMBOL).await.unwrap().partial_tp_taken());
}

#[tokio::test]
async fn test_symbols_progress_independently() {
    let symbols = ["BTC/USDT", "ETH/USDT"];
    let h = slow_harness(&symbols);
    let names: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();

    let report = h.engine.run_cycle_at(&names, t0()).await;
    assert_eq!(report.entries, 2);
    assert_eq!(h.engine.store().open_count(), 2);

    // A stop on one symbol leaves the other alone
    h.market.set_price("BTC/USDT", 48_000.0);
    h.market.set_price("ETH/USDT", 50_200.0);
    let report = h.engine.watchdog_pass_at(t0()).await;

    assert_eq!(report.evaluated, 2);
    assert_eq!(report.closes, 1);
    assert!(h.engine.store().get("BTC/USDT").await.is_none());
    assert!(h.engine.store().get("ETH/USDT").await.is_some());
}
