//! Replay scenarios: sideways markets, intrabar policy, and agreement
//! between the replay path and the live engine.

use approx::assert_relative_eq;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

use tiered_trader::application::{
    replay, IntrabarPolicy, ReplayConfig, ReplayDriver, TradingEngine,
};
use tiered_trader::domain::{
    ExitReason, Fill, IndicatorSnapshot, Regime, Tier, Timeframe, TimeframeIndicators,
};
use tiered_trader::ports::mocks::{MockExecution, MockMarketData, MockPortfolio, RecordingNotifier};
use tiered_trader::ports::TradeEvent;
use tiered_trader::strategy::{
    Candle, ExitStateMachine, IndicatorConfig, RegimeThresholds, TierParams, TierTable,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn flat_bar(hour: i64) -> Candle {
    Candle::new(t0() + Duration::hours(hour), 100.0, 101.0, 99.0, 100.0, 10.0)
}

fn flat_bars(n: usize) -> Vec<Candle> {
    (0..n as i64).map(flat_bar).collect()
}

fn h1_thresholds() -> RegimeThresholds {
    RegimeThresholds {
        reference_timeframe: Timeframe::H1,
        ..Default::default()
    }
}

/// One condition-free tier on 1h bars: enters as soon as indicators warm up
fn always_enter_table() -> TierTable {
    TierTable::new(vec![TierParams {
        tier: Tier::Momentum,
        primary_timeframe: Timeframe::H1,
        capital_allocation: 1.0,
        risk_per_trade: 0.01,
        stop_atr_multiple: 1.0,
        partial_tp_pct: 0.02,
        partial_tp_fraction: 0.5,
        final_target_pct: 0.05,
        trailing_atr_multiple: 1.0,
        max_hold_hours: 1000,
        allowed_regimes: vec![
            Regime::StrongTrend,
            Regime::WeakTrend,
            Regime::Ranging,
            Regime::Volatile,
        ],
        conditions: vec![],
    }])
}

fn short_indicators() -> IndicatorConfig {
    IndicatorConfig {
        ema_fast: 3,
        ema_mid: 5,
        ema_slow: 8,
        adx_period: 3,
        rsi_period: 3,
        atr_period: 3,
        macd_fast: 3,
        macd_slow: 6,
        macd_signal: 3,
        bb_period: 5,
        bb_std_dev: 2.0,
        volume_period: 5,
        breakout_lookback: 5,
    }
}

fn driver(intrabar: IntrabarPolicy, force_close_at_end: bool) -> ReplayDriver {
    let config = ReplayConfig {
        symbol: "TEST/USDT".to_string(),
        base_timeframe: Timeframe::H1,
        starting_balance: 10_000.0,
        portfolio_cap_fraction: 0.10,
        intrabar,
        force_close_at_end,
        indicators: short_indicators(),
    };
    ReplayDriver::new(config, always_enter_table(), h1_thresholds()).unwrap()
}

/// 40 quiet bars, then one whose low reaches 97 but closes back at 100
fn shock_bars() -> Vec<Candle> {
    let mut bars = flat_bars(40);
    bars.push(Candle::new(t0() + Duration::hours(40), 100.0, 101.0, 97.0, 100.0, 10.0));
    bars
}

#[test]
fn test_sideways_market_is_ranging_throughout() {
    let bars = flat_bars(300);
    let report = replay(&bars, &TierTable::default(), &h1_thresholds()).unwrap();

    assert_eq!(report.regimes.len(), 300);
    assert!(report.regimes.iter().all(|s| s.regime == Regime::Ranging));
    // Once warmed up, ADX is zero: fully confident it is ranging
    assert_relative_eq!(report.regimes[299].confidence, 1.0);

    assert!(report.ledger.is_empty());
    assert_eq!(report.rejected_entries, 0);
    assert!(report.open_position.is_none());
    assert_eq!(report.final_balance, report.starting_balance);
    assert_eq!(report.regime_counts().get("RANGING"), Some(&300));
}

#[test]
fn test_regime_samples_stamped_at_bar_close() {
    let bars = flat_bars(5);
    let report = replay(&bars, &TierTable::default(), &RegimeThresholds::default()).unwrap();
    for (bar, sample) in bars.iter().zip(&report.regimes) {
        assert_eq!(sample.time, bar.time + Duration::hours(1));
    }
}

#[test]
fn test_close_only_misses_intrabar_stop() {
    let report = driver(IntrabarPolicy::CloseOnly, false).run(&shock_bars()).unwrap();

    assert!(report.ledger.is_empty());
    let position = report.open_position.as_ref().unwrap();
    assert_relative_eq!(position.stop_loss(), 98.0);
    assert_relative_eq!(position.original_quantity(), 10.0);
    // Cash plus the open position marked at the last close
    assert_relative_eq!(report.final_balance, 10_000.0);
}

#[test]
fn test_worst_case_takes_intrabar_stop() {
    let report = driver(IntrabarPolicy::WorstCase, false).run(&shock_bars()).unwrap();

    assert!(report.open_position.is_none());
    assert_eq!(report.ledger.len(), 1);
    let record = &report.ledger.records[0];
    assert_eq!(record.final_reason(), Some(ExitReason::StopHit));
    assert_relative_eq!(record.exit_events[0].price, 97.0);
    assert_relative_eq!(record.realized_pnl, -30.0);

    assert_eq!(report.summary.stop_exits, 1);
    assert_relative_eq!(report.final_balance, 9_970.0);
}

#[test]
fn test_force_close_at_end() {
    let report = driver(IntrabarPolicy::CloseOnly, true).run(&shock_bars()).unwrap();

    assert!(report.open_position.is_none());
    assert_eq!(report.ledger.len(), 1);
    let record = &report.ledger.records[0];
    assert_eq!(record.final_reason(), Some(ExitReason::ReplayEnd));
    assert_relative_eq!(record.realized_pnl, 0.0);
    assert_eq!(record.exit_events[0].time, t0() + Duration::hours(41));
}

#[test]
fn test_replay_is_deterministic() {
    let bars = shock_bars();
    let first = driver(IntrabarPolicy::WorstCase, true).run(&bars).unwrap();
    let second = driver(IntrabarPolicy::WorstCase, true).run(&bars).unwrap();

    assert_eq!(first.ledger, second.ledger);
    assert_eq!(first.regimes, second.regimes);
    assert_eq!(first.final_balance, second.final_balance);
}

/// Meets the default MOMENTUM tier (not SWING) with a 1h ATR of 500
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

#[tokio::test]
async fn test_live_engine_matches_offline_evaluation() {
    const SYMBOL: &str = "BTC/USDT";
    let snapshot = momentum_snapshot(SYMBOL);
    let market = MockMarketData::new().with_snapshot(snapshot.clone());
    let notifier = RecordingNotifier::new();
    let engine = TradingEngine::new(
        Arc::new(market.clone()),
        Arc::new(MockExecution::new()),
        Arc::new(MockPortfolio::new(dec!(100000))),
        Arc::new(notifier.clone()),
    );

    let report = engine.run_cycle_at(&[SYMBOL.to_string()], t0()).await;
    assert_eq!(report.entries, 1);
    let mut offline = engine.store().get(SYMBOL).await.unwrap();
    assert_relative_eq!(offline.stop_loss(), 49_100.0);

    let machine = ExitStateMachine::default();
    let path = [50_500.0, 51_050.0, 51_400.0, 51_000.0, 50_400.0];

    for (step, price) in path.iter().enumerate() {
        let now = t0() + Duration::minutes(15 * (step as i64 + 1));

        // Live: watchdog with the cached snapshot and a fresh price
        market.set_price(SYMBOL, *price);
        engine.watchdog_pass_at(now).await;

        // Offline: the same state machine applied directly
        let decision = machine.evaluate_at(&offline, *price, &snapshot, now);
        if decision.changes_state() {
            let fill = (!decision.is_hold()).then(|| Fill::new(*price, decision.quantity, now));
            offline.apply(&decision, fill.as_ref()).unwrap();
        }

        match engine.store().get(SYMBOL).await {
            Some(live) => {
                assert_relative_eq!(live.stop_loss(), offline.stop_loss());
                assert_relative_eq!(live.remaining_quantity(), offline.remaining_quantity());
                assert_eq!(live.partial_tp_taken(), offline.partial_tp_taken());
                assert_eq!(live.revision(), offline.revision());
            }
            None => assert!(offline.is_closed(), "live closed at step {} but offline did not", step),
        }
    }

    // Partial at 51050, trail to 50500 at 51400, trailing stop at 50400
    assert!(offline.is_closed());
    assert_relative_eq!(offline.realized_pnl(), 0.1 * 1_050.0 + 0.1 * 400.0, epsilon = 1e-9);

    let closed = notifier.events().into_iter().find_map(|event| match event {
        TradeEvent::PositionClosed {
            reason,
            realized_pnl,
            ..
        } => Some((reason, realized_pnl)),
        _ => None,
    });
    let (reason, realized_pnl) = closed.unwrap();
    assert_eq!(reason, ExitReason::StopHit);
    assert_relative_eq!(realized_pnl, offline.realized_pnl(), epsilon = 1e-9);
}
