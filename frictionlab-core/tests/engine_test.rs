//! End-to-end engine behaviour over small synthetic bar series.

use chrono::{Duration, TimeZone, Utc};
use frictionlab_core::config::{BacktestConfig, RealisticModeFlags};
use frictionlab_core::domain::{
    Bar, CancelReason, Market, OrderKind, OrderSide, OrderState, RejectReason, Signal,
    TradingMode,
};
use frictionlab_core::engine::{BacktestEngine, RunPhase};
use frictionlab_core::error::{DataIntegrityError, EngineError};
use frictionlab_core::execution::{FeedMode, LatencyConfig};

// ── Helpers ──────────────────────────────────────────────────────────

/// Daily bars with the given opens and closes, high/low 1% outside.
fn bars(opens_closes: &[(f64, f64)]) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap();
    opens_closes
        .iter()
        .enumerate()
        .map(|(i, &(open, close))| {
            let high = open.max(close) * 1.01;
            let low = open.min(close) * 0.99;
            Bar::new(start + Duration::days(i as i64), open, high, low, close, 1_000_000.0)
        })
        .collect()
}

fn flat_bars(n: usize, price: f64) -> Vec<Bar> {
    bars(&vec![(price, price); n])
}

fn signals(n: usize, at: &[(usize, Signal)]) -> Vec<Option<Signal>> {
    let mut out = vec![None; n];
    for (i, s) in at {
        out[*i] = Some(*s);
    }
    out
}

fn ideal_usa() -> BacktestConfig {
    BacktestConfig::for_market(Market::Usa).ideal()
}

fn latency_only(market: Market) -> BacktestConfig {
    BacktestConfig {
        realistic_mode: RealisticModeFlags {
            latency: true,
            ..RealisticModeFlags::ideal()
        },
        ..BacktestConfig::for_market(market)
    }
}

// ── Ideal mode ───────────────────────────────────────────────────────

#[test]
fn ideal_mode_fills_at_signal_close() {
    let data = bars(&[(100.0, 101.0), (102.0, 103.0), (104.0, 105.0)]);
    let sig = signals(3, &[(0, Signal::long(100.0))]);
    let result = BacktestEngine::new(ideal_usa()).unwrap().run(&data, &sig).unwrap();

    assert_eq!(result.trades.len(), 1);
    let fill = &result.trades[0].fills[0];
    assert_eq!(fill.bar_index, 0);
    assert_eq!(fill.price, 101.0);
    assert_eq!(fill.slippage_amount, 0.0);
    assert_eq!(fill.commission.total(), 0.0);

    let last = result.equity_curve.last().unwrap();
    assert_eq!(last.position, 100.0);
    assert!((last.cash - (100_000.0 - 10_100.0)).abs() < 1e-9);
    assert!((result.metrics.final_equity - (100_000.0 + 400.0)).abs() < 1e-9);
}

#[test]
fn flat_signal_closes_the_trade() {
    let data = bars(&[(100.0, 100.0), (100.0, 110.0), (110.0, 120.0)]);
    let sig = signals(3, &[(0, Signal::long(10.0)), (2, Signal::flat())]);
    let result = BacktestEngine::new(ideal_usa()).unwrap().run(&data, &sig).unwrap();

    let trade = &result.trades[0];
    assert!(trade.is_closed());
    assert_eq!(trade.exit_bar_index, Some(2));
    assert!((trade.realized_pnl.unwrap() - 200.0).abs() < 1e-9);
    assert_eq!(result.metrics.closed_trade_count, 1);
    assert_eq!(result.metrics.win_rate, 1.0);
}

#[test]
fn long_only_ignores_short_targets() {
    let data = flat_bars(3, 100.0);
    let sig = signals(3, &[(0, Signal::short(10.0))]);
    let result = BacktestEngine::new(ideal_usa()).unwrap().run(&data, &sig).unwrap();
    assert!(result.trades.is_empty());
}

#[test]
fn long_short_reversal_opens_new_trade() {
    let config = BacktestConfig {
        trading_mode: TradingMode::LongShort,
        ..ideal_usa()
    };
    let data = flat_bars(3, 100.0);
    let sig = signals(3, &[(0, Signal::long(10.0)), (1, Signal::short(10.0))]);
    let result = BacktestEngine::new(config).unwrap().run(&data, &sig).unwrap();

    assert_eq!(result.trades.len(), 2);
    assert!(result.trades[0].is_closed());
    assert_eq!(result.trades[1].side(), OrderSide::Sell);
    assert_eq!(result.equity_curve.last().unwrap().position, -10.0);
}

// ── Realistic mode ───────────────────────────────────────────────────

#[test]
fn latency_moves_execution_to_next_open() {
    let data = bars(&[(1000.0, 1000.0), (1010.0, 1020.0), (1020.0, 1020.0)]);
    let sig = signals(3, &[(0, Signal::long(100.0))]);
    let result = BacktestEngine::new(BacktestConfig::default())
        .unwrap()
        .run(&data, &sig)
        .unwrap();

    let fill = &result.trades[0].fills[0];
    assert_eq!(fill.bar_index, 1);
    assert_eq!(fill.reference_price, 1010.0);
    assert!(fill.price > fill.reference_price);
    assert!(fill.commission.base_fee > 0.0);
    assert!(fill.commission.tax > 0.0);
    assert_eq!(result.metrics.avg_bars_to_fill, 1.0);
}

#[test]
fn identical_inputs_reproduce_identical_results() {
    let data = bars(&[
        (1000.0, 1005.0),
        (1004.0, 990.0),
        (992.0, 1010.0),
        (1011.0, 1030.0),
        (1029.0, 1000.0),
        (1001.0, 1002.0),
    ]);
    let sig = signals(
        6,
        &[(0, Signal::long(400_000.0)), (3, Signal::long(100.0)), (4, Signal::flat())],
    );
    let config = BacktestConfig {
        initial_capital: 1_000_000_000.0,
        ..BacktestConfig::default()
    };

    let a = BacktestEngine::new(config.clone()).unwrap().run(&data, &sig).unwrap();
    let b = BacktestEngine::new(config).unwrap().run(&data, &sig).unwrap();
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[test]
fn large_order_is_filled_over_several_bars() {
    let config = BacktestConfig {
        initial_capital: 1_000_000_000.0,
        ..BacktestConfig::default()
    };
    let data = flat_bars(6, 1000.0);
    let sig = signals(6, &[(0, Signal::long(300_000.0))]);
    let result = BacktestEngine::new(config).unwrap().run(&data, &sig).unwrap();

    let trade = &result.trades[0];
    assert!(trade.fills.len() > 1);
    let first = trade.fills[0].quantity;
    assert!((first - (300_000.0 * (-0.6f64).exp()).floor()).abs() <= 1.0);
    assert!(trade.entry_quantity() <= 300_000.0);
}

#[test]
fn remainder_times_out_after_max_queue_bars() {
    let config = BacktestConfig {
        average_daily_volume: 100.0,
        initial_capital: 1_000_000_000.0,
        ..BacktestConfig::default()
    };
    let data = flat_bars(8, 1000.0);
    let sig = signals(8, &[(0, Signal::long(10_000.0))]);
    let result = BacktestEngine::new(config).unwrap().run(&data, &sig).unwrap();

    let timeout = result
        .order_events
        .iter()
        .find(|e| {
            e.to == OrderState::Cancelled {
                reason: CancelReason::QueueTimeout,
            }
        })
        .expect("queue timeout event");
    // Executes at bar 1, carried through bars 2, 3 and 4.
    assert_eq!(timeout.bar_index, 4);
    assert!(timeout.remaining_quantity > 0.0);
    assert!(result.metrics.fill_ratio < 1.0);
    assert_eq!(result.metrics.cancelled_orders, 1);
}

#[test]
fn round_lot_order_fills_when_bar_has_room() {
    let config = BacktestConfig {
        lot_size: 100.0,
        average_daily_volume: 500.0,
        realistic_mode: RealisticModeFlags {
            latency: false,
            ..RealisticModeFlags::all()
        },
        ..BacktestConfig::default()
    };
    let data = flat_bars(6, 1000.0);
    let sig = signals(6, &[(0, Signal::long(100.0))]);
    let result = BacktestEngine::new(config).unwrap().run(&data, &sig).unwrap();

    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.trades[0].entry_quantity(), 100.0);
    assert_eq!(result.metrics.filled_quantity, 100.0);
    assert_eq!(result.metrics.cancelled_orders, 0);
}

#[test]
fn zero_adv_never_fills_and_cancels() {
    let config = BacktestConfig {
        average_daily_volume: 0.0,
        ..BacktestConfig::default()
    };
    let data = flat_bars(6, 1000.0);
    let sig = signals(6, &[(0, Signal::long(100.0))]);
    let result = BacktestEngine::new(config).unwrap().run(&data, &sig).unwrap();
    assert!(result.trades.is_empty());
    assert_eq!(result.metrics.filled_quantity, 0.0);
    assert_eq!(result.metrics.cancelled_orders, 1);
}

#[test]
fn opposite_signal_supersedes_working_order() {
    // One-minute bars: the 15 minute feed delay keeps the order in transit.
    let config = BacktestConfig {
        latency: LatencyConfig {
            bar_duration_ms: 60_000,
            max_wait_bars: 30,
            ..LatencyConfig::delayed_retail()
        },
        ..latency_only(Market::Japan)
    };
    let start = Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap();
    let data: Vec<Bar> = (0..40)
        .map(|i| Bar::new(start + Duration::minutes(i), 1000.0, 1001.0, 999.0, 1000.0, 1e6))
        .collect();
    let sig = signals(40, &[(0, Signal::long(100.0)), (1, Signal::flat())]);
    let result = BacktestEngine::new(config).unwrap().run(&data, &sig).unwrap();

    assert!(result.trades.is_empty());
    assert!(result.order_events.iter().any(|e| e.to
        == OrderState::Cancelled {
            reason: CancelReason::Superseded
        }));
}

#[test]
fn latency_beyond_max_wait_expires_the_order() {
    let config = BacktestConfig {
        latency: LatencyConfig {
            bar_duration_ms: 60_000,
            max_wait_bars: 2,
            ..LatencyConfig::delayed_retail()
        },
        ..latency_only(Market::Japan)
    };
    let start = Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap();
    let data: Vec<Bar> = (0..5)
        .map(|i| Bar::new(start + Duration::minutes(i), 1000.0, 1001.0, 999.0, 1000.0, 1e6))
        .collect();
    let sig = signals(5, &[(0, Signal::long(100.0))]);
    let result = BacktestEngine::new(config).unwrap().run(&data, &sig).unwrap();

    assert!(result.trades.is_empty());
    assert!(result.order_events.iter().any(|e| e.to
        == OrderState::Cancelled {
            reason: CancelReason::LatencyExpired
        }));
}

#[test]
fn extreme_feed_delay_expires_without_panicking() {
    let config = BacktestConfig {
        latency: LatencyConfig {
            feed: FeedMode::Delayed { offset_ms: 1e300 },
            ..LatencyConfig::standard_api()
        },
        ..latency_only(Market::Japan)
    };
    let data = flat_bars(4, 1000.0);
    let sig = signals(4, &[(1, Signal::long(100.0))]);
    let result = BacktestEngine::new(config).unwrap().run(&data, &sig).unwrap();

    assert!(result.trades.is_empty());
    let expired = result
        .order_events
        .iter()
        .find(|e| {
            e.to == OrderState::Cancelled {
                reason: CancelReason::LatencyExpired,
            }
        })
        .expect("latency expiry event");
    assert_eq!(expired.bar_index, 1);
}

#[test]
fn fill_shrinks_to_available_cash() {
    let config = BacktestConfig {
        initial_capital: 10_000.0,
        ..latency_only(Market::Usa)
    };
    let data = bars(&[(100.0, 100.0), (110.0, 110.0), (110.0, 110.0)]);
    let sig = signals(3, &[(0, Signal::long(100.0))]);
    let result = BacktestEngine::new(config).unwrap().run(&data, &sig).unwrap();

    assert_eq!(result.trades[0].entry_quantity(), 90.0);
    assert_eq!(result.rejected_orders.len(), 1);
    assert_eq!(result.rejected_orders[0].reason, RejectReason::InsufficientCash);
    assert_eq!(result.rejected_orders[0].quantity, 10.0);
    assert!(result.order_events.iter().any(|e| e.to
        == OrderState::Cancelled {
            reason: CancelReason::InsufficientCash
        }));
    assert!(result.equity_curve.last().unwrap().cash >= 0.0);
}

#[test]
fn short_beyond_equity_is_rejected_for_margin() {
    let config = BacktestConfig {
        trading_mode: TradingMode::LongShort,
        initial_capital: 1_000.0,
        ..ideal_usa()
    };
    let data = flat_bars(2, 100.0);
    let sig = signals(2, &[(0, Signal::short(50.0))]);
    let result = BacktestEngine::new(config).unwrap().run(&data, &sig).unwrap();
    assert!(result.trades.is_empty());
    assert_eq!(result.rejected_orders[0].reason, RejectReason::InsufficientMargin);
}

#[test]
fn limit_order_rests_until_price_reached() {
    let config = BacktestConfig {
        order_kind: OrderKind::Limit { offset_bps: 100.0 },
        ..ideal_usa()
    };
    let config = BacktestConfig {
        partial_fill: frictionlab_core::execution::PartialFillConfig {
            max_queue_bars: 5,
            ..Default::default()
        },
        ..config
    };
    // Limit at 99.0; bar 2 trades down through it.
    let data = bars(&[(100.0, 100.0), (100.5, 101.0), (100.0, 98.5), (99.0, 99.0)]);
    let sig = signals(4, &[(0, Signal::long(10.0))]);
    let result = BacktestEngine::new(config).unwrap().run(&data, &sig).unwrap();

    let fill = &result.trades[0].fills[0];
    assert_eq!(fill.bar_index, 2);
    assert!((fill.price - 99.0).abs() < 1e-9);
    assert_eq!(fill.slippage_amount, 0.0);
}

#[test]
fn end_of_data_cancels_scheduled_orders() {
    let data = flat_bars(2, 1000.0);
    let sig = signals(2, &[(1, Signal::long(100.0))]);
    let result = BacktestEngine::new(BacktestConfig::default())
        .unwrap()
        .run(&data, &sig)
        .unwrap();
    let last = result.order_events.last().unwrap();
    assert!(matches!(last.from, Some(OrderState::Scheduled { execution_bar: 2 })));
    assert_eq!(
        last.to,
        OrderState::Cancelled {
            reason: CancelReason::EndOfData
        }
    );
}

// ── Errors and lifecycle ─────────────────────────────────────────────

#[test]
fn non_monotonic_timestamp_aborts_run() {
    let mut data = flat_bars(3, 100.0);
    data[2].timestamp = data[0].timestamp;
    let mut engine = BacktestEngine::new(ideal_usa()).unwrap();
    engine.step(&data[0], None).unwrap();
    engine.step(&data[1], None).unwrap();
    let err = engine.step(&data[2], None).unwrap_err();
    assert!(matches!(
        err,
        EngineError::DataIntegrity(DataIntegrityError::NonMonotonicTimestamp { index: 2, .. })
    ));
    assert_eq!(engine.phase(), RunPhase::Aborted);
    assert!(matches!(
        engine.step(&data[1], None),
        Err(EngineError::RunCompleted(_))
    ));
}

#[test]
fn malformed_bar_is_data_integrity_error() {
    let mut data = flat_bars(1, 100.0);
    data[0].low = 200.0;
    let mut engine = BacktestEngine::new(ideal_usa()).unwrap();
    assert!(matches!(
        engine.step(&data[0], None),
        Err(EngineError::DataIntegrity(DataIntegrityError::MalformedBar { .. }))
    ));
}

#[test]
fn signal_length_mismatch_is_rejected() {
    let data = flat_bars(3, 100.0);
    let err = BacktestEngine::new(ideal_usa())
        .unwrap()
        .run(&data, &[None, None])
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::DataIntegrity(DataIntegrityError::SignalLengthMismatch { bars: 3, signals: 2 })
    ));
}

#[test]
fn finished_engine_cannot_step() {
    let data = flat_bars(2, 100.0);
    let mut engine = BacktestEngine::new(ideal_usa()).unwrap();
    engine.step(&data[0], None).unwrap();
    engine.finish().unwrap();
    assert_eq!(engine.phase(), RunPhase::Completed);
    assert!(matches!(
        engine.step(&data[1], None),
        Err(EngineError::RunCompleted(_))
    ));
    assert!(engine.finish().is_err());
}

#[test]
fn invalid_config_fails_construction() {
    let config = BacktestConfig {
        average_daily_volume: -5.0,
        ..BacktestConfig::default()
    };
    assert!(matches!(
        BacktestEngine::new(config),
        Err(EngineError::Configuration(_))
    ));
}
