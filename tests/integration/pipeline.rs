//! Full coordinator ticks against the recording broker.

use std::sync::Arc;

use aegis::engine::circuit_breaker::BreakerConfig;
use aegis::platforms::{ExecutionAdapter, ExecutionError};
use aegis::storage::ledger::TradeLedger;
use aegis::types::{BreakerState, ExecutionStatus, ExitReason, RejectionReason};

use crate::harness::{bar_now, settings, Harness};

const PAIRS: [&str; 3] = ["EUR_USD", "GBP_USD", "AUD_USD"];

#[tokio::test]
async fn test_counts_stay_bounded_across_ticks() {
    let mut settings = settings(&PAIRS);
    settings.limits.max_per_instrument = 2;
    settings.limits.max_total = 4;
    settings.exits.enabled = false;
    let h = Harness::with(settings, BreakerConfig::default(), TradeLedger::in_memory().await.unwrap()).await;

    for _ in 0..6 {
        h.coordinator.run_tick().await.unwrap();
        let status = h.coordinator.get_status().await;
        assert!(status.portfolio.total_open <= 4);
        for pair in PAIRS {
            assert!(status.portfolio.count_for(pair) <= 2);
        }
    }

    let status = h.coordinator.get_status().await;
    assert_eq!(status.portfolio.total_open, 4);
    assert_eq!(h.broker.get_open_positions().await.unwrap().len(), 4);

    let limit_rejections = h
        .coordinator
        .get_recent_decisions(500)
        .await
        .unwrap()
        .into_iter()
        .filter(|d| {
            matches!(
                d.rejection(),
                Some(RejectionReason::PositionLimit { .. } | RejectionReason::PortfolioLimit { .. })
            )
        })
        .count();
    assert!(limit_rejections > 0);
}

#[tokio::test]
async fn test_accepted_sizes_recorded_within_bounds() {
    let h = Harness::new(&PAIRS).await;
    h.coordinator.run_tick().await.unwrap();

    let equity = h.coordinator.config().initial_equity;
    let entries = h.coordinator.get_recent_entries(100).await.unwrap();
    assert!(!entries.is_empty());
    for entry in entries {
        if let Some(size) = entry.decision.size() {
            assert!(size >= aegis::types::RiskLimits::default().min_position_size);
            assert!(size <= equity * aegis::types::RiskLimits::default().max_single_position_fraction);
        }
    }
}

#[tokio::test]
async fn test_no_order_reaches_venue_while_halted() {
    let h = Harness::new(&PAIRS).await;
    h.coordinator.trigger_emergency_stop("pre-open drill");
    h.coordinator.wait_for_pending_close().await;

    for _ in 0..3 {
        let report = h.coordinator.run_tick().await.unwrap();
        assert_eq!(report.accepted, 0);
        assert_eq!(report.breaker, Some(BreakerState::Halted));
    }
    assert_eq!(h.broker.place_attempts(), 0);

    let status = h.coordinator.get_status().await;
    assert_eq!(status.circuit_breaker, BreakerState::Halted);
    assert_eq!(status.breaker_reason.as_deref(), Some("emergency stop: pre-open drill"));
}

#[tokio::test]
async fn test_emergency_stop_twice_closes_once() {
    let mut settings = settings(&PAIRS);
    settings.exits.enabled = false;
    let h = Harness::with(settings, BreakerConfig::default(), TradeLedger::in_memory().await.unwrap()).await;

    let report = h.coordinator.run_tick().await.unwrap();
    assert!(report.filled > 0);

    assert_eq!(h.coordinator.trigger_emergency_stop("first"), BreakerState::Halted);
    assert_eq!(h.coordinator.trigger_emergency_stop("second"), BreakerState::Halted);
    h.coordinator.wait_for_pending_close().await;

    assert_eq!(h.broker.close_all_calls(), 1);
    assert_eq!(h.broker.closed().len(), report.filled);
    assert!(h.broker.get_open_positions().await.unwrap().is_empty());

    let status = h.coordinator.get_status().await;
    assert_eq!(status.circuit_breaker, BreakerState::Halted);
    assert_eq!(status.breaker_reason.as_deref(), Some("emergency stop: first"));
    assert_eq!(status.portfolio.total_open, 0);

    let closures = h.ledger.closures().await.unwrap();
    assert_eq!(closures.len(), report.filled);
    assert!(closures.iter().all(|c| c.reason == ExitReason::EmergencyStop));
    assert!(h.ledger.open_positions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_emergency_stop_during_tick_blocks_remaining_orders() {
    let mut settings = settings(&PAIRS);
    settings.exits.enabled = false;
    let h = Harness::with(settings, BreakerConfig::default(), TradeLedger::in_memory().await.unwrap()).await;

    let coordinator = Arc::downgrade(&h.coordinator);
    h.broker.before_next_order(move || {
        if let Some(c) = coordinator.upgrade() {
            c.trigger_emergency_stop("operator during tick");
        }
    });

    let report = h.coordinator.run_tick().await.unwrap();
    h.coordinator.wait_for_pending_close().await;

    // The in-flight order fills and is then closed; later decisions never reach the venue
    assert_eq!(h.broker.place_attempts(), 1);
    assert_eq!(report.filled, 1);
    assert_eq!(report.unexecuted, report.accepted - 1);
    assert!(h.broker.get_open_positions().await.unwrap().is_empty());
    assert_eq!(h.coordinator.get_status().await.portfolio.total_open, 0);

    let entries = h.coordinator.get_recent_entries(10).await.unwrap();
    let halted_after = entries
        .iter()
        .filter(|e| {
            matches!(&e.execution, ExecutionStatus::Unexecuted { reason } if reason == "trading halted")
        })
        .count();
    assert_eq!(halted_after, report.accepted - 1);
}

#[tokio::test]
async fn test_emergency_close_before_fill_confirmed_leaves_no_position() {
    let mut settings = settings(&["EUR_USD"]);
    settings.exits.enabled = false;
    let h = Harness::with(settings, BreakerConfig::default(), TradeLedger::in_memory().await.unwrap()).await;

    // The venue fills, then close-all runs to completion before the fill is returned
    let coordinator = Arc::downgrade(&h.coordinator);
    h.broker.after_next_fill(move || {
        let coordinator = coordinator.clone();
        Box::pin(async move {
            if let Some(c) = coordinator.upgrade() {
                c.trigger_emergency_stop("operator during fill");
                c.wait_for_pending_close().await;
            }
        })
    });

    let report = h.coordinator.run_tick().await.unwrap();
    assert_eq!(report.filled, 1);
    assert_eq!(h.broker.close_all_calls(), 1);
    assert!(h.broker.get_open_positions().await.unwrap().is_empty());

    let status = h.coordinator.get_status().await;
    assert_eq!(status.circuit_breaker, BreakerState::Halted);
    assert_eq!(status.portfolio.total_open, 0);
    assert!(status.portfolio.positions.is_empty());
    assert_eq!(status.portfolio.count_for("EUR_USD"), 0);

    // Nothing comes back on restart either
    assert!(h.ledger.open_positions().await.unwrap().is_empty());
    let closures = h.ledger.closures().await.unwrap();
    assert_eq!(closures.len(), 1);
    assert_eq!(closures[0].reason, ExitReason::EmergencyStop);
}

#[tokio::test]
async fn test_transient_failures_roll_back_and_record_unexecuted() {
    let h = Harness::new(&["EUR_USD"]).await;
    h.broker.set_error(ExecutionError::Transient("gateway timeout".into()));

    let report = h.coordinator.run_tick().await.unwrap();
    assert_eq!(report.filled, 0);
    assert_eq!(report.unexecuted, report.accepted);
    // Three attempts per accepted decision
    assert_eq!(h.broker.place_attempts(), report.accepted * 3);
    assert_eq!(h.coordinator.get_status().await.portfolio.total_open, 0);

    let entries = h.coordinator.get_recent_entries(10).await.unwrap();
    assert!(entries
        .iter()
        .filter(|e| e.decision.is_accepted())
        .all(|e| matches!(&e.execution, ExecutionStatus::Unexecuted { reason } if reason.contains("retries exhausted"))));
}

#[tokio::test]
async fn test_definitive_rejection_not_retried() {
    let h = Harness::new(&["EUR_USD"]).await;
    h.broker.set_error(ExecutionError::Rejected("insufficient margin".into()));

    let report = h.coordinator.run_tick().await.unwrap();
    assert_eq!(report.broker_rejected, report.accepted);
    assert_eq!(h.broker.place_attempts(), report.accepted);
    assert_eq!(h.coordinator.get_status().await.portfolio.total_open, 0);
}

#[tokio::test]
async fn test_drawdown_mid_tick_halts_before_next_tick() {
    let mut settings = settings(&["EUR_USD", "GBP_USD"]);
    settings.exits.enabled = false;
    let breaker = BreakerConfig {
        max_drawdown: 0.01,
        ..BreakerConfig::default()
    };
    let h = Harness::with(settings, breaker, TradeLedger::in_memory().await.unwrap()).await;

    let first = h.coordinator.run_tick().await.unwrap();
    assert!(first.filled > 0);
    assert_eq!(first.breaker, Some(BreakerState::Normal));

    // Prices collapse before the next tick
    for pair in ["EUR_USD", "GBP_USD"] {
        h.feed.push_bar(pair, bar_now(50.0));
    }
    let placed_before = h.broker.placed();
    let second = h.coordinator.run_tick().await.unwrap();

    // Decisions finalised in this tick were still honoured
    assert_eq!(second.filled, second.accepted);
    assert_eq!(h.broker.placed(), placed_before + second.filled);
    assert_eq!(second.breaker, Some(BreakerState::Halted));
    assert_eq!(h.coordinator.get_status().await.circuit_breaker, BreakerState::Halted);

    // Automatic halts do not liquidate; they only stop new orders
    assert_eq!(h.broker.close_all_calls(), 0);
    let third = h.coordinator.run_tick().await.unwrap();
    assert_eq!(third.accepted, 0);
    assert_eq!(h.broker.placed(), placed_before + second.filled);
}

#[tokio::test]
async fn test_reset_refused_while_drawdown_high() {
    let mut settings = settings(&["EUR_USD"]);
    settings.exits.enabled = false;
    let breaker = BreakerConfig {
        max_drawdown: 0.01,
        ..BreakerConfig::default()
    };
    let h = Harness::with(settings, breaker, TradeLedger::in_memory().await.unwrap()).await;

    h.coordinator.run_tick().await.unwrap();
    h.feed.push_bar("EUR_USD", bar_now(50.0));
    h.coordinator.run_tick().await.unwrap();
    assert_eq!(h.coordinator.breaker().state(), BreakerState::Halted);

    let before = h.coordinator.breaker().snapshot();
    assert!(h.coordinator.reset_after_halt().await.is_err());
    let after = h.coordinator.breaker().snapshot();
    assert_eq!(after.state, BreakerState::Halted);
    assert_eq!(after.history.len(), before.history.len());
}

#[tokio::test]
async fn test_reset_after_flat_halt_resumes_trading() {
    let h = Harness::new(&["EUR_USD"]).await;
    h.coordinator.trigger_emergency_stop("drill");
    h.coordinator.wait_for_pending_close().await;

    assert_eq!(h.coordinator.reset_after_halt().await.unwrap(), BreakerState::Normal);
    let report = h.coordinator.run_tick().await.unwrap();
    assert_eq!(report.filled, report.accepted);
    assert!(report.accepted > 0);
}
