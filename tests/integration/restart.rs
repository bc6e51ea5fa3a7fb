//! Restart behaviour: portfolio rebuilt from the ledger file, breaker state
//! restored from the state file.

use std::sync::Arc;

use aegis::data::snapshot::SnapshotFeed;
use aegis::engine::circuit_breaker::{BreakerConfig, CircuitBreaker};
use aegis::storage::{self, ledger::TradeLedger};
use aegis::types::BreakerState;

use crate::harness::{settings, temp_path, uptrend, Harness};

fn cleanup(paths: &[&str]) {
    for p in paths {
        let _ = std::fs::remove_file(p);
        let _ = std::fs::remove_file(format!("{p}-wal"));
        let _ = std::fs::remove_file(format!("{p}-shm"));
    }
}

#[tokio::test]
async fn test_open_positions_survive_restart() {
    let ledger_path = temp_path("db");
    let mut settings = settings(&["EUR_USD", "GBP_USD"]);
    settings.exits.enabled = false;

    let (filled, equity) = {
        let h = Harness::with(
            settings.clone(),
            BreakerConfig::default(),
            TradeLedger::open(&ledger_path).await.unwrap(),
        )
        .await;
        let report = h.coordinator.run_tick().await.unwrap();
        assert!(report.filled > 0);
        let status = h.coordinator.get_status().await;
        (report.filled, status.portfolio.equity)
    };

    let h = Harness::with(
        settings,
        BreakerConfig::default(),
        TradeLedger::open(&ledger_path).await.unwrap(),
    )
    .await;
    let restored = h.coordinator.restore_from_ledger().await.unwrap();
    assert_eq!(restored.len(), filled);

    let status = h.coordinator.get_status().await;
    assert_eq!(status.portfolio.total_open as usize, filled);
    assert_eq!(status.portfolio.equity, equity);
    assert_eq!(status.ticks, 1);

    // Tick numbering continues from the ledger
    let report = h.coordinator.run_tick().await.unwrap();
    assert_eq!(report.tick, 2);

    cleanup(&[&ledger_path]);
}

#[tokio::test]
async fn test_halt_survives_restart() {
    let state_path = temp_path("json");
    let mut settings = settings(&["EUR_USD"]);
    settings.coordinator.state_path = Some(state_path.clone());

    {
        let h = Harness::with(
            settings.clone(),
            BreakerConfig::default(),
            TradeLedger::in_memory().await.unwrap(),
        )
        .await;
        h.coordinator.trigger_emergency_stop("end of day");
        h.coordinator.wait_for_pending_close().await;
    }

    let snapshot = storage::load_breaker_state(Some(&state_path))
        .unwrap()
        .expect("breaker state should be persisted on emergency stop");
    assert_eq!(snapshot.state, BreakerState::Halted);

    let feed = Arc::new(SnapshotFeed::new());
    feed.set_series("EUR_USD", uptrend(120));
    let h = Harness::over(
        feed,
        settings,
        CircuitBreaker::restore(BreakerConfig::default(), snapshot),
        TradeLedger::in_memory().await.unwrap(),
    );

    let report = h.coordinator.run_tick().await.unwrap();
    assert_eq!(report.accepted, 0);
    assert_eq!(h.broker.place_attempts(), 0);
    assert_eq!(h.coordinator.get_status().await.circuit_breaker, BreakerState::Halted);

    storage::delete_breaker_state(Some(&state_path)).unwrap();
}
