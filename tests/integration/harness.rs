//! Shared fixtures: price series, macro snapshots and a wired coordinator.

use chrono::{Duration, Utc};
use std::sync::Arc;

use aegis::data::snapshot::SnapshotFeed;
use aegis::engine::circuit_breaker::{BreakerConfig, CircuitBreaker};
use aegis::engine::coordinator::Coordinator;
use aegis::engine::EngineSettings;
use aegis::storage::ledger::TradeLedger;
use aegis::types::{AssetClass, Instrument, MacroIndicators, PriceBar};

use crate::mock_broker::MockBroker;

/// Zigzag uptrend ending now: fast EMA above slow, RSI clear of overbought.
pub fn uptrend(n: usize) -> Vec<PriceBar> {
    let now = Utc::now();
    (0..n)
        .map(|i| {
            let drift = 100.0 + i as f64 * 0.3;
            let close = if i % 2 == 0 { drift + 0.8 } else { drift - 0.8 };
            PriceBar {
                timestamp: now - Duration::minutes((n - i) as i64 * 15),
                open: close,
                high: close + 0.5,
                low: close - 0.5,
                close,
                volume: 1000.0,
            }
        })
        .collect()
}

/// A bar at `close` stamped now.
pub fn bar_now(close: f64) -> PriceBar {
    PriceBar {
        timestamp: Utc::now(),
        open: close,
        high: close,
        low: close,
        close,
        volume: 1000.0,
    }
}

/// Expansion-shaped indicators observed `age_hours` ago.
pub fn macro_aged(age_hours: i64) -> MacroIndicators {
    MacroIndicators {
        gdp_growth: 3.0,
        gdp_growth_prev: Some(2.8),
        inflation: 2.2,
        inflation_prev: Some(2.3),
        unemployment: 3.8,
        consumer_confidence: Some(100.0),
        as_of: Utc::now() - Duration::hours(age_hours),
    }
}

/// Engine settings for `instruments`, with the confidence floor lowered so
/// the uptrend fixture's signals clear the gate.
pub fn settings(instruments: &[&str]) -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.coordinator.instruments = instruments
        .iter()
        .map(|id| Instrument::new(id, AssetClass::Currency))
        .collect();
    settings.coordinator.analysis_timeout_ms = 2_000;
    settings.executor.base_backoff_ms = 1;
    settings.limits.confidence_floor = 0.5;
    settings.limits.uncertain_regime_margin = 0.0;
    settings
}

pub struct Harness {
    pub feed: Arc<SnapshotFeed>,
    pub broker: Arc<MockBroker>,
    pub ledger: Arc<TradeLedger>,
    pub coordinator: Arc<Coordinator>,
}

impl Harness {
    /// Coordinator over an in-memory ledger with every instrument trending up.
    pub async fn new(instruments: &[&str]) -> Self {
        let ledger = TradeLedger::in_memory().await.unwrap();
        Self::with(settings(instruments), BreakerConfig::default(), ledger).await
    }

    pub async fn with(settings: EngineSettings, breaker: BreakerConfig, ledger: TradeLedger) -> Self {
        let feed = Arc::new(SnapshotFeed::new());
        for instrument in &settings.coordinator.instruments {
            feed.set_series(&instrument.id, uptrend(120));
        }
        feed.set_macro(Some(macro_aged(1)));
        Self::over(feed, settings, CircuitBreaker::new(breaker), ledger)
    }

    /// Wire a coordinator over an existing feed and breaker.
    pub fn over(
        feed: Arc<SnapshotFeed>,
        settings: EngineSettings,
        breaker: CircuitBreaker,
        ledger: TradeLedger,
    ) -> Self {
        let broker = Arc::new(MockBroker::new(feed.clone()));
        let ledger = Arc::new(ledger);
        let coordinator = Arc::new(Coordinator::new(
            settings,
            feed.clone(),
            None,
            broker.clone(),
            Arc::new(breaker),
            ledger.clone(),
        ));
        Self {
            feed,
            broker,
            ledger,
            coordinator,
        }
    }
}

/// Unique temp file path with the given extension.
pub fn temp_path(ext: &str) -> String {
    let mut p = std::env::temp_dir();
    p.push(format!("aegis_it_{}.{ext}", uuid::Uuid::new_v4()));
    p.to_string_lossy().to_string()
}
