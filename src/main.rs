//! AEGIS: autonomous trading decision core.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the ledger and breaker state from disk, and runs the
//! analyse→gate→execute tick loop with graceful shutdown.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use aegis::config::AppConfig;
use aegis::dashboard;
use aegis::data::fred::FredFeed;
use aegis::data::snapshot::SnapshotFeed;
use aegis::data::MarketFeed;
use aegis::engine::circuit_breaker::CircuitBreaker;
use aegis::engine::coordinator::Coordinator;
use aegis::llm::openrouter::OpenRouterAdvisor;
use aegis::llm::AdvisoryOracle;
use aegis::platforms::paper::PaperBroker;
use aegis::platforms::BrokerPosition;
use aegis::storage::{self, ledger::TradeLedger};

const BANNER: &str = r#"
    _    _____ ____ ___ ____
   / \  | ____/ ___|_ _/ ___|
  / _ \ |  _|| |  _ | |\___ \
 / ___ \| |__| |_| || | ___) |
/_/   \_\_____\____|___|____/

  Autonomous trading decision core
  v0.1.0 (paper)
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("AEGIS_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        tick_interval_secs = cfg.agent.tick_interval_secs,
        instruments = cfg.coordinator.instruments.len(),
        initial_equity = format!("${:.2}", cfg.coordinator.initial_equity),
        "AEGIS starting up"
    );

    // -- Components --------------------------------------------------------

    let snapshot = Arc::new(match cfg.data.snapshot_path.as_deref() {
        Some(path) => SnapshotFeed::from_file(path)?,
        None => {
            warn!("No snapshot file configured, starting with an empty feed");
            SnapshotFeed::new()
        }
    });
    let feed = build_feed(&cfg, snapshot.clone())?;
    let advisor = build_advisor(&cfg)?;
    let broker = Arc::new(PaperBroker::new(snapshot.clone()));

    let ledger = Arc::new(
        TradeLedger::open(&cfg.agent.ledger_path)
            .await
            .context("Failed to open trade ledger")?,
    );

    let breaker_config = cfg.breaker_config();
    let breaker = match storage::load_breaker_state(Some(&cfg.agent.state_path))? {
        Some(snapshot) => CircuitBreaker::restore(breaker_config, snapshot),
        None => CircuitBreaker::new(breaker_config),
    };
    let breaker = Arc::new(breaker);

    let coordinator = Arc::new(Coordinator::new(
        cfg.engine_settings(),
        feed,
        advisor,
        broker.clone(),
        breaker,
        ledger,
    ));

    // -- Restore -----------------------------------------------------------

    let restored = coordinator.restore_from_ledger().await?;
    broker
        .restore(
            restored
                .into_iter()
                .map(|p| BrokerPosition {
                    order_id: p.order_id,
                    instrument: p.instrument,
                    action: p.action,
                    notional: p.notional,
                    entry_price: p.entry_price,
                })
                .collect(),
        )
        .await;

    let status = coordinator.get_status().await;
    info!(
        breaker = %status.circuit_breaker,
        equity = format!("${:.2}", status.portfolio.equity),
        open_positions = status.portfolio.total_open,
        "State restored"
    );

    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(coordinator.clone(), cfg.dashboard.port)?;
    }

    // -- Main loop ---------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.agent.tick_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.agent.tick_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = coordinator.run_tick().await {
                    error!(error = %e, "Tick aborted, continuing to next");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    coordinator.wait_for_pending_close().await;
    storage::save_breaker_state(&coordinator.breaker().snapshot(), Some(&cfg.agent.state_path))?;
    coordinator.ledger().close().await;

    let status = coordinator.get_status().await;
    info!(
        breaker = %status.circuit_breaker,
        ticks = status.ticks,
        equity = format!("${:.2}", status.portfolio.equity),
        realized_pnl = format!("${:.2}", status.portfolio.realized_pnl),
        open_positions = status.portfolio.total_open,
        "AEGIS shut down cleanly."
    );

    Ok(())
}

/// Prices come from the snapshot; macro data from FRED when a key is set.
fn build_feed(cfg: &AppConfig, snapshot: Arc<SnapshotFeed>) -> Result<Arc<dyn MarketFeed>> {
    let key = cfg
        .data
        .fred_api_key_env
        .as_deref()
        .and_then(AppConfig::resolve_secret);

    match key {
        Some(key) => {
            info!("Macro indicators from FRED");
            Ok(Arc::new(FredFeed::new(key, snapshot)?))
        }
        None => {
            info!("Macro indicators from snapshot");
            Ok(snapshot)
        }
    }
}

fn build_advisor(cfg: &AppConfig) -> Result<Option<Arc<dyn AdvisoryOracle>>> {
    if !cfg.advisory.enabled {
        info!("Advisory oracle disabled");
        return Ok(None);
    }
    let Some(key) = AppConfig::resolve_secret(&cfg.advisory.api_key_env) else {
        warn!(
            env = %cfg.advisory.api_key_env,
            "Advisory oracle enabled but no API key set, running without it"
        );
        return Ok(None);
    };

    info!(
        model = %cfg.advisory.model,
        fallback = ?cfg.advisory.fallback_model,
        "Using OpenRouter advisory oracle"
    );
    let advisor = OpenRouterAdvisor::new(
        key,
        Some(cfg.advisory.model.clone()),
        cfg.advisory.fallback_model.clone(),
        Some(cfg.advisory.max_tokens),
        cfg.advisory.timeout_secs,
    )?;
    Ok(Some(Arc::new(advisor)))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("aegis=info"));

    let json_logging = std::env::var("AEGIS_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
