//! Coordinator: the fixed-period tick that drives the pipeline.
//!
//! One tick:
//! 1. Refresh macro indicators (cached) and classify the economic cycle.
//! 2. Fan out one task per instrument: series → regime + technicals →
//!    advisory → signal. Each task runs under a timeout; a timed-out
//!    instrument holds.
//! 3. Critical section: mark to market, then gate, size and reserve every
//!    signal in ranked order under the portfolio lock.
//! 4. Outside the lock: place accepted orders (breaker re-read first),
//!    confirm or roll back the reservation, append each decision to the
//!    ledger.
//! 5. Close positions past their stop loss or take profit.
//! 6. Re-evaluate the circuit breaker and persist its state.
//!
//! Emergency stop is synchronous with respect to the breaker and hands the
//! close-all request to a background task.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::accountant::{Accountant, ExitConfig, TickReport};
use super::circuit_breaker::CircuitBreaker;
use super::executor::{status_for, Executor};
use super::EngineSettings;
use crate::analysis::cycle::CycleClassifier;
use crate::analysis::regime::RegimeClassifier;
use crate::analysis::technical::TechnicalAnalyzer;
use crate::data::{MacroCache, MarketFeed};
use crate::llm::{AdvisoryContext, AdvisoryOracle};
use crate::platforms::{ClosedPosition, ExecutionAdapter};
use crate::storage::{self, ledger::TradeLedger};
use crate::strategy::risk::RiskGate;
use crate::strategy::signal::SignalGenerator;
use crate::strategy::sizing::PositionSizer;
use crate::strategy::StrategyOrchestrator;
use crate::types::{
    AegisError, AssetClass, BreakerState, ClosureRecord, CyclePhase, EconomicCycle,
    ExecutionStatus, ExitReason, Instrument, LedgerEntry, MarketRegime, OpenPosition,
    PortfolioSnapshot, PortfolioState, RejectionReason, RiskDecision, Signal,
};

/// Upper bound on `get_recent_decisions` page size.
pub const MAX_RECENT_DECISIONS: u32 = 500;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub instruments: Vec<Instrument>,
    pub initial_equity: Decimal,
    /// Bars requested per instrument each tick.
    pub lookback: usize,
    /// Per-instrument analysis timeout (ms).
    pub analysis_timeout_ms: u64,
    /// Series older than this are treated as absent.
    pub max_series_age_hours: i64,
    /// Minimum interval between macro refreshes.
    pub macro_refresh_secs: u64,
    /// Breaker state file; `None` disables persistence.
    pub state_path: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            instruments: vec![
                Instrument::new("EUR_USD", AssetClass::Currency),
                Instrument::new("SPX500_USD", AssetClass::Index),
                Instrument::new("XAU_USD", AssetClass::Commodity),
                Instrument::new("US10Y", AssetClass::Bond),
            ],
            initial_equity: Decimal::from(100_000),
            lookback: 120,
            analysis_timeout_ms: 10_000,
            max_series_age_hours: 48,
            macro_refresh_secs: 3600,
            state_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// What `get_status` reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub circuit_breaker: BreakerState,
    pub breaker_since: DateTime<Utc>,
    pub breaker_reason: Option<String>,
    pub portfolio: PortfolioSnapshot,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub ticks: u64,
    pub last_report: Option<TickReport>,
}

// ---------------------------------------------------------------------------
// Per-instrument analysis (runs in spawned tasks)
// ---------------------------------------------------------------------------

/// Result of one instrument's fan-out task.
#[derive(Debug, Clone)]
pub struct InstrumentAnalysis {
    pub instrument: Instrument,
    pub regime: MarketRegime,
    pub last_close: Option<f64>,
    pub signal: Option<Signal>,
}

struct AnalysisPipeline {
    feed: Arc<dyn MarketFeed>,
    oracle: Option<Arc<dyn AdvisoryOracle>>,
    regime: RegimeClassifier,
    technical: TechnicalAnalyzer,
    signals: SignalGenerator,
    lookback: usize,
    max_series_age: chrono::Duration,
}

impl AnalysisPipeline {
    async fn analyze(
        &self,
        instrument: Instrument,
        cycle: EconomicCycle,
        now: DateTime<Utc>,
    ) -> InstrumentAnalysis {
        let series = match self.feed.get_recent_series(&instrument.id, self.lookback).await {
            Ok(s) if s.is_stale(now, self.max_series_age) => {
                warn!(
                    instrument = %instrument.id,
                    as_of = %s.as_of,
                    "Price series stale, treating as absent"
                );
                None
            }
            Ok(s) => Some(s),
            Err(e) => {
                warn!(instrument = %instrument.id, error = %e, "Price series unavailable");
                None
            }
        };

        let regime = series
            .as_ref()
            .map(|s| self.regime.classify(s))
            .unwrap_or_else(MarketRegime::unknown);
        let technical = series
            .as_ref()
            .and_then(|s| self.technical.analyze(&s.closes()));
        let last_close = series.as_ref().and_then(|s| s.last_close());

        let advisory = match &self.oracle {
            Some(oracle) => {
                let context = AdvisoryContext {
                    instrument: instrument.clone(),
                    regime,
                    cycle,
                    technical: technical.as_ref().map(|t| t.summary()),
                    last_close,
                };
                match oracle.suggest(&context).await {
                    Ok(suggestion) => suggestion,
                    Err(e) => {
                        warn!(
                            instrument = %instrument.id,
                            model = oracle.model_name(),
                            error = %e,
                            "Advisory unavailable, technical path only"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        let signal = self.signals.generate(
            &instrument,
            technical.as_ref(),
            advisory.as_ref(),
            regime,
            cycle,
        );
        debug!(
            instrument = %instrument.id,
            regime = %regime,
            signal = ?signal.as_ref().map(|s| s.to_string()),
            "Instrument analysed"
        );

        InstrumentAnalysis {
            instrument,
            regime,
            last_close,
            signal,
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct Coordinator {
    config: CoordinatorConfig,
    analysis: Arc<AnalysisPipeline>,
    cycle: CycleClassifier,
    strategy: StrategyOrchestrator,
    exits: ExitConfig,
    macro_cache: MacroCache,
    executor: Arc<Executor>,
    breaker: Arc<CircuitBreaker>,
    ledger: Arc<TradeLedger>,
    portfolio: Arc<Mutex<PortfolioState>>,
    /// Serialises ticks; holds the last cycle phase seen.
    tick_memory: Mutex<Option<CyclePhase>>,
    tick: AtomicU64,
    last_tick_at: RwLock<Option<DateTime<Utc>>>,
    last_report: RwLock<Option<TickReport>>,
    /// Set once close-all has been requested for the current halt.
    close_requested: Arc<AtomicBool>,
    pending_close: std::sync::Mutex<Option<JoinHandle<()>>>,
    /// Failed ledger writes since start.
    ledger_faults: Arc<AtomicUsize>,
}

impl Coordinator {
    pub fn new(
        settings: EngineSettings,
        feed: Arc<dyn MarketFeed>,
        oracle: Option<Arc<dyn AdvisoryOracle>>,
        adapter: Arc<dyn ExecutionAdapter>,
        breaker: Arc<CircuitBreaker>,
        ledger: Arc<TradeLedger>,
    ) -> Self {
        let EngineSettings {
            coordinator: config,
            regime,
            cycle,
            technical,
            signal,
            limits,
            sizing,
            exits,
            executor,
        } = settings;

        let analysis = AnalysisPipeline {
            feed: feed.clone(),
            oracle,
            regime: RegimeClassifier::new(regime),
            technical: TechnicalAnalyzer::new(technical),
            signals: SignalGenerator::new(signal),
            lookback: config.lookback,
            max_series_age: chrono::Duration::hours(config.max_series_age_hours),
        };
        let strategy = StrategyOrchestrator::new(
            RiskGate::new(limits.clone()),
            PositionSizer::new(sizing, limits),
        );
        let macro_cache = MacroCache::new(feed, Duration::from_secs(config.macro_refresh_secs));
        let portfolio = PortfolioState::new(config.initial_equity);

        Self {
            analysis: Arc::new(analysis),
            cycle: CycleClassifier::new(cycle),
            strategy,
            exits,
            macro_cache,
            executor: Arc::new(Executor::new(adapter, executor)),
            breaker,
            ledger,
            portfolio: Arc::new(Mutex::new(portfolio)),
            tick_memory: Mutex::new(None),
            tick: AtomicU64::new(0),
            last_tick_at: RwLock::new(None),
            last_report: RwLock::new(None),
            close_requested: Arc::new(AtomicBool::new(false)),
            pending_close: std::sync::Mutex::new(None),
            ledger_faults: Arc::new(AtomicUsize::new(0)),
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    pub async fn portfolio_snapshot(&self) -> PortfolioSnapshot {
        self.portfolio.lock().await.snapshot()
    }

    /// Rebuild the portfolio from the ledger: open positions are filled
    /// decisions without a closure, realised P&L is the sum of closures.
    /// Returns the restored positions so the caller can seed its venue.
    pub async fn restore_from_ledger(&self) -> Result<Vec<OpenPosition>, AegisError> {
        let positions = self.ledger.open_positions().await?;
        let realized = self.ledger.realized_pnl().await?;
        let losses = self.ledger.consecutive_losses().await?;
        let last_tick = self.ledger.last_tick().await?;

        let mut portfolio = self.portfolio.lock().await;
        portfolio.realized_pnl = realized;
        portfolio.consecutive_losses = losses;
        for position in &positions {
            portfolio.restore(position.clone());
        }
        portfolio.recompute_unrealized();
        portfolio.update_peak();
        portfolio.day_start_equity = portfolio.equity();
        self.tick.store(last_tick, Ordering::SeqCst);

        info!(
            open_positions = positions.len(),
            realized_pnl = format!("${:.2}", realized),
            equity = format!("${:.2}", portfolio.equity()),
            last_tick,
            "Portfolio restored from ledger"
        );
        Ok(positions)
    }

    // -- Tick -------------------------------------------------------------

    /// Run one full tick.
    ///
    /// An internal invariant violation aborts the tick: reservations are
    /// rolled back, the breaker moves to `Warning` and the error is returned.
    pub async fn run_tick(&self) -> Result<TickReport, AegisError> {
        let mut previous_cycle = self.tick_memory.lock().await;
        let tick = self.tick.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Utc::now();
        let faults_before = self.ledger_faults.load(Ordering::SeqCst);
        info!(
            tick,
            instruments = self.config.instruments.len(),
            breaker = %self.breaker.state(),
            "Tick started"
        );

        // Macro data is shared by every instrument this tick
        let indicators = self.macro_cache.get().await;
        let cycle = self
            .cycle
            .classify(indicators.as_ref(), started, *previous_cycle);
        if cycle.confidence > 0.0 {
            *previous_cycle = Some(cycle.phase);
        }

        let (analyses, timed_out) = self.fan_out(cycle, started).await;
        let prices: BTreeMap<String, Decimal> = analyses
            .iter()
            .filter_map(|a| Some((a.instrument.id.clone(), Decimal::from_f64(a.last_close?)?)))
            .collect();
        let signals: Vec<Signal> = analyses.into_iter().filter_map(|a| a.signal).collect();

        let mut report = TickReport {
            tick,
            instruments: self.config.instruments.len(),
            timed_out,
            signals: signals.len(),
            ..TickReport::default()
        };

        // -- Critical section --
        let outcome = {
            let mut portfolio = self.portfolio.lock().await;
            portfolio.roll_day(started.date_naive());
            Accountant::mark_to_market(&mut portfolio, &prices);
            report.equity_before = portfolio.equity();
            let breaker = &self.breaker;
            self.strategy
                .evaluate_signals(signals, &mut portfolio, || breaker.state())
        };
        let decisions = match outcome {
            Ok(decisions) => decisions,
            Err(e) => return Err(self.abort_tick(report, started, e)),
        };

        // -- Execution, outside the lock --
        for decision in decisions {
            let execution = match decision.size() {
                Some(size) => {
                    report.accepted += 1;
                    self.execute(&decision, size).await
                }
                None => {
                    report.rejected += 1;
                    ExecutionStatus::NotApplicable
                }
            };
            match execution {
                ExecutionStatus::Filled { .. } => report.filled += 1,
                ExecutionStatus::Unexecuted { .. } => report.unexecuted += 1,
                ExecutionStatus::BrokerRejected { .. } => report.broker_rejected += 1,
                ExecutionStatus::NotApplicable => {}
            }
            let entry = LedgerEntry {
                tick,
                recorded_at: Utc::now(),
                decision,
                execution,
            };
            if let Err(e) = self.ledger.append(&entry).await {
                error!(tick, id = %entry.decision.id, error = %e, "Failed to append ledger entry");
                let filled = matches!(entry.execution, ExecutionStatus::Filled { .. });
                ledger_fault(
                    &self.breaker,
                    &self.ledger_faults,
                    &format!("decision {}: {e}", entry.decision.id),
                    filled,
                );
            }
        }

        // -- Exits --
        let exits = {
            let portfolio = self.portfolio.lock().await;
            Accountant::exit_candidates(&portfolio, &self.exits)
        };
        for exit in exits {
            info!(
                order_id = %exit.order_id,
                instrument = %exit.instrument,
                reason = %exit.reason,
                return_pct = format!("{:.2}%", exit.return_fraction * Decimal::from(100)),
                "Exit triggered"
            );
            if self.close_one(&exit.order_id, exit.reason).await {
                report.exits += 1;
            }
        }

        // -- Breaker --
        let (health, equity_after) = {
            let mut portfolio = self.portfolio.lock().await;
            portfolio.update_peak();
            (portfolio.health(), portfolio.equity())
        };
        let state = self.breaker.evaluate(&health);
        self.persist_breaker();

        report.equity_after = equity_after;
        report.ledger_failures = self.ledger_faults.load(Ordering::SeqCst) - faults_before;
        report.breaker = Some(state);
        report.finished_at = Some(Utc::now());
        self.record_tick(started, &report);
        Accountant::log_report(&report);
        Ok(report)
    }

    async fn fan_out(
        &self,
        cycle: EconomicCycle,
        now: DateTime<Utc>,
    ) -> (Vec<InstrumentAnalysis>, usize) {
        let timeout = Duration::from_millis(self.config.analysis_timeout_ms);
        let handles: Vec<_> = self
            .config
            .instruments
            .iter()
            .cloned()
            .map(|instrument| {
                let pipeline = self.analysis.clone();
                tokio::spawn(async move {
                    tokio::time::timeout(timeout, pipeline.analyze(instrument, cycle, now)).await
                })
            })
            .collect();

        let mut analyses = Vec::with_capacity(handles.len());
        let mut timed_out = 0;
        for (instrument, joined) in self.config.instruments.iter().zip(join_all(handles).await) {
            match joined {
                Ok(Ok(analysis)) => analyses.push(analysis),
                Ok(Err(_)) => {
                    timed_out += 1;
                    warn!(
                        instrument = %instrument.id,
                        timeout_ms = self.config.analysis_timeout_ms,
                        "Analysis timed out, holding"
                    );
                }
                Err(e) => {
                    error!(instrument = %instrument.id, error = %e, "Analysis task failed, holding");
                }
            }
        }
        (analyses, timed_out)
    }

    /// Place one accepted order and settle its reservation.
    async fn execute(&self, decision: &RiskDecision, size: Decimal) -> ExecutionStatus {
        let instrument = &decision.signal.instrument.id;
        let action = decision.signal.action;

        let state = self.breaker.state();
        if state.blocks_trading() {
            warn!(
                id = %decision.id,
                instrument = %instrument,
                breaker = %state,
                "Breaker tripped after decision, order not placed"
            );
            self.portfolio.lock().await.release(instrument);
            return ExecutionStatus::Unexecuted {
                reason: RejectionReason::TradingHalted.code().to_string(),
            };
        }

        let result = self.executor.place_order(instrument, action, size).await;
        let status = status_for(&result);
        match result {
            Ok(fill) => {
                let early = {
                    let mut portfolio = self.portfolio.lock().await;
                    portfolio.confirm(OpenPosition {
                        id: decision.id,
                        order_id: fill.order_id.clone(),
                        instrument: instrument.clone(),
                        action,
                        notional: size,
                        entry_price: fill.fill_price,
                        mark_price: fill.fill_price,
                        opened_at: fill.filled_at,
                    });
                    portfolio
                        .take_early_closure(&fill.order_id)
                        .and_then(|(exit_price, reason)| {
                            let closed = ClosedPosition {
                                order_id: fill.order_id.clone(),
                                instrument: instrument.clone(),
                                exit_price,
                            };
                            Accountant::settle(&mut portfolio, &closed, reason)
                        })
                };
                if let Some(record) = early {
                    // Venue closed the position before the fill was confirmed
                    warn!(order_id = %fill.order_id, reason = %record.reason, "Fill already closed at venue");
                    record_closures(&self.ledger, &self.breaker, &self.ledger_faults, &[record]).await;
                } else if self.breaker.state().blocks_trading()
                    && self.close_requested.load(Ordering::SeqCst)
                {
                    // Emergency stop landed while the order was in flight
                    warn!(order_id = %fill.order_id, "Closing position filled during emergency stop");
                    self.close_one(&fill.order_id, ExitReason::EmergencyStop).await;
                }
            }
            Err(e) => {
                warn!(
                    id = %decision.id,
                    instrument = %instrument,
                    error = %e,
                    status = status.label(),
                    "Order not filled, reservation rolled back"
                );
                self.portfolio.lock().await.release(instrument);
            }
        }
        status
    }

    /// Close one position through the venue and realise it. Returns whether
    /// the closure was settled.
    async fn close_one(&self, order_id: &str, reason: ExitReason) -> bool {
        match self.executor.close_position(order_id).await {
            Ok(closed) => {
                settle_closures(
                    &self.portfolio,
                    &self.ledger,
                    &self.breaker,
                    &self.ledger_faults,
                    &[closed],
                    reason,
                )
                .await
                    > 0
            }
            Err(e) => {
                warn!(order_id, reason = %reason, error = %e, "Failed to close position");
                false
            }
        }
    }

    fn abort_tick(&self, mut report: TickReport, started: DateTime<Utc>, e: AegisError) -> AegisError {
        error!(tick = report.tick, error = %e, "Tick aborted");
        self.breaker.flag_invariant_violation(&e.to_string());
        self.persist_breaker();
        report.aborted = Some(e.to_string());
        report.breaker = Some(self.breaker.state());
        report.finished_at = Some(Utc::now());
        self.record_tick(started, &report);
        e
    }

    fn record_tick(&self, started: DateTime<Utc>, report: &TickReport) {
        *self.last_tick_at.write().unwrap_or_else(|e| e.into_inner()) = Some(started);
        *self.last_report.write().unwrap_or_else(|e| e.into_inner()) = Some(report.clone());
    }

    fn persist_breaker(&self) {
        if let Some(path) = &self.config.state_path {
            if let Err(e) = storage::save_breaker_state(&self.breaker.snapshot(), Some(path)) {
                error!(path = %path, error = %e, "Failed to persist breaker state");
            }
        }
    }

    // -- Operator surface -------------------------------------------------

    /// Halt trading immediately and request closure of every open position.
    ///
    /// Idempotent: repeated calls leave the breaker `Halted` and request
    /// close-all only once per halt. Never waits for the venue.
    pub fn trigger_emergency_stop(&self, reason: &str) -> BreakerState {
        let transitioned = self.breaker.emergency_stop(reason);
        if transitioned {
            self.persist_breaker();
        }

        if self.close_requested.swap(true, Ordering::SeqCst) {
            debug!("Close-all already requested for this halt");
        } else {
            self.spawn_close_all();
        }
        self.breaker.state()
    }

    fn spawn_close_all(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("No async runtime available, close-all not requested");
            self.close_requested.store(false, Ordering::SeqCst);
            return;
        };

        let executor = self.executor.clone();
        let portfolio = self.portfolio.clone();
        let ledger = self.ledger.clone();
        let breaker = self.breaker.clone();
        let faults = self.ledger_faults.clone();
        let requested = self.close_requested.clone();

        let task = runtime.spawn(async move {
            match executor.close_all_positions().await {
                Ok(closed) => {
                    let settled = settle_closures(
                        &portfolio,
                        &ledger,
                        &breaker,
                        &faults,
                        &closed,
                        ExitReason::EmergencyStop,
                    )
                    .await;
                    info!(closed = closed.len(), settled, "Emergency close-all complete");
                }
                Err(e) => {
                    // Let a later emergency stop request it again
                    requested.store(false, Ordering::SeqCst);
                    error!(error = %e, "Emergency close-all failed");
                }
            }
        });
        *self.pending_close.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    /// Wait for an outstanding emergency close-all, if any.
    pub async fn wait_for_pending_close(&self) {
        let task = self
            .pending_close
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Close-all task failed");
            }
        }
    }

    /// Operator reset out of `Halted`. Rejected unless drawdown is below the
    /// warning threshold. On success the loss streak and daily baseline
    /// start over.
    pub async fn reset_after_halt(&self) -> Result<BreakerState, AegisError> {
        let mut portfolio = self.portfolio.lock().await;
        let drawdown = portfolio.drawdown();
        let state = self.breaker.reset_after_halt(drawdown)?;
        portfolio.acknowledge_losses();
        drop(portfolio);

        self.close_requested.store(false, Ordering::SeqCst);
        self.persist_breaker();
        info!(state = %state, drawdown = format!("{:.2}%", drawdown * 100.0), "Trading resumed after reset");
        Ok(state)
    }

    pub async fn get_status(&self) -> CoordinatorStatus {
        let breaker = self.breaker.snapshot();
        CoordinatorStatus {
            circuit_breaker: breaker.state,
            breaker_since: breaker.since,
            breaker_reason: breaker.reason,
            portfolio: self.portfolio_snapshot().await,
            last_tick_at: *self.last_tick_at.read().unwrap_or_else(|e| e.into_inner()),
            ticks: self.tick.load(Ordering::SeqCst),
            last_report: self
                .last_report
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }

    /// Most recent ledger entries (decision + execution), newest first.
    pub async fn get_recent_entries(&self, limit: u32) -> Result<Vec<LedgerEntry>, AegisError> {
        self.ledger
            .recent(limit.clamp(1, MAX_RECENT_DECISIONS))
            .await
    }

    /// Most recent gate decisions, newest first.
    pub async fn get_recent_decisions(&self, limit: u32) -> Result<Vec<RiskDecision>, AegisError> {
        Ok(self
            .get_recent_entries(limit)
            .await?
            .into_iter()
            .map(|e| e.decision)
            .collect())
    }
}

/// Realise venue closures against the portfolio and record them.
async fn settle_closures(
    portfolio: &Mutex<PortfolioState>,
    ledger: &TradeLedger,
    breaker: &CircuitBreaker,
    faults: &AtomicUsize,
    closed: &[ClosedPosition],
    reason: ExitReason,
) -> usize {
    let records = {
        let mut portfolio = portfolio.lock().await;
        Accountant::settle_all(&mut portfolio, closed, reason)
    };
    record_closures(ledger, breaker, faults, &records).await;
    records.len()
}

async fn record_closures(
    ledger: &TradeLedger,
    breaker: &CircuitBreaker,
    faults: &AtomicUsize,
    records: &[ClosureRecord],
) {
    for record in records {
        if let Err(e) = ledger.record_closure(record).await {
            error!(order_id = %record.order_id, error = %e, "Failed to record closure");
            ledger_fault(breaker, faults, &format!("closure {}: {e}", record.order_id), true);
        }
    }
}

/// Count a failed ledger write. An unrecorded fill or closure would be
/// misstated on restart, so `halt` stops trading until an operator reset;
/// other entries only raise a warning.
fn ledger_fault(breaker: &CircuitBreaker, faults: &AtomicUsize, detail: &str, halt: bool) {
    faults.fetch_add(1, Ordering::SeqCst);
    let reason = format!("ledger write failed: {detail}");
    if halt {
        breaker.halt(&reason);
    } else {
        breaker.flag_invariant_violation(&reason);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
