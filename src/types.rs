//! Shared types for the AEGIS decision core.
//!
//! These types form the data model used across all modules. Classifiers,
//! the signal generator, the risk gate, and the engine depend on them
//! without depending on each other.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Instruments
// ---------------------------------------------------------------------------

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    /// Whether the action moves a position (Buy or Sell).
    pub fn is_directional(&self) -> bool {
        !matches!(self, Action::Hold)
    }

    /// Whether two actions point in opposite directions.
    /// `Hold` never opposes anything.
    pub fn opposes(&self, other: Action) -> bool {
        matches!(
            (self, other),
            (Action::Buy, Action::Sell) | (Action::Sell, Action::Buy)
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
            Action::Hold => write!(f, "HOLD"),
        }
    }
}

impl std::str::FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" | "long" => Ok(Action::Buy),
            "sell" | "short" => Ok(Action::Sell),
            "hold" | "none" | "neutral" => Ok(Action::Hold),
            _ => Err(anyhow::anyhow!("Unknown action: {s}")),
        }
    }
}

/// Broad asset class of a tradable instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Currency,
    Index,
    Commodity,
    Equity,
    Bond,
    Crypto,
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetClass::Currency => write!(f, "Currency"),
            AssetClass::Index => write!(f, "Index"),
            AssetClass::Commodity => write!(f, "Commodity"),
            AssetClass::Equity => write!(f, "Equity"),
            AssetClass::Bond => write!(f, "Bond"),
            AssetClass::Crypto => write!(f, "Crypto"),
        }
    }
}

/// A tracked instrument and the tags the risk gate reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: String,
    pub asset_class: AssetClass,
    /// Buying this instrument counts as a defensive action.
    #[serde(default)]
    pub defensive: bool,
    /// Requires the raised confidence floor.
    #[serde(default)]
    pub high_risk: bool,
}

impl Instrument {
    /// Build an instrument with tags inferred from its asset class:
    /// bonds are defensive, crypto is high-risk.
    pub fn new(id: &str, asset_class: AssetClass) -> Self {
        Self {
            id: id.to_string(),
            asset_class,
            defensive: asset_class == AssetClass::Bond,
            high_risk: asset_class == AssetClass::Crypto,
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.asset_class)?;
        if self.defensive {
            write!(f, " [defensive]")?;
        }
        if self.high_risk {
            write!(f, " [high-risk]")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Market observations
// ---------------------------------------------------------------------------

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

/// Recent bars for one instrument, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSeries {
    pub instrument: String,
    pub bars: Vec<PriceBar>,
    /// When the feed produced this series.
    pub as_of: DateTime<Utc>,
}

impl PriceSeries {
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Whether the series is older than `max_age` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now - self.as_of > max_age
    }
}

/// Aggregate macro indicators. Percentages are expressed as percent
/// (2.5 = 2.5%), not fractions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroIndicators {
    /// Real GDP growth, annualised.
    pub gdp_growth: f64,
    /// Previous period's GDP growth, for deceleration checks.
    #[serde(default)]
    pub gdp_growth_prev: Option<f64>,
    /// CPI inflation, year over year.
    pub inflation: f64,
    #[serde(default)]
    pub inflation_prev: Option<f64>,
    pub unemployment: f64,
    /// Consumer confidence / sentiment proxy.
    #[serde(default)]
    pub consumer_confidence: Option<f64>,
    /// When the indicators were observed.
    pub as_of: DateTime<Utc>,
}

impl MacroIndicators {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.as_of
    }

    pub fn is_growth_decelerating(&self) -> bool {
        self.gdp_growth_prev
            .map(|prev| self.gdp_growth < prev)
            .unwrap_or(false)
    }

    pub fn is_inflation_rising(&self) -> bool {
        self.inflation_prev
            .map(|prev| self.inflation > prev)
            .unwrap_or(false)
    }
}

impl fmt::Display for MacroIndicators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GDP {:.1}% | CPI {:.1}% | unemployment {:.1}% (as of {})",
            self.gdp_growth,
            self.inflation,
            self.unemployment,
            self.as_of.format("%Y-%m-%d %H:%M"),
        )
    }
}

// ---------------------------------------------------------------------------
// Classifications
// ---------------------------------------------------------------------------

/// Market regime label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeKind {
    Bull,
    Bear,
    Sideways,
    Crisis,
    Recovery,
    Trending,
    Choppy,
    Transitional,
}

impl RegimeKind {
    pub const ALL: &'static [RegimeKind] = &[
        RegimeKind::Bull,
        RegimeKind::Bear,
        RegimeKind::Sideways,
        RegimeKind::Crisis,
        RegimeKind::Recovery,
        RegimeKind::Trending,
        RegimeKind::Choppy,
        RegimeKind::Transitional,
    ];
}

impl fmt::Display for RegimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RegimeKind::Bull => "Bull",
            RegimeKind::Bear => "Bear",
            RegimeKind::Sideways => "Sideways",
            RegimeKind::Crisis => "Crisis",
            RegimeKind::Recovery => "Recovery",
            RegimeKind::Trending => "Trending",
            RegimeKind::Choppy => "Choppy",
            RegimeKind::Transitional => "Transitional",
        };
        write!(f, "{label}")
    }
}

/// A regime label with its confidence in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketRegime {
    pub kind: RegimeKind,
    pub confidence: f64,
}

impl MarketRegime {
    pub fn new(kind: RegimeKind, confidence: f64) -> Self {
        Self {
            kind,
            confidence: clamp_unit(confidence),
        }
    }

    /// `Transitional` with zero confidence: not enough data to say.
    pub fn unknown() -> Self {
        Self::new(RegimeKind::Transitional, 0.0)
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.0}%)", self.kind, self.confidence * 100.0)
    }
}

/// Macro-economic phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Expansion,
    Peak,
    Contraction,
    Trough,
    Transitional,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CyclePhase::Expansion => "Expansion",
            CyclePhase::Peak => "Peak",
            CyclePhase::Contraction => "Contraction",
            CyclePhase::Trough => "Trough",
            CyclePhase::Transitional => "Transitional",
        };
        write!(f, "{label}")
    }
}

/// A cycle phase with its confidence and the age of the data behind it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EconomicCycle {
    pub phase: CyclePhase,
    pub confidence: f64,
    /// Observation time of the indicators used, if any.
    pub as_of: Option<DateTime<Utc>>,
}

impl EconomicCycle {
    pub fn new(phase: CyclePhase, confidence: f64, as_of: Option<DateTime<Utc>>) -> Self {
        Self {
            phase,
            confidence: clamp_unit(confidence),
            as_of,
        }
    }

    /// `Transitional` with zero confidence: indicators absent or stale.
    pub fn unknown() -> Self {
        Self::new(CyclePhase::Transitional, 0.0, None)
    }
}

impl fmt::Display for EconomicCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.0}%)", self.phase, self.confidence * 100.0)
    }
}

// ---------------------------------------------------------------------------
// Signals and decisions
// ---------------------------------------------------------------------------

/// Structured, validated suggestion from the advisory oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorySuggestion {
    pub action: Action,
    pub confidence: f64,
    pub rationale: String,
}

/// Where a signal's direction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    /// Technical state only (no usable advisory input).
    Technical,
    /// Technical state adjusted by the advisory suggestion.
    Blended,
    /// No technical action; advisory suggestion at reduced confidence.
    AdvisoryOnly,
}

/// Candidate trade for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub instrument: Instrument,
    pub action: Action,
    pub confidence: f64,
    pub rationale: String,
    pub regime: MarketRegime,
    pub cycle: EconomicCycle,
    pub source: SignalSource,
    /// The advisory suggestion considered, kept for consensus checks and audit.
    pub advisory: Option<AdvisorySuggestion>,
}

impl Signal {
    /// Sell on anything, or Buy on an instrument tagged defensive.
    pub fn is_defensive(&self) -> bool {
        match self.action {
            Action::Sell => true,
            Action::Buy => self.instrument.defensive,
            Action::Hold => true,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} conf={:.0}% | regime={} | cycle={}",
            self.action,
            self.instrument.id,
            self.confidence * 100.0,
            self.regime,
            self.cycle,
        )
    }
}

/// Why the risk gate rejected a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "code")]
pub enum RejectionReason {
    TradingHalted,
    PositionLimit { open: u32, max: u32 },
    PortfolioLimit { open: u32, max: u32 },
    RegimeIncompatible { regime: RegimeKind },
    RegimeConfidence { required: f64 },
    CycleIncompatible { phase: CyclePhase },
    ConfidenceBelowFloor { required: f64 },
    AdvisoryDissent { advisory_confidence: f64 },
}

impl RejectionReason {
    /// Stable reason code as recorded in the ledger.
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::TradingHalted => "trading halted",
            RejectionReason::PositionLimit { .. } => "position limit reached",
            RejectionReason::PortfolioLimit { .. } => "portfolio limit reached",
            RejectionReason::RegimeIncompatible { .. } => "regime incompatible",
            RejectionReason::RegimeConfidence { .. } => "regime confidence too low",
            RejectionReason::CycleIncompatible { .. } => "cycle incompatible",
            RejectionReason::ConfidenceBelowFloor { .. } => "confidence below floor",
            RejectionReason::AdvisoryDissent { .. } => "advisory dissent",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::PositionLimit { open, max }
            | RejectionReason::PortfolioLimit { open, max } => {
                write!(f, "{} ({open}/{max})", self.code())
            }
            RejectionReason::RegimeIncompatible { regime } => {
                write!(f, "{} ({regime})", self.code())
            }
            RejectionReason::CycleIncompatible { phase } => write!(f, "{} ({phase})", self.code()),
            RejectionReason::RegimeConfidence { required }
            | RejectionReason::ConfidenceBelowFloor { required } => {
                write!(f, "{} (need {:.0}%)", self.code(), required * 100.0)
            }
            RejectionReason::AdvisoryDissent {
                advisory_confidence,
            } => write!(f, "{} ({:.0}%)", self.code(), advisory_confidence * 100.0),
            RejectionReason::TradingHalted => write!(f, "{}", self.code()),
        }
    }
}

/// Gate outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Outcome {
    /// Accepted with the notional computed by the position sizer.
    Accepted { size: Decimal },
    Rejected { reason: RejectionReason },
}

/// Immutable record of one gate evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDecision {
    pub id: Uuid,
    pub signal: Signal,
    pub outcome: Outcome,
    pub decided_at: DateTime<Utc>,
}

impl RiskDecision {
    pub fn accepted(signal: Signal, size: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            signal,
            outcome: Outcome::Accepted { size },
            decided_at: Utc::now(),
        }
    }

    pub fn rejected(signal: Signal, reason: RejectionReason) -> Self {
        Self {
            id: Uuid::new_v4(),
            signal,
            outcome: Outcome::Rejected { reason },
            decided_at: Utc::now(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, Outcome::Accepted { .. })
    }

    pub fn size(&self) -> Option<Decimal> {
        match self.outcome {
            Outcome::Accepted { size } => Some(size),
            Outcome::Rejected { .. } => None,
        }
    }

    pub fn rejection(&self) -> Option<&RejectionReason> {
        match &self.outcome {
            Outcome::Rejected { reason } => Some(reason),
            Outcome::Accepted { .. } => None,
        }
    }
}

impl fmt::Display for RiskDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Accepted { size } => {
                write!(f, "ACCEPTED {} size=${:.2}", self.signal, size)
            }
            Outcome::Rejected { reason } => write!(f, "REJECTED {} ({reason})", self.signal),
        }
    }
}

/// What happened after a decision left the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ExecutionStatus {
    /// Rejected decisions never reach the adapter.
    NotApplicable,
    Filled { order_id: String, fill_price: Decimal },
    /// Accepted but not executed: retries exhausted or trading halted first.
    Unexecuted { reason: String },
    /// The adapter refused the order definitively.
    BrokerRejected { reason: String },
}

impl ExecutionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionStatus::NotApplicable => "n/a",
            ExecutionStatus::Filled { .. } => "filled",
            ExecutionStatus::Unexecuted { .. } => "unexecuted",
            ExecutionStatus::BrokerRejected { .. } => "broker_rejected",
        }
    }
}

/// One row of the trade ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub tick: u64,
    pub recorded_at: DateTime<Utc>,
    pub decision: RiskDecision,
    pub execution: ExecutionStatus,
}

// ---------------------------------------------------------------------------
// Risk limits
// ---------------------------------------------------------------------------

/// Session-wide risk configuration. Immutable once the coordinator starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Fraction of equity risked per trade (sizing base).
    pub per_trade_risk_fraction: Decimal,
    /// Drawdown fraction at which trading halts.
    pub max_drawdown: f64,
    pub max_per_instrument: u32,
    pub max_total: u32,
    /// Baseline confidence floor (inclusive).
    pub confidence_floor: f64,
    /// Floor for instruments tagged high-risk.
    pub high_risk_confidence_floor: f64,
    /// Extra confidence required in Choppy / Transitional regimes.
    pub uncertain_regime_margin: f64,
    /// Opposing advisory confidence at or above which a signal is vetoed.
    pub advisory_veto_confidence: f64,
    pub min_position_size: Decimal,
    pub max_single_position_fraction: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            per_trade_risk_fraction: dec!(0.02),
            max_drawdown: 0.15,
            max_per_instrument: 3,
            max_total: 50,
            confidence_floor: 0.75,
            high_risk_confidence_floor: 0.90,
            uncertain_regime_margin: 0.10,
            advisory_veto_confidence: 0.85,
            min_position_size: dec!(1000),
            max_single_position_fraction: dec!(0.10),
        }
    }
}

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

/// An executed, still-open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    /// Id of the decision that opened it.
    pub id: Uuid,
    pub order_id: String,
    pub instrument: String,
    pub action: Action,
    pub notional: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl OpenPosition {
    /// Return on notional at the current mark, signed by direction.
    pub fn return_fraction(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let change = (self.mark_price - self.entry_price) / self.entry_price;
        match self.action {
            Action::Sell => -change,
            _ => change,
        }
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.notional * self.return_fraction()
    }
}

impl fmt::Display for OpenPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pnl = self.unrealized_pnl();
        let sign = if pnl >= Decimal::ZERO { "+" } else { "" };
        write!(
            f,
            "{} {} ${:.2} entry={} mark={} ({sign}{pnl:.2}) [{}]",
            self.action, self.instrument, self.notional, self.entry_price, self.mark_price, self.order_id,
        )
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    EmergencyStop,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop_loss"),
            ExitReason::TakeProfit => write!(f, "take_profit"),
            ExitReason::EmergencyStop => write!(f, "emergency_stop"),
        }
    }
}

impl std::str::FromStr for ExitReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop_loss" => Ok(ExitReason::StopLoss),
            "take_profit" => Ok(ExitReason::TakeProfit),
            "emergency_stop" => Ok(ExitReason::EmergencyStop),
            _ => Err(anyhow::anyhow!("Unknown exit reason: {s}")),
        }
    }
}

/// A realised position closure, as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureRecord {
    /// Id of the decision that opened the position.
    pub position_id: Uuid,
    pub order_id: String,
    pub instrument: String,
    pub exit_price: Decimal,
    pub pnl: Decimal,
    pub reason: ExitReason,
    pub closed_at: DateTime<Utc>,
}

/// Health metrics the circuit breaker evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PortfolioHealth {
    pub drawdown: f64,
    pub daily_loss: f64,
    pub consecutive_losses: u32,
    /// Largest loss fraction among open positions (0 when none lose).
    pub worst_position_loss: f64,
}

/// Mutable portfolio state. Owned by the coordinator and only mutated inside
/// its critical section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    /// Per-instrument count of open or in-flight positions.
    pub open_counts: BTreeMap<String, u32>,
    pub total_open: u32,
    pub positions: Vec<OpenPosition>,
    pub initial_equity: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub peak_equity: Decimal,
    pub day: NaiveDate,
    pub day_start_equity: Decimal,
    pub consecutive_losses: u32,
    /// Venue closures that arrived before their fill was confirmed, by
    /// order id.
    #[serde(skip)]
    pub early_closures: BTreeMap<String, (Decimal, ExitReason)>,
}

impl PortfolioState {
    pub fn new(initial_equity: Decimal) -> Self {
        Self {
            open_counts: BTreeMap::new(),
            total_open: 0,
            positions: Vec::new(),
            initial_equity,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            peak_equity: initial_equity,
            day: Utc::now().date_naive(),
            day_start_equity: initial_equity,
            consecutive_losses: 0,
            early_closures: BTreeMap::new(),
        }
    }

    pub fn equity(&self) -> Decimal {
        self.initial_equity + self.realized_pnl + self.unrealized_pnl
    }

    /// Drawdown from peak as a fraction (0.0 = at peak).
    pub fn drawdown(&self) -> f64 {
        if self.peak_equity <= Decimal::ZERO {
            return 0.0;
        }
        let dd = (self.peak_equity - self.equity()) / self.peak_equity;
        dd.to_f64().unwrap_or(0.0).max(0.0)
    }

    /// Loss since the start of the current UTC day, as a fraction.
    pub fn daily_loss(&self) -> f64 {
        if self.day_start_equity <= Decimal::ZERO {
            return 0.0;
        }
        let loss = (self.day_start_equity - self.equity()) / self.day_start_equity;
        loss.to_f64().unwrap_or(0.0).max(0.0)
    }

    pub fn count_for(&self, instrument: &str) -> u32 {
        self.open_counts.get(instrument).copied().unwrap_or(0)
    }

    /// Sum of open notional.
    pub fn open_notional(&self) -> Decimal {
        self.positions.iter().map(|p| p.notional).sum()
    }

    /// Optimistically count a position before the order is placed.
    pub fn reserve(&mut self, instrument: &str) {
        *self.open_counts.entry(instrument.to_string()).or_insert(0) += 1;
        self.total_open += 1;
    }

    /// Undo a reservation (order rejected or never sent).
    pub fn release(&mut self, instrument: &str) {
        if let Some(count) = self.open_counts.get_mut(instrument) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.open_counts.remove(instrument);
            }
            self.total_open = self.total_open.saturating_sub(1);
        }
    }

    /// Attach a fill to a reservation made earlier.
    pub fn confirm(&mut self, position: OpenPosition) {
        self.positions.push(position);
    }

    /// Restore a position from the ledger (reserve + confirm).
    pub fn restore(&mut self, position: OpenPosition) {
        self.reserve(&position.instrument);
        self.confirm(position);
    }

    /// Close a position at `exit_price`, realising its P&L.
    /// Returns the realised amount, or `None` if the id is unknown.
    pub fn close(&mut self, id: Uuid, exit_price: Decimal) -> Option<Decimal> {
        let idx = self.positions.iter().position(|p| p.id == id)?;
        let mut position = self.positions.remove(idx);
        position.mark_price = exit_price;
        let pnl = position.unrealized_pnl();
        self.realized_pnl += pnl;
        if pnl < Decimal::ZERO {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }
        self.release(&position.instrument);
        self.recompute_unrealized();
        self.update_peak();
        Some(pnl)
    }

    /// Mark every open position on `instrument` at `price`.
    pub fn mark(&mut self, instrument: &str, price: Decimal) {
        for p in self.positions.iter_mut().filter(|p| p.instrument == instrument) {
            p.mark_price = price;
        }
        self.recompute_unrealized();
    }

    pub fn recompute_unrealized(&mut self) {
        self.unrealized_pnl = self.positions.iter().map(|p| p.unrealized_pnl()).sum();
    }

    pub fn update_peak(&mut self) {
        let equity = self.equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
    }

    /// Reset the daily-loss baseline when the UTC date changes.
    pub fn roll_day(&mut self, today: NaiveDate) {
        if today != self.day {
            self.day = today;
            self.day_start_equity = self.equity();
        }
    }

    pub fn position_by_order(&self, order_id: &str) -> Option<&OpenPosition> {
        self.positions.iter().find(|p| p.order_id == order_id)
    }

    /// Hold a closure for an order not yet confirmed into the portfolio.
    pub fn hold_early_closure(&mut self, order_id: &str, exit_price: Decimal, reason: ExitReason) {
        self.early_closures
            .insert(order_id.to_string(), (exit_price, reason));
    }

    pub fn take_early_closure(&mut self, order_id: &str) -> Option<(Decimal, ExitReason)> {
        self.early_closures.remove(order_id)
    }

    /// Operator acknowledgement after a reset: loss streak and daily
    /// baseline start over, peak equity is kept.
    pub fn acknowledge_losses(&mut self) {
        self.consecutive_losses = 0;
        self.day_start_equity = self.equity();
    }

    pub fn health(&self) -> PortfolioHealth {
        let worst_position_loss = self
            .positions
            .iter()
            .map(|p| (-p.return_fraction()).to_f64().unwrap_or(0.0))
            .fold(0.0_f64, f64::max);
        PortfolioHealth {
            drawdown: self.drawdown(),
            daily_loss: self.daily_loss(),
            consecutive_losses: self.consecutive_losses,
            worst_position_loss,
        }
    }

    pub fn snapshot(&self) -> PortfolioSnapshot {
        PortfolioSnapshot {
            equity: self.equity(),
            peak_equity: self.peak_equity,
            drawdown: self.drawdown(),
            daily_loss: self.daily_loss(),
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.unrealized_pnl,
            total_open: self.total_open,
            open_counts: self.open_counts.clone(),
            consecutive_losses: self.consecutive_losses,
            positions: self.positions.clone(),
        }
    }
}

impl fmt::Display for PortfolioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "equity=${:.2} | realized=${:.2} | unrealized=${:.2} | open={} | drawdown={:.1}%",
            self.equity(),
            self.realized_pnl,
            self.unrealized_pnl,
            self.total_open,
            self.drawdown() * 100.0,
        )
    }
}

/// Read-only copy of the portfolio handed to readers outside the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub equity: Decimal,
    pub peak_equity: Decimal,
    pub drawdown: f64,
    pub daily_loss: f64,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_open: u32,
    pub open_counts: BTreeMap<String, u32>,
    pub consecutive_losses: u32,
    pub positions: Vec<OpenPosition>,
}

impl PortfolioSnapshot {
    pub fn count_for(&self, instrument: &str) -> u32 {
        self.open_counts.get(instrument).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Circuit breaker state
// ---------------------------------------------------------------------------

/// Portfolio-level safety state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Normal,
    Warning,
    Halted,
    /// Reset in progress: verifying drawdown before resuming.
    ManualReset,
}

impl BreakerState {
    /// Whether the gate must reject everything.
    pub fn blocks_trading(&self) -> bool {
        matches!(self, BreakerState::Halted | BreakerState::ManualReset)
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Normal => write!(f, "🟢 NORMAL"),
            BreakerState::Warning => write!(f, "🟡 WARNING"),
            BreakerState::Halted => write!(f, "🔴 HALTED"),
            BreakerState::ManualReset => write!(f, "🟠 MANUAL RESET"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for AEGIS.
#[derive(Debug, thiserror::Error)]
pub enum AegisError {
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Reset rejected: drawdown {drawdown:.2}% is above the warning threshold {threshold:.2}%")]
    ResetRejected { drawdown: f64, threshold: f64 },

    #[error("Reset not applicable: circuit breaker is {0}")]
    NotHalted(BreakerState),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for AegisError {
    fn from(e: sqlx::Error) -> Self {
        AegisError::Ledger(e.to_string())
    }
}

impl From<serde_json::Error> for AegisError {
    fn from(e: serde_json::Error) -> Self {
        AegisError::Ledger(e.to_string())
    }
}

/// Maximum advisory rationale length carried on a signal.
pub const MAX_RATIONALE_CHARS: usize = 280;

/// Clamp to [0, 1], mapping NaN to 0.
pub fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
