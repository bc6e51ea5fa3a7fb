//! Accountant: marks, exits and per-tick reporting.
//!
//! Marks open positions to the latest close, picks positions that breach
//! their stop loss or take profit, settles closures into realised P&L, and
//! summarises each tick.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::platforms::ClosedPosition;
use crate::types::{BreakerState, ClosureRecord, ExitReason, PortfolioState};

// ---------------------------------------------------------------------------
// Exit rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    pub enabled: bool,
    /// Loss on notional that closes a position.
    pub stop_loss: Decimal,
    /// Gain on notional that closes a position.
    pub take_profit: Decimal,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stop_loss: dec!(0.02),
            take_profit: dec!(0.04),
        }
    }
}

/// A position the accountant wants closed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitOrder {
    pub position_id: Uuid,
    pub order_id: String,
    pub instrument: String,
    pub reason: ExitReason,
    pub return_fraction: Decimal,
}

// ---------------------------------------------------------------------------
// Tick report
// ---------------------------------------------------------------------------

/// Summary of one coordinator tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub instruments: usize,
    /// Instruments whose analysis timed out (treated as Hold).
    pub timed_out: usize,
    pub signals: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub filled: usize,
    pub unexecuted: usize,
    pub broker_rejected: usize,
    pub exits: usize,
    pub equity_before: Decimal,
    pub equity_after: Decimal,
    pub breaker: Option<BreakerState>,
    /// Ledger writes that failed during the tick.
    pub ledger_failures: usize,
    /// Set when the tick was aborted by an invariant violation.
    pub aborted: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

pub struct Accountant;

impl Accountant {
    /// Mark every open position at the latest price for its instrument.
    /// Instruments without a price keep their previous mark.
    pub fn mark_to_market(state: &mut PortfolioState, prices: &BTreeMap<String, Decimal>) {
        for (instrument, price) in prices {
            state.mark(instrument, *price);
        }
        state.update_peak();
    }

    /// Positions whose return breaches the stop loss or take profit.
    pub fn exit_candidates(state: &PortfolioState, config: &ExitConfig) -> Vec<ExitOrder> {
        if !config.enabled {
            return Vec::new();
        }
        state
            .positions
            .iter()
            .filter_map(|p| {
                let r = p.return_fraction();
                let reason = if r <= -config.stop_loss {
                    ExitReason::StopLoss
                } else if r >= config.take_profit {
                    ExitReason::TakeProfit
                } else {
                    return None;
                };
                Some(ExitOrder {
                    position_id: p.id,
                    order_id: p.order_id.clone(),
                    instrument: p.instrument.clone(),
                    reason,
                    return_fraction: r,
                })
            })
            .collect()
    }

    /// Realise a closure reported by the venue. Returns `None` when the
    /// order id matches no tracked position.
    pub fn settle(
        state: &mut PortfolioState,
        closed: &ClosedPosition,
        reason: ExitReason,
    ) -> Option<ClosureRecord> {
        let position_id = state.position_by_order(&closed.order_id)?.id;
        let pnl = state.close(position_id, closed.exit_price)?;

        let pnl_label = if pnl >= Decimal::ZERO {
            format!("+${:.2}", pnl)
        } else {
            format!("-${:.2}", pnl.abs())
        };
        info!(
            order_id = %closed.order_id,
            instrument = %closed.instrument,
            reason = %reason,
            exit_price = %closed.exit_price,
            pnl = %pnl_label,
            "Position closed"
        );

        Some(ClosureRecord {
            position_id,
            order_id: closed.order_id.clone(),
            instrument: closed.instrument.clone(),
            exit_price: closed.exit_price,
            pnl,
            reason,
            closed_at: Utc::now(),
        })
    }

    /// Settle a batch of closures, skipping ones already settled.
    pub fn settle_all(
        state: &mut PortfolioState,
        closed: &[ClosedPosition],
        reason: ExitReason,
    ) -> Vec<ClosureRecord> {
        closed
            .iter()
            .filter_map(|c| {
                let record = Self::settle(state, c, reason);
                if record.is_none() {
                    warn!(order_id = %c.order_id, "Closure for unconfirmed order held");
                    state.hold_early_closure(&c.order_id, c.exit_price, reason);
                }
                record
            })
            .collect()
    }

    pub fn log_report(report: &TickReport) {
        info!(
            tick = report.tick,
            instruments = report.instruments,
            timed_out = report.timed_out,
            signals = report.signals,
            accepted = report.accepted,
            rejected = report.rejected,
            filled = report.filled,
            unexecuted = report.unexecuted,
            exits = report.exits,
            ledger_failures = report.ledger_failures,
            equity = format!("${:.2}", report.equity_after),
            breaker = %report.breaker.map(|b| b.to_string()).unwrap_or_default(),
            "Tick complete"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
