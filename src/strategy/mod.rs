//! Strategy engine: signal generation, risk gating and position sizing.

pub mod risk;
pub mod signal;
pub mod sizing;

use std::cmp::Ordering;
use tracing::{debug, info, warn};

use crate::types::{
    AegisError, BreakerState, PortfolioState, RejectionReason, RiskDecision, Signal,
};
use risk::RiskGate;
use sizing::PositionSizer;

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Pipelines ranking → risk gate → sizing for one tick's signals.
///
/// `evaluate_signals` must run inside the coordinator's critical section: it
/// reserves a position count for every accepted decision so that later
/// signals in the same pass see the updated counts.
#[derive(Debug, Clone, Default)]
pub struct StrategyOrchestrator {
    gate: RiskGate,
    sizer: PositionSizer,
}

impl StrategyOrchestrator {
    pub fn new(gate: RiskGate, sizer: PositionSizer) -> Self {
        Self { gate, sizer }
    }

    pub fn gate(&self) -> &RiskGate {
        &self.gate
    }

    /// Gate and size a batch of signals against the live portfolio.
    ///
    /// Steps:
    /// 1. Drop anything that is not Buy or Sell.
    /// 2. Rank by descending confidence, ties broken by instrument id.
    /// 3. For each signal, read the breaker, run the gate, size survivors and
    ///    reserve a position count.
    ///
    /// `breaker` is read once per signal so an emergency stop raised mid-pass
    /// rejects every later decision.
    ///
    /// On an invariant violation all reservations made by this call are
    /// released and the error is returned; no decisions survive.
    pub fn evaluate_signals<F>(
        &self,
        mut signals: Vec<Signal>,
        portfolio: &mut PortfolioState,
        breaker: F,
    ) -> Result<Vec<RiskDecision>, AegisError>
    where
        F: Fn() -> BreakerState,
    {
        signals.retain(|s| {
            let keep = s.action.is_directional();
            if !keep {
                debug!(instrument = %s.instrument.id, "Hold signal dropped before gate");
            }
            keep
        });
        rank(&mut signals);

        let equity = portfolio.equity();
        let mut decisions = Vec::with_capacity(signals.len());
        let mut reserved: Vec<String> = Vec::new();

        for signal in signals {
            let state = breaker();
            match self.gate.check(&signal, portfolio, state) {
                Ok(()) => {
                    let breakdown = match self.sizer.size(
                        equity,
                        signal.confidence,
                        signal.regime.kind,
                        signal.cycle.phase,
                    ) {
                        Ok(b) => b,
                        Err(e) => {
                            for instrument in &reserved {
                                portfolio.release(instrument);
                            }
                            return Err(e);
                        }
                    };
                    portfolio.reserve(&signal.instrument.id);
                    reserved.push(signal.instrument.id.clone());
                    info!(
                        instrument = %signal.instrument.id,
                        action = %signal.action,
                        confidence = format!("{:.0}%", signal.confidence * 100.0),
                        regime = %signal.regime,
                        cycle = %signal.cycle,
                        size = format!("${:.2}", breakdown.size),
                        open = portfolio.count_for(&signal.instrument.id),
                        total_open = portfolio.total_open,
                        "Signal accepted"
                    );
                    decisions.push(RiskDecision::accepted(signal, breakdown.size));
                }
                Err(reason) => {
                    if reason == RejectionReason::TradingHalted {
                        debug!(instrument = %signal.instrument.id, "Signal rejected: trading halted");
                    } else {
                        warn!(
                            instrument = %signal.instrument.id,
                            action = %signal.action,
                            reason = %reason,
                            "Signal rejected by risk gate"
                        );
                    }
                    decisions.push(RiskDecision::rejected(signal, reason));
                }
            }
        }

        info!(
            decisions = decisions.len(),
            accepted = decisions.iter().filter(|d| d.is_accepted()).count(),
            "Risk gate pass complete"
        );
        Ok(decisions)
    }
}

/// Stable ordering: descending confidence, then instrument id, then action.
fn rank(signals: &mut [Signal]) {
    signals.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.instrument.id.cmp(&b.instrument.id))
            .then_with(|| a.action.to_string().cmp(&b.action.to_string()))
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
