//! Risk gate.
//!
//! Sequential checks over a candidate signal. The first failing check
//! decides the rejection reason; later checks are not evaluated.
//!
//! 1. Circuit breaker permits trading
//! 2. Per-instrument position count below the cap
//! 3. Total position count below the cap
//! 4. Regime compatibility
//! 5. Cycle compatibility
//! 6. Confidence floor (raised for high-risk instruments)
//! 7. No strong opposing advisory suggestion

use tracing::debug;

use crate::types::{
    BreakerState, CyclePhase, PortfolioState, RegimeKind, RejectionReason, RiskLimits, Signal,
};

/// Slack for floating-point confidence comparisons so that a confidence
/// exactly at the floor passes.
const CONFIDENCE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Default)]
pub struct RiskGate {
    limits: RiskLimits,
}

impl RiskGate {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Confidence floor for the signal's instrument.
    pub fn confidence_floor(&self, signal: &Signal) -> f64 {
        if signal.instrument.high_risk {
            self.limits.high_risk_confidence_floor
        } else {
            self.limits.confidence_floor
        }
    }

    /// Run all checks. `Ok(())` means the signal may proceed to sizing.
    pub fn check(
        &self,
        signal: &Signal,
        portfolio: &PortfolioState,
        breaker: BreakerState,
    ) -> Result<(), RejectionReason> {
        let result = self.run_checks(signal, portfolio, breaker);
        if let Err(reason) = &result {
            debug!(
                instrument = %signal.instrument.id,
                action = %signal.action,
                confidence = format!("{:.2}", signal.confidence),
                reason = %reason,
                "Risk gate rejected signal"
            );
        }
        result
    }

    fn run_checks(
        &self,
        signal: &Signal,
        portfolio: &PortfolioState,
        breaker: BreakerState,
    ) -> Result<(), RejectionReason> {
        let limits = &self.limits;

        // 1. Breaker
        if breaker.blocks_trading() {
            return Err(RejectionReason::TradingHalted);
        }

        // 2. Per-instrument cap
        let open = portfolio.count_for(&signal.instrument.id);
        if open >= limits.max_per_instrument {
            return Err(RejectionReason::PositionLimit {
                open,
                max: limits.max_per_instrument,
            });
        }

        // 3. Portfolio cap
        if portfolio.total_open >= limits.max_total {
            return Err(RejectionReason::PortfolioLimit {
                open: portfolio.total_open,
                max: limits.max_total,
            });
        }

        // 4. Regime
        match signal.regime.kind {
            RegimeKind::Crisis if !signal.is_defensive() => {
                return Err(RejectionReason::RegimeIncompatible {
                    regime: RegimeKind::Crisis,
                });
            }
            RegimeKind::Choppy | RegimeKind::Transitional => {
                let required = limits.confidence_floor + limits.uncertain_regime_margin;
                if !meets(signal.confidence, required) {
                    return Err(RejectionReason::RegimeConfidence { required });
                }
            }
            _ => {}
        }

        // 5. Cycle. Peak passes here and is scaled down by the sizer.
        if signal.cycle.phase == CyclePhase::Contraction && !signal.is_defensive() {
            return Err(RejectionReason::CycleIncompatible {
                phase: CyclePhase::Contraction,
            });
        }

        // 6. Confidence floor
        let floor = self.confidence_floor(signal);
        if !meets(signal.confidence, floor) {
            return Err(RejectionReason::ConfidenceBelowFloor { required: floor });
        }

        // 7. Advisory consensus
        if let Some(advice) = &signal.advisory {
            if advice.action.opposes(signal.action)
                && meets(advice.confidence, limits.advisory_veto_confidence)
            {
                return Err(RejectionReason::AdvisoryDissent {
                    advisory_confidence: advice.confidence,
                });
            }
        }

        Ok(())
    }
}

fn meets(value: f64, floor: f64) -> bool {
    value + CONFIDENCE_EPSILON >= floor
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
