//! Position sizing.
//!
//! `size = equity × per-trade fraction × confidence × regime × cycle`,
//! clamped to `[min_position_size, equity × max_single_position_fraction]`.
//! Multiplier tables are configuration; any label missing from a table
//! multiplies by 1.0.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::types::{AegisError, CyclePhase, RegimeKind, RiskLimits};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Confidence at or above which the high multiplier applies.
    pub high_confidence: f64,
    pub high_confidence_multiplier: Decimal,
    /// Confidence at or above which the standard multiplier applies.
    pub standard_confidence: f64,
    pub standard_confidence_multiplier: Decimal,
    /// Below `standard_confidence`.
    pub low_confidence_multiplier: Decimal,
    /// Keyed by lowercase regime label (`"bull"`, `"crisis"`, ...).
    pub regime_multipliers: BTreeMap<String, Decimal>,
    /// Keyed by lowercase cycle label (`"expansion"`, `"peak"`, ...).
    pub cycle_multipliers: BTreeMap<String, Decimal>,
}

impl Default for SizingConfig {
    fn default() -> Self {
        let regime_multipliers = [
            ("crisis", dec!(0.5)),
            ("sideways", dec!(1.0)),
            ("recovery", dec!(1.0)),
            ("bull", dec!(1.2)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let cycle_multipliers = [
            ("contraction", dec!(0.7)),
            ("trough", dec!(1.0)),
            ("expansion", dec!(1.1)),
            ("peak", dec!(0.9)),
            ("transitional", dec!(1.0)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            high_confidence: 0.90,
            high_confidence_multiplier: dec!(1.2),
            standard_confidence: 0.75,
            standard_confidence_multiplier: dec!(1.0),
            low_confidence_multiplier: dec!(0.8),
            regime_multipliers,
            cycle_multipliers,
        }
    }
}

/// Breakdown of one sizing computation, logged with accepted decisions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeBreakdown {
    pub base: Decimal,
    pub confidence_multiplier: Decimal,
    pub regime_multiplier: Decimal,
    pub cycle_multiplier: Decimal,
    /// Before clamping.
    pub raw: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct PositionSizer {
    config: SizingConfig,
    limits: RiskLimits,
}

impl PositionSizer {
    pub fn new(config: SizingConfig, limits: RiskLimits) -> Self {
        Self { config, limits }
    }

    pub fn confidence_multiplier(&self, confidence: f64) -> Decimal {
        if confidence >= self.config.high_confidence {
            self.config.high_confidence_multiplier
        } else if confidence >= self.config.standard_confidence {
            self.config.standard_confidence_multiplier
        } else {
            self.config.low_confidence_multiplier
        }
    }

    pub fn regime_multiplier(&self, regime: RegimeKind) -> Decimal {
        lookup(&self.config.regime_multipliers, &regime.to_string())
    }

    pub fn cycle_multiplier(&self, phase: CyclePhase) -> Decimal {
        lookup(&self.config.cycle_multipliers, &phase.to_string())
    }

    /// Notional for an accepted signal.
    ///
    /// Fails with `InvariantViolation` when the clamp bounds are inverted
    /// (minimum above the per-position cap) or the result escapes them.
    pub fn size(
        &self,
        equity: Decimal,
        confidence: f64,
        regime: RegimeKind,
        phase: CyclePhase,
    ) -> Result<SizeBreakdown, AegisError> {
        let min = self.limits.min_position_size;
        let max = equity * self.limits.max_single_position_fraction;
        if min > max {
            return Err(AegisError::InvariantViolation(format!(
                "position size bounds inverted: min ${min:.2} > max ${max:.2} (equity ${equity:.2})"
            )));
        }

        let base = equity * self.limits.per_trade_risk_fraction;
        let confidence_multiplier = self.confidence_multiplier(confidence);
        let regime_multiplier = self.regime_multiplier(regime);
        let cycle_multiplier = self.cycle_multiplier(phase);
        let raw = base * confidence_multiplier * regime_multiplier * cycle_multiplier;
        let size = raw.round_dp(2).clamp(min, max);

        if size < min || size > max || size <= Decimal::ZERO {
            return Err(AegisError::InvariantViolation(format!(
                "position size ${size:.2} outside [${min:.2}, ${max:.2}]"
            )));
        }

        debug!(
            base = format!("${:.2}", base),
            conf_mult = %confidence_multiplier,
            regime_mult = %regime_multiplier,
            cycle_mult = %cycle_multiplier,
            size = format!("${:.2}", size),
            "Position sized"
        );

        Ok(SizeBreakdown {
            base,
            confidence_multiplier,
            regime_multiplier,
            cycle_multiplier,
            raw,
            size,
        })
    }
}

fn lookup(table: &BTreeMap<String, Decimal>, label: &str) -> Decimal {
    table
        .get(&label.to_lowercase())
        .copied()
        .unwrap_or(Decimal::ONE)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
