//! Signal generation.
//!
//! Starts from the technical read, nudges confidence toward or away from the
//! advisory suggestion, and falls back to the advisory alone (discounted)
//! when the technicals have nothing to say. `Hold` never leaves this module.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::technical::TechnicalState;
use crate::types::{
    clamp_unit, Action, AdvisorySuggestion, EconomicCycle, Instrument, MarketRegime, Signal,
    SignalSource, MAX_RATIONALE_CHARS,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Added when the advisory suggestion agrees with the technical action.
    pub agreement_bonus: f64,
    /// Subtracted when it points the other way.
    pub disagreement_penalty: f64,
    /// Multiplier on advisory confidence when it is the only input.
    pub advisory_only_factor: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            agreement_bonus: 0.10,
            disagreement_penalty: 0.15,
            advisory_only_factor: 0.8,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignalGenerator {
    config: SignalConfig,
}

impl SignalGenerator {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    /// Build the candidate signal for one instrument.
    ///
    /// Returns `None` when the result would be `Hold`: no technical action and
    /// no directional advisory suggestion.
    pub fn generate(
        &self,
        instrument: &Instrument,
        technical: Option<&TechnicalState>,
        advisory: Option<&AdvisorySuggestion>,
        regime: MarketRegime,
        cycle: EconomicCycle,
    ) -> Option<Signal> {
        let directional_advice = advisory.filter(|a| a.action.is_directional());
        let tech_action = technical.and_then(|t| t.action.map(|a| (a, t)));

        let (action, confidence, source, rationale) = match (tech_action, directional_advice) {
            (Some((action, tech)), Some(advice)) => {
                let adjusted = if advice.action == action {
                    tech.confidence + self.config.agreement_bonus
                } else {
                    tech.confidence - self.config.disagreement_penalty
                };
                let stance = if advice.action == action { "agrees" } else { "disagrees" };
                let rationale = format!(
                    "{}; advisory {} ({} {:.0}%): {}",
                    tech.summary(),
                    stance,
                    advice.action,
                    advice.confidence * 100.0,
                    truncate(&advice.rationale, MAX_RATIONALE_CHARS),
                );
                (action, adjusted, SignalSource::Blended, rationale)
            }
            (Some((action, tech)), None) => {
                (action, tech.confidence, SignalSource::Technical, tech.summary())
            }
            (None, Some(advice)) => {
                let rationale = format!(
                    "advisory only: {}",
                    truncate(&advice.rationale, MAX_RATIONALE_CHARS)
                );
                (
                    advice.action,
                    advice.confidence * self.config.advisory_only_factor,
                    SignalSource::AdvisoryOnly,
                    rationale,
                )
            }
            (None, None) => {
                debug!(instrument = %instrument.id, "No technical action or advice, holding");
                return None;
            }
        };

        if !action.is_directional() {
            return None;
        }

        let signal = Signal {
            instrument: instrument.clone(),
            action,
            confidence: clamp_unit(confidence),
            rationale,
            regime,
            cycle,
            source,
            advisory: advisory.cloned(),
        };
        debug!(signal = %signal, source = ?signal.source, "Signal generated");
        Some(signal)
    }
}

/// Truncate on a char boundary, appending an ellipsis when shortened.
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push('…');
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
