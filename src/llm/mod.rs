//! Advisory oracle integration.
//!
//! Defines the `AdvisoryOracle` trait, the prompt sent to language-model
//! advisors, and the strict reply parser. Replies that don't match the
//! expected format produce no suggestion rather than an error, so the
//! signal generator falls back to the technical path.

pub mod openrouter;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::strategy::signal::truncate;
use crate::types::{
    clamp_unit, Action, AdvisorySuggestion, EconomicCycle, Instrument, MarketRegime,
    MAX_RATIONALE_CHARS,
};

/// What the advisor is told about an instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryContext {
    pub instrument: Instrument,
    pub regime: MarketRegime,
    pub cycle: EconomicCycle,
    /// Technical indicator summary, when the series was long enough.
    pub technical: Option<String>,
    pub last_close: Option<f64>,
}

/// Abstraction over advisory sources.
///
/// Best-effort: callers treat `Err` and `Ok(None)` the same way.
#[async_trait]
pub trait AdvisoryOracle: Send + Sync {
    async fn suggest(&self, context: &AdvisoryContext) -> Result<Option<AdvisorySuggestion>>;

    /// Model identifier string.
    fn model_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

pub fn system_prompt() -> &'static str {
    "You are a cautious macro and technical trading advisor. \
     Given an instrument and its market context, reply with exactly one line:\n\
     ACTION: BUY|SELL|HOLD | CONFIDENCE: <0.00-1.00> | RATIONALE: <one or two sentences>\n\
     Prefer HOLD when the evidence is mixed. Do not add anything else."
}

pub fn build_prompt(ctx: &AdvisoryContext) -> String {
    let mut parts = vec![
        format!("Instrument: {}", ctx.instrument),
        format!("Market regime: {}", ctx.regime),
        format!("Economic cycle: {}", ctx.cycle),
    ];
    if let Some(price) = ctx.last_close {
        parts.push(format!("Last close: {price}"));
    }
    match &ctx.technical {
        Some(summary) => parts.push(format!("Technicals: {summary}")),
        None => parts.push("Technicals: insufficient history".to_string()),
    }
    parts.push("What is your suggestion?".to_string());
    parts.join("\n")
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

/// Parse `ACTION: .. | CONFIDENCE: .. | RATIONALE: ..`.
///
/// - action must be BUY, SELL or HOLD (case-insensitive)
/// - confidence accepts `0.82`, `82%` or `82` (percent when above 1),
///   clamped to [0, 1]; NaN or unparseable is malformed
/// - rationale is optional and truncated
pub fn parse_suggestion(text: &str) -> Option<AdvisorySuggestion> {
    let upper = text.to_ascii_uppercase();

    let action_raw = field(text, &upper, "ACTION:")?;
    let action = match action_raw.to_ascii_uppercase().as_str() {
        "BUY" => Action::Buy,
        "SELL" => Action::Sell,
        "HOLD" => Action::Hold,
        other => {
            debug!(action = other, "Advisory reply has unknown action");
            return None;
        }
    };

    let conf_raw = field(text, &upper, "CONFIDENCE:")?;
    let confidence = parse_confidence(&conf_raw)?;

    let rationale = upper
        .find("RATIONALE:")
        .map(|i| text[i + "RATIONALE:".len()..].trim().to_string())
        .unwrap_or_default();

    Some(AdvisorySuggestion {
        action,
        confidence,
        rationale: truncate(&rationale, MAX_RATIONALE_CHARS),
    })
}

/// The single token following `key`, up to a separator.
fn field(text: &str, upper: &str, key: &str) -> Option<String> {
    let start = upper.find(key)? + key.len();
    let rest = text[start..].trim_start();
    let value: String = rest
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '|' && *c != ',')
        .collect();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_confidence(raw: &str) -> Option<f64> {
    let (number, percent) = match raw.strip_suffix('%') {
        Some(n) => (n, true),
        None => (raw, false),
    };
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    let value = if percent || value > 1.0 { value / 100.0 } else { value };
    Some(clamp_unit(value))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
