//! Technical state: EMA crossover with RSI confirmation.
//!
//! Fast EMA above slow EMA with RSI not overbought suggests Buy; fast below
//! slow with RSI not oversold suggests Sell. Confidence grows with the
//! separation between the averages, plus a bonus on a fresh crossover.

use serde::{Deserialize, Serialize};

use super::scale;
use crate::types::{clamp_unit, Action};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechnicalConfig {
    pub fast_period: usize,
    pub slow_period: usize,
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    /// Confidence of a bare directional read.
    pub base_confidence: f64,
    /// EMA separation (fraction of slow EMA) at which the separation bonus maxes out.
    pub full_separation: f64,
    pub max_separation_bonus: f64,
    /// Added when the crossover happened on the latest bar.
    pub crossover_bonus: f64,
}

impl Default for TechnicalConfig {
    fn default() -> Self {
        Self {
            fast_period: 12,
            slow_period: 26,
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            base_confidence: 0.6,
            full_separation: 0.02,
            max_separation_bonus: 0.25,
            crossover_bonus: 0.10,
        }
    }
}

/// Indicator readings for the latest bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TechnicalState {
    pub fast_ema: f64,
    pub slow_ema: f64,
    pub rsi: f64,
    pub last_close: f64,
    /// Crossover direction if the averages crossed on the latest bar.
    pub crossover: Option<Action>,
    /// Directional read, `None` when indicators don't agree.
    pub action: Option<Action>,
    pub confidence: f64,
}

impl TechnicalState {
    /// Short human-readable summary, used in advisory prompts and rationales.
    pub fn summary(&self) -> String {
        format!(
            "EMA fast {:.4} / slow {:.4}, RSI {:.1}{}",
            self.fast_ema,
            self.slow_ema,
            self.rsi,
            match self.crossover {
                Some(Action::Buy) => ", bullish crossover",
                Some(Action::Sell) => ", bearish crossover",
                _ => "",
            }
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct TechnicalAnalyzer {
    config: TechnicalConfig,
}

impl TechnicalAnalyzer {
    pub fn new(config: TechnicalConfig) -> Self {
        Self { config }
    }

    /// Analyze closes (oldest first). Returns `None` if there are fewer than
    /// `slow_period + 1` closes.
    pub fn analyze(&self, closes: &[f64]) -> Option<TechnicalState> {
        let c = &self.config;
        let needed = c.slow_period.max(c.rsi_period) + 1;
        if closes.len() < needed || c.fast_period == 0 || c.fast_period >= c.slow_period {
            return None;
        }

        let fast = ema(closes, c.fast_period);
        let slow = ema(closes, c.slow_period);
        let n = closes.len();
        let (fast_now, slow_now) = (fast[n - 1], slow[n - 1]);
        let (fast_prev, slow_prev) = (fast[n - 2], slow[n - 2]);
        let rsi = rsi(closes, c.rsi_period);

        let crossover = if fast_prev <= slow_prev && fast_now > slow_now {
            Some(Action::Buy)
        } else if fast_prev >= slow_prev && fast_now < slow_now {
            Some(Action::Sell)
        } else {
            None
        };

        let action = if fast_now > slow_now && rsi < c.rsi_overbought {
            Some(Action::Buy)
        } else if fast_now < slow_now && rsi > c.rsi_oversold {
            Some(Action::Sell)
        } else {
            None
        };

        let separation = if slow_now.abs() > f64::EPSILON {
            ((fast_now - slow_now) / slow_now).abs()
        } else {
            0.0
        };
        let confidence = match action {
            Some(a) => {
                let mut conf = c.base_confidence
                    + c.max_separation_bonus * scale(separation, 0.0, c.full_separation);
                if crossover == Some(a) {
                    conf += c.crossover_bonus;
                }
                clamp_unit(conf)
            }
            None => 0.0,
        };

        Some(TechnicalState {
            fast_ema: fast_now,
            slow_ema: slow_now,
            rsi,
            last_close: closes[n - 1],
            crossover,
            action,
            confidence,
        })
    }
}

/// Exponential moving average seeded with the first value.
fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = values[0];
    for v in values {
        prev = alpha * v + (1.0 - alpha) * prev;
        out.push(prev);
    }
    out
}

/// Wilder's RSI over the whole series. 100 when there are no losses,
/// 50 when the series is flat.
fn rsi(values: &[f64], period: usize) -> f64 {
    let changes: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    if changes.len() < period || period == 0 {
        return 50.0;
    }
    let p = period as f64;
    let mut avg_gain = changes[..period].iter().map(|c| c.max(0.0)).sum::<f64>() / p;
    let mut avg_loss = changes[..period].iter().map(|c| (-c).max(0.0)).sum::<f64>() / p;
    for ch in &changes[period..] {
        avg_gain = (avg_gain * (p - 1.0) + ch.max(0.0)) / p;
        avg_loss = (avg_loss * (p - 1.0) + (-ch).max(0.0)) / p;
    }
    if avg_loss <= f64::EPSILON {
        return if avg_gain <= f64::EPSILON { 50.0 } else { 100.0 };
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}
