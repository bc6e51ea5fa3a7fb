//! Circuit breaker.
//!
//! Portfolio-level safety state machine:
//!
//! ```text
//! Normal ──▶ Warning ──▶ Halted ──(reset, drawdown ok)──▶ ManualReset ──▶ Normal
//!    │                     ▲
//!    └──(emergency stop)───┘
//! ```
//!
//! `Halted` never clears on its own. State sits behind a synchronous lock so
//! an emergency stop takes effect immediately, from any task, without
//! waiting for the tick to reach an await point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info, warn};

use crate::types::{AegisError, BreakerState, PortfolioHealth};

/// Transitions kept in the in-memory history.
const MAX_HISTORY: usize = 100;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Drawdown fraction that halts trading.
    pub max_drawdown: f64,
    /// Warning threshold as a fraction of `max_drawdown`.
    pub warning_fraction: f64,
    /// Loss since start of day (fraction of equity) that halts trading.
    pub daily_loss_limit: f64,
    pub warn_consecutive_losses: u32,
    pub halt_consecutive_losses: u32,
    /// Loss on a single open position (fraction of its notional) that halts trading.
    pub max_position_loss: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_drawdown: 0.15,
            warning_fraction: 0.5,
            daily_loss_limit: 0.05,
            warn_consecutive_losses: 3,
            halt_consecutive_losses: 5,
            max_position_loss: 0.25,
        }
    }
}

impl BreakerConfig {
    pub fn warning_drawdown(&self) -> f64 {
        self.max_drawdown * self.warning_fraction
    }

    /// Reason to halt, if any threshold is breached.
    fn halt_reason(&self, h: &PortfolioHealth) -> Option<String> {
        if h.drawdown >= self.max_drawdown {
            return Some(format!(
                "drawdown {:.2}% reached max {:.2}%",
                h.drawdown * 100.0,
                self.max_drawdown * 100.0
            ));
        }
        if h.daily_loss >= self.daily_loss_limit {
            return Some(format!(
                "daily loss {:.2}% reached limit {:.2}%",
                h.daily_loss * 100.0,
                self.daily_loss_limit * 100.0
            ));
        }
        if h.consecutive_losses >= self.halt_consecutive_losses {
            return Some(format!("{} consecutive losing trades", h.consecutive_losses));
        }
        if h.worst_position_loss >= self.max_position_loss {
            return Some(format!(
                "open position down {:.2}% (limit {:.2}%)",
                h.worst_position_loss * 100.0,
                self.max_position_loss * 100.0
            ));
        }
        None
    }

    /// Reason to warn, if any warning threshold is breached.
    fn warning_reason(&self, h: &PortfolioHealth) -> Option<String> {
        if h.drawdown >= self.warning_drawdown() {
            return Some(format!(
                "drawdown {:.2}% above warning level {:.2}%",
                h.drawdown * 100.0,
                self.warning_drawdown() * 100.0
            ));
        }
        if h.consecutive_losses >= self.warn_consecutive_losses {
            return Some(format!("{} consecutive losing trades", h.consecutive_losses));
        }
        None
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: BreakerState,
    pub to: BreakerState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Persistable view of the breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub since: DateTime<Utc>,
    /// Reason for entering the current state.
    pub reason: Option<String>,
    #[serde(default)]
    pub history: Vec<Transition>,
}

impl Default for BreakerSnapshot {
    fn default() -> Self {
        Self {
            state: BreakerState::Normal,
            since: Utc::now(),
            reason: None,
            history: Vec::new(),
        }
    }
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: RwLock<BreakerSnapshot>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self::restore(config, BreakerSnapshot::default())
    }

    /// Resume from a saved snapshot. A reset that was in progress when the
    /// snapshot was taken falls back to `Halted`.
    pub fn restore(config: BreakerConfig, mut snapshot: BreakerSnapshot) -> Self {
        if snapshot.state == BreakerState::ManualReset {
            snapshot.state = BreakerState::Halted;
        }
        if snapshot.state != BreakerState::Normal {
            warn!(state = %snapshot.state, reason = ?snapshot.reason, "Circuit breaker restored in non-normal state");
        }
        Self {
            config,
            inner: RwLock::new(snapshot),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> BreakerState {
        self.read().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        self.read().clone()
    }

    /// Re-evaluate against fresh portfolio health. Returns the resulting state.
    ///
    /// Halted stays halted. A breach of a halt threshold from `Normal`
    /// passes through `Warning` in the same call.
    pub fn evaluate(&self, health: &PortfolioHealth) -> BreakerState {
        let mut inner = self.write();
        if inner.state.blocks_trading() {
            return inner.state;
        }

        if let Some(reason) = self.config.halt_reason(health) {
            if inner.state == BreakerState::Normal {
                transition(&mut inner, BreakerState::Warning, reason.clone());
            }
            transition(&mut inner, BreakerState::Halted, reason);
            return inner.state;
        }

        match (inner.state, self.config.warning_reason(health)) {
            (BreakerState::Normal, Some(reason)) => {
                transition(&mut inner, BreakerState::Warning, reason);
            }
            (BreakerState::Warning, None) => {
                transition(&mut inner, BreakerState::Normal, "health back within limits".into());
            }
            _ => {}
        }
        inner.state
    }

    /// Halt immediately. Idempotent: returns `false` when already halted.
    pub fn emergency_stop(&self, reason: &str) -> bool {
        let mut inner = self.write();
        if inner.state == BreakerState::Halted {
            info!(reason, "Emergency stop requested while already halted");
            return false;
        }
        transition(&mut inner, BreakerState::Halted, format!("emergency stop: {reason}"));
        true
    }

    /// Operator reset. Only valid from `Halted`, and only when `drawdown` is
    /// below the warning threshold; otherwise the state is left untouched.
    pub fn reset_after_halt(&self, drawdown: f64) -> Result<BreakerState, AegisError> {
        let mut inner = self.write();
        if inner.state != BreakerState::Halted {
            return Err(AegisError::NotHalted(inner.state));
        }

        let threshold = self.config.warning_drawdown();
        if drawdown >= threshold {
            warn!(
                drawdown = format!("{:.2}%", drawdown * 100.0),
                threshold = format!("{:.2}%", threshold * 100.0),
                "Reset rejected, breaker stays halted"
            );
            return Err(AegisError::ResetRejected {
                drawdown: drawdown * 100.0,
                threshold: threshold * 100.0,
            });
        }

        transition(&mut inner, BreakerState::ManualReset, "operator reset requested".into());
        transition(
            &mut inner,
            BreakerState::Normal,
            format!("reset verified at drawdown {:.2}%", drawdown * 100.0),
        );
        Ok(inner.state)
    }

    /// Halt on an internal fault, passing through `Warning` from `Normal`.
    /// Unlike an emergency stop this never liquidates. Returns `false` when
    /// already halted.
    pub fn halt(&self, reason: &str) -> bool {
        let mut inner = self.write();
        if inner.state == BreakerState::Halted {
            return false;
        }
        if inner.state == BreakerState::Normal {
            transition(&mut inner, BreakerState::Warning, reason.to_string());
        }
        transition(&mut inner, BreakerState::Halted, reason.to_string());
        true
    }

    /// Record an internal invariant violation. Moves `Normal` to `Warning`;
    /// a halted breaker is left halted.
    pub fn flag_invariant_violation(&self, detail: &str) {
        let mut inner = self.write();
        if inner.state == BreakerState::Normal {
            transition(&mut inner, BreakerState::Warning, format!("invariant violation: {detail}"));
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BreakerSnapshot> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BreakerSnapshot> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn transition(inner: &mut BreakerSnapshot, to: BreakerState, reason: String) {
    let from = inner.state;
    if from == to {
        return;
    }
    match to {
        BreakerState::Halted => error!(%from, %to, reason = %reason, "CIRCUIT BREAKER TRIPPED"),
        BreakerState::Warning => warn!(%from, %to, reason = %reason, "Circuit breaker warning"),
        _ => info!(%from, %to, reason = %reason, "Circuit breaker transition"),
    }
    let now = Utc::now();
    inner.history.push(Transition {
        from,
        to,
        reason: reason.clone(),
        at: now,
    });
    if inner.history.len() > MAX_HISTORY {
        let excess = inner.history.len() - MAX_HISTORY;
        inner.history.drain(..excess);
    }
    inner.state = to;
    inner.since = now;
    inner.reason = Some(reason);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
