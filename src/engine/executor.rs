//! Order executor.
//!
//! Wraps an `ExecutionAdapter` with bounded exponential backoff. Transient
//! failures are retried; definitive rejections return immediately.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::platforms::{ClosedPosition, ExecutionAdapter, ExecutionError, OrderFill};
use crate::types::{Action, ExecutionStatus};

/// Ceiling on a single backoff sleep.
const MAX_BACKOFF_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Base delay for exponential backoff (ms).
    pub base_backoff_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 500,
        }
    }
}

pub struct Executor {
    adapter: Arc<dyn ExecutionAdapter>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(adapter: Arc<dyn ExecutionAdapter>, config: ExecutorConfig) -> Self {
        Self { adapter, config }
    }

    pub fn adapter(&self) -> Arc<dyn ExecutionAdapter> {
        self.adapter.clone()
    }

    /// Place an order, retrying transient failures.
    pub async fn place_order(
        &self,
        instrument: &str,
        action: Action,
        notional: Decimal,
    ) -> Result<OrderFill, ExecutionError> {
        let fill = self
            .with_retry("place_order", || {
                self.adapter.place_order(instrument, action, notional)
            })
            .await?;
        info!(
            order_id = %fill.order_id,
            instrument,
            action = %action,
            notional = format!("${:.2}", notional),
            fill_price = %fill.fill_price,
            "Order filled"
        );
        Ok(fill)
    }

    pub async fn close_position(&self, order_id: &str) -> Result<ClosedPosition, ExecutionError> {
        self.with_retry("close_position", || self.adapter.close_position(order_id))
            .await
    }

    pub async fn close_all_positions(&self) -> Result<Vec<ClosedPosition>, ExecutionError> {
        self.with_retry("close_all_positions", || self.adapter.close_all_positions())
            .await
    }

    /// Run `op` up to `max_attempts` times, sleeping per `backoff_delay`
    /// between transient failures.
    async fn with_retry<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T, ExecutionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = backoff_delay(self.config.base_backoff_ms, attempt);
                debug!(op, attempt, delay_ms = delay, "Retrying execution call");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    warn!(op, attempt = attempt + 1, max = attempts, error = %e, "Transient execution failure");
                    last_error = Some(e);
                }
                Err(e) => {
                    warn!(op, error = %e, "Execution rejected");
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ExecutionError::Transient(format!("{op}: no attempts made"))))
    }
}

/// `base_ms * 2^(retry-1)`, saturating and capped at `MAX_BACKOFF_MS`.
pub fn backoff_delay(base_ms: u64, retry: u32) -> u64 {
    let factor = 2u64.saturating_pow(retry.saturating_sub(1));
    base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS)
}

/// Ledger status for the outcome of an order attempt.
pub fn status_for(result: &Result<OrderFill, ExecutionError>) -> ExecutionStatus {
    match result {
        Ok(fill) => ExecutionStatus::Filled {
            order_id: fill.order_id.clone(),
            fill_price: fill.fill_price,
        },
        Err(ExecutionError::Transient(reason)) => ExecutionStatus::Unexecuted {
            reason: format!("retries exhausted: {reason}"),
        },
        Err(ExecutionError::Rejected(reason)) => ExecutionStatus::BrokerRejected {
            reason: reason.clone(),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
