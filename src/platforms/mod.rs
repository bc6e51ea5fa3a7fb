//! Execution venues.
//!
//! Defines the `ExecutionAdapter` trait the engine places orders through,
//! and `PaperBroker`, a simulated venue that fills at the feed's last close.

pub mod paper;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Action;

/// Adapter failure, split by whether a retry can help.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    /// Timeout, connection reset, 5xx-equivalent. Retried with backoff.
    #[error("Transient execution failure: {0}")]
    Transient(String),

    /// Invalid instrument, insufficient margin, market closed. Never retried.
    #[error("Order rejected: {0}")]
    Rejected(String),
}

impl ExecutionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutionError::Transient(_))
    }
}

/// Confirmation of a filled order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFill {
    pub order_id: String,
    pub instrument: String,
    pub action: Action,
    pub notional: Decimal,
    pub fill_price: Decimal,
    pub filled_at: DateTime<Utc>,
}

/// A position as the venue reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub order_id: String,
    pub instrument: String,
    pub action: Action,
    pub notional: Decimal,
    pub entry_price: Decimal,
}

/// A position the venue has closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub order_id: String,
    pub instrument: String,
    pub exit_price: Decimal,
}

/// Abstraction over order execution.
///
/// Implementors must classify failures as `Transient` or `Rejected`; the
/// executor retries only the former.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Place a market order for `notional` in the given direction.
    async fn place_order(
        &self,
        instrument: &str,
        action: Action,
        notional: Decimal,
    ) -> Result<OrderFill, ExecutionError>;

    /// Close one open position by the order id that opened it.
    async fn close_position(&self, order_id: &str) -> Result<ClosedPosition, ExecutionError>;

    /// Close every open position.
    async fn close_all_positions(&self) -> Result<Vec<ClosedPosition>, ExecutionError>;

    /// Positions currently open at the venue.
    async fn get_open_positions(&self) -> Result<Vec<BrokerPosition>, ExecutionError>;
}
