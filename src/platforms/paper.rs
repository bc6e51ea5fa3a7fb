//! Paper broker.
//!
//! Simulated venue for dry runs: fills every order at the feed's latest
//! close, keeps positions in memory and closes them at the then-latest
//! close. Instruments the feed does not know are rejected.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::*;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::{BrokerPosition, ClosedPosition, ExecutionAdapter, ExecutionError, OrderFill};
use crate::data::MarketFeed;
use crate::types::Action;

pub struct PaperBroker {
    feed: Arc<dyn MarketFeed>,
    positions: Mutex<Vec<BrokerPosition>>,
}

impl PaperBroker {
    pub fn new(feed: Arc<dyn MarketFeed>) -> Self {
        Self {
            feed,
            positions: Mutex::new(Vec::new()),
        }
    }

    /// Seed positions restored from the ledger so closes find them.
    pub async fn restore(&self, positions: Vec<BrokerPosition>) {
        self.positions.lock().await.extend(positions);
    }

    async fn last_price(&self, instrument: &str) -> Result<Decimal, ExecutionError> {
        let series = self
            .feed
            .get_recent_series(instrument, 1)
            .await
            .map_err(|e| ExecutionError::Rejected(format!("unknown instrument {instrument}: {e}")))?;
        let close = series
            .last_close()
            .ok_or_else(|| ExecutionError::Transient(format!("no price for {instrument}")))?;
        Decimal::from_f64(close)
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| ExecutionError::Rejected(format!("invalid price {close} for {instrument}")))
    }
}

#[async_trait]
impl ExecutionAdapter for PaperBroker {
    async fn place_order(
        &self,
        instrument: &str,
        action: Action,
        notional: Decimal,
    ) -> Result<OrderFill, ExecutionError> {
        if !action.is_directional() {
            return Err(ExecutionError::Rejected("cannot place a HOLD order".into()));
        }
        if notional <= Decimal::ZERO {
            return Err(ExecutionError::Rejected(format!("invalid notional {notional}")));
        }

        let price = self.last_price(instrument).await?;
        let order_id = format!("paper-{}", Uuid::new_v4());
        self.positions.lock().await.push(BrokerPosition {
            order_id: order_id.clone(),
            instrument: instrument.to_string(),
            action,
            notional,
            entry_price: price,
        });

        info!(
            order_id = %order_id,
            instrument,
            action = %action,
            notional = format!("${:.2}", notional),
            price = %price,
            "[PAPER] Order filled"
        );

        Ok(OrderFill {
            order_id,
            instrument: instrument.to_string(),
            action,
            notional,
            fill_price: price,
            filled_at: Utc::now(),
        })
    }

    async fn close_position(&self, order_id: &str) -> Result<ClosedPosition, ExecutionError> {
        let instrument = {
            let positions = self.positions.lock().await;
            positions
                .iter()
                .find(|p| p.order_id == order_id)
                .map(|p| p.instrument.clone())
                .ok_or_else(|| ExecutionError::Rejected(format!("no open position {order_id}")))?
        };
        let exit_price = self.last_price(&instrument).await?;
        self.positions.lock().await.retain(|p| p.order_id != order_id);
        info!(order_id, instrument = %instrument, price = %exit_price, "[PAPER] Position closed");
        Ok(ClosedPosition {
            order_id: order_id.to_string(),
            instrument,
            exit_price,
        })
    }

    async fn close_all_positions(&self) -> Result<Vec<ClosedPosition>, ExecutionError> {
        let open: Vec<String> = self
            .positions
            .lock()
            .await
            .iter()
            .map(|p| p.order_id.clone())
            .collect();
        let mut closed = Vec::with_capacity(open.len());
        for order_id in open {
            closed.push(self.close_position(&order_id).await?);
        }
        Ok(closed)
    }

    async fn get_open_positions(&self) -> Result<Vec<BrokerPosition>, ExecutionError> {
        Ok(self.positions.lock().await.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
