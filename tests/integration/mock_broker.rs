//! Recording broker for integration testing.
//!
//! Wraps the paper venue so fills stay consistent with the feed, counts
//! every adapter call, and can be told to fail or to run a hook before an
//! order reaches the venue or after it fills.

use async_trait::async_trait;
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use aegis::data::MarketFeed;
use aegis::platforms::paper::PaperBroker;
use aegis::platforms::{BrokerPosition, ClosedPosition, ExecutionAdapter, ExecutionError, OrderFill};
use aegis::types::Action;

type Hook = Box<dyn Fn() + Send + Sync>;
type FillHook = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub struct MockBroker {
    inner: PaperBroker,
    placed: AtomicUsize,
    place_attempts: AtomicUsize,
    close_all_calls: AtomicUsize,
    closed: Mutex<Vec<String>>,
    /// If set, every `place_order` returns this error.
    force_error: Mutex<Option<ExecutionError>>,
    before_place: Mutex<Option<Hook>>,
    after_fill: Mutex<Option<FillHook>>,
}

impl MockBroker {
    pub fn new(feed: Arc<dyn MarketFeed>) -> Self {
        Self {
            inner: PaperBroker::new(feed),
            placed: AtomicUsize::new(0),
            place_attempts: AtomicUsize::new(0),
            close_all_calls: AtomicUsize::new(0),
            closed: Mutex::new(Vec::new()),
            force_error: Mutex::new(None),
            before_place: Mutex::new(None),
            after_fill: Mutex::new(None),
        }
    }

    pub fn set_error(&self, error: ExecutionError) {
        *self.force_error.lock().unwrap() = Some(error);
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Run `hook` once, on the next order, before it reaches the venue.
    pub fn before_next_order(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.before_place.lock().unwrap() = Some(Box::new(hook));
    }

    /// Run `hook` once, after the next fill and before it is returned.
    pub fn after_next_fill(&self, hook: impl Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static) {
        *self.after_fill.lock().unwrap() = Some(Box::new(hook));
    }

    /// Orders that reached the venue and filled.
    pub fn placed(&self) -> usize {
        self.placed.load(Ordering::SeqCst)
    }

    /// Every `place_order` call, including failed ones.
    pub fn place_attempts(&self) -> usize {
        self.place_attempts.load(Ordering::SeqCst)
    }

    pub fn close_all_calls(&self) -> usize {
        self.close_all_calls.load(Ordering::SeqCst)
    }

    /// Order ids closed so far, in order.
    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionAdapter for MockBroker {
    async fn place_order(
        &self,
        instrument: &str,
        action: Action,
        notional: Decimal,
    ) -> Result<OrderFill, ExecutionError> {
        self.place_attempts.fetch_add(1, Ordering::SeqCst);

        let hook = self.before_place.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }

        if let Some(err) = self.force_error.lock().unwrap().clone() {
            return Err(err);
        }

        let fill = self.inner.place_order(instrument, action, notional).await?;
        self.placed.fetch_add(1, Ordering::SeqCst);

        let hook = self.after_fill.lock().unwrap().take();
        if let Some(hook) = hook {
            hook().await;
        }
        Ok(fill)
    }

    async fn close_position(&self, order_id: &str) -> Result<ClosedPosition, ExecutionError> {
        let closed = self.inner.close_position(order_id).await?;
        self.closed.lock().unwrap().push(closed.order_id.clone());
        Ok(closed)
    }

    async fn close_all_positions(&self) -> Result<Vec<ClosedPosition>, ExecutionError> {
        self.close_all_calls.fetch_add(1, Ordering::SeqCst);
        let closed = self.inner.close_all_positions().await?;
        self.closed
            .lock()
            .unwrap()
            .extend(closed.iter().map(|c| c.order_id.clone()));
        Ok(closed)
    }

    async fn get_open_positions(&self) -> Result<Vec<BrokerPosition>, ExecutionError> {
        self.inner.get_open_positions().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::uptrend;
    use aegis::data::snapshot::SnapshotFeed;
    use rust_decimal_macros::dec;

    fn broker() -> MockBroker {
        let feed = Arc::new(SnapshotFeed::new());
        feed.set_series("EUR_USD", uptrend(40));
        MockBroker::new(feed)
    }

    #[tokio::test]
    async fn test_mock_place_and_close() {
        let broker = broker();
        let fill = broker
            .place_order("EUR_USD", Action::Buy, dec!(2000))
            .await
            .unwrap();
        assert_eq!(broker.placed(), 1);
        assert_eq!(broker.get_open_positions().await.unwrap().len(), 1);

        let closed = broker.close_position(&fill.order_id).await.unwrap();
        assert_eq!(closed.order_id, fill.order_id);
        assert_eq!(broker.closed(), vec![fill.order_id]);
        assert!(broker.get_open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mock_forced_error() {
        let broker = broker();
        broker.set_error(ExecutionError::Transient("timeout".into()));
        let result = broker.place_order("EUR_USD", Action::Buy, dec!(2000)).await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(broker.place_attempts(), 1);
        assert_eq!(broker.placed(), 0);

        broker.clear_error();
        assert!(broker.place_order("EUR_USD", Action::Sell, dec!(2000)).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_hook_runs_once() {
        let broker = broker();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        broker.before_next_order(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        broker.place_order("EUR_USD", Action::Buy, dec!(2000)).await.unwrap();
        broker.place_order("EUR_USD", Action::Buy, dec!(2000)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mock_unknown_instrument_rejected() {
        let broker = broker();
        let result = broker.place_order("NOPE", Action::Buy, dec!(2000)).await;
        assert!(matches!(result, Err(ExecutionError::Rejected(_))));
    }
}
