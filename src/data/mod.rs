//! Market data feeds.
//!
//! Defines the `MarketFeed` trait and provides:
//! - `SnapshotFeed`: in-memory / JSON-file series and macro snapshot
//! - `FredFeed`: macro indicators from FRED on top of another price feed
//!
//! `MacroCache` limits how often the coordinator asks a feed for macro data.

pub mod fred;
pub mod snapshot;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::types::{MacroIndicators, PriceSeries};

/// Abstraction over price and macro data sources.
///
/// Both calls report the age of what they return (`as_of`); callers decide
/// what counts as stale.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// The most recent `lookback` bars for `instrument`, oldest first.
    async fn get_recent_series(&self, instrument: &str, lookback: usize) -> Result<PriceSeries>;

    /// Latest aggregate macro indicators, `None` when the feed has none.
    async fn get_macro_indicators(&self) -> Result<Option<MacroIndicators>>;

    /// Feed name for logging.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Macro refresh cache
// ---------------------------------------------------------------------------

/// Caches macro indicators so the feed is queried at most once per
/// `refresh` interval. Fetch failures keep the previous value; the cycle
/// classifier's staleness bound decides whether it is still usable.
pub struct MacroCache {
    feed: Arc<dyn MarketFeed>,
    refresh: Duration,
    slot: Mutex<CacheSlot>,
}

#[derive(Default)]
struct CacheSlot {
    /// Time of the last successful fetch.
    fetched: Option<Instant>,
    value: Option<MacroIndicators>,
}

impl MacroCache {
    pub fn new(feed: Arc<dyn MarketFeed>, refresh: Duration) -> Self {
        Self {
            feed,
            refresh,
            slot: Mutex::new(CacheSlot::default()),
        }
    }

    /// Cached indicators, refreshing from the feed when the last successful
    /// fetch is older than the refresh interval.
    pub async fn get(&self) -> Option<MacroIndicators> {
        let mut slot = self.slot.lock().await;
        let due = slot
            .fetched
            .map(|at| at.elapsed() >= self.refresh)
            .unwrap_or(true);
        if !due {
            return slot.value.clone();
        }

        match self.feed.get_macro_indicators().await {
            Ok(indicators) => {
                debug!(
                    feed = self.feed.name(),
                    present = indicators.is_some(),
                    "Macro indicators refreshed"
                );
                slot.fetched = Some(Instant::now());
                slot.value = indicators;
            }
            Err(e) => {
                // Leave `fetched` alone so the next call retries
                warn!(feed = self.feed.name(), error = %e, "Macro refresh failed, keeping previous value");
            }
        }
        slot.value.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
