//! Snapshot market feed.
//!
//! Holds price bars and a macro snapshot in memory. Loaded from a JSON file
//! for paper trading, or populated directly by tests. Bars can be appended
//! while the coordinator runs.
//!
//! File layout:
//! ```json
//! {
//!   "series": { "EUR_USD": [ { "timestamp": "...", "open": 1.08, ... } ] },
//!   "macro": { "gdp_growth": 2.8, "inflation": 3.1, "unemployment": 3.9, "as_of": "..." }
//! }
//! ```

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

use super::MarketFeed;
use crate::types::{MacroIndicators, PriceBar, PriceSeries};

#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    series: HashMap<String, Vec<PriceBar>>,
    #[serde(default, rename = "macro")]
    macro_indicators: Option<MacroIndicators>,
}

#[derive(Debug, Default)]
pub struct SnapshotFeed {
    series: RwLock<HashMap<String, Vec<PriceBar>>>,
    macro_indicators: RwLock<Option<MacroIndicators>>,
}

impl SnapshotFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot file: {path}"))?;
        let file: SnapshotFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse snapshot file: {path}"))?;
        info!(
            path,
            instruments = file.series.len(),
            has_macro = file.macro_indicators.is_some(),
            "Snapshot feed loaded"
        );
        Ok(Self {
            series: RwLock::new(file.series),
            macro_indicators: RwLock::new(file.macro_indicators),
        })
    }

    /// Replace all bars for an instrument.
    pub fn set_series(&self, instrument: &str, bars: Vec<PriceBar>) {
        let mut series = self.series.write().unwrap_or_else(|e| e.into_inner());
        series.insert(instrument.to_string(), bars);
    }

    /// Append one bar to an instrument's series.
    pub fn push_bar(&self, instrument: &str, bar: PriceBar) {
        let mut series = self.series.write().unwrap_or_else(|e| e.into_inner());
        series.entry(instrument.to_string()).or_default().push(bar);
    }

    pub fn set_macro(&self, indicators: Option<MacroIndicators>) {
        *self
            .macro_indicators
            .write()
            .unwrap_or_else(|e| e.into_inner()) = indicators;
    }

    pub fn instruments(&self) -> Vec<String> {
        let series = self.series.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = series.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl MarketFeed for SnapshotFeed {
    async fn get_recent_series(&self, instrument: &str, lookback: usize) -> Result<PriceSeries> {
        let series = self.series.read().unwrap_or_else(|e| e.into_inner());
        let bars = series
            .get(instrument)
            .ok_or_else(|| anyhow!("No series for instrument {instrument}"))?;
        let start = bars.len().saturating_sub(lookback);
        let bars = bars[start..].to_vec();
        let as_of = bars.last().map(|b| b.timestamp).unwrap_or_else(Utc::now);
        Ok(PriceSeries {
            instrument: instrument.to_string(),
            bars,
            as_of,
        })
    }

    async fn get_macro_indicators(&self) -> Result<Option<MacroIndicators>> {
        Ok(self
            .macro_indicators
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn name(&self) -> &str {
        "snapshot"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn bars(n: usize) -> Vec<PriceBar> {
        let start = Utc::now() - Duration::hours(n as i64);
        (0..n)
            .map(|i| {
                let close = 100.0 + i as f64;
                PriceBar {
                    timestamp: start + Duration::hours(i as i64),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 0.0,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_recent_series_returns_tail() {
        let feed = SnapshotFeed::new();
        feed.set_series("EUR_USD", bars(10));
        let s = feed.get_recent_series("EUR_USD", 3).await.unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.last_close(), Some(109.0));
        assert_eq!(s.as_of, s.bars[2].timestamp);
    }

    #[tokio::test]
    async fn test_lookback_longer_than_history() {
        let feed = SnapshotFeed::new();
        feed.set_series("EUR_USD", bars(5));
        let s = feed.get_recent_series("EUR_USD", 50).await.unwrap();
        assert_eq!(s.len(), 5);
    }

    #[tokio::test]
    async fn test_unknown_instrument_errors() {
        let feed = SnapshotFeed::new();
        assert!(feed.get_recent_series("NOPE", 10).await.is_err());
    }

    #[tokio::test]
    async fn test_push_bar_and_macro() {
        let feed = SnapshotFeed::new();
        for b in bars(2) {
            feed.push_bar("XAU_USD", b);
        }
        assert_eq!(feed.instruments(), vec!["XAU_USD".to_string()]);
        assert!(feed.get_macro_indicators().await.unwrap().is_none());

        feed.set_macro(Some(MacroIndicators {
            gdp_growth: 1.0,
            gdp_growth_prev: None,
            inflation: 2.0,
            inflation_prev: None,
            unemployment: 4.0,
            consumer_confidence: None,
            as_of: Utc::now(),
        }));
        assert!(feed.get_macro_indicators().await.unwrap().is_some());
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("aegis_snapshot_{}.json", uuid::Uuid::new_v4()));
        let file = SnapshotFile {
            series: [("EUR_USD".to_string(), bars(4))].into_iter().collect(),
            macro_indicators: None,
        };
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();
        let feed = SnapshotFeed::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(feed.instruments(), vec!["EUR_USD".to_string()]);
        let series = tokio_test::block_on(feed.get_recent_series("EUR_USD", 10)).unwrap();
        assert_eq!(series.len(), 4);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_bundled_fixture_parses() {
        // Requires fixtures/snapshot.json relative to the crate root
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/snapshot.json");
        let feed = SnapshotFeed::from_file(path).unwrap();
        assert_eq!(feed.instruments().len(), 4);
        let indicators = tokio_test::block_on(feed.get_macro_indicators()).unwrap();
        assert!(indicators.is_some());
    }
}
