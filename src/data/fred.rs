//! FRED macro feed.
//!
//! Fetches macro indicators from the FRED API (Federal Reserve Economic
//! Data) and delegates price series to an inner feed.
//!
//! API: `https://api.stlouisfed.org/fred/series/observations`
//! Auth: API key via `api_key` query param. Free registration.
//! Rate limit: 120 req/min.
//!
//! Series: GDPC1 (real GDP, quarterly), CPIAUCSL (CPI, monthly),
//! UNRATE (unemployment), UMCSENT (consumer sentiment).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::MarketFeed;
use crate::types::{MacroIndicators, PriceSeries};

const FRED_API_URL: &str = "https://api.stlouisfed.org/fred/series/observations";

const SERIES_REAL_GDP: &str = "GDPC1";
const SERIES_CPI: &str = "CPIAUCSL";
const SERIES_UNEMPLOYMENT: &str = "UNRATE";
const SERIES_SENTIMENT: &str = "UMCSENT";

// ---------------------------------------------------------------------------
// FRED API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FredResponse {
    #[serde(default)]
    observations: Vec<FredObservation>,
}

#[derive(Debug, Deserialize)]
struct FredObservation {
    #[allow(dead_code)]
    date: String,
    value: String,
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

pub struct FredFeed {
    http: Client,
    api_key: SecretString,
    prices: Arc<dyn MarketFeed>,
}

impl FredFeed {
    pub fn new(api_key: SecretString, prices: Arc<dyn MarketFeed>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("AEGIS/0.1.0")
            .build()
            .context("Failed to build FRED HTTP client")?;
        Ok(Self {
            http,
            api_key,
            prices,
        })
    }

    /// Most recent observations for a series, newest first, with missing
    /// values (`"."`) dropped.
    async fn fetch_series(&self, series_id: &str, limit: u32) -> Result<Vec<f64>> {
        let url = format!(
            "{FRED_API_URL}?series_id={}&api_key={}&file_type=json&sort_order=desc&limit={limit}",
            urlencoding::encode(series_id),
            urlencoding::encode(self.api_key.expose_secret()),
        );

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("FRED request failed for {series_id}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("FRED API error for {series_id}: {status}");
        }

        let data: FredResponse = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse FRED response for {series_id}"))?;

        Ok(parse_values(&data.observations))
    }
}

fn parse_values(observations: &[FredObservation]) -> Vec<f64> {
    observations
        .iter()
        .filter_map(|o| o.value.trim().parse::<f64>().ok())
        .collect()
}

/// Annualised growth (%) between consecutive quarterly levels, newest first.
/// Returns (latest, previous).
fn annualized_growth(levels: &[f64]) -> (Option<f64>, Option<f64>) {
    let growth = |newer: f64, older: f64| {
        if older > 0.0 {
            Some(((newer / older).powi(4) - 1.0) * 100.0)
        } else {
            None
        }
    };
    let latest = match levels {
        [a, b, ..] => growth(*a, *b),
        _ => None,
    };
    let previous = match levels {
        [_, b, c, ..] => growth(*b, *c),
        _ => None,
    };
    (latest, previous)
}

/// Year-over-year change (%) of a monthly index, newest first.
/// Returns (latest, previous month's).
fn year_over_year(index: &[f64]) -> (Option<f64>, Option<f64>) {
    let yoy = |i: usize| {
        let (now, then) = (index.get(i)?, index.get(i + 12)?);
        if *then > 0.0 {
            Some((now / then - 1.0) * 100.0)
        } else {
            None
        }
    };
    (yoy(0), yoy(1))
}

#[async_trait]
impl MarketFeed for FredFeed {
    async fn get_recent_series(&self, instrument: &str, lookback: usize) -> Result<PriceSeries> {
        self.prices.get_recent_series(instrument, lookback).await
    }

    async fn get_macro_indicators(&self) -> Result<Option<MacroIndicators>> {
        let (gdp, cpi, unrate, sentiment) = tokio::join!(
            self.fetch_series(SERIES_REAL_GDP, 3),
            self.fetch_series(SERIES_CPI, 14),
            self.fetch_series(SERIES_UNEMPLOYMENT, 1),
            self.fetch_series(SERIES_SENTIMENT, 1),
        );

        let (gdp_growth, gdp_growth_prev) = annualized_growth(&gdp?);
        let (inflation, inflation_prev) = year_over_year(&cpi?);
        let unemployment = unrate?.first().copied();
        let consumer_confidence = match sentiment {
            Ok(values) => values.first().copied(),
            Err(e) => {
                warn!(error = %e, "Consumer sentiment unavailable");
                None
            }
        };

        let (Some(gdp_growth), Some(inflation), Some(unemployment)) =
            (gdp_growth, inflation, unemployment)
        else {
            debug!("FRED returned too few observations for macro indicators");
            return Ok(None);
        };

        let indicators = MacroIndicators {
            gdp_growth,
            gdp_growth_prev,
            inflation,
            inflation_prev,
            unemployment,
            consumer_confidence,
            as_of: Utc::now(),
        };
        info!(indicators = %indicators, "FRED macro indicators fetched");
        Ok(Some(indicators))
    }

    fn name(&self) -> &str {
        "fred"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
