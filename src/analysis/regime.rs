//! Market regime classification.
//!
//! Trend strength (net log move over the lookback, normalised by realised
//! volatility) and the percentile of current short-window volatility within
//! the series' own history jointly index into the eight regime labels.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{log_returns, scale, std_dev};
use crate::types::{MarketRegime, PriceSeries, RegimeKind};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// Bars in the trend window. The series needs `lookback + 1` closes.
    pub lookback: usize,
    /// Bars per rolling volatility sample.
    pub vol_window: usize,
    /// |trend z| at or above this is a strong trend (Bull / Bear / Crisis).
    pub strong_trend: f64,
    /// |trend z| at or above this is a trend at all.
    pub weak_trend: f64,
    /// Volatility percentile considered stressed.
    pub high_vol_percentile: f64,
    /// Volatility percentile considered calm.
    pub low_vol_percentile: f64,
    /// Choppy needs at least this percentile without a trend.
    pub choppy_vol_percentile: f64,
    /// Log decline over the first half of the window that marks a recovery.
    pub recovery_dip: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            lookback: 50,
            vol_window: 10,
            strong_trend: 2.0,
            weak_trend: 1.0,
            high_vol_percentile: 0.80,
            low_vol_percentile: 0.40,
            choppy_vol_percentile: 0.60,
            recovery_dip: 0.05,
        }
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Raw measurements behind a classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeMetrics {
    /// Net log move divided by `vol * sqrt(lookback)`.
    pub trend_z: f64,
    /// Midrank percentile of current volatility in [0, 1].
    pub vol_percentile: f64,
    /// Log move over the first half of the trend window.
    pub first_half_return: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RegimeClassifier {
    config: RegimeConfig,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Minimum number of bars required for a classification.
    pub fn min_bars(&self) -> usize {
        self.config.lookback.max(self.config.vol_window) + 1
    }

    /// Classify a series. Too little data yields `Transitional` with zero
    /// confidence rather than an error.
    pub fn classify(&self, series: &PriceSeries) -> MarketRegime {
        match self.measure(series) {
            Some(metrics) => {
                let regime = self.label(&metrics);
                debug!(
                    instrument = %series.instrument,
                    trend_z = format!("{:.2}", metrics.trend_z),
                    vol_pct = format!("{:.2}", metrics.vol_percentile),
                    regime = %regime,
                    "Regime classified"
                );
                regime
            }
            None => {
                debug!(
                    instrument = %series.instrument,
                    bars = series.len(),
                    required = self.min_bars(),
                    "Series shorter than lookback, regime unknown"
                );
                MarketRegime::unknown()
            }
        }
    }

    /// Compute trend and volatility metrics, or `None` if the series is short.
    pub fn measure(&self, series: &PriceSeries) -> Option<RegimeMetrics> {
        let closes = series.closes();
        if closes.len() < self.min_bars() || self.config.lookback < 2 {
            return None;
        }

        let lookback = self.config.lookback;
        let window = &closes[closes.len() - lookback - 1..];
        let first = window[0];
        let last = window[window.len() - 1];
        let mid = window[lookback / 2];
        if first <= 0.0 || last <= 0.0 || mid <= 0.0 {
            return None;
        }

        let net = (last / first).ln();
        let vol = std_dev(&log_returns(window));
        let trend_z = if vol > f64::EPSILON {
            net / (vol * (lookback as f64).sqrt())
        } else if net.abs() > f64::EPSILON {
            // Noise-free drift: as strong as a trend gets.
            net.signum() * self.config.strong_trend * 2.0
        } else {
            0.0
        };

        Some(RegimeMetrics {
            trend_z,
            vol_percentile: self.vol_percentile(&log_returns(&closes)),
            first_half_return: (mid / first).ln(),
        })
    }

    /// Midrank percentile of the latest rolling volatility among all rolling
    /// volatilities of the series.
    fn vol_percentile(&self, returns: &[f64]) -> f64 {
        let w = self.config.vol_window.max(2);
        if returns.len() < w + 1 {
            return 0.5;
        }
        let vols: Vec<f64> = returns.windows(w).map(std_dev).collect();
        let current = vols[vols.len() - 1];
        let tolerance = 1e-12;
        let below = vols.iter().filter(|v| **v < current - tolerance).count() as f64;
        let equal = vols
            .iter()
            .filter(|v| (**v - current).abs() <= tolerance)
            .count() as f64;
        (below + 0.5 * equal) / vols.len() as f64
    }

    /// Map metrics onto a label. Upward trend with stressed volatility is a
    /// disagreement and resolves to `Transitional`.
    pub fn label(&self, m: &RegimeMetrics) -> MarketRegime {
        let c = &self.config;
        let z = m.trend_z;
        let trend_up = z >= c.weak_trend;
        let trend_down = z <= -c.weak_trend;
        let stressed = m.vol_percentile >= c.high_vol_percentile;
        let calm = m.vol_percentile <= c.low_vol_percentile;
        let trend_conf = 0.5 + 0.5 * scale(z.abs(), c.weak_trend, c.strong_trend * 2.0);

        if trend_down && z <= -c.strong_trend && stressed {
            let conf = 0.5 * trend_conf
                + 0.5 * (0.5 + 0.5 * scale(m.vol_percentile, c.high_vol_percentile, 1.0));
            return MarketRegime::new(RegimeKind::Crisis, conf);
        }
        if trend_up && stressed {
            return MarketRegime::new(RegimeKind::Transitional, 0.3);
        }
        if trend_up && m.first_half_return <= -c.recovery_dip {
            return MarketRegime::new(RegimeKind::Recovery, trend_conf);
        }
        if z >= c.strong_trend {
            return MarketRegime::new(RegimeKind::Bull, trend_conf);
        }
        if z <= -c.strong_trend {
            return MarketRegime::new(RegimeKind::Bear, trend_conf);
        }
        if trend_up || trend_down {
            return MarketRegime::new(RegimeKind::Trending, trend_conf * 0.9);
        }
        if calm {
            let conf = 0.5 + 0.5 * (1.0 - scale(z.abs(), 0.0, c.weak_trend));
            return MarketRegime::new(RegimeKind::Sideways, conf);
        }
        if m.vol_percentile >= c.choppy_vol_percentile {
            let conf = 0.5 + 0.5 * scale(m.vol_percentile, c.choppy_vol_percentile, 1.0);
            return MarketRegime::new(RegimeKind::Choppy, conf);
        }
        MarketRegime::new(RegimeKind::Transitional, 0.4)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceBar;
    use chrono::{Duration, Utc};

    /// Build a series from per-bar log returns starting at 100.
    fn series_from_returns(returns: &[f64]) -> PriceSeries {
        let start = Utc::now() - Duration::hours(returns.len() as i64);
        let mut price = 100.0_f64;
        let mut bars = vec![bar(start, price)];
        for (i, r) in returns.iter().enumerate() {
            price *= r.exp();
            bars.push(bar(start + Duration::hours(i as i64 + 1), price));
        }
        PriceSeries {
            instrument: "TEST".into(),
            bars,
            as_of: Utc::now(),
        }
    }

    fn bar(ts: chrono::DateTime<Utc>, close: f64) -> PriceBar {
        PriceBar {
            timestamp: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
        }
    }

    fn alternating(n: usize, drift: f64, swing: f64) -> Vec<f64> {
        (0..n)
            .map(|i| if i % 2 == 0 { drift + swing } else { drift - swing })
            .collect()
    }

    #[test]
    fn test_short_series_is_transitional_zero() {
        let clf = RegimeClassifier::default();
        let regime = clf.classify(&series_from_returns(&alternating(20, 0.01, 0.0)));
        assert_eq!(regime.kind, RegimeKind::Transitional);
        assert_eq!(regime.confidence, 0.0);
    }

    #[test]
    fn test_steady_uptrend_is_bull() {
        let clf = RegimeClassifier::default();
        let regime = clf.classify(&series_from_returns(&alternating(60, 0.004, 0.004)));
        assert_eq!(regime.kind, RegimeKind::Bull);
        assert!(regime.confidence > 0.5);
    }

    #[test]
    fn test_steady_downtrend_is_bear() {
        let clf = RegimeClassifier::default();
        let regime = clf.classify(&series_from_returns(&alternating(60, -0.004, 0.004)));
        assert_eq!(regime.kind, RegimeKind::Bear);
    }

    #[test]
    fn test_crash_with_volatility_spike_is_crisis() {
        let clf = RegimeClassifier::default();
        let mut returns = alternating(60, 0.0, 0.001);
        returns.extend(alternating(20, -0.03, 0.02));
        let regime = clf.classify(&series_from_returns(&returns));
        assert_eq!(regime.kind, RegimeKind::Crisis);
        assert!(regime.confidence > 0.5);
    }

    #[test]
    fn test_rally_with_volatility_spike_is_transitional() {
        let clf = RegimeClassifier::default();
        let mut returns = alternating(60, 0.0, 0.001);
        returns.extend(alternating(20, 0.03, 0.02));
        let regime = clf.classify(&series_from_returns(&returns));
        assert_eq!(regime.kind, RegimeKind::Transitional);
        assert!(regime.confidence > 0.0);
    }

    #[test]
    fn test_dip_then_rally_is_recovery() {
        let clf = RegimeClassifier::default();
        let mut returns = vec![-0.004; 25];
        returns.extend(vec![0.012; 25]);
        let regime = clf.classify(&series_from_returns(&returns));
        assert_eq!(regime.kind, RegimeKind::Recovery);
    }

    #[test]
    fn test_quiet_range_is_sideways() {
        let clf = RegimeClassifier::default();
        let mut returns = alternating(40, 0.0, 0.01);
        returns.extend(alternating(40, 0.0, 0.001));
        let regime = clf.classify(&series_from_returns(&returns));
        assert_eq!(regime.kind, RegimeKind::Sideways);
    }

    #[test]
    fn test_noisy_range_is_choppy() {
        let clf = RegimeClassifier::default();
        let mut returns = alternating(40, 0.0, 0.001);
        returns.extend(alternating(40, 0.0, 0.02));
        let regime = clf.classify(&series_from_returns(&returns));
        assert_eq!(regime.kind, RegimeKind::Choppy);
    }

    #[test]
    fn test_label_moderate_trend_is_trending() {
        let clf = RegimeClassifier::default();
        let regime = clf.label(&RegimeMetrics {
            trend_z: 1.5,
            vol_percentile: 0.5,
            first_half_return: 0.01,
        });
        assert_eq!(regime.kind, RegimeKind::Trending);
    }

    #[test]
    fn test_confidence_always_in_unit_interval() {
        let clf = RegimeClassifier::default();
        for z in [-10.0, -2.5, -1.0, 0.0, 0.5, 1.2, 3.0, 12.0] {
            for pct in [0.0, 0.3, 0.5, 0.7, 0.9, 1.0] {
                let r = clf.label(&RegimeMetrics {
                    trend_z: z,
                    vol_percentile: pct,
                    first_half_return: 0.0,
                });
                assert!((0.0..=1.0).contains(&r.confidence), "{z} {pct} -> {r}");
            }
        }
    }
}
