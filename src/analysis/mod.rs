//! Market analysis: regime and cycle classification plus technical state.
//!
//! Everything here is a pure function of its inputs so the coordinator can
//! run it concurrently per instrument without sharing state.

pub mod cycle;
pub mod regime;
pub mod technical;

/// Sample standard deviation. Returns 0.0 for fewer than two values.
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

/// Log returns between consecutive values. Non-positive prices are skipped.
pub(crate) fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect()
}

/// Linear map of `x` from [lo, hi] onto [0, 1], clamped.
pub(crate) fn scale(x: f64, lo: f64, hi: f64) -> f64 {
    if hi <= lo {
        return if x >= hi { 1.0 } else { 0.0 };
    }
    ((x - lo) / (hi - lo)).clamp(0.0, 1.0)
}
