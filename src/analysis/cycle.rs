//! Economic cycle classification.
//!
//! Rule table over a handful of macro indicators. Indicators older than the
//! staleness bound are treated as absent: the classifier reports
//! `Transitional` with zero confidence instead of trading on old data.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::scale;
use crate::types::{CyclePhase, EconomicCycle, MacroIndicators};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Indicators older than this are ignored.
    pub staleness_hours: i64,
    /// GDP growth (%) that counts as strong.
    pub strong_growth: f64,
    /// Unemployment (%) below this counts as low.
    pub low_unemployment: f64,
    /// |GDP growth| (%) at or below this counts as near zero.
    pub near_zero_growth: f64,
    /// Consumer confidence below this weakens an Expansion call and
    /// strengthens a Contraction call.
    pub weak_consumer_confidence: f64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            staleness_hours: 24,
            strong_growth: 2.5,
            low_unemployment: 5.0,
            near_zero_growth: 0.5,
            weak_consumer_confidence: 70.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CycleClassifier {
    config: CycleConfig,
}

impl CycleClassifier {
    pub fn new(config: CycleConfig) -> Self {
        Self { config }
    }

    pub fn staleness(&self) -> Duration {
        Duration::hours(self.config.staleness_hours)
    }

    /// Classify the current phase.
    ///
    /// `previous` is the last phase reported, used to recognise a trough
    /// (near-zero growth right after a contraction).
    pub fn classify(
        &self,
        indicators: Option<&MacroIndicators>,
        now: DateTime<Utc>,
        previous: Option<CyclePhase>,
    ) -> EconomicCycle {
        let Some(ind) = indicators else {
            debug!("No macro indicators available, cycle unknown");
            return EconomicCycle::unknown();
        };

        let age = ind.age(now);
        if age > self.staleness() {
            warn!(
                age_hours = age.num_hours(),
                bound_hours = self.config.staleness_hours,
                "Macro indicators stale, ignoring"
            );
            return EconomicCycle::unknown();
        }

        let cycle = self.apply_rules(ind, previous);
        debug!(cycle = %cycle, indicators = %ind, "Economic cycle classified");
        cycle
    }

    fn apply_rules(&self, ind: &MacroIndicators, previous: Option<CyclePhase>) -> EconomicCycle {
        let c = &self.config;
        let as_of = Some(ind.as_of);
        let weak_sentiment = ind
            .consumer_confidence
            .map(|cc| cc < c.weak_consumer_confidence)
            .unwrap_or(false);
        let late_cycle = ind.is_growth_decelerating() && ind.is_inflation_rising();

        if ind.gdp_growth < 0.0 {
            let mut conf = 0.6 + 0.3 * scale(-ind.gdp_growth, 0.0, 2.0);
            if weak_sentiment {
                conf += 0.1;
            }
            return EconomicCycle::new(CyclePhase::Contraction, conf, as_of);
        }

        let after_contraction = previous == Some(CyclePhase::Contraction)
            || ind.gdp_growth_prev.map(|p| p < 0.0).unwrap_or(false);
        if ind.gdp_growth <= c.near_zero_growth && after_contraction {
            return EconomicCycle::new(CyclePhase::Trough, 0.6, as_of);
        }

        if ind.gdp_growth >= c.strong_growth && ind.unemployment < c.low_unemployment && !late_cycle {
            let mut conf = 0.5
                + 0.25 * scale(ind.gdp_growth, c.strong_growth, c.strong_growth + 2.0)
                + 0.25 * scale(c.low_unemployment - ind.unemployment, 0.0, 2.0);
            if weak_sentiment {
                conf -= 0.1;
            }
            return EconomicCycle::new(CyclePhase::Expansion, conf, as_of);
        }

        if late_cycle {
            let infl_rise = ind.inflation - ind.inflation_prev.unwrap_or(ind.inflation);
            let decel = ind.gdp_growth_prev.unwrap_or(ind.gdp_growth) - ind.gdp_growth;
            let conf = 0.6 + 0.2 * scale(infl_rise, 0.0, 1.0) + 0.2 * scale(decel, 0.0, 1.0);
            return EconomicCycle::new(CyclePhase::Peak, conf, as_of);
        }

        EconomicCycle::new(CyclePhase::Transitional, 0.3, as_of)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
