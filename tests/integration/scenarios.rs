//! Decision-path scenarios run through the public strategy and analysis API.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use aegis::analysis::cycle::CycleClassifier;
use aegis::analysis::regime::RegimeClassifier;
use aegis::analysis::technical::TechnicalAnalyzer;
use aegis::strategy::risk::RiskGate;
use aegis::strategy::signal::SignalGenerator;
use aegis::strategy::sizing::{PositionSizer, SizingConfig};
use aegis::strategy::StrategyOrchestrator;
use aegis::types::*;

use crate::harness::{macro_aged, uptrend};

fn orchestrator(limits: RiskLimits) -> StrategyOrchestrator {
    StrategyOrchestrator::new(
        RiskGate::new(limits.clone()),
        PositionSizer::new(SizingConfig::default(), limits),
    )
}

fn signal(
    id: &str,
    asset_class: AssetClass,
    action: Action,
    confidence: f64,
    regime: RegimeKind,
    phase: CyclePhase,
) -> Signal {
    Signal {
        instrument: Instrument::new(id, asset_class),
        action,
        confidence,
        rationale: "fixture".into(),
        regime: MarketRegime::new(regime, 0.8),
        cycle: EconomicCycle::new(phase, 0.8, Some(Utc::now())),
        source: SignalSource::Technical,
        advisory: None,
    }
}

fn bull_buy(id: &str, confidence: f64) -> Signal {
    signal(id, AssetClass::Currency, Action::Buy, confidence, RegimeKind::Bull, CyclePhase::Expansion)
}

fn evaluate(signals: Vec<Signal>, portfolio: &mut PortfolioState, breaker: BreakerState) -> Vec<RiskDecision> {
    orchestrator(RiskLimits::default())
        .evaluate_signals(signals, portfolio, || breaker)
        .unwrap()
}

#[test]
fn test_bull_expansion_sizes_to_2640() {
    let mut portfolio = PortfolioState::new(dec!(100000));
    let decisions = evaluate(vec![bull_buy("SPX500_USD", 0.82)], &mut portfolio, BreakerState::Normal);

    assert_eq!(decisions.len(), 1);
    assert!(decisions[0].is_accepted());
    assert_eq!(decisions[0].size(), Some(dec!(2640)));
    assert_eq!(portfolio.count_for("SPX500_USD"), 1);
}

#[test]
fn test_halted_rejects_even_high_confidence() {
    let mut portfolio = PortfolioState::new(dec!(100000));
    let decisions = evaluate(vec![bull_buy("SPX500_USD", 0.99)], &mut portfolio, BreakerState::Halted);

    let reason = decisions[0].rejection().unwrap();
    assert_eq!(reason, &RejectionReason::TradingHalted);
    assert_eq!(reason.code(), "trading halted");
    assert!(decisions[0].size().is_none());
    assert_eq!(portfolio.total_open, 0);
}

#[test]
fn test_manual_reset_state_also_blocks() {
    let mut portfolio = PortfolioState::new(dec!(100000));
    let decisions = evaluate(vec![bull_buy("EUR_USD", 0.95)], &mut portfolio, BreakerState::ManualReset);
    assert_eq!(decisions[0].rejection(), Some(&RejectionReason::TradingHalted));
}

#[test]
fn test_fourth_position_on_instrument_rejected() {
    let mut portfolio = PortfolioState::new(dec!(100000));
    for _ in 0..3 {
        portfolio.reserve("XAU_USD");
    }
    let decisions = evaluate(vec![bull_buy("XAU_USD", 0.95)], &mut portfolio, BreakerState::Normal);

    let reason = decisions[0].rejection().unwrap();
    assert_eq!(reason, &RejectionReason::PositionLimit { open: 3, max: 3 });
    assert_eq!(reason.code(), "position limit reached");
}

#[test]
fn test_crisis_rejects_growth_buy_but_not_defensive() {
    let mut portfolio = PortfolioState::new(dec!(100000));
    let growth = signal("SPX500_USD", AssetClass::Index, Action::Buy, 0.82, RegimeKind::Crisis, CyclePhase::Expansion);
    let defensive = signal("US10Y", AssetClass::Bond, Action::Buy, 0.82, RegimeKind::Crisis, CyclePhase::Expansion);
    let decisions = evaluate(vec![growth, defensive], &mut portfolio, BreakerState::Normal);

    let growth = decisions.iter().find(|d| d.signal.instrument.id == "SPX500_USD").unwrap();
    assert_eq!(growth.rejection().unwrap().code(), "regime incompatible");

    // Crisis halves the size: 2000 x 1.0 x 0.5 x 1.1
    let bond = decisions.iter().find(|d| d.signal.instrument.id == "US10Y").unwrap();
    assert_eq!(bond.size(), Some(dec!(1100)));
}

#[test]
fn test_stale_macro_still_yields_signal() {
    let cycle = CycleClassifier::default().classify(Some(&macro_aged(48)), Utc::now(), None);
    assert_eq!(cycle.phase, CyclePhase::Transitional);
    assert_eq!(cycle.confidence, 0.0);

    let bars = uptrend(120);
    let series = PriceSeries {
        instrument: "EUR_USD".into(),
        as_of: bars.last().unwrap().timestamp,
        bars,
    };
    let regime = RegimeClassifier::default().classify(&series);
    let technical = TechnicalAnalyzer::default().analyze(&series.closes());
    let instrument = Instrument::new("EUR_USD", AssetClass::Currency);

    let signal = SignalGenerator::default()
        .generate(&instrument, technical.as_ref(), None, regime, cycle)
        .expect("technical path alone should produce a signal");
    assert!(signal.action.is_directional());
    assert_eq!(signal.cycle.phase, CyclePhase::Transitional);

    let limits = RiskLimits {
        confidence_floor: 0.5,
        uncertain_regime_margin: 0.0,
        ..RiskLimits::default()
    };
    let mut portfolio = PortfolioState::new(dec!(100000));
    let decisions = orchestrator(limits)
        .evaluate_signals(vec![signal], &mut portfolio, || BreakerState::Normal)
        .unwrap();
    assert_eq!(decisions.len(), 1);
    assert!(!matches!(
        decisions[0].rejection(),
        Some(RejectionReason::CycleIncompatible { .. })
    ));
}

#[test]
fn test_confidence_exactly_at_floor_accepted() {
    let mut portfolio = PortfolioState::new(dec!(100000));
    let decisions = evaluate(vec![bull_buy("EUR_USD", 0.75)], &mut portfolio, BreakerState::Normal);
    assert!(decisions[0].is_accepted());

    let mut portfolio = PortfolioState::new(dec!(100000));
    let decisions = evaluate(vec![bull_buy("EUR_USD", 0.7499)], &mut portfolio, BreakerState::Normal);
    assert_eq!(decisions[0].rejection().unwrap().code(), "confidence below floor");
}

#[test]
fn test_high_risk_instrument_needs_higher_floor() {
    let mut portfolio = PortfolioState::new(dec!(100000));
    let crypto = |c| signal("BTC_USD", AssetClass::Crypto, Action::Buy, c, RegimeKind::Bull, CyclePhase::Expansion);
    let decisions = evaluate(vec![crypto(0.85)], &mut portfolio, BreakerState::Normal);
    assert!(!decisions[0].is_accepted());

    let decisions = evaluate(vec![crypto(0.90)], &mut portfolio, BreakerState::Normal);
    assert!(decisions[0].is_accepted());
}

#[test]
fn test_hold_never_reaches_gate() {
    let mut portfolio = PortfolioState::new(dec!(100000));
    let hold = signal("EUR_USD", AssetClass::Currency, Action::Hold, 0.99, RegimeKind::Bull, CyclePhase::Expansion);
    let decisions = evaluate(vec![hold], &mut portfolio, BreakerState::Normal);
    assert!(decisions.is_empty());
    assert_eq!(portfolio.total_open, 0);
}

#[test]
fn test_unmapped_labels_default_to_neutral_multiplier() {
    let config = SizingConfig {
        regime_multipliers: Default::default(),
        cycle_multipliers: Default::default(),
        ..SizingConfig::default()
    };
    let sizer = PositionSizer::new(config, RiskLimits::default());
    assert_eq!(sizer.regime_multiplier(RegimeKind::Trending), Decimal::ONE);
    assert_eq!(sizer.cycle_multiplier(CyclePhase::Peak), Decimal::ONE);

    // Default table leaves Trending unmapped too
    let sizer = PositionSizer::new(SizingConfig::default(), RiskLimits::default());
    assert_eq!(sizer.regime_multiplier(RegimeKind::Trending), Decimal::ONE);
}

#[test]
fn test_position_counts_bounded_in_one_pass() {
    let mut portfolio = PortfolioState::new(dec!(1000000));
    let signals: Vec<Signal> = (0..80)
        .map(|i| bull_buy(&format!("INST_{}", i % 20), 0.80 + (i % 7) as f64 * 0.01))
        .collect();
    let decisions = orchestrator(RiskLimits::default())
        .evaluate_signals(signals, &mut portfolio, || BreakerState::Normal)
        .unwrap();

    assert_eq!(decisions.len(), 80);
    assert!(portfolio.total_open <= 50);
    for i in 0..20 {
        assert!(portfolio.count_for(&format!("INST_{i}")) <= 3);
    }
    let accepted = decisions.iter().filter(|d| d.is_accepted()).count() as u32;
    assert_eq!(accepted, portfolio.total_open);
}

#[test]
fn test_accepted_sizes_within_clamp_bounds() {
    let regimes = [RegimeKind::Bull, RegimeKind::Crisis, RegimeKind::Recovery, RegimeKind::Sideways];
    let phases = [CyclePhase::Expansion, CyclePhase::Peak, CyclePhase::Trough];
    let limits = RiskLimits::default();

    for equity in [dec!(10000), dec!(25000), dec!(100000), dec!(2500000)] {
        for regime in regimes {
            for phase in phases {
                for confidence in [0.75, 0.8, 0.9, 1.0] {
                    let mut portfolio = PortfolioState::new(equity);
                    let s = signal("EUR_USD", AssetClass::Currency, Action::Buy, confidence, regime, phase);
                    let decisions = orchestrator(limits.clone())
                        .evaluate_signals(vec![s], &mut portfolio, || BreakerState::Normal)
                        .unwrap();
                    if let Some(size) = decisions[0].size() {
                        assert!(size >= limits.min_position_size, "{size} below min");
                        assert!(size <= equity * limits.max_single_position_fraction, "{size} above max");
                    }
                }
            }
        }
    }
}

#[test]
fn test_inverted_bounds_abort_without_reservations() {
    // 10% of 5000 is below the 1000 minimum
    let mut portfolio = PortfolioState::new(dec!(5000));
    let result = orchestrator(RiskLimits::default()).evaluate_signals(
        vec![bull_buy("EUR_USD", 0.9), bull_buy("GBP_USD", 0.8)],
        &mut portfolio,
        || BreakerState::Normal,
    );
    assert!(matches!(result, Err(AegisError::InvariantViolation(_))));
    assert_eq!(portfolio.total_open, 0);
}
