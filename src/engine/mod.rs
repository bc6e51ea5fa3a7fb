//! Core engine: the tick loop and everything it drives directly.

pub mod accountant;
pub mod circuit_breaker;
pub mod coordinator;
pub mod executor;

use crate::analysis::cycle::CycleConfig;
use crate::analysis::regime::RegimeConfig;
use crate::analysis::technical::TechnicalConfig;
use crate::strategy::signal::SignalConfig;
use crate::strategy::sizing::SizingConfig;
use crate::types::RiskLimits;
use accountant::ExitConfig;
use coordinator::CoordinatorConfig;
use executor::ExecutorConfig;

/// Everything the coordinator needs to build its components.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub coordinator: CoordinatorConfig,
    pub regime: RegimeConfig,
    pub cycle: CycleConfig,
    pub technical: TechnicalConfig,
    pub signal: SignalConfig,
    pub limits: RiskLimits,
    pub sizing: SizingConfig,
    pub exits: ExitConfig,
    pub executor: ExecutorConfig,
}
