//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section has defaults, so a partial file is valid. Secrets (API keys) are
//! referenced by env-var name in the config and resolved at runtime via
//! `std::env::var`.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::analysis::cycle::CycleConfig;
use crate::analysis::regime::RegimeConfig;
use crate::analysis::technical::TechnicalConfig;
use crate::engine::accountant::ExitConfig;
use crate::engine::circuit_breaker::BreakerConfig;
use crate::engine::coordinator::CoordinatorConfig;
use crate::engine::executor::ExecutorConfig;
use crate::engine::EngineSettings;
use crate::strategy::signal::SignalConfig;
use crate::strategy::sizing::SizingConfig;
use crate::types::{AegisError, RiskLimits};

/// Upper bound on `executor.max_attempts`.
const MAX_EXECUTION_ATTEMPTS: u32 = 10;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub coordinator: CoordinatorConfig,
    pub risk: RiskLimits,
    pub sizing: SizingConfig,
    pub signal: SignalConfig,
    pub regime: RegimeConfig,
    pub cycle: CycleConfig,
    pub technical: TechnicalConfig,
    pub breaker: BreakerConfig,
    pub exits: ExitConfig,
    pub executor: ExecutorConfig,
    pub advisory: AdvisoryConfig,
    pub data: DataConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub tick_interval_secs: u64,
    /// SQLite trade ledger file.
    pub ledger_path: String,
    /// Circuit breaker state file.
    pub state_path: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "AEGIS-001".to_string(),
            tick_interval_secs: 300,
            ledger_path: "aegis_ledger.db".to_string(),
            state_path: crate::storage::DEFAULT_STATE_FILE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisoryConfig {
    pub enabled: bool,
    pub model: String,
    /// Fallback model for OpenRouter (used when the primary model fails).
    pub fallback_model: Option<String>,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "anthropic/claude-sonnet-4".to_string(),
            fallback_model: None,
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            max_tokens: 256,
            timeout_secs: 8,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// JSON snapshot of price series and macro data.
    pub snapshot_path: Option<String>,
    /// When set and the variable resolves, macro data comes from FRED.
    pub fred_api_key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), AegisError> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(AegisError::Config(format!("{name} must be within [0, 1], got {v}")))
            }
        };

        if self.coordinator.instruments.is_empty() {
            return Err(AegisError::Config("no instruments configured".into()));
        }
        if self.coordinator.initial_equity <= rust_decimal::Decimal::ZERO {
            return Err(AegisError::Config("initial_equity must be positive".into()));
        }
        if self.risk.max_drawdown <= 0.0 || self.risk.max_drawdown >= 1.0 {
            return Err(AegisError::Config(format!(
                "risk.max_drawdown must be within (0, 1), got {}",
                self.risk.max_drawdown
            )));
        }
        unit("risk.confidence_floor", self.risk.confidence_floor)?;
        unit("risk.high_risk_confidence_floor", self.risk.high_risk_confidence_floor)?;
        unit("risk.advisory_veto_confidence", self.risk.advisory_veto_confidence)?;
        unit("breaker.warning_fraction", self.breaker.warning_fraction)?;
        if self.risk.max_per_instrument == 0 || self.risk.max_total == 0 {
            return Err(AegisError::Config("position limits must be at least 1".into()));
        }
        if self.executor.max_attempts == 0 || self.executor.max_attempts > MAX_EXECUTION_ATTEMPTS {
            return Err(AegisError::Config(format!(
                "executor.max_attempts must be within 1..={MAX_EXECUTION_ATTEMPTS}, got {}",
                self.executor.max_attempts
            )));
        }
        if self.agent.tick_interval_secs == 0 {
            return Err(AegisError::Config("agent.tick_interval_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Component settings for the coordinator.
    pub fn engine_settings(&self) -> EngineSettings {
        let mut coordinator = self.coordinator.clone();
        if coordinator.state_path.is_none() {
            coordinator.state_path = Some(self.agent.state_path.clone());
        }
        EngineSettings {
            coordinator,
            regime: self.regime.clone(),
            cycle: self.cycle.clone(),
            technical: self.technical.clone(),
            signal: self.signal.clone(),
            limits: self.risk.clone(),
            sizing: self.sizing.clone(),
            exits: self.exits.clone(),
            executor: self.executor.clone(),
        }
    }

    /// Breaker thresholds, with the halt drawdown taken from the risk limits
    /// so the two can never disagree.
    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            max_drawdown: self.risk.max_drawdown,
            ..self.breaker.clone()
        }
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve a secret, returning `None` when the variable is unset or empty.
    pub fn resolve_secret(env_name: &str) -> Option<SecretString> {
        Self::resolve_env(env_name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::new)
    }
}
