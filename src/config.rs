//! Engine configuration: TOML file loading, environment overrides and
//! validation.

use crate::clock::DEFAULT_GROWTH_RATE_K;
use crate::errors::ConfigError;
use crate::settlement::SettlementConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Default public client seed. A fixed house value is sufficient because
/// the nonce rotates every round; operators can rotate the seed itself via
/// configuration.
pub const DEFAULT_CLIENT_SEED: &str = "crashcore-house-seed-v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashConfig {
    /// WAITING phase length before the round starts.
    pub waiting_duration_ms: u64,
    /// Authoritative clock interval.
    pub tick_interval_ms: u64,
    /// Multiplier growth constant per millisecond.
    pub growth_rate_k: f64,
    /// Fractional operator advantage built into the crash distribution.
    pub house_edge: f64,
    /// Public client seed fed into crash-point derivation.
    pub client_seed: String,
    /// Allow more than one concurrent bet per user per round.
    pub multi_slot_betting: bool,
    pub settlement: SettlementConfig,
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            waiting_duration_ms: 5_000,
            tick_interval_ms: 100,
            growth_rate_k: DEFAULT_GROWTH_RATE_K,
            house_edge: 0.03,
            client_seed: DEFAULT_CLIENT_SEED.to_string(),
            multi_slot_betting: false,
            settlement: SettlementConfig::default(),
        }
    }
}

/// Configuration loader: file defaults, then environment overrides, then
/// validation.
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    pub fn load(&self) -> Result<CrashConfig, ConfigError> {
        let mut config = match &self.config_path {
            Some(path) => Self::load_from_file(path)?,
            None => CrashConfig::default(),
        };
        Self::apply_env_overrides(&mut config)?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn load_from_file(path: &str) -> Result<CrashConfig, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("failed to read {}: {}", path, e)))?;
        toml::from_str(&content)
            .map_err(|e| ConfigError::LoadFailed(format!("failed to parse TOML: {}", e)))
    }

    fn apply_env_overrides(config: &mut CrashConfig) -> Result<(), ConfigError> {
        if let Some(value) = parse_env::<u64>("CRASH_WAITING_DURATION_MS")? {
            config.waiting_duration_ms = value;
        }
        if let Some(value) = parse_env::<u64>("CRASH_TICK_INTERVAL_MS")? {
            config.tick_interval_ms = value;
        }
        if let Some(value) = parse_env::<f64>("CRASH_GROWTH_RATE_K")? {
            config.growth_rate_k = value;
        }
        if let Some(value) = parse_env::<f64>("CRASH_HOUSE_EDGE")? {
            config.house_edge = value;
        }
        if let Ok(value) = env::var("CRASH_CLIENT_SEED") {
            config.client_seed = value;
        }
        if let Some(value) = parse_env::<bool>("CRASH_MULTI_SLOT_BETTING")? {
            config.multi_slot_betting = value;
        }
        Ok(())
    }

    fn validate(config: &CrashConfig) -> Result<(), ConfigError> {
        if config.waiting_duration_ms == 0 {
            return Err(invalid("waiting_duration_ms", "must be positive"));
        }
        if config.tick_interval_ms == 0 {
            return Err(invalid("tick_interval_ms", "must be positive"));
        }
        if !config.growth_rate_k.is_finite() || config.growth_rate_k <= 0.0 {
            return Err(invalid("growth_rate_k", "must be a positive number"));
        }
        if !config.house_edge.is_finite() || !(0.0..0.5).contains(&config.house_edge) {
            return Err(invalid("house_edge", "must be in [0.0, 0.5)"));
        }
        if config.client_seed.trim().is_empty() {
            return Err(invalid("client_seed", "must not be empty"));
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse::<T>().map(Some).map_err(|_| ConfigError::Invalid {
            field: name.to_string(),
            reason: format!("could not parse '{}'", raw),
        }),
        Err(_) => Ok(None),
    }
}
