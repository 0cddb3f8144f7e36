// src/config/mod.rs
//! Config loading: TOML file + env overrides.
//!
//! Lookup order:
//! 1) `$RISK_ENGINE_CONFIG_PATH` (must exist when set)
//! 2) `config/risk_engine.toml`
//! 3) built-in defaults
//!
//! Env overrides are applied last and the result is validated.

pub mod engine;

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub use engine::{
    EngineConfig, EscalationConfig, FactorWeights, FeatureConfig, SchedulerConfig, ScoringConfig,
    SeverityConfig,
};

pub const ENV_CONFIG_PATH: &str = "RISK_ENGINE_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/risk_engine.toml";

pub const ENV_COOLDOWN_SECS: &str = "ESCALATION_COOLDOWN_SECS";
pub const ENV_INTERVAL_SECS: &str = "ANALYSIS_INTERVAL_SECS";
pub const ENV_TIMEOUT_MS: &str = "ANALYSIS_TIMEOUT_MS";

/// Parse and validate a config file. Overrides are not applied.
pub fn load_from(path: &Path) -> Result<EngineConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading engine config from {}", path.display()))?;
    let cfg: EngineConfig = toml::from_str(&content)
        .with_context(|| format!("parsing engine config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validating engine config {}", path.display()))?;
    Ok(cfg)
}

/// Load using env var + fallbacks, then apply env overrides.
pub fn load_default() -> Result<EngineConfig> {
    let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        load_from(&pb)?
    } else {
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            load_from(&default_p)?
        } else {
            tracing::info!(target: "config", "no config file found, using built-in defaults");
            EngineConfig::default()
        }
    };

    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

fn apply_env_overrides(cfg: &mut EngineConfig) {
    if let Some(v) = parse_env::<i64>(ENV_COOLDOWN_SECS) {
        cfg.escalation.cooldown_secs = v.max(0);
    }
    if let Some(v) = parse_env::<u64>(ENV_INTERVAL_SECS) {
        cfg.scheduler.interval_secs = v.max(1);
    }
    if let Some(v) = parse_env::<u64>(ENV_TIMEOUT_MS) {
        cfg.scheduler.analysis_timeout_ms = v.max(1);
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(target: "config", var = name, value = %raw, "ignoring unparsable override");
            None
        }
    }
}
