//! Service configuration read from the environment.

use et_optimizer::OptimizerConfig;
use et_types::{TunerError, TunerResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const ADDR_VAR: &str = "ET_TUNER_ADDR";
pub const SEED_VAR: &str = "ET_TUNER_SEED";
pub const INITIAL_POINTS_VAR: &str = "ET_TUNER_INITIAL_POINTS";
pub const CANDIDATES_VAR: &str = "ET_TUNER_CANDIDATES";
pub const RATING_TARGET_VAR: &str = "ET_TUNER_RATING_TARGET";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Listen address for the liveness endpoint.
    pub addr: String,
    pub optimizer: OptimizerConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8000".to_string(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> TunerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> TunerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(addr) = lookup(ADDR_VAR) {
            config.addr = addr;
        }
        if let Some(seed) = parse_var(&lookup, SEED_VAR)? {
            config.optimizer.seed = seed;
        }
        if let Some(n) = parse_var(&lookup, INITIAL_POINTS_VAR)? {
            config.optimizer.n_initial_points = n;
        }
        if let Some(n) = parse_var(&lookup, CANDIDATES_VAR)? {
            config.optimizer.n_candidates = n;
        }
        if let Some(target) = parse_var(&lookup, RATING_TARGET_VAR)? {
            config.optimizer.rating_target = target;
        }
        config.optimizer.validate()?;
        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> TunerResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| TunerError::Config(format!("{key}={raw}: {e}")))
        })
        .transpose()
}
