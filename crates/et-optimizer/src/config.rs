//! Optimizer configuration.

use et_types::{TunerError, TunerResult};
use serde::{Deserialize, Serialize};

use crate::gp::KernelConfig;

/// Tuning knobs for the optimization engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Seed for every random draw the engine makes.
    pub seed: u64,

    /// Observations collected by random sampling before the surrogate is used.
    pub n_initial_points: usize,

    /// Size of the random candidate pool scored by the acquisition function.
    pub n_candidates: usize,

    /// Largest batch a single `suggest` call may request.
    pub max_suggestions: usize,

    /// Exploration offset for Expected Improvement.
    pub xi: f64,

    /// Sample count at which the sampling half of the convergence score
    /// saturates.
    pub sample_target: usize,

    /// Rating at which the quality half of the convergence score saturates.
    /// Ratings themselves are not bounded.
    pub rating_target: f64,

    /// Surrogate kernel settings.
    pub kernel: KernelConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            n_initial_points: 5,
            n_candidates: 2000,
            max_suggestions: 10,
            xi: 0.01,
            sample_target: 50,
            rating_target: 4.0,
            kernel: KernelConfig::default(),
        }
    }
}

impl OptimizerConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_initial_points(mut self, n: usize) -> Self {
        self.n_initial_points = n;
        self
    }

    pub fn with_candidates(mut self, n: usize) -> Self {
        self.n_candidates = n;
        self
    }

    pub fn with_max_suggestions(mut self, n: usize) -> Self {
        self.max_suggestions = n;
        self
    }

    pub fn with_rating_target(mut self, target: f64) -> Self {
        self.rating_target = target;
        self
    }

    pub fn with_sample_target(mut self, target: usize) -> Self {
        self.sample_target = target;
        self
    }

    pub fn validate(&self) -> TunerResult<()> {
        if self.n_initial_points == 0 {
            return Err(TunerError::Config("n_initial_points must be at least 1".into()));
        }
        if self.n_candidates == 0 {
            return Err(TunerError::Config("n_candidates must be at least 1".into()));
        }
        if self.max_suggestions == 0 {
            return Err(TunerError::Config("max_suggestions must be at least 1".into()));
        }
        if self.sample_target == 0 {
            return Err(TunerError::Config("sample_target must be at least 1".into()));
        }
        if !(self.rating_target.is_finite() && self.rating_target > 0.0) {
            return Err(TunerError::Config(format!(
                "rating_target must be positive, got {}",
                self.rating_target
            )));
        }
        if !(self.xi.is_finite() && self.xi >= 0.0) {
            return Err(TunerError::Config(format!("xi must be non-negative, got {}", self.xi)));
        }
        if self.kernel.length_scales.is_empty()
            || self.kernel.length_scales.iter().any(|l| !(l.is_finite() && *l > 0.0))
        {
            return Err(TunerError::Config("kernel length scales must be positive".into()));
        }
        if !(self.kernel.signal_variance > 0.0 && self.kernel.noise_variance >= 0.0) {
            return Err(TunerError::Config("kernel variances must be non-negative".into()));
        }
        Ok(())
    }
}
