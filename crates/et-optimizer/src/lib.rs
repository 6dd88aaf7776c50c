//! # et-optimizer
//!
//! Bayesian optimization of image-enhancement parameters.
//!
//! Provides the mixed categorical/continuous search space, the codec between
//! flat points and backend-specific parameter payloads, a Gaussian-process
//! surrogate with Expected Improvement, and the [`Optimizer`] that ties them
//! together with best-so-far tracking and a convergence heuristic.

mod acquisition;
mod codec;
mod config;
mod engine;
mod gp;
mod history;
mod space;

pub use acquisition::{expected_improvement, normal_cdf, normal_pdf, select_batch};
pub use codec::{
    enhancement_space, ParameterCodec, CONTROLNET_BOUNDS, GUIDANCE_BOUNDS, STRENGTH_BOUNDS,
};
pub use config::OptimizerConfig;
pub use engine::{Optimizer, SuggestionPlan};
pub use gp::{standardization, GaussianProcess, KernelConfig, Prediction, SurrogateModel};
pub use history::{convergence_score, BestRecord, EngineStats, History, Observation, Phase};
pub use space::{Dimension, DimensionKind, ParameterValue, Point, SearchSpace};
