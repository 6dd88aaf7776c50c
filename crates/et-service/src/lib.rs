//! Engine boundary for the enhancement tuner.
//!
//! [`TunerService`] owns one [`Optimizer`] behind a mutex and exposes the
//! operations a transport calls: suggest, tell, stats, reset and health.
//! Cloning the service shares the same engine.

pub mod api;
pub mod config;

use et_optimizer::{Optimizer, OptimizerConfig, ParameterCodec};
use et_types::{TunerError, TunerResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info};

pub use api::*;
pub use config::ServiceConfig;

pub const SERVICE_NAME: &str = "et-tuner";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone)]
pub struct TunerService {
    engine: Arc<Mutex<Optimizer>>,
    codec: ParameterCodec,
}

impl TunerService {
    pub fn new(config: OptimizerConfig) -> TunerResult<Self> {
        let optimizer = Optimizer::new(config)?;
        Ok(Self {
            codec: optimizer.codec().clone(),
            engine: Arc::new(Mutex::new(optimizer)),
        })
    }

    /// Suggest parameter sets to try next, formatted per backend.
    ///
    /// The engine lock is held only while the batch is planned; fitting the
    /// surrogate and scoring candidates happen after it is released.
    pub fn suggest(&self, request: &SuggestRequest) -> TunerResult<SuggestResponse> {
        info!(
            count = request.num_suggestions,
            mode = ?request.mode,
            "suggesting parameters"
        );

        let plan = self.engine.lock().plan_suggestions(request.num_suggestions)?;
        let points = plan.run().map_err(|e| {
            error!(error = %e, "error suggesting parameters");
            e
        })?;

        let suggestions = points
            .iter()
            .map(|p| self.codec.format(p))
            .collect::<TunerResult<Vec<_>>>()?;
        info!(count = suggestions.len(), "generated suggestions");
        Ok(SuggestResponse { suggestions })
    }

    /// Apply a batch of ratings in order.
    ///
    /// Every record is validated before any is applied, so a bad record
    /// leaves the engine unchanged.
    pub fn tell(&self, request: &TellRequest) -> TunerResult<TellResponse> {
        info!(results = request.results.len(), "updating model");

        for record in &request.results {
            if !record.rating.is_finite() {
                return Err(TunerError::InvalidRating {
                    rating: record.rating,
                });
            }
            self.codec.encode_value(&record.parameters)?;
        }

        let mut engine = self.engine.lock();
        for record in &request.results {
            engine.tell(&record.parameters, record.rating)?;
        }

        let response = TellResponse {
            updated: true,
            samples_seen: engine.sample_count(),
            convergence_score: engine.convergence_score(),
        };
        info!(
            samples = response.samples_seen,
            convergence = response.convergence_score,
            "model updated"
        );
        Ok(response)
    }

    pub fn stats(&self) -> StatsResponse {
        let stats = self.engine.lock().stats();
        StatsResponse {
            run_id: stats.run_id,
            phase: stats.phase,
            samples_seen: stats.sample_count,
            convergence: stats.convergence_score,
            best_parameters: stats.best_parameters,
            best_rating: stats.best_rating,
        }
    }

    pub fn reset(&self) -> ResetResponse {
        self.engine.lock().reset();
        ResetResponse {
            status: "reset".to_string(),
            message: "Optimizer has been reset".to_string(),
        }
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "healthy".to_string(),
            service: SERVICE_NAME.to_string(),
            version: SERVICE_VERSION.to_string(),
            optimizer_samples: self.engine.lock().sample_count(),
        }
    }
}
