//! Observation history, best-so-far tracking and the convergence heuristic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::space::Point;

const SAMPLE_WEIGHT: f64 = 0.6;
const RATING_WEIGHT: f64 = 0.4;

/// Which sampling regime the engine is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Too few observations to trust a surrogate; suggestions are random.
    Cold,
    /// Suggestions come from the surrogate and Expected Improvement.
    Warm,
}

impl Phase {
    pub fn for_samples(samples: usize, n_initial_points: usize) -> Self {
        if samples < n_initial_points {
            Self::Cold
        } else {
            Self::Warm
        }
    }
}

/// A rated point. `score` is the negated rating, since the engine minimizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub point: Point,
    pub score: f64,
    pub observed_at: DateTime<Utc>,
}

impl Observation {
    pub fn new(point: Point, score: f64) -> Self {
        Self {
            point,
            score,
            observed_at: Utc::now(),
        }
    }
}

/// The highest-rated parameters seen so far, exactly as the caller sent them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestRecord {
    pub parameters: serde_json::Value,
    pub rating: f64,
    pub observed_at: DateTime<Utc>,
}

/// Append-only record of everything the engine has been told.
#[derive(Debug, Clone, Default)]
pub struct History {
    observations: Vec<Observation>,
    best: Option<BestRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observation and update the best record if `rating` beats it.
    pub fn record(&mut self, observation: Observation, parameters: &serde_json::Value, rating: f64) {
        let observed_at = observation.observed_at;
        self.observations.push(observation);
        self.update_best(parameters, rating, observed_at);
    }

    /// Replace the best record only on a strictly higher rating, so the
    /// first-seen best wins ties.
    fn update_best(&mut self, parameters: &serde_json::Value, rating: f64, observed_at: DateTime<Utc>) {
        let improved = match &self.best {
            None => true,
            Some(current) => rating > current.rating,
        };
        if improved {
            self.best = Some(BestRecord {
                parameters: parameters.clone(),
                rating,
                observed_at,
            });
        }
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn best(&self) -> Option<&BestRecord> {
        self.best.as_ref()
    }

    /// Number of distinct scores observed.
    pub fn distinct_scores(&self) -> usize {
        let mut scores: Vec<f64> = self.observations.iter().map(|o| o.score).collect();
        scores.sort_by(f64::total_cmp);
        scores.dedup();
        scores.len()
    }
}

/// Blend of "have we sampled enough" and "have we found something good".
///
/// Informational only; it is not a statistical convergence test.
pub fn convergence_score(
    sample_count: usize,
    best_rating: Option<f64>,
    sample_target: usize,
    rating_target: f64,
) -> f64 {
    if sample_count == 0 {
        return 0.0;
    }

    let sample_score = (sample_count as f64 / sample_target as f64).min(1.0);
    let rating_score = match best_rating {
        Some(rating) if rating > 0.0 => (rating / rating_target).min(1.0),
        _ => 0.0,
    };

    SAMPLE_WEIGHT * sample_score + RATING_WEIGHT * rating_score
}

/// Snapshot of engine state for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub phase: Phase,
    pub sample_count: usize,
    pub convergence_score: f64,
    pub best_parameters: Option<serde_json::Value>,
    pub best_rating: Option<f64>,
}
