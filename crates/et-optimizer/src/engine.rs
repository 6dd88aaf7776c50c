//! The sequential optimization engine.

use chrono::{DateTime, Utc};
use et_types::{BackendParams, TunerError, TunerResult};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::acquisition::select_batch;
use crate::codec::ParameterCodec;
use crate::config::OptimizerConfig;
use crate::gp::{standardization, GaussianProcess, KernelConfig};
use crate::history::{convergence_score, EngineStats, History, Observation, Phase};
use crate::space::{Point, SearchSpace};

/// Bayesian optimizer over the enhancement parameter space.
///
/// Ratings are maximized; internally every rating is stored negated and the
/// surrogate minimizes. The first `n_initial_points` observations are
/// gathered by space-filling random sampling, after which a Gaussian process
/// and Expected Improvement drive the suggestions.
#[derive(Debug)]
pub struct Optimizer {
    config: OptimizerConfig,
    codec: ParameterCodec,
    rng: ChaCha8Rng,
    history: History,
    run_id: Uuid,
    started_at: DateTime<Utc>,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig) -> TunerResult<Self> {
        config.validate()?;
        let codec = ParameterCodec::new();
        codec.space().validate()?;

        let optimizer = Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            codec,
            history: History::new(),
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
        };
        info!(
            run_id = %optimizer.run_id,
            seed = optimizer.config.seed,
            initial_points = optimizer.config.n_initial_points,
            "optimizer initialized"
        );
        Ok(optimizer)
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn codec(&self) -> &ParameterCodec {
        &self.codec
    }

    pub fn phase(&self) -> Phase {
        Phase::for_samples(self.history.len(), self.config.n_initial_points)
    }

    /// Snapshot everything a batch of suggestions depends on and advance the
    /// random stream. The returned plan can run without access to the
    /// optimizer, so callers sharing it behind a lock can release the lock
    /// before the surrogate work starts.
    ///
    /// `count` must lie in `1..=max_suggestions`.
    pub fn plan_suggestions(&mut self, count: usize) -> TunerResult<SuggestionPlan> {
        if count == 0 || count > self.config.max_suggestions {
            return Err(TunerError::InvalidSuggestionCount {
                count,
                max: self.config.max_suggestions,
            });
        }

        let observations: Vec<(Point, f64)> = self
            .history
            .observations()
            .iter()
            .map(|o| (o.point.clone(), o.score))
            .collect();
        let scores: Vec<f64> = observations.iter().map(|(_, s)| *s).collect();

        Ok(SuggestionPlan {
            space: self.codec.space().clone(),
            observations,
            distinct_scores: self.history.distinct_scores(),
            fittable: self.history.distinct_scores() >= 2 && standardization(&scores).is_some(),
            phase: self.phase(),
            count,
            seed: self.rng.gen(),
            n_candidates: self.config.n_candidates,
            xi: self.config.xi,
            kernel: self.config.kernel.clone(),
        })
    }

    /// Propose `count` points to evaluate next.
    pub fn suggest(&mut self, count: usize) -> TunerResult<Vec<Point>> {
        self.plan_suggestions(count)?.run()
    }

    /// Propose `count` points formatted for the caller, rounded for display.
    pub fn suggest_formatted(&mut self, count: usize) -> TunerResult<Vec<BackendParams>> {
        let points = self.suggest(count)?;
        points.iter().map(|p| self.codec.format(p)).collect()
    }

    /// Record a rating for a caller-supplied parameter dictionary.
    ///
    /// Ratings outside any nominal scale are accepted; only non-finite values
    /// are rejected. Nothing is recorded if the dictionary or rating is
    /// invalid.
    pub fn tell(&mut self, parameters: &serde_json::Value, rating: f64) -> TunerResult<()> {
        if !rating.is_finite() {
            return Err(TunerError::InvalidRating { rating });
        }
        let point = self.codec.encode_value(parameters)?;
        let was = self.phase();

        self.history
            .record(Observation::new(point, -rating), parameters, rating);

        info!(
            rating,
            samples = self.sample_count(),
            best = self.best_rating().unwrap_or_default(),
            "recorded rating"
        );
        if was == Phase::Cold && self.phase() == Phase::Warm {
            info!(samples = self.sample_count(), "initial exploration complete, surrogate enabled");
        }
        Ok(())
    }

    /// Record a rating for a typed parameter payload.
    pub fn tell_params(&mut self, parameters: &BackendParams, rating: f64) -> TunerResult<()> {
        self.tell(&parameters.to_value(), rating)
    }

    pub fn convergence_score(&self) -> f64 {
        convergence_score(
            self.sample_count(),
            self.best_rating(),
            self.config.sample_target,
            self.config.rating_target,
        )
    }

    pub fn best_parameters(&self) -> Option<&serde_json::Value> {
        self.history.best().map(|b| &b.parameters)
    }

    pub fn best_rating(&self) -> Option<f64> {
        self.history.best().map(|b| b.rating)
    }

    pub fn sample_count(&self) -> usize {
        self.history.len()
    }

    pub fn observations(&self) -> &[Observation] {
        self.history.observations()
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            run_id: self.run_id,
            started_at: self.started_at,
            phase: self.phase(),
            sample_count: self.sample_count(),
            convergence_score: self.convergence_score(),
            best_parameters: self.best_parameters().cloned(),
            best_rating: self.best_rating(),
        }
    }

    /// Discard every observation and return to the initial state.
    pub fn reset(&mut self) {
        let discarded = self.history.len();
        self.history = History::new();
        self.rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        self.run_id = Uuid::new_v4();
        self.started_at = Utc::now();
        info!(run_id = %self.run_id, discarded, "optimizer reset");
    }
}

/// Everything needed to compute one batch of suggestions.
#[derive(Debug, Clone)]
pub struct SuggestionPlan {
    space: SearchSpace,
    observations: Vec<(Point, f64)>,
    distinct_scores: usize,
    /// Whether the scores can be standardized for a surrogate fit.
    fittable: bool,
    phase: Phase,
    count: usize,
    seed: u64,
    n_candidates: usize,
    xi: f64,
    kernel: KernelConfig,
}

impl SuggestionPlan {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn run(self) -> TunerResult<Vec<Point>> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        match self.phase {
            Phase::Cold => {
                debug!(count = self.count, observations = self.observations.len(), "random exploration");
                Ok(self.space.sample_space_filling(self.count, &mut rng))
            }
            Phase::Warm if !self.fittable => {
                warn!(
                    observations = self.observations.len(),
                    distinct_scores = self.distinct_scores,
                    "surrogate cannot be fit, falling back to random exploration"
                );
                Ok(self.space.sample_space_filling(self.count, &mut rng))
            }
            Phase::Warm => self.run_surrogate(&mut rng),
        }
    }

    fn run_surrogate(&self, rng: &mut ChaCha8Rng) -> TunerResult<Vec<Point>> {
        let x_train = self
            .observations
            .iter()
            .map(|(p, _)| self.space.to_features(p))
            .collect::<TunerResult<Vec<_>>>()?;
        let y_train: Vec<f64> = self.observations.iter().map(|(_, s)| *s).collect();

        let pool = self.n_candidates.max(self.count);
        let candidates: Vec<Point> = (0..pool).map(|_| self.space.sample(rng)).collect();
        let features = candidates
            .iter()
            .map(|p| self.space.to_features(p))
            .collect::<TunerResult<Vec<_>>>()?;

        let picked = select_batch(
            || GaussianProcess::new(self.kernel.clone()),
            &x_train,
            &y_train,
            &features,
            self.count,
            self.xi,
        )?;
        debug!(
            count = picked.len(),
            candidates = pool,
            observations = x_train.len(),
            "selected suggestions by expected improvement"
        );

        Ok(picked.into_iter().map(|i| candidates[i].clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CONTROLNET_BOUNDS, GUIDANCE_BOUNDS, STRENGTH_BOUNDS};
    use crate::space::ParameterValue;
    use serde_json::json;

    fn optimizer() -> Optimizer {
        Optimizer::new(OptimizerConfig::default().with_candidates(300)).unwrap()
    }

    fn leonardo(strength: f64, guidance: f64, weight: f64) -> serde_json::Value {
        json!({
            "api": "leonardo",
            "init_strength": strength,
            "guidance_scale": guidance,
            "controlnet_weight": weight,
        })
    }

    fn assert_in_space(params: &BackendParams) {
        let in_range = |v: f64, (lo, hi): (f64, f64)| v >= lo && v <= hi;
        assert!(in_range(params.strength(), STRENGTH_BOUNDS), "{params:?}");
        assert!(in_range(params.guidance_scale(), GUIDANCE_BOUNDS), "{params:?}");
        assert!(in_range(params.controlnet_weight(), CONTROLNET_BOUNDS), "{params:?}");
    }

    #[test]
    fn fresh_optimizer_is_empty() {
        let opt = optimizer();
        assert_eq!(opt.sample_count(), 0);
        assert_eq!(opt.phase(), Phase::Cold);
        assert!(opt.best_parameters().is_none());
        assert!(opt.best_rating().is_none());
        assert_eq!(opt.convergence_score(), 0.0);
    }

    #[test]
    fn rejects_out_of_range_counts() {
        let mut opt = optimizer();
        assert!(matches!(
            opt.suggest(0),
            Err(TunerError::InvalidSuggestionCount { count: 0, max: 10 })
        ));
        assert!(opt.suggest(11).is_err());
        assert_eq!(opt.suggest(10).unwrap().len(), 10);
    }

    #[test]
    fn cold_phase_suggestions_stay_in_bounds() {
        let mut opt = optimizer();
        let suggestions = opt.suggest_formatted(3).unwrap();
        assert_eq!(suggestions.len(), 3);
        for params in &suggestions {
            assert_in_space(params);
        }

        let points = opt.suggest(10).unwrap();
        for p in &points {
            assert!(opt.codec().space().contains(p));
            let label = p.get(0).and_then(ParameterValue::as_label).unwrap();
            assert!(label == "leonardo" || label == "stablediffusion");
        }
    }

    #[test]
    fn increasing_ratings_track_best() {
        let mut opt = optimizer();
        let dicts: Vec<_> = (0..5)
            .map(|i| leonardo(0.1 + 0.05 * i as f64, 6.0 + i as f64, 0.8))
            .collect();
        for (i, dict) in dicts.iter().enumerate() {
            opt.tell(dict, (i + 1) as f64).unwrap();
        }
        assert_eq!(opt.best_rating(), Some(5.0));
        assert_eq!(opt.best_parameters(), Some(&dicts[4]));
        assert_eq!(opt.phase(), Phase::Warm);
    }

    #[test]
    fn equal_rating_does_not_replace_best() {
        let mut opt = optimizer();
        let first = leonardo(0.2, 7.0, 0.9);
        opt.tell(&first, 4.0).unwrap();
        opt.tell(&leonardo(0.4, 9.0, 0.8), 4.0).unwrap();
        assert_eq!(opt.best_parameters(), Some(&first));
        assert_eq!(opt.sample_count(), 2);
    }

    #[test]
    fn suggest_then_tell_scenario() {
        let mut opt = optimizer();
        let points = opt.suggest(2).unwrap();
        assert_eq!(points.len(), 2);

        for (point, rating) in points.iter().zip([3.5, 4.2]) {
            let dict = opt.codec().decode(point).unwrap().to_value();
            opt.tell(&dict, rating).unwrap();
        }

        assert_eq!(opt.sample_count(), 2);
        assert_eq!(opt.best_rating(), Some(4.2));
        let expected = 0.6 * (2.0 / 50.0) + 0.4 * (4.2f64 / 4.0).min(1.0);
        assert!((opt.convergence_score() - expected).abs() < 1e-12);
        assert!((opt.convergence_score() - 0.424).abs() < 1e-12);

        // The stored observations are the unrounded suggestions.
        assert_eq!(opt.observations()[0].point, points[0]);
        assert_eq!(opt.observations()[1].score, -4.2);
    }

    #[test]
    fn out_of_scale_ratings_are_accepted() {
        let mut opt = optimizer();
        opt.tell(&leonardo(0.2, 7.0, 0.9), 42.0).unwrap();
        opt.tell(&leonardo(0.3, 7.0, 0.9), -3.0).unwrap();
        assert_eq!(opt.best_rating(), Some(42.0));
        assert!((opt.convergence_score() - (0.6 * 2.0 / 50.0 + 0.4)).abs() < 1e-12);
    }

    #[test]
    fn invalid_input_leaves_state_untouched() {
        let mut opt = optimizer();
        opt.tell(&leonardo(0.2, 7.0, 0.9), 3.0).unwrap();

        assert!(matches!(
            opt.tell(&leonardo(0.2, 7.0, 0.9), f64::NAN),
            Err(TunerError::InvalidRating { .. })
        ));
        assert!(matches!(
            opt.tell(&json!({ "api": "dalle" }), 5.0),
            Err(TunerError::UnknownBackend { .. })
        ));
        assert_eq!(opt.sample_count(), 1);
        assert_eq!(opt.best_rating(), Some(3.0));
    }

    #[test]
    fn warm_phase_suggestions_are_distinct_and_in_bounds() {
        let mut opt = optimizer();
        for point in opt.suggest(6).unwrap() {
            let params = opt.codec().decode(&point).unwrap();
            // A smooth preference for low strength and mid guidance.
            let rating = 5.0 - 8.0 * (params.strength() - 0.2).abs()
                - 0.3 * (params.guidance_scale() - 8.0).abs();
            opt.tell_params(&params, rating).unwrap();
        }
        assert_eq!(opt.phase(), Phase::Warm);

        let points = opt.suggest(4).unwrap();
        assert_eq!(points.len(), 4);
        for (i, p) in points.iter().enumerate() {
            assert!(opt.codec().space().contains(p));
            for q in &points[i + 1..] {
                assert_ne!(p, q);
            }
        }
    }

    #[test]
    fn same_seed_and_history_give_same_suggestions() {
        let run = || {
            let mut opt = optimizer();
            let mut out = Vec::new();
            for round in 0..4 {
                let points = opt.suggest(2).unwrap();
                for (j, point) in points.iter().enumerate() {
                    let params = opt.codec().decode(point).unwrap();
                    opt.tell_params(&params, (round * 2 + j) as f64 * 0.5).unwrap();
                }
                out.push(points);
            }
            out
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn degenerate_scores_fall_back_to_random() {
        let mut opt = optimizer();
        for i in 0..5 {
            opt.tell(&leonardo(0.1 + 0.05 * i as f64, 7.0, 0.9), 3.0).unwrap();
        }
        assert_eq!(opt.phase(), Phase::Warm);

        let plan = opt.plan_suggestions(3).unwrap();
        assert_eq!(plan.phase(), Phase::Warm);
        let points = plan.run().unwrap();
        assert_eq!(points.len(), 3);
        assert!(points.iter().all(|p| opt.codec().space().contains(p)));
    }

    #[test]
    fn near_constant_ratings_fall_back_to_random() {
        let mut opt = optimizer();
        for i in 0..4 {
            opt.tell(&leonardo(0.1 + 0.05 * i as f64, 7.0, 0.9), 3.0).unwrap();
        }
        opt.tell(&leonardo(0.4, 7.0, 0.9), 3.0 + 1e-9).unwrap();
        assert_eq!(opt.phase(), Phase::Warm);

        let points = opt.suggest(2).unwrap();
        assert_eq!(points.len(), 2);
        assert!(points.iter().all(|p| opt.codec().space().contains(p)));
    }

    #[test]
    fn huge_ratings_fall_back_to_random() {
        let mut opt = optimizer();
        for i in 0..5 {
            let rating = if i % 2 == 0 { 1e200 } else { -1e200 };
            opt.tell(&leonardo(0.1 + 0.05 * i as f64, 7.0, 0.9), rating).unwrap();
        }
        assert_eq!(opt.phase(), Phase::Warm);

        let points = opt.suggest(2).unwrap();
        assert_eq!(points.len(), 2);
        assert!(points.iter().all(|p| opt.codec().space().contains(p)));
    }

    #[test]
    fn suggestions_round_trip_through_the_codec() {
        let mut opt = optimizer();
        for round in 0..4 {
            let points = opt.suggest(3).unwrap();
            if round >= 2 {
                assert_eq!(opt.phase(), Phase::Warm);
            }
            for (j, point) in points.iter().enumerate() {
                let params = opt.codec().decode(point).unwrap();
                assert_eq!(&opt.codec().encode(&params), point);
                let reported = params.to_value();
                assert_eq!(&opt.codec().encode_value(&reported).unwrap(), point);
                opt.tell(&reported, 1.0 + (round * 3 + j) as f64 * 0.3).unwrap();
            }
        }
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut opt = optimizer();
        let before = opt.suggest(2).unwrap();
        let run_id = opt.run_id();
        for i in 0..6 {
            opt.tell(&leonardo(0.1 + 0.05 * i as f64, 7.0, 0.9), i as f64).unwrap();
        }

        opt.reset();
        assert_eq!(opt.sample_count(), 0);
        assert!(opt.best_parameters().is_none());
        assert_eq!(opt.convergence_score(), 0.0);
        assert_eq!(opt.phase(), Phase::Cold);
        assert_ne!(opt.run_id(), run_id);

        // The random stream restarts from the seed.
        assert_eq!(opt.suggest(2).unwrap(), before);

        opt.reset();
        opt.reset();
        assert_eq!(opt.sample_count(), 0);
    }

    #[test]
    fn stats_snapshot() {
        let mut opt = optimizer();
        let dict = leonardo(0.2, 7.0, 0.9);
        opt.tell(&dict, 2.0).unwrap();

        let stats = opt.stats();
        assert_eq!(stats.sample_count, 1);
        assert_eq!(stats.best_rating, Some(2.0));
        assert_eq!(stats.best_parameters, Some(dict));
        assert_eq!(stats.phase, Phase::Cold);
        assert_eq!(stats.run_id, opt.run_id());
    }

    #[test]
    fn rejects_invalid_config() {
        assert!(Optimizer::new(OptimizerConfig::default().with_initial_points(0)).is_err());
    }
}
