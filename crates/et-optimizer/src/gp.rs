//! Gaussian-process surrogate model.
//!
//! Targets are standardized before fitting. The kernel is Matérn 5/2 over the
//! encoded feature vectors; its length scale is picked from a fixed grid by
//! maximizing the log marginal likelihood, which keeps fitting deterministic.

use et_types::{TunerError, TunerResult};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

/// Posterior mean and standard deviation at one input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub mean: f64,
    pub std_dev: f64,
}

/// A regression model with calibrated uncertainty.
pub trait SurrogateModel: Send + Sync {
    /// Fit the model to inputs `x` and targets `y` (lower is better).
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> TunerResult<()>;

    /// Predict at a single encoded input.
    fn predict(&self, x: &[f64]) -> Prediction;

    /// Human-readable model name.
    fn name(&self) -> &str;
}

/// Kernel hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Length scales tried during fitting.
    pub length_scales: Vec<f64>,
    /// Signal variance of the standardized targets.
    pub signal_variance: f64,
    /// Observation noise variance of the standardized targets.
    pub noise_variance: f64,
    /// How many times the diagonal jitter is increased tenfold before a
    /// decomposition failure is reported.
    pub max_jitter_attempts: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            length_scales: vec![0.1, 0.2, 0.35, 0.5, 0.75, 1.0, 1.5, 2.0],
            signal_variance: 1.0,
            noise_variance: 1e-2,
            max_jitter_attempts: 6,
        }
    }
}

#[derive(Debug, Clone)]
struct Fitted {
    x_train: Vec<Vec<f64>>,
    length_scale: f64,
    y_mean: f64,
    y_scale: f64,
    /// K^{-1} y for the standardized targets.
    alpha: Vec<f64>,
    /// Lower Cholesky factor of K + noise * I.
    l_matrix: Vec<Vec<f64>>,
}

/// Gaussian process with a Matérn 5/2 kernel.
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    config: KernelConfig,
    fitted: Option<Fitted>,
}

impl GaussianProcess {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            fitted: None,
        }
    }

    /// Length scale selected by the last successful fit.
    pub fn length_scale(&self) -> Option<f64> {
        self.fitted.as_ref().map(|f| f.length_scale)
    }

    pub fn n_observations(&self) -> usize {
        self.fitted.as_ref().map_or(0, |f| f.x_train.len())
    }

    fn kernel(&self, length_scale: f64, x1: &[f64], x2: &[f64]) -> f64 {
        let sq_dist: f64 = x1.iter().zip(x2).map(|(a, b)| (a - b).powi(2)).sum();
        let r = sq_dist.sqrt() / length_scale;
        let s5r = 5f64.sqrt() * r;
        self.config.signal_variance * (1.0 + s5r + 5.0 * r * r / 3.0) * (-s5r).exp()
    }

    fn covariance(&self, length_scale: f64, x: &[Vec<f64>], jitter: f64) -> Vec<Vec<f64>> {
        let n = x.len();
        let mut k = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..=i {
                let v = self.kernel(length_scale, &x[i], &x[j]);
                k[i][j] = v;
                k[j][i] = v;
            }
            k[i][i] += self.config.noise_variance + jitter;
        }
        k
    }

    /// Factor K for one length scale, escalating diagonal jitter on failure.
    fn factor(&self, length_scale: f64, x: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
        let mut jitter = 0.0;
        for _ in 0..=self.config.max_jitter_attempts {
            if let Some(l) = cholesky(&self.covariance(length_scale, x, jitter)) {
                return Some(l);
            }
            jitter = if jitter == 0.0 { 1e-8 } else { jitter * 10.0 };
        }
        None
    }
}

impl SurrogateModel for GaussianProcess {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> TunerResult<()> {
        if x.is_empty() || x.len() != y.len() {
            return Err(TunerError::surrogate(format!(
                "cannot fit {} inputs to {} targets",
                x.len(),
                y.len()
            )));
        }

        let n = y.len() as f64;
        let (y_mean, y_scale) = standardization(y)
            .ok_or_else(|| TunerError::surrogate("targets cannot be standardized"))?;
        let y_std: Vec<f64> = y.iter().map(|v| (v - y_mean) / y_scale).collect();

        let mut best: Option<(f64, Fitted)> = None;
        for &length_scale in &self.config.length_scales {
            let Some(l) = self.factor(length_scale, x) else {
                continue;
            };
            let alpha = solve_triangular(&l, &solve_triangular(&l, &y_std, false), true);
            let log_det: f64 = (0..l.len()).map(|i| l[i][i].ln()).sum();
            let data_fit: f64 = y_std.iter().zip(&alpha).map(|(a, b)| a * b).sum();
            let log_ml = -0.5 * data_fit - log_det - 0.5 * n * (2.0 * PI).ln();

            if best.as_ref().map_or(true, |(score, _)| log_ml > *score) {
                best = Some((
                    log_ml,
                    Fitted {
                        x_train: x.to_vec(),
                        length_scale,
                        y_mean,
                        y_scale,
                        alpha,
                        l_matrix: l,
                    },
                ));
            }
        }

        let (log_ml, fitted) = best.ok_or_else(|| {
            TunerError::surrogate("covariance matrix is not positive definite for any length scale")
        })?;
        debug!(
            model = self.name(),
            observations = x.len(),
            length_scale = fitted.length_scale,
            log_marginal_likelihood = log_ml,
            "fitted gaussian process"
        );
        self.fitted = Some(fitted);
        Ok(())
    }

    fn predict(&self, x: &[f64]) -> Prediction {
        let Some(f) = &self.fitted else {
            return Prediction {
                mean: 0.0,
                std_dev: self.config.signal_variance.sqrt(),
            };
        };

        let k_star: Vec<f64> = f
            .x_train
            .iter()
            .map(|xi| self.kernel(f.length_scale, xi, x))
            .collect();
        let mean: f64 = k_star.iter().zip(&f.alpha).map(|(k, a)| k * a).sum();

        let v = solve_triangular(&f.l_matrix, &k_star, false);
        let variance = self.config.signal_variance - v.iter().map(|vi| vi * vi).sum::<f64>();

        Prediction {
            mean: mean * f.y_scale + f.y_mean,
            std_dev: variance.max(1e-12).sqrt() * f.y_scale,
        }
    }

    fn name(&self) -> &str {
        "gaussian_process"
    }
}

/// Mean and standard deviation used to standardize `y`.
///
/// `None` when the targets are flat (variance at or below machine epsilon) or
/// so large that their moments overflow; no GP can be fit to them.
pub fn standardization(y: &[f64]) -> Option<(f64, f64)> {
    if y.is_empty() {
        return None;
    }
    let n = y.len() as f64;
    let mean = y.iter().sum::<f64>() / n;
    let variance = y.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    if !mean.is_finite() || !variance.is_finite() || variance <= f64::EPSILON {
        return None;
    }
    Some((mean, variance.sqrt()))
}

/// Lower-triangular Cholesky factor, or `None` if the matrix is not
/// positive definite.
fn cholesky(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = matrix.len();
    let mut l = vec![vec![0.0; n]; n];

    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let val = matrix[i][i] - sum;
                if val.is_nan() || val <= 0.0 {
                    return None;
                }
                l[i][j] = val.sqrt();
            } else {
                l[i][j] = (matrix[i][j] - sum) / l[j][j];
            }
        }
    }

    Some(l)
}

/// Solve L x = b, or L^T x = b when `transpose` is set.
fn solve_triangular(l: &[Vec<f64>], b: &[f64], transpose: bool) -> Vec<f64> {
    let n = b.len();
    let mut x = vec![0.0; n];

    if transpose {
        for i in (0..n).rev() {
            let sum: f64 = ((i + 1)..n).map(|j| l[j][i] * x[j]).sum();
            x[i] = (b[i] - sum) / l[i][i];
        }
    } else {
        for i in 0..n {
            let sum: f64 = (0..i).map(|j| l[i][j] * x[j]).sum();
            x[i] = (b[i] - sum) / l[i][i];
        }
    }

    x
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_gp() -> GaussianProcess {
        GaussianProcess::new(KernelConfig {
            noise_variance: 1e-6,
            ..KernelConfig::default()
        })
    }

    fn line_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64 / 4.0]).collect();
        let y: Vec<f64> = x.iter().map(|v| (v[0] - 0.4).powi(2)).collect();
        (x, y)
    }

    #[test]
    fn unfitted_model_returns_prior() {
        let gp = GaussianProcess::new(KernelConfig::default());
        let p = gp.predict(&[0.5]);
        assert_eq!(p.mean, 0.0);
        assert_eq!(p.std_dev, 1.0);
        assert_eq!(gp.n_observations(), 0);
        assert!(gp.length_scale().is_none());
    }

    #[test]
    fn interpolates_training_data() {
        let (x, y) = line_data();
        let mut gp = quiet_gp();
        gp.fit(&x, &y).unwrap();
        assert_eq!(gp.n_observations(), 5);
        assert!(gp.length_scale().is_some());

        for (xi, yi) in x.iter().zip(&y) {
            let p = gp.predict(xi);
            assert!((p.mean - yi).abs() < 1e-2, "mean {} vs {}", p.mean, yi);
        }
    }

    #[test]
    fn uncertainty_grows_away_from_data() {
        let (x, y) = line_data();
        let mut gp = quiet_gp();
        gp.fit(&x, &y).unwrap();

        let near = gp.predict(&[0.5]).std_dev;
        let far = gp.predict(&[3.0]).std_dev;
        assert!(near < far, "near {near} should be below far {far}");
    }

    #[test]
    fn rejects_constant_targets() {
        let x = vec![vec![0.1], vec![0.9]];
        let mut gp = GaussianProcess::new(KernelConfig::default());
        let err = gp.fit(&x, &[-3.0, -3.0]).unwrap_err();
        assert!(matches!(err, TunerError::Surrogate { .. }));
    }

    #[test]
    fn standardization_rejects_flat_or_overflowing_targets() {
        assert_eq!(standardization(&[1.0, 3.0]), Some((2.0, 1.0)));
        assert!(standardization(&[]).is_none());
        assert!(standardization(&[3.0, 3.0, 3.0 + 1e-9]).is_none());
        assert!(standardization(&[1e200, -1e200, 1e200]).is_none());
        assert!(standardization(&[f64::MAX, f64::MAX]).is_none());
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let mut gp = GaussianProcess::new(KernelConfig::default());
        assert!(gp.fit(&[vec![0.1]], &[1.0, 2.0]).is_err());
        assert!(gp.fit(&[], &[]).is_err());
    }

    #[test]
    fn duplicate_inputs_still_factor() {
        let x = vec![vec![0.5, 0.5], vec![0.5, 0.5], vec![0.1, 0.9]];
        let y = vec![-4.0, -3.0, -1.0];
        let mut gp = GaussianProcess::new(KernelConfig {
            noise_variance: 0.0,
            ..KernelConfig::default()
        });
        gp.fit(&x, &y).unwrap();
        let p = gp.predict(&[0.5, 0.5]);
        assert!(p.mean.is_finite() && p.std_dev.is_finite());
    }

    #[test]
    fn cholesky_reconstructs_matrix() {
        let a = vec![
            vec![4.0, 12.0, -16.0],
            vec![12.0, 37.0, -43.0],
            vec![-16.0, -43.0, 98.0],
        ];
        let l = cholesky(&a).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let v: f64 = (0..3).map(|k| l[i][k] * l[j][k]).sum();
                assert!((v - a[i][j]).abs() < 1e-9);
            }
        }
        assert!(cholesky(&[vec![-1.0]]).is_none());
    }
}
