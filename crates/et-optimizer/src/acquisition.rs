//! Expected Improvement and constant-liar batch selection.

use et_types::TunerResult;
use rayon::prelude::*;

use crate::gp::{Prediction, SurrogateModel};

/// Expected Improvement over `best` for a minimization objective.
///
/// `xi` shifts the threshold so that points merely matching the incumbent
/// score no improvement.
pub fn expected_improvement(prediction: Prediction, best: f64, xi: f64) -> f64 {
    let Prediction { mean, std_dev } = prediction;
    if std_dev < 1e-12 {
        return 0.0;
    }

    let improvement = best - mean - xi;
    let z = improvement / std_dev;
    (improvement * normal_cdf(z) + std_dev * normal_pdf(z)).max(0.0)
}

/// Standard normal PDF.
pub fn normal_pdf(z: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * z * z).exp()
}

/// Standard normal CDF via the Abramowitz and Stegun 7.1.26 erf
/// approximation (absolute error below 1.5e-7).
pub fn normal_cdf(z: f64) -> f64 {
    const A1: f64 = 0.254_829_592;
    const A2: f64 = -0.284_496_736;
    const A3: f64 = 1.421_413_741;
    const A4: f64 = -1.453_152_027;
    const A5: f64 = 1.061_405_429;
    const P: f64 = 0.327_591_1;

    let x = z.abs() * std::f64::consts::FRAC_1_SQRT_2;
    let t = 1.0 / (1.0 + P * x);
    let erf = 1.0 - ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t * (-x * x).exp();

    if z >= 0.0 {
        0.5 * (1.0 + erf)
    } else {
        0.5 * (1.0 - erf)
    }
}

/// Pick `count` distinct candidates by maximizing Expected Improvement.
///
/// After each pick the chosen candidate is added to the training data with
/// the lowest observed score as its outcome (the "constant liar") and the
/// surrogate is refit, which flattens EI around points already in the batch.
/// Ties go to the lowest candidate index, so the result is fully determined
/// by the inputs. Returns candidate indices in pick order.
pub fn select_batch<M, F>(
    make_model: F,
    x_train: &[Vec<f64>],
    y_train: &[f64],
    candidates: &[Vec<f64>],
    count: usize,
    xi: f64,
) -> TunerResult<Vec<usize>>
where
    M: SurrogateModel,
    F: Fn() -> M,
{
    let lie = y_train.iter().copied().fold(f64::INFINITY, f64::min);
    let mut xs = x_train.to_vec();
    let mut ys = y_train.to_vec();
    let mut picked: Vec<usize> = Vec::with_capacity(count);

    while picked.len() < count.min(candidates.len()) {
        let mut model = make_model();
        model.fit(&xs, &ys)?;

        let scores: Vec<f64> = candidates
            .par_iter()
            .map(|c| expected_improvement(model.predict(c), lie, xi))
            .collect();

        let mut best: Option<(usize, f64)> = None;
        for (i, score) in scores.into_iter().enumerate() {
            if picked.contains(&i) {
                continue;
            }
            let score = if score.is_nan() { f64::NEG_INFINITY } else { score };
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }

        let Some((index, _)) = best else {
            break;
        };
        picked.push(index);
        xs.push(candidates[index].clone());
        ys.push(lie);
    }

    Ok(picked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::{GaussianProcess, KernelConfig};
    use proptest::prelude::*;

    #[test]
    fn normal_pdf_peak() {
        assert!((normal_pdf(0.0) - 0.398_942_280_4).abs() < 1e-9);
        assert!((normal_pdf(1.5) - normal_pdf(-1.5)).abs() < 1e-15);
    }

    #[test]
    fn normal_cdf_reference_values() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-4);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 1e-4);
        assert!(normal_cdf(8.0) > 0.999_999);
    }

    #[test]
    fn ei_zero_without_uncertainty() {
        let p = Prediction {
            mean: -5.0,
            std_dev: 0.0,
        };
        assert_eq!(expected_improvement(p, -1.0, 0.0), 0.0);
    }

    #[test]
    fn ei_prefers_lower_mean_and_higher_uncertainty() {
        let best = -3.0;
        let low = expected_improvement(Prediction { mean: -4.0, std_dev: 0.5 }, best, 0.01);
        let high = expected_improvement(Prediction { mean: -2.0, std_dev: 0.5 }, best, 0.01);
        assert!(low > high);

        let narrow = expected_improvement(Prediction { mean: -3.0, std_dev: 0.1 }, best, 0.01);
        let wide = expected_improvement(Prediction { mean: -3.0, std_dev: 1.0 }, best, 0.01);
        assert!(wide > narrow);
    }

    #[test]
    fn batch_is_distinct_and_deterministic() {
        let x_train = vec![vec![0.1], vec![0.5], vec![0.9]];
        let y_train = vec![-1.0, -4.0, -2.0];
        let candidates: Vec<Vec<f64>> = (0..50).map(|i| vec![i as f64 / 49.0]).collect();
        let make = || GaussianProcess::new(KernelConfig::default());

        let first = select_batch(make, &x_train, &y_train, &candidates, 4, 0.01).unwrap();
        let second = select_batch(make, &x_train, &y_train, &candidates, 4, 0.01).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);

        let mut unique = first.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn batch_never_exceeds_candidate_pool() {
        let x_train = vec![vec![0.0], vec![1.0]];
        let y_train = vec![-1.0, -2.0];
        let candidates = vec![vec![0.25], vec![0.75]];
        let picked = select_batch(
            || GaussianProcess::new(KernelConfig::default()),
            &x_train,
            &y_train,
            &candidates,
            5,
            0.01,
        )
        .unwrap();
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn first_pick_maximizes_ei() {
        let x_train = vec![vec![0.0], vec![0.5], vec![1.0]];
        let y_train = vec![-1.0, -3.0, -1.5];
        let candidates: Vec<Vec<f64>> = (0..21).map(|i| vec![i as f64 / 20.0]).collect();
        let make = || GaussianProcess::new(KernelConfig::default());

        let picked = select_batch(make, &x_train, &y_train, &candidates, 1, 0.01).unwrap();

        let mut model = make();
        model.fit(&x_train, &y_train).unwrap();
        let scores: Vec<f64> = candidates
            .iter()
            .map(|c| expected_improvement(model.predict(c), -3.0, 0.01))
            .collect();
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(scores[picked[0]], max);
    }

    proptest! {
        #[test]
        fn prop_ei_nonnegative(mu in -10.0f64..10.0, sigma in 0.0f64..10.0, best in -10.0f64..10.0) {
            let ei = expected_improvement(Prediction { mean: mu, std_dev: sigma }, best, 0.01);
            prop_assert!(ei >= 0.0);
        }

        #[test]
        fn prop_normal_cdf_monotonic(z1 in -5.0f64..5.0, z2 in -5.0f64..5.0) {
            let (lo, hi) = if z1 <= z2 { (z1, z2) } else { (z2, z1) };
            prop_assert!(normal_cdf(lo) <= normal_cdf(hi) + 1e-7);
        }
    }
}
