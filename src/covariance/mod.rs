//! # Covariance estimation
//!
//! Instantaneous and time-lagged covariance matrices of one or more time
//! series, optionally symmetrized (reversible estimate) and weighted per
//! frame. The result is a [`CovarianceModel`], the input of TICA.
//!
//! Trajectories are reduced independently, in parallel, into weighted
//! moments; the moments are merged and normalized once, so every frame pair
//! counts equally regardless of which trajectory it came from.

mod koopman;
mod moments;

pub use koopman::{KoopmanWeightingEstimator, KoopmanWeightingModel};

use moments::Moments;
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;

use crate::error::{KineticsError, Result};
use crate::linalg::symmetrize;

/// Per-frame weights applied to the leading frame of every lag pair.
#[derive(Debug, Clone, Copy, Default)]
pub enum Weights<'a> {
    #[default]
    Uniform,
    /// One non-negative weight per frame for every trajectory.
    PerFrame(&'a [ArrayView1<'a, f64>]),
    /// Weights evaluated from a reweighting model.
    Koopman(&'a KoopmanWeightingModel),
}

/// Covariance estimator. Configure through [`CovarianceBuilder`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Covariance {
    lagtime: usize,
    symmetrize: bool,
    remove_data_mean: bool,
    bessel: bool,
}

pub struct CovarianceBuilder {
    lagtime: usize,
    symmetrize: bool,
    remove_data_mean: bool,
    bessel: bool,
}

impl CovarianceBuilder {
    /// Defaults: no symmetrization, mean removal on, no Bessel correction.
    pub fn new(lagtime: usize) -> Self {
        CovarianceBuilder {
            lagtime,
            symmetrize: false,
            remove_data_mean: true,
            bessel: false,
        }
    }

    /// Estimate `C_0` and `C_τ` from both time directions.
    pub fn symmetrize(mut self, symmetrize: bool) -> Self {
        self.symmetrize = symmetrize;
        self
    }

    pub fn remove_data_mean(mut self, remove_data_mean: bool) -> Self {
        self.remove_data_mean = remove_data_mean;
        self
    }

    /// Normalize by total weight minus one.
    pub fn bessel(mut self, bessel: bool) -> Self {
        self.bessel = bessel;
        self
    }

    pub fn build(self) -> Covariance {
        Covariance {
            lagtime: self.lagtime,
            symmetrize: self.symmetrize,
            remove_data_mean: self.remove_data_mean,
            bessel: self.bessel,
        }
    }
}

impl Covariance {
    pub fn lagtime(&self) -> usize {
        self.lagtime
    }

    pub fn is_symmetrized(&self) -> bool {
        self.symmetrize
    }

    /// Estimates covariances from all trajectories at once.
    pub fn fit(
        &self,
        trajectories: &[ArrayView2<f64>],
        weights: Weights<'_>,
    ) -> Result<CovarianceModel> {
        let first = trajectories
            .first()
            .ok_or_else(|| KineticsError::InsufficientData("no trajectories given".into()))?;
        let dim = first.ncols();
        for traj in trajectories {
            if traj.ncols() != dim {
                return Err(KineticsError::Dimension {
                    expected: dim,
                    found: traj.ncols(),
                });
            }
        }

        let frame_weights: Vec<Option<Array1<f64>>> = match weights {
            Weights::Uniform => vec![None; trajectories.len()],
            Weights::PerFrame(ws) => {
                if ws.len() != trajectories.len() {
                    return Err(KineticsError::config(format!(
                        "got {} weight vectors for {} trajectories",
                        ws.len(),
                        trajectories.len()
                    )));
                }
                ws.iter().map(|w| Some(w.to_owned())).collect()
            }
            Weights::Koopman(model) => trajectories
                .iter()
                .map(|traj| model.weights(*traj).map(Some))
                .collect::<Result<_>>()?,
        };
        let allow_negative = matches!(weights, Weights::Koopman(_));

        let blocks: Vec<Option<Moments>> = trajectories
            .par_iter()
            .zip(frame_weights.par_iter())
            .map(|(traj, w)| {
                self.trajectory_moments(*traj, w.as_ref().map(|w| w.view()), allow_negative)
            })
            .collect::<Result<_>>()?;

        let mut merged: Option<Moments> = None;
        for block in blocks.into_iter().flatten() {
            merged = Some(match merged {
                None => block,
                Some(acc) => acc.merge(block)?,
            });
        }
        let merged = merged.ok_or_else(|| {
            KineticsError::InsufficientData(format!(
                "no trajectory is longer than the lag time {}",
                self.lagtime
            ))
        })?;
        log::info!(
            "estimated covariances from {} frame pairs over {} trajectories (lag {}, dim {})",
            merged.n_pairs,
            trajectories.len(),
            self.lagtime,
            dim
        );
        self.finalize(merged)
    }

    /// Starts a streaming estimate.
    pub fn accumulator(&self) -> CovarianceAccumulator {
        CovarianceAccumulator {
            estimator: *self,
            moments: None,
        }
    }

    fn trajectory_moments(
        &self,
        traj: ArrayView2<f64>,
        weights: Option<ArrayView1<f64>>,
        allow_negative: bool,
    ) -> Result<Option<Moments>> {
        let n_frames = traj.nrows();
        if let Some(w) = weights {
            if w.len() != n_frames {
                return Err(KineticsError::config(format!(
                    "weight vector has {} entries for a trajectory of {} frames",
                    w.len(),
                    n_frames
                )));
            }
            if w.iter().any(|v| !v.is_finite() || (!allow_negative && *v < 0.0)) {
                return Err(KineticsError::config(
                    "frame weights must be finite and non-negative",
                ));
            }
        }
        if n_frames <= self.lagtime {
            log::warn!(
                "skipping trajectory of {} frames, not longer than lag time {}",
                n_frames,
                self.lagtime
            );
            return Ok(None);
        }
        let n_pairs = n_frames - self.lagtime;
        let x = traj.slice(s![..n_pairs, ..]);
        let y = traj.slice(s![self.lagtime.., ..]);
        let moments = match weights {
            Some(w) => Moments::from_pairs(x, y, w.slice(s![..n_pairs]))?,
            None => Moments::from_pairs(x, y, Array1::ones(n_pairs).view())?,
        };
        Ok(Some(moments))
    }

    fn finalize(&self, m: Moments) -> Result<CovarianceModel> {
        let dim = m.dim();
        let zeros = Array1::zeros(dim);
        let total = if self.symmetrize { 2.0 * m.weight } else { m.weight };
        let norm = if self.bessel { total - 1.0 } else { total };
        if !(norm > 0.0) {
            return Err(KineticsError::InsufficientData(format!(
                "total weight {total} is too small to normalize the covariances"
            )));
        }

        let (cov_00, cov_0t, cov_tt, mean_0, mean_t) = if self.symmetrize {
            let mean = (&m.mean_x + &m.mean_y) * 0.5;
            let center = if self.remove_data_mean { &mean } else { &zeros };
            let (sxx, sxy, syy) = m.shifted(center, center);
            let c00 = symmetrize(((sxx + syy) / norm).view());
            let c0t = (&sxy + &sxy.t()) / norm;
            let reported = if self.remove_data_mean { mean } else { zeros.clone() };
            (c00.clone(), c0t, c00, reported.clone(), reported)
        } else if self.remove_data_mean {
            let (sxx, sxy, syy) = m.shifted(&m.mean_x, &m.mean_y);
            (
                symmetrize((sxx / norm).view()),
                sxy / norm,
                symmetrize((syy / norm).view()),
                m.mean_x.clone(),
                m.mean_y.clone(),
            )
        } else {
            let (sxx, sxy, syy) = m.shifted(&zeros, &zeros);
            (
                symmetrize((sxx / norm).view()),
                sxy / norm,
                symmetrize((syy / norm).view()),
                zeros.clone(),
                zeros.clone(),
            )
        };

        Ok(CovarianceModel {
            cov_00,
            cov_0t,
            cov_tt,
            mean_0,
            mean_t,
            lagtime: self.lagtime,
            n_pairs: m.n_pairs,
            total_weight: m.weight,
            symmetrized: self.symmetrize,
            bessel: self.bessel,
            data_mean_removed: self.remove_data_mean,
        })
    }
}

/// Streaming form of [`Covariance::fit`].
#[derive(Debug, Clone)]
pub struct CovarianceAccumulator {
    estimator: Covariance,
    moments: Option<Moments>,
}

impl CovarianceAccumulator {
    /// Adds one trajectory. Frame weights must be finite and non-negative.
    pub fn partial_fit(
        &mut self,
        trajectory: ArrayView2<f64>,
        weights: Option<ArrayView1<f64>>,
    ) -> Result<&mut Self> {
        self.add(trajectory, weights, false)
    }

    /// Adds one trajectory weighted by a Koopman reweighting model, whose
    /// weights may be negative.
    pub fn partial_fit_koopman(
        &mut self,
        trajectory: ArrayView2<f64>,
        model: &KoopmanWeightingModel,
    ) -> Result<&mut Self> {
        let weights = model.weights(trajectory)?;
        self.add(trajectory, Some(weights.view()), true)
    }

    fn add(
        &mut self,
        trajectory: ArrayView2<f64>,
        weights: Option<ArrayView1<f64>>,
        allow_negative: bool,
    ) -> Result<&mut Self> {
        if let Some(m) = &self.moments {
            if m.dim() != trajectory.ncols() {
                return Err(KineticsError::Dimension {
                    expected: m.dim(),
                    found: trajectory.ncols(),
                });
            }
        }
        let block = self
            .estimator
            .trajectory_moments(trajectory, weights, allow_negative)?;
        if let Some(block) = block {
            self.moments = Some(match self.moments.take() {
                None => block,
                Some(acc) => acc.merge(block)?,
            });
        }
        Ok(self)
    }

    pub fn n_pairs(&self) -> usize {
        self.moments.as_ref().map_or(0, |m| m.n_pairs)
    }

    pub fn fetch_model(&self) -> Result<CovarianceModel> {
        let m = self.moments.clone().ok_or_else(|| {
            KineticsError::InsufficientData(format!(
                "no trajectory longer than the lag time {} has been added",
                self.estimator.lagtime
            ))
        })?;
        self.estimator.finalize(m)
    }
}

/// Covariance estimate. Produced by [`Covariance::fit`], consumed by TICA.
#[derive(Debug, Clone)]
pub struct CovarianceModel {
    cov_00: Array2<f64>,
    cov_0t: Array2<f64>,
    cov_tt: Array2<f64>,
    mean_0: Array1<f64>,
    mean_t: Array1<f64>,
    lagtime: usize,
    n_pairs: usize,
    total_weight: f64,
    symmetrized: bool,
    bessel: bool,
    data_mean_removed: bool,
}

impl CovarianceModel {
    /// Wraps externally computed matrices. `cov_tt` defaults to `cov_00` and
    /// `mean_t` to `mean_0`.
    pub fn from_parts(
        cov_00: Array2<f64>,
        cov_0t: Array2<f64>,
        mean_0: Array1<f64>,
        lagtime: usize,
    ) -> Result<Self> {
        let dim = mean_0.len();
        for shape in [cov_00.dim(), cov_0t.dim()] {
            if shape != (dim, dim) {
                return Err(KineticsError::Dimension {
                    expected: dim,
                    found: shape.0.max(shape.1),
                });
            }
        }
        let symmetrized = crate::linalg::max_asymmetry(cov_0t.view()) == 0.0;
        Ok(CovarianceModel {
            cov_tt: cov_00.clone(),
            mean_t: mean_0.clone(),
            cov_00,
            cov_0t,
            mean_0,
            lagtime,
            n_pairs: 0,
            total_weight: 0.0,
            symmetrized,
            bessel: false,
            data_mean_removed: true,
        })
    }

    pub fn cov_00(&self) -> ArrayView2<f64> {
        self.cov_00.view()
    }

    pub fn cov_0t(&self) -> ArrayView2<f64> {
        self.cov_0t.view()
    }

    pub fn cov_tt(&self) -> ArrayView2<f64> {
        self.cov_tt.view()
    }

    pub fn mean_0(&self) -> ArrayView1<f64> {
        self.mean_0.view()
    }

    pub fn mean_t(&self) -> ArrayView1<f64> {
        self.mean_t.view()
    }

    pub fn lagtime(&self) -> usize {
        self.lagtime
    }

    pub fn dim(&self) -> usize {
        self.mean_0.len()
    }

    pub fn n_pairs(&self) -> usize {
        self.n_pairs
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    pub fn is_symmetrized(&self) -> bool {
        self.symmetrized
    }

    pub fn bessel(&self) -> bool {
        self.bessel
    }

    pub fn data_mean_removed(&self) -> bool {
        self.data_mean_removed
    }

    pub(crate) fn into_parts(self) -> (Array2<f64>, Array2<f64>, Array1<f64>, usize) {
        (self.cov_00, self.cov_0t, self.mean_0, self.lagtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Axis};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_trajectory(rng: &mut ChaCha8Rng, frames: usize, dim: usize) -> Array2<f64> {
        Array2::from_shape_fn((frames, dim), |_| rng.random_range(-1.0..1.0))
    }

    #[test]
    fn test_plain_lagged_covariance() {
        let x = array![[1.0], [2.0], [4.0], [3.0]];
        let cov = CovarianceBuilder::new(1).build().fit(&[x.view()], Weights::Uniform).unwrap();
        // leading window [1, 2, 4], lagged window [2, 4, 3]
        let mean_0 = 7.0 / 3.0;
        let mean_t = 3.0;
        assert_abs_diff_eq!(cov.mean_0()[0], mean_0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov.mean_t()[0], mean_t, epsilon = 1e-12);
        let c00 = [1.0f64, 2.0, 4.0].iter().map(|v| (v - mean_0).powi(2)).sum::<f64>() / 3.0;
        assert_abs_diff_eq!(cov.cov_00()[[0, 0]], c00, epsilon = 1e-12);
        let c0t = [(1.0, 2.0), (2.0, 4.0), (4.0, 3.0)]
            .iter()
            .map(|(a, b): &(f64, f64)| (a - mean_0) * (b - mean_t))
            .sum::<f64>()
            / 3.0;
        assert_abs_diff_eq!(cov.cov_0t()[[0, 0]], c0t, epsilon = 1e-12);
        assert_eq!(cov.n_pairs(), 3);
    }

    #[test]
    fn test_bessel_normalization() {
        let x = array![[1.0], [2.0], [4.0], [3.0]];
        let plain = CovarianceBuilder::new(1)
            .bessel(true)
            .build()
            .fit(&[x.view()], Weights::Uniform)
            .unwrap();
        // three pairs, normalized by 3 - 1
        let mean_0 = 7.0 / 3.0;
        let mean_t = 3.0;
        let c00 = [1.0f64, 2.0, 4.0].iter().map(|v| (v - mean_0).powi(2)).sum::<f64>() / 2.0;
        let ctt = [2.0f64, 4.0, 3.0].iter().map(|v| (v - mean_t).powi(2)).sum::<f64>() / 2.0;
        assert_abs_diff_eq!(plain.cov_00()[[0, 0]], c00, epsilon = 1e-12);
        assert_abs_diff_eq!(plain.cov_tt()[[0, 0]], ctt, epsilon = 1e-12);

        let sym = CovarianceBuilder::new(1)
            .symmetrize(true)
            .bessel(true)
            .build()
            .fit(&[x.view()], Weights::Uniform)
            .unwrap();
        // both windows pooled: six values, normalized by 2 * 3 - 1
        let mean = 16.0 / 6.0;
        let pooled = [1.0f64, 2.0, 4.0, 2.0, 4.0, 3.0];
        let c00 = pooled.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 5.0;
        let c0t = 2.0
            * [(1.0, 2.0), (2.0, 4.0), (4.0, 3.0)]
                .iter()
                .map(|(a, b): &(f64, f64)| (a - mean) * (b - mean))
                .sum::<f64>()
            / 5.0;
        assert_abs_diff_eq!(sym.mean_0()[0], mean, epsilon = 1e-12);
        assert_abs_diff_eq!(sym.cov_00()[[0, 0]], c00, epsilon = 1e-12);
        assert_abs_diff_eq!(sym.cov_0t()[[0, 0]], c0t, epsilon = 1e-12);
    }

    #[test]
    fn test_symmetrized_is_symmetric() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let x = random_trajectory(&mut rng, 200, 3);
        let w = Array1::from_shape_fn(200, |_| rng.random_range(0.1..2.0));
        let cov = CovarianceBuilder::new(3)
            .symmetrize(true)
            .build()
            .fit(&[x.view()], Weights::PerFrame(&[w.view()]))
            .unwrap();
        assert_abs_diff_eq!(cov.cov_00(), cov.cov_00().t(), epsilon = 1e-14);
        assert_abs_diff_eq!(cov.cov_0t(), cov.cov_0t().t(), epsilon = 1e-14);
        assert_abs_diff_eq!(cov.mean_0(), cov.mean_t(), epsilon = 1e-14);
    }

    #[test]
    fn test_symmetrized_lag_zero_equals_instantaneous() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let x = random_trajectory(&mut rng, 100, 4);
        let cov = CovarianceBuilder::new(0)
            .symmetrize(true)
            .build()
            .fit(&[x.view()], Weights::Uniform)
            .unwrap();
        assert_abs_diff_eq!(cov.cov_0t(), cov.cov_00(), epsilon = 1e-12);
        let mean = x.mean_axis(Axis(0)).unwrap();
        assert_abs_diff_eq!(cov.mean_0(), mean.view(), epsilon = 1e-12);
    }

    #[test]
    fn test_trajectories_pool_frames() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let a = random_trajectory(&mut rng, 30, 2);
        let b = random_trajectory(&mut rng, 90, 2);
        let estimator = CovarianceBuilder::new(0).build();
        let pooled = estimator.fit(&[a.view(), b.view()], Weights::Uniform).unwrap();
        let stacked = ndarray::concatenate(Axis(0), &[a.view(), b.view()]).unwrap();
        let single = estimator.fit(&[stacked.view()], Weights::Uniform).unwrap();
        assert_abs_diff_eq!(pooled.cov_00(), single.cov_00(), epsilon = 1e-12);
        assert_eq!(pooled.n_pairs(), 120);
    }

    #[test]
    fn test_partial_fit_matches_fit() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let trajs: Vec<Array2<f64>> = (0..4)
            .map(|i| random_trajectory(&mut rng, 40 + 10 * i, 3))
            .collect();
        let views: Vec<ArrayView2<f64>> = trajs.iter().map(|t| t.view()).collect();
        let estimator = CovarianceBuilder::new(2).symmetrize(true).bessel(true).build();
        let batch = estimator.fit(&views, Weights::Uniform).unwrap();

        let mut acc = estimator.accumulator();
        for v in &views {
            acc.partial_fit(*v, None).unwrap();
        }
        let streamed = acc.fetch_model().unwrap();
        assert_eq!(acc.n_pairs(), batch.n_pairs());
        assert_abs_diff_eq!(streamed.cov_00(), batch.cov_00(), epsilon = 1e-12);
        assert_abs_diff_eq!(streamed.cov_0t(), batch.cov_0t(), epsilon = 1e-12);
    }

    #[test]
    fn test_partial_fit_rejects_negative_weights() {
        let x = Array2::<f64>::zeros((5, 1));
        let negative = array![1.0, -1.0, 1.0, 1.0, 1.0];
        let estimator = CovarianceBuilder::new(1).build();
        assert!(matches!(
            estimator.fit(&[x.view()], Weights::PerFrame(&[negative.view()])),
            Err(KineticsError::Configuration(_))
        ));
        let mut acc = estimator.accumulator();
        assert!(matches!(
            acc.partial_fit(x.view(), Some(negative.view())),
            Err(KineticsError::Configuration(_))
        ));
        assert_eq!(acc.n_pairs(), 0);
    }

    #[test]
    fn test_uncentered_moments() {
        let x = array![[1.0], [1.0], [1.0]];
        let cov = CovarianceBuilder::new(1)
            .remove_data_mean(false)
            .build()
            .fit(&[x.view()], Weights::Uniform)
            .unwrap();
        assert_abs_diff_eq!(cov.cov_00()[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov.cov_0t()[[0, 0]], 1.0, epsilon = 1e-12);
        assert_eq!(cov.mean_0()[0], 0.0);
    }

    #[test]
    fn test_short_trajectories_are_skipped() {
        let short = Array2::<f64>::zeros((2, 2));
        let long = array![[0.0, 1.0], [1.0, 0.0], [2.0, 2.0], [3.0, 1.0]];
        let estimator = CovarianceBuilder::new(2).build();
        let cov = estimator.fit(&[short.view(), long.view()], Weights::Uniform).unwrap();
        assert_eq!(cov.n_pairs(), 2);

        let err = estimator.fit(&[short.view()], Weights::Uniform).unwrap_err();
        assert!(matches!(err, KineticsError::InsufficientData(_)));
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = Array2::<f64>::zeros((5, 2));
        let b = Array2::<f64>::zeros((5, 3));
        let err = CovarianceBuilder::new(1)
            .build()
            .fit(&[a.view(), b.view()], Weights::Uniform)
            .unwrap_err();
        assert!(matches!(err, KineticsError::Dimension { expected: 2, found: 3 }));
    }

    #[test]
    fn test_invalid_weights() {
        let x = Array2::<f64>::zeros((5, 1));
        let estimator = CovarianceBuilder::new(1).build();
        let short = Array1::<f64>::ones(4);
        assert!(matches!(
            estimator.fit(&[x.view()], Weights::PerFrame(&[short.view()])),
            Err(KineticsError::Configuration(_))
        ));
        let negative = array![1.0, -1.0, 1.0, 1.0, 1.0];
        assert!(matches!(
            estimator.fit(&[x.view()], Weights::PerFrame(&[negative.view()])),
            Err(KineticsError::Configuration(_))
        ));
    }

    #[test]
    fn test_weights_select_frames() {
        // zero weight on the middle pairs leaves only the first and last pair
        let x = array![[0.0], [5.0], [-3.0], [2.0], [4.0]];
        let w = array![1.0, 0.0, 0.0, 1.0, 123.0];
        let cov = CovarianceBuilder::new(1)
            .build()
            .fit(&[x.view()], Weights::PerFrame(&[w.view()]))
            .unwrap();
        // pairs kept: (0, 5) and (2, 4)
        assert_abs_diff_eq!(cov.mean_0()[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov.mean_t()[0], 4.5, epsilon = 1e-12);
        let expected = ((-1.0) * 0.5 + 1.0 * (-0.5)) / 2.0;
        assert_abs_diff_eq!(cov.cov_0t()[[0, 0]], expected, epsilon = 1e-12);
    }
}
