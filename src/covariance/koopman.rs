//! Koopman reweighting: estimates per-frame weights that correct
//! non-equilibrium sampling towards the stationary distribution.
//! See Wu et al., "Variational approach for learning Markov processes from
//! time series data" (2017).

use ndarray::{s, Array1, Array2, ArrayView2, Axis};

use super::{CovarianceBuilder, Weights};
use crate::error::{KineticsError, Result};
use crate::linalg::{null_vector, spd_inv_split, NalgebraEigenSolver};

/// Weight function `w(x) = u_0 + x · u_{1:}` over the basis `[1, x]`.
#[derive(Debug, Clone)]
pub struct KoopmanWeightingModel {
    coefficients: Array1<f64>,
    lagtime: usize,
    residual: f64,
}

impl KoopmanWeightingModel {
    /// Evaluates the weight of every frame of `trajectory`.
    pub fn weights(&self, trajectory: ArrayView2<f64>) -> Result<Array1<f64>> {
        let dim = self.coefficients.len() - 1;
        if trajectory.ncols() != dim {
            return Err(KineticsError::Dimension {
                expected: dim,
                found: trajectory.ncols(),
            });
        }
        Ok(trajectory.dot(&self.coefficients.slice(s![1..])) + self.coefficients[0])
    }

    /// Coefficients; the first entry belongs to the constant function.
    pub fn coefficients(&self) -> &Array1<f64> {
        &self.coefficients
    }

    pub fn const_weight(&self) -> f64 {
        self.coefficients[0]
    }

    pub fn lagtime(&self) -> usize {
        self.lagtime
    }

    /// Smallest singular value of `K̄ᵀ - I` at the solution; near zero when the
    /// basis supports an exact stationary reweighting.
    pub fn residual(&self) -> f64 {
        self.residual
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KoopmanWeightingEstimator {
    lagtime: usize,
    epsilon: f64,
}

impl KoopmanWeightingEstimator {
    pub fn new(lagtime: usize) -> Self {
        KoopmanWeightingEstimator {
            lagtime,
            epsilon: 1e-6,
        }
    }

    /// Eigenvalue cutoff for the rank reduction of the basis covariance.
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn fit(&self, trajectories: &[ArrayView2<f64>]) -> Result<KoopmanWeightingModel> {
        if !(self.epsilon > 0.0) {
            return Err(KineticsError::config(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        let augmented: Vec<Array2<f64>> = trajectories
            .iter()
            .map(|traj| {
                let ones = Array2::<f64>::ones((traj.nrows(), 1));
                ndarray::concatenate(Axis(1), &[ones.view(), traj.view()])
            })
            .collect::<std::result::Result<_, _>>()?;
        let views: Vec<ArrayView2<f64>> = augmented.iter().map(|a| a.view()).collect();

        let cov = CovarianceBuilder::new(self.lagtime)
            .remove_data_mean(false)
            .build()
            .fit(&views, Weights::Uniform)?;

        let l = spd_inv_split(cov.cov_00(), self.epsilon, &NalgebraEigenSolver)?;
        let k_whitened = l.t().dot(&cov.cov_0t()).dot(&l);
        let mut shifted = k_whitened.t().to_owned();
        shifted.diag_mut().mapv_inplace(|v| v - 1.0);
        let (v, residual) = null_vector(shifted.view())?;
        if residual > 1e-2 {
            log::warn!(
                "Koopman reweighting residual {:.3e} is large; \
                 the basis may miss the stationary density",
                residual
            );
        }

        let u = l.dot(&v);
        // with a constant first feature, row 0 of C00 is the empirical mean of the basis
        let mean_weight = cov.cov_00().row(0).dot(&u);
        if mean_weight.abs() < 1e-14 || !mean_weight.is_finite() {
            return Err(KineticsError::numerical(
                "stationary reweighting vector has vanishing mean weight",
            ));
        }
        let coefficients = u / mean_weight;
        log::debug!(
            "Koopman weights estimated with rank {} of {} basis functions",
            l.ncols(),
            l.nrows()
        );

        Ok(KoopmanWeightingModel {
            coefficients,
            lagtime: self.lagtime,
            residual,
        })
    }
}
