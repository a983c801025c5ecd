//! # Time-lagged Independent Component Analysis
//!
//! Finds the linear combinations of input features that decorrelate slowest
//! in time by solving `C_τ r = C_0 r λ`. The instantaneous covariance `C_0`
//! is rank-reduced first; eigenvalues are ordered by magnitude and the
//! eigenvectors can be rescaled to a kinetic or commute map.
//!
//! Fitting is a pure function of a [`TICAConfig`] and the data; the resulting
//! [`TICAModel`] is immutable and can be shared across threads.

mod config;

pub use config::{DimensionSelector, Scaling, TICAConfig};

use std::sync::Arc;

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

use crate::covariance::{CovarianceBuilder, CovarianceModel, Weights};
use crate::error::{KineticsError, Result};
use crate::linalg::{eig_corr, max_asymmetry, NalgebraEigenSolver, SymmetricEigenSolver};

const SYMMETRY_TOLERANCE: f64 = 1e-10;

pub struct TICA<S: SymmetricEigenSolver = NalgebraEigenSolver> {
    config: TICAConfig,
    solver: Arc<S>,
}

impl TICA<NalgebraEigenSolver> {
    pub fn new(config: TICAConfig) -> Self {
        TICA {
            config,
            solver: Arc::new(NalgebraEigenSolver),
        }
    }
}

impl<S: SymmetricEigenSolver> TICA<S> {
    pub fn with_solver(config: TICAConfig, solver: S) -> Self {
        TICA {
            config,
            solver: Arc::new(solver),
        }
    }

    pub fn config(&self) -> &TICAConfig {
        &self.config
    }

    /// Fits on raw trajectories with uniform frame weights.
    pub fn fit(&self, trajectories: &[ArrayView2<f64>]) -> Result<TICAModel> {
        self.fit_weighted(trajectories, Weights::Uniform)
    }

    /// Fits on raw trajectories. Covariances are estimated symmetrized, at
    /// the configured lag time.
    pub fn fit_weighted(
        &self,
        trajectories: &[ArrayView2<f64>],
        weights: Weights<'_>,
    ) -> Result<TICAModel> {
        let lagtime = self.config.lagtime.ok_or_else(|| {
            KineticsError::config("a lag time is required to fit TICA on raw data")
        })?;
        let covariances = CovarianceBuilder::new(lagtime)
            .symmetrize(true)
            .build()
            .fit(trajectories, weights)?;
        self.fit_from_covariances(covariances)
    }

    /// Fits on a precomputed covariance estimate.
    pub fn fit_from_covariances(&self, covariances: CovarianceModel) -> Result<TICAModel> {
        self.config.validate()?;
        if let Some(lagtime) = self.config.lagtime {
            if lagtime != covariances.lagtime() {
                return Err(KineticsError::config(format!(
                    "configured lag time {} does not match the covariance lag time {}",
                    lagtime,
                    covariances.lagtime()
                )));
            }
        }

        let scale = covariances
            .cov_0t()
            .iter()
            .fold(1.0f64, |acc, v| acc.max(v.abs()));
        let asymmetry = max_asymmetry(covariances.cov_0t());
        if asymmetry > SYMMETRY_TOLERANCE * scale {
            return Err(KineticsError::numerical(format!(
                "lagged covariance is not symmetric (max asymmetry {asymmetry:e}); \
                 a real spectrum requires symmetrized covariances"
            )));
        }

        let (cov_00, cov_0t, mean, lagtime) = covariances.into_parts();
        let solution = eig_corr(cov_00.view(), cov_0t.view(), self.config.epsilon, &*self.solver)?;
        if solution.eigenvalues.iter().any(|v| !v.is_finite()) {
            return Err(KineticsError::numerical("TICA eigenvalues are not finite"));
        }

        let dim = self.config.dim.resolve(solution.eigenvalues.view())?;
        let projection = scaled_projection(
            solution.eigenvectors.slice(s![.., ..dim]),
            solution.eigenvalues.slice(s![..dim]),
            self.config.scaling,
            lagtime,
        )?;

        log::info!(
            "TICA at lag {}: rank {} of {} features, projecting onto {} components ({})",
            lagtime,
            solution.rank,
            mean.len(),
            dim,
            self.config.scaling
        );

        Ok(TICAModel {
            mean,
            eigenvalues: solution.eigenvalues,
            eigenvectors: solution.eigenvectors,
            projection,
            dim,
            rank: solution.rank,
            scaling: self.config.scaling,
            lagtime,
            cov_00,
        })
    }
}

fn scaled_projection(
    eigenvectors: ArrayView2<f64>,
    eigenvalues: ArrayView1<f64>,
    scaling: Scaling,
    lagtime: usize,
) -> Result<Array2<f64>> {
    let mut projection = eigenvectors.to_owned();
    match scaling {
        Scaling::None => {}
        Scaling::KineticMap => {
            for (mut col, &l) in projection.columns_mut().into_iter().zip(eigenvalues.iter()) {
                col *= l;
            }
        }
        Scaling::CommuteMap => {
            for (i, (mut col, &l)) in projection
                .columns_mut()
                .into_iter()
                .zip(eigenvalues.iter())
                .enumerate()
            {
                if l.abs() >= 1.0 {
                    return Err(KineticsError::numerical(format!(
                        "component {i} has |eigenvalue| = {} >= 1 and an infinite timescale; \
                         commute map scaling is undefined",
                        l.abs()
                    )));
                }
                col *= (implied_timescale(l, lagtime as f64) / 2.0).sqrt();
            }
        }
    }
    Ok(projection)
}

/// `-τ / ln|λ|`; infinite for `|λ| ≥ 1`, zero for `λ = 0`.
fn implied_timescale(eigenvalue: f64, lagtime: f64) -> f64 {
    let magnitude = eigenvalue.abs();
    if magnitude >= 1.0 {
        f64::INFINITY
    } else if magnitude == 0.0 {
        0.0
    } else {
        -lagtime / magnitude.ln()
    }
}

/// Result of a TICA fit.
#[derive(Debug, Clone)]
pub struct TICAModel {
    mean: Array1<f64>,
    eigenvalues: Array1<f64>,
    eigenvectors: Array2<f64>,
    projection: Array2<f64>,
    dim: usize,
    rank: usize,
    scaling: Scaling,
    lagtime: usize,
    cov_00: Array2<f64>,
}

impl TICAModel {
    /// Eigenvalues of every retained rank, sorted by magnitude.
    pub fn eigenvalues(&self) -> ArrayView1<f64> {
        self.eigenvalues.view()
    }

    /// Unscaled, `C_0`-orthonormal eigenvectors (features × rank).
    pub fn eigenvectors(&self) -> ArrayView2<f64> {
        self.eigenvectors.view()
    }

    /// Scaled eigenvectors used by [`transform`](Self::transform) (features × dim).
    pub fn projection(&self) -> ArrayView2<f64> {
        self.projection.view()
    }

    pub fn mean(&self) -> ArrayView1<f64> {
        self.mean.view()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn scaling(&self) -> Scaling {
        self.scaling
    }

    pub fn lagtime(&self) -> usize {
        self.lagtime
    }

    /// Projects `x` (frames × features) onto the retained components.
    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.n_features() {
            return Err(KineticsError::Dimension {
                expected: self.n_features(),
                found: x.ncols(),
            });
        }
        let mut centered = x.to_owned();
        centered
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .for_each(|mut row| {
                row -= &self.mean;
            });
        Ok(centered.dot(&self.projection))
    }

    pub fn transform_trajectories(
        &self,
        trajectories: &[ArrayView2<f64>],
    ) -> Result<Vec<Array2<f64>>> {
        trajectories
            .par_iter()
            .map(|traj| self.transform(*traj))
            .collect()
    }

    /// Implied timescales `-τ / ln|λ_i|` of all retained ranks, evaluated
    /// with the fit-time eigenvalues. `lagtime` defaults to the fit lag time;
    /// passing another value only rescales the formula, the eigenvalues are
    /// not propagated to that lag.
    pub fn timescales(&self, lagtime: Option<usize>) -> Array1<f64> {
        let tau = lagtime.unwrap_or(self.lagtime) as f64;
        self.eigenvalues.mapv(|l| implied_timescale(l, tau))
    }

    /// Cumulative share of `Σ λ_i²` over all retained ranks.
    pub fn cumulative_kinetic_variance(&self) -> Array1<f64> {
        let squared = self.eigenvalues.mapv(|l| l * l);
        let total = squared.sum();
        let mut running = 0.0;
        squared.mapv(|v| {
            running += v;
            if total > 0.0 {
                running / total
            } else {
                0.0
            }
        })
    }

    /// Correlation between each input feature and each retained component
    /// (features × dim).
    pub fn feature_component_correlation(&self) -> Array2<f64> {
        let r = self.eigenvectors.slice(s![.., ..self.dim]);
        let mut corr = self.cov_00.dot(&r);
        for (i, mut row) in corr.rows_mut().into_iter().enumerate() {
            let sigma = self.cov_00[[i, i]].sqrt();
            if sigma > 0.0 {
                row /= sigma;
            } else {
                row.fill(0.0);
            }
        }
        corr
    }
}
