//! # PCCA+
//!
//! Robust Perron cluster analysis: fuzzy assignment of the states of a
//! reversible Markov chain to metastable sets, and the coarse-grained chain
//! on those sets.
//!
//! ```ignore
//! let pcca = PCCABuilder::new(2).build();
//! let model = pcca.compute(&transition_matrix, None)?;
//! let memberships = model.memberships();
//! ```
//!
//! The rotation that maps the dominant eigenvectors onto memberships is
//! found by maximizing crispness with a pluggable [`RotationOptimizer`]
//! ([`NelderMead`] by default).

pub mod optimizer;
mod rotation;

use std::sync::Arc;

use log::{debug, info, warn};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{KineticsError, Result};
use crate::linalg::{
    inverse, sort_eigenpairs, symmetrize, NalgebraEigenSolver, SortOrder, SymmetricEigenSolver,
};
use crate::utils::{ClipNegative, Direction, Normalize};

use super::TransitionMatrix;

pub use optimizer::{NelderMead, OptimizationOutcome, RotationOptimizer};

/// Default tolerance on `|π_i P_ij - π_j P_ji|`.
pub const REVERSIBILITY_TOLERANCE: f64 = 1e-8;

const DEGENERACY_TOLERANCE: f64 = 1e-12;
const NORMALIZATION_TOLERANCE: f64 = 1e-8;

pub struct PCCABuilder<O = NelderMead, S = NalgebraEigenSolver> {
    n_metastable_sets: usize,
    reversibility_tolerance: f64,
    optimizer: O,
    solver: S,
}

impl PCCABuilder {
    pub fn new(n_metastable_sets: usize) -> Self {
        PCCABuilder {
            n_metastable_sets,
            reversibility_tolerance: REVERSIBILITY_TOLERANCE,
            optimizer: NelderMead::default(),
            solver: NalgebraEigenSolver,
        }
    }
}

impl<O: RotationOptimizer, S: SymmetricEigenSolver> PCCABuilder<O, S> {
    pub fn reversibility_tolerance(mut self, tolerance: f64) -> Self {
        self.reversibility_tolerance = tolerance;
        self
    }

    pub fn optimizer<P: RotationOptimizer>(self, optimizer: P) -> PCCABuilder<P, S> {
        PCCABuilder {
            n_metastable_sets: self.n_metastable_sets,
            reversibility_tolerance: self.reversibility_tolerance,
            optimizer,
            solver: self.solver,
        }
    }

    pub fn eigen_solver<T: SymmetricEigenSolver>(self, solver: T) -> PCCABuilder<O, T> {
        PCCABuilder {
            n_metastable_sets: self.n_metastable_sets,
            reversibility_tolerance: self.reversibility_tolerance,
            optimizer: self.optimizer,
            solver,
        }
    }

    pub fn build(self) -> PCCA<O, S> {
        PCCA {
            n_metastable_sets: self.n_metastable_sets,
            reversibility_tolerance: self.reversibility_tolerance,
            optimizer: Arc::new(self.optimizer),
            solver: Arc::new(self.solver),
        }
    }
}

#[derive(Clone)]
pub struct PCCA<O = NelderMead, S = NalgebraEigenSolver> {
    n_metastable_sets: usize,
    reversibility_tolerance: f64,
    optimizer: Arc<O>,
    solver: Arc<S>,
}

impl<O: RotationOptimizer, S: SymmetricEigenSolver> PCCA<O, S> {
    pub fn n_metastable_sets(&self) -> usize {
        self.n_metastable_sets
    }

    /// Runs PCCA+ on `transition_matrix`. When `stationary` is `None` the
    /// stationary distribution is computed from the matrix.
    pub fn compute(
        &self,
        transition_matrix: &TransitionMatrix,
        stationary: Option<ArrayView1<f64>>,
    ) -> Result<PCCAModel> {
        let n = transition_matrix.n_states();
        let m = self.n_metastable_sets;
        if m == 0 || m > n {
            return Err(KineticsError::Configuration(format!(
                "number of metastable sets must be in 1..={n}, got {m}"
            )));
        }
        if !transition_matrix.is_connected() {
            return Err(KineticsError::NoStationaryDistribution(format!(
                "PCCA+ needs an irreducible chain, found {} communicating classes",
                transition_matrix.communicating_classes().len()
            )));
        }

        let pi = match stationary {
            Some(pi) => checked_stationary(transition_matrix, pi)?,
            None => transition_matrix.stationary_distribution()?,
        };
        if pi.iter().any(|&v| !(v > 0.0)) {
            return Err(KineticsError::NoStationaryDistribution(
                "stationary distribution must be strictly positive".into(),
            ));
        }

        let violation = transition_matrix.detailed_balance_violation(pi.view());
        if violation > self.reversibility_tolerance {
            return Err(KineticsError::NotReversible {
                max_violation: violation,
            });
        }

        info!("PCCA+ on {n} states into {m} metastable sets");
        let (eigenvalues, x) = self.dominant_eigenvectors(transition_matrix, pi.view(), m)?;

        let (memberships, crispness, outcome) = if m == 1 {
            (Array2::ones((n, 1)), 1.0, None)
        } else {
            let (memberships, crispness, outcome) = self.optimize_memberships(x.view())?;
            (memberships, crispness, Some(outcome))
        };

        PCCAModel::new(
            memberships,
            transition_matrix.view(),
            pi,
            eigenvalues,
            crispness,
            outcome,
        )
    }

    /// Leading `m` right eigenvectors of `P`, obtained from the symmetrized
    /// matrix `D^{1/2} P D^{-1/2}` with `D = diag(π)`. The first column is
    /// the constant vector.
    fn dominant_eigenvectors(
        &self,
        transition_matrix: &TransitionMatrix,
        pi: ArrayView1<f64>,
        m: usize,
    ) -> Result<(Array1<f64>, Array2<f64>)> {
        let n = transition_matrix.n_states();
        let p = transition_matrix.view();
        let sqrt_pi = pi.mapv(f64::sqrt);
        let s = Array2::from_shape_fn((n, n), |(i, j)| sqrt_pi[i] * p[[i, j]] / sqrt_pi[j]);
        let s = symmetrize(s.view());

        let (values, vectors) = self.solver.eigh(s.view())?;
        let (values, vectors) = sort_eigenpairs(&values, &vectors, SortOrder::Descending);

        if (values[0] - 1.0).abs() > 1e-8 {
            return Err(KineticsError::Numerical(format!(
                "leading eigenvalue {} is not one",
                values[0]
            )));
        }
        if m < n && (values[m - 1] - values[m]).abs() < DEGENERACY_TOLERANCE {
            warn!(
                "eigenvalues {} and {} are degenerate ({:e}); the {m}-set split is not unique",
                m - 1,
                m,
                values[m - 1]
            );
        }

        let mut x = vectors.slice(s![.., ..m]).to_owned();
        for (mut row, &w) in x.rows_mut().into_iter().zip(sqrt_pi.iter()) {
            row /= w;
        }
        x.column_mut(0).fill(1.0);
        debug!("dominant eigenvalues {:?}", values.slice(s![..m]));
        Ok((values.slice(s![..m]).to_owned(), x))
    }

    fn optimize_memberships(
        &self,
        x: ArrayView2<f64>,
    ) -> Result<(Array2<f64>, f64, OptimizationOutcome)> {
        let m = x.ncols();
        let index = rotation::index_search(x)?;
        debug!("PCCA+ simplex vertices at states {index:?}");
        let seed = x.select(Axis(0), &index);
        let initial = rotation::fill_matrix(inverse(seed.view())?, x).ok_or_else(|| {
            KineticsError::Singularity("initial rotation has an empty metastable set".into())
        })?;

        let alpha0: Vec<f64> = initial.slice(s![1.., 1..]).iter().copied().collect();
        let objective = |alpha: &[f64]| rotation::objective(alpha, x);
        let outcome = self.optimizer.minimize(&objective, &alpha0)?;

        if outcome.converged {
            debug!(
                "rotation optimizer converged after {} iterations",
                outcome.iterations
            );
        } else {
            warn!(
                "rotation optimizer stopped after {} iterations without converging",
                outcome.iterations
            );
        }

        let rot = match rotation::fill_matrix(rotation::rotation_from_inner(&outcome.x, m), x) {
            Some(rot) => rot,
            None => {
                warn!("optimized rotation is infeasible, keeping the initial rotation");
                initial
            }
        };
        let crispness = rotation::crispness(&rot) / m as f64;

        let mut memberships = x.dot(&rot);
        let clipped = memberships.clip_negative();
        if clipped < -1e-10 {
            debug!("clipped membership values down to {clipped:e}");
        }
        memberships
            .normalize_to(1.0, &Direction::ROW)
            .map_err(|e| KineticsError::Numerical(format!("membership normalization: {e}")))?;
        Ok((memberships, crispness, outcome))
    }
}

fn checked_stationary(
    transition_matrix: &TransitionMatrix,
    pi: ArrayView1<f64>,
) -> Result<Array1<f64>> {
    let n = transition_matrix.n_states();
    if pi.len() != n {
        return Err(KineticsError::Dimension {
            expected: n,
            found: pi.len(),
        });
    }
    if (pi.sum() - 1.0).abs() > NORMALIZATION_TOLERANCE {
        return Err(KineticsError::Configuration(format!(
            "stationary distribution sums to {}",
            pi.sum()
        )));
    }
    let residual = (&pi.dot(&transition_matrix.view()) - &pi)
        .iter()
        .fold(0.0f64, |acc, v| acc.max(v.abs()));
    if residual > NORMALIZATION_TOLERANCE {
        return Err(KineticsError::NoStationaryDistribution(format!(
            "supplied distribution is not invariant (residual {residual:e})"
        )));
    }
    Ok(pi.to_owned())
}

/// Result of PCCA+.
#[derive(Debug, Clone)]
pub struct PCCAModel {
    memberships: Array2<f64>,
    coarse_grained_transition_matrix: Array2<f64>,
    coarse_grained_stationary_probability: Array1<f64>,
    metastable_distributions: Array2<f64>,
    assignments: Vec<usize>,
    stationary_distribution: Array1<f64>,
    eigenvalues: Array1<f64>,
    crispness: f64,
    iterations: usize,
    converged: bool,
}

impl PCCAModel {
    fn new(
        memberships: Array2<f64>,
        p: ArrayView2<f64>,
        pi: Array1<f64>,
        eigenvalues: Array1<f64>,
        crispness: f64,
        outcome: Option<OptimizationOutcome>,
    ) -> Result<Self> {
        let mut pi_macro = memberships.t().dot(&pi);
        if let Some((j, v)) = pi_macro.iter().enumerate().find(|(_, v)| !(**v > 0.0)) {
            return Err(KineticsError::Numerical(format!(
                "metastable set {j} carries no stationary mass ({v:e})"
            )));
        }

        // rows of Mᵀ diag(π)
        let weighted = &memberships.t() * &pi.view().insert_axis(Axis(0));
        let flux = weighted.dot(&p).dot(&memberships);
        let mut coarse = &flux / &pi_macro.view().insert_axis(Axis(1));
        coarse.clip_negative();
        coarse
            .normalize_to(1.0, &Direction::ROW)
            .map_err(|e| KineticsError::Numerical(format!("coarse-grained matrix: {e}")))?;

        let mut distributions = weighted;
        distributions
            .normalize_to(1.0, &Direction::ROW)
            .map_err(|e| KineticsError::Numerical(format!("metastable distributions: {e}")))?;

        let total = pi_macro.sum();
        pi_macro /= total;

        let assignments = memberships
            .rows()
            .into_iter()
            .map(|row| {
                let mut best = 0;
                for (j, &v) in row.iter().enumerate() {
                    if v > row[best] {
                        best = j;
                    }
                }
                best
            })
            .collect();

        let (iterations, converged) = outcome
            .map(|o| (o.iterations, o.converged))
            .unwrap_or((0, true));

        Ok(PCCAModel {
            memberships,
            coarse_grained_transition_matrix: coarse,
            coarse_grained_stationary_probability: pi_macro,
            metastable_distributions: distributions,
            assignments,
            stationary_distribution: pi,
            eigenvalues,
            crispness,
            iterations,
            converged,
        })
    }

    /// Membership matrix `M` (`n × m`), rows sum to one.
    pub fn memberships(&self) -> ArrayView2<f64> {
        self.memberships.view()
    }

    /// `diag(1/π_macro) Mᵀ diag(π) P M`.
    pub fn coarse_grained_transition_matrix(&self) -> ArrayView2<f64> {
        self.coarse_grained_transition_matrix.view()
    }

    /// `Mᵀ π`.
    pub fn coarse_grained_stationary_probability(&self) -> ArrayView1<f64> {
        self.coarse_grained_stationary_probability.view()
    }

    /// Row `j` is the distribution of the microstates within metastable set
    /// `j`, proportional to `π_i M_ij`.
    pub fn metastable_distributions(&self) -> ArrayView2<f64> {
        self.metastable_distributions.view()
    }

    /// Crisp assignment of each state to its highest membership, ties going
    /// to the lower set index.
    pub fn assignments(&self) -> &[usize] {
        &self.assignments
    }

    /// States of each metastable set under [`assignments`](Self::assignments).
    /// Sets can be empty.
    pub fn metastable_sets(&self) -> Vec<Vec<usize>> {
        let mut sets = vec![Vec::new(); self.n_metastable()];
        for (state, &set) in self.assignments.iter().enumerate() {
            sets[set].push(state);
        }
        sets
    }

    pub fn stationary_distribution(&self) -> ArrayView1<f64> {
        self.stationary_distribution.view()
    }

    /// The `m` dominant eigenvalues of the transition matrix.
    pub fn eigenvalues(&self) -> ArrayView1<f64> {
        self.eigenvalues.view()
    }

    pub fn n_metastable(&self) -> usize {
        self.memberships.ncols()
    }

    pub fn n_states(&self) -> usize {
        self.memberships.nrows()
    }

    /// Crispness of the memberships scaled to `(0, 1]`, one for crisp sets.
    pub fn crispness(&self) -> f64 {
        self.crispness
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn check_convergence(&self) -> Result<()> {
        if self.converged {
            Ok(())
        } else {
            Err(KineticsError::Convergence {
                iterations: self.iterations,
            })
        }
    }
}

impl TransitionMatrix {
    /// PCCA+ with default settings.
    pub fn pcca(&self, n_metastable_sets: usize) -> Result<PCCAModel> {
        PCCABuilder::new(n_metastable_sets).build().compute(self, None)
    }
}
