//! # Markov chains on a finite state space
//!
//! Validation and spectral helpers for row-stochastic transition matrices,
//! and PCCA+ coarse-graining in [`pcca`].

pub mod pcca;

use nalgebra_sparse::CsrMatrix;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{KineticsError, Result};
use crate::linalg::solve;
use crate::sparse::MatrixSum;

/// Tolerance on row sums when validating a transition matrix.
pub const STOCHASTICITY_TOLERANCE: f64 = 1e-8;

/// A validated dense row-stochastic matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMatrix {
    matrix: Array2<f64>,
}

impl TransitionMatrix {
    pub fn new(matrix: Array2<f64>) -> Result<Self> {
        let (n, m) = matrix.dim();
        if n != m {
            return Err(KineticsError::InvalidTransitionMatrix(format!(
                "matrix must be square, got {n} x {m}"
            )));
        }
        if n == 0 {
            return Err(KineticsError::InvalidTransitionMatrix(
                "matrix has no states".into(),
            ));
        }
        if let Some(v) = matrix.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(KineticsError::InvalidTransitionMatrix(format!(
                "entries must be finite and non-negative, found {v}"
            )));
        }
        for (i, row) in matrix.rows().into_iter().enumerate() {
            let sum = row.sum();
            if (sum - 1.0).abs() > STOCHASTICITY_TOLERANCE {
                return Err(KineticsError::InvalidTransitionMatrix(format!(
                    "row {i} sums to {sum}"
                )));
            }
        }
        Ok(TransitionMatrix { matrix })
    }

    /// Densifies a sparse transition matrix.
    pub fn from_csr(csr: &CsrMatrix<f64>) -> Result<Self> {
        let sums: Vec<f64> = csr.sum_row()?;
        if let Some((i, sum)) = sums
            .iter()
            .enumerate()
            .find(|(_, s)| (**s - 1.0).abs() > STOCHASTICITY_TOLERANCE)
        {
            return Err(KineticsError::InvalidTransitionMatrix(format!(
                "row {i} sums to {sum}"
            )));
        }
        let mut dense = Array2::zeros((csr.nrows(), csr.ncols()));
        for (i, j, &v) in csr.triplet_iter() {
            dense[[i, j]] += v;
        }
        Self::new(dense)
    }

    pub fn n_states(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn view(&self) -> ArrayView2<f64> {
        self.matrix.view()
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.matrix
    }

    /// Strongly connected components of the transition graph (edges where
    /// `P_ij > 0`).
    pub fn communicating_classes(&self) -> Vec<Vec<usize>> {
        let n = self.n_states();
        let mut graph = DiGraph::<(), ()>::with_capacity(n, n);
        for _ in 0..n {
            graph.add_node(());
        }
        for ((i, j), &p) in self.matrix.indexed_iter() {
            if p > 0.0 && i != j {
                graph.add_edge(NodeIndex::new(i), NodeIndex::new(j), ());
            }
        }
        let mut classes: Vec<Vec<usize>> = tarjan_scc(&graph)
            .into_iter()
            .map(|scc| {
                let mut states: Vec<usize> = scc.into_iter().map(|idx| idx.index()).collect();
                states.sort_unstable();
                states
            })
            .collect();
        classes.sort_by_key(|c| c[0]);
        classes
    }

    pub fn is_connected(&self) -> bool {
        self.communicating_classes().len() == 1
    }

    /// Stationary distribution of an irreducible chain: the left eigenvector
    /// for eigenvalue one, normalized to sum to one.
    pub fn stationary_distribution(&self) -> Result<Array1<f64>> {
        let classes = self.communicating_classes();
        if classes.len() > 1 {
            return Err(KineticsError::NoStationaryDistribution(format!(
                "chain is reducible with {} communicating classes",
                classes.len()
            )));
        }
        let n = self.n_states();
        // (Pᵀ - I) π = 0 with the last equation replaced by Σ π = 1
        let mut a = self.matrix.t().to_owned();
        a.diag_mut().mapv_inplace(|v| v - 1.0);
        a.row_mut(n - 1).fill(1.0);
        let mut b = Array1::zeros(n);
        b[n - 1] = 1.0;
        let pi = solve(a.view(), b.view()).map_err(|e| {
            KineticsError::NoStationaryDistribution(format!("eigenvalue-one system failed: {e}"))
        })?;

        let min = pi.iter().copied().fold(f64::INFINITY, f64::min);
        if min < -1e-12 {
            return Err(KineticsError::NoStationaryDistribution(format!(
                "solution has negative entries (min {min:e})"
            )));
        }
        let pi = pi.mapv(|v| v.max(0.0));
        let pi = &pi / pi.sum();
        let residual = (&pi.dot(&self.matrix) - &pi)
            .iter()
            .fold(0.0f64, |acc, v| acc.max(v.abs()));
        if residual > 1e-8 {
            return Err(KineticsError::NoStationaryDistribution(format!(
                "left eigenvector residual {residual:e} exceeds tolerance"
            )));
        }
        Ok(pi)
    }

    /// Largest violation of detailed balance `|π_i P_ij - π_j P_ji|`.
    pub fn detailed_balance_violation(&self, pi: ArrayView1<f64>) -> f64 {
        let n = self.n_states();
        let mut worst = 0.0f64;
        for i in 0..n {
            for j in (i + 1)..n {
                let flux = pi[i] * self.matrix[[i, j]] - pi[j] * self.matrix[[j, i]];
                worst = worst.max(flux.abs());
            }
        }
        worst
    }

    pub fn is_reversible(&self, pi: ArrayView1<f64>, tolerance: f64) -> bool {
        self.detailed_balance_violation(pi) <= tolerance
    }
}
