//! Optimizer seam for the PCCA+ rotation, with an `argmin` Nelder–Mead
//! backend.

use argmin::core::{CostFunction, Error, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::neldermead;

use crate::error::Result;

/// Result of an unconstrained minimization.
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Minimizer for the rotation objective. Infeasible points evaluate to
/// `+∞`, so implementations must tolerate infinite objective values.
pub trait RotationOptimizer: Send + Sync {
    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        x0: &[f64],
    ) -> Result<OptimizationOutcome>;
}

/// Exposes a plain objective closure as an `argmin` problem.
struct ObjectiveAdapter<'a> {
    objective: &'a dyn Fn(&[f64]) -> f64,
}

impl CostFunction for ObjectiveAdapter<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> std::result::Result<Self::Output, Error> {
        let value = (self.objective)(param.as_slice());
        // NaN would break the simplex ordering
        Ok(if value.is_nan() { f64::INFINITY } else { value })
    }
}

/// Derivative-free Nelder–Mead simplex search (`argmin`'s solver with its
/// standard reflection, expansion, contraction and shrink coefficients).
/// Stops once the standard deviation of the objective over the simplex falls
/// below `sd_tolerance`.
#[derive(Debug, Clone)]
pub struct NelderMead {
    max_iterations: Option<usize>,
    sd_tolerance: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        NelderMead {
            max_iterations: None,
            sd_tolerance: 1e-6,
        }
    }
}

impl NelderMead {
    pub fn new() -> Self {
        Self::default()
    }

    /// Iteration cap. Defaults to `200 * dim`.
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn sd_tolerance(mut self, sd_tolerance: f64) -> Self {
        self.sd_tolerance = sd_tolerance;
        self
    }

    /// `x0` plus one vertex per coordinate, perturbed by 5% (or set to
    /// `0.00025` where the coordinate is zero).
    fn initial_simplex(x0: &[f64]) -> Vec<Vec<f64>> {
        let mut simplex = Vec::with_capacity(x0.len() + 1);
        simplex.push(x0.to_vec());
        for k in 0..x0.len() {
            let mut vertex = x0.to_vec();
            vertex[k] = if vertex[k] != 0.0 {
                1.05 * vertex[k]
            } else {
                0.00025
            };
            simplex.push(vertex);
        }
        simplex
    }
}

impl RotationOptimizer for NelderMead {
    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        x0: &[f64],
    ) -> Result<OptimizationOutcome> {
        let n = x0.len();
        if n == 0 {
            return Ok(OptimizationOutcome {
                x: Vec::new(),
                value: objective(x0),
                iterations: 0,
                converged: true,
            });
        }
        let max_iterations = self.max_iterations.unwrap_or(200 * n);

        let problem = ObjectiveAdapter { objective };
        let solver = neldermead::NelderMead::new(Self::initial_simplex(x0))
            .with_sd_tolerance(self.sd_tolerance)?;
        let result = Executor::new(problem, solver)
            .configure(|state| state.max_iters(max_iterations as u64))
            .run()?;

        let state = result.state();
        let x = state
            .get_best_param()
            .or_else(|| state.get_param())
            .cloned()
            .unwrap_or_else(|| x0.to_vec());
        let converged = matches!(
            state.get_termination_status(),
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        );
        Ok(OptimizationOutcome {
            value: objective(x.as_slice()),
            x,
            iterations: state.get_iter() as usize,
            converged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_quadratic_bowl() {
        let f = |x: &[f64]| (x[0] - 1.0).powi(2) + 2.0 * (x[1] + 0.5).powi(2);
        let outcome = NelderMead::new()
            .sd_tolerance(1e-12)
            .minimize(&f, &[0.0, 0.0])
            .unwrap();
        assert!(outcome.converged);
        assert_abs_diff_eq!(outcome.x[0], 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(outcome.x[1], -0.5, epsilon = 1e-3);
        assert!(outcome.value < 1e-6);
    }

    #[test]
    fn test_rosenbrock() {
        let f = |x: &[f64]| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2);
        let outcome = NelderMead::new()
            .sd_tolerance(1e-14)
            .max_iterations(5000)
            .minimize(&f, &[-1.2, 1.0])
            .unwrap();
        assert!(outcome.converged);
        assert_abs_diff_eq!(outcome.x[0], 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(outcome.x[1], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_infeasible_region_is_avoided() {
        let f = |x: &[f64]| {
            if x[0] < 0.5 {
                f64::INFINITY
            } else {
                (x[0] - 0.5).powi(2)
            }
        };
        let outcome = NelderMead::new().minimize(&f, &[2.0]).unwrap();
        assert!(outcome.value.is_finite());
        assert!(outcome.x[0] >= 0.5);
        assert_abs_diff_eq!(outcome.x[0], 0.5, epsilon = 1e-2);
    }

    #[test]
    fn test_iteration_budget() {
        let f = |x: &[f64]| x[0] * x[0];
        let outcome = NelderMead::new()
            .max_iterations(0)
            .minimize(&f, &[3.0])
            .unwrap();
        assert_eq!(outcome.iterations, 0);
        assert!(!outcome.converged);
        assert!(outcome.value <= 9.0);
    }

    #[test]
    fn test_nan_is_treated_as_infeasible() {
        let f = |x: &[f64]| if x[0] > 1.0 { f64::NAN } else { (x[0] - 0.8).powi(2) };
        let outcome = NelderMead::new().minimize(&f, &[0.5]).unwrap();
        assert!(outcome.value.is_finite());
        assert_abs_diff_eq!(outcome.x[0], 0.8, epsilon = 1e-2);
    }

    #[test]
    fn test_negative_tolerance_is_rejected() {
        let f = |x: &[f64]| x[0] * x[0];
        assert!(NelderMead::new()
            .sd_tolerance(-1.0)
            .minimize(&f, &[1.0])
            .is_err());
    }
}
