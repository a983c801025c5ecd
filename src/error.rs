use thiserror::Error;

/// Errors raised by the estimators in this crate.
///
/// Precondition violations are reported at call time. Iterative numerics that
/// run out of budget do not fail; they return a best-effort model flagged as
/// non-converged, and [`KineticsError::Convergence`] is only produced when a
/// caller asks for a strict check.
#[derive(Debug, Error)]
pub enum KineticsError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("dimension mismatch: expected {expected} features, got {found}")]
    Dimension { expected: usize, found: usize },

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("invalid transition matrix: {0}")]
    InvalidTransitionMatrix(String),

    #[error("detailed balance violated (max |pi_i P_ij - pi_j P_ji| = {max_violation:e})")]
    NotReversible { max_violation: f64 },

    #[error("no stationary distribution: {0}")]
    NoStationaryDistribution(String),

    #[error("singular system: {0}")]
    Singularity(String),

    #[error("numerical error: {0}")]
    Numerical(String),

    #[error("optimization did not converge within {iterations} iterations")]
    Convergence { iterations: usize },

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, KineticsError>;

impl KineticsError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        KineticsError::Configuration(msg.into())
    }

    pub(crate) fn numerical(msg: impl Into<String>) -> Self {
        KineticsError::Numerical(msg.into())
    }
}
