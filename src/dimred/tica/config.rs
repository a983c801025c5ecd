use std::fmt;
use std::str::FromStr;

use ndarray::ArrayView1;

use crate::error::{KineticsError, Result};

/// How many TICA components a fitted model projects onto.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DimensionSelector {
    /// Every direction that survived rank reduction of `C_0`.
    #[default]
    AllRanks,
    /// The `k` components with the largest `|λ|`.
    FixedCount(usize),
    /// The smallest prefix whose cumulative kinetic variance reaches the cutoff.
    VarianceCutoff(f64),
}

impl From<usize> for DimensionSelector {
    fn from(k: usize) -> Self {
        DimensionSelector::FixedCount(k)
    }
}

impl From<f64> for DimensionSelector {
    fn from(cutoff: f64) -> Self {
        DimensionSelector::VarianceCutoff(cutoff)
    }
}

impl DimensionSelector {
    /// Resolves the selector against eigenvalues sorted by `|λ|`, largest first.
    pub fn resolve(&self, eigenvalues: ArrayView1<f64>) -> Result<usize> {
        let rank = eigenvalues.len();
        match *self {
            DimensionSelector::AllRanks => Ok(rank),
            DimensionSelector::FixedCount(0) => {
                Err(KineticsError::config("dimension must be positive"))
            }
            DimensionSelector::FixedCount(k) if k > rank => Err(KineticsError::config(format!(
                "requested dimension {k} exceeds the available rank {rank}"
            ))),
            DimensionSelector::FixedCount(k) => Ok(k),
            DimensionSelector::VarianceCutoff(f) if !(f > 0.0 && f <= 1.0) => Err(
                KineticsError::config(format!("variance cutoff must lie in (0, 1], got {f}")),
            ),
            DimensionSelector::VarianceCutoff(f) => {
                let total: f64 = eigenvalues.iter().map(|l| l * l).sum();
                if total <= 0.0 {
                    return Ok(rank);
                }
                let mut cumulative = 0.0;
                for (i, l) in eigenvalues.iter().enumerate() {
                    cumulative += l * l;
                    if cumulative / total >= f {
                        return Ok(i + 1);
                    }
                }
                Ok(rank)
            }
        }
    }
}

/// Rescaling applied to the retained eigenvectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scaling {
    None,
    /// Multiply component `i` by `λ_i`.
    #[default]
    KineticMap,
    /// Multiply component `i` by `sqrt(t_i / 2)` with `t_i = -τ / ln|λ_i|`.
    CommuteMap,
}

impl FromStr for Scaling {
    type Err = KineticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Scaling::None),
            "kinetic_map" | "km" => Ok(Scaling::KineticMap),
            "commute_map" | "cm" => Ok(Scaling::CommuteMap),
            other => Err(KineticsError::config(format!("unknown scaling {other:?}"))),
        }
    }
}

impl fmt::Display for Scaling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scaling::None => "none",
            Scaling::KineticMap => "kinetic_map",
            Scaling::CommuteMap => "commute_map",
        };
        f.write_str(name)
    }
}

/// Parameters of a TICA fit.
///
/// `lagtime` is required when fitting on raw data; when fitting on a
/// [`CovarianceModel`](crate::covariance::CovarianceModel) it is optional and,
/// if given, must agree with the model's lag time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TICAConfig {
    pub lagtime: Option<usize>,
    /// Eigenvalue cutoff for the rank reduction of `C_0`.
    pub epsilon: f64,
    pub dim: DimensionSelector,
    pub scaling: Scaling,
}

impl Default for TICAConfig {
    fn default() -> Self {
        TICAConfig {
            lagtime: None,
            epsilon: 1e-6,
            dim: DimensionSelector::AllRanks,
            scaling: Scaling::KineticMap,
        }
    }
}

impl TICAConfig {
    pub fn new(lagtime: usize) -> Self {
        TICAConfig {
            lagtime: Some(lagtime),
            ..Default::default()
        }
    }

    pub fn with_dim(mut self, dim: impl Into<DimensionSelector>) -> Self {
        self.dim = dim.into();
        self
    }

    pub fn with_scaling(mut self, scaling: Scaling) -> Self {
        self.scaling = scaling;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.epsilon >= 0.0 && self.epsilon.is_finite()) {
            return Err(KineticsError::config(format!(
                "epsilon must be a finite non-negative number, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_resolve_fixed_and_all() {
        let ev = array![0.9, 0.5, -0.3, 0.1];
        assert_eq!(DimensionSelector::AllRanks.resolve(ev.view()).unwrap(), 4);
        assert_eq!(DimensionSelector::from(2usize).resolve(ev.view()).unwrap(), 2);
        assert!(DimensionSelector::FixedCount(0).resolve(ev.view()).is_err());
        assert!(DimensionSelector::FixedCount(5).resolve(ev.view()).is_err());
    }

    #[test]
    fn test_resolve_variance_cutoff() {
        // squared: 0.81, 0.25, 0.09, 0.01 -> cumulative 0.698, 0.914, 0.991, 1.0
        let ev = array![0.9, 0.5, -0.3, 0.1];
        assert_eq!(DimensionSelector::from(0.5).resolve(ev.view()).unwrap(), 1);
        assert_eq!(DimensionSelector::from(0.9).resolve(ev.view()).unwrap(), 2);
        assert_eq!(DimensionSelector::from(0.95).resolve(ev.view()).unwrap(), 3);
        assert_eq!(DimensionSelector::from(1.0).resolve(ev.view()).unwrap(), 4);
        assert!(DimensionSelector::from(0.0).resolve(ev.view()).is_err());
        assert!(DimensionSelector::from(1.5).resolve(ev.view()).is_err());
        assert!(DimensionSelector::from(f64::NAN).resolve(ev.view()).is_err());
    }

    #[test]
    fn test_variance_cutoff_is_monotone() {
        let ev = array![0.99, 0.7, 0.65, 0.2, 0.05, 0.01];
        let mut previous = 0;
        for step in 1..=100 {
            let f = step as f64 / 100.0;
            let dim = DimensionSelector::from(f).resolve(ev.view()).unwrap();
            assert!(dim >= previous);
            previous = dim;
        }
        assert_eq!(previous, 6);
    }

    #[test]
    fn test_scaling_from_str() {
        assert_eq!("kinetic_map".parse::<Scaling>().unwrap(), Scaling::KineticMap);
        assert_eq!("Commute_Map".parse::<Scaling>().unwrap(), Scaling::CommuteMap);
        assert_eq!("none".parse::<Scaling>().unwrap(), Scaling::None);
        assert!("spectral".parse::<Scaling>().is_err());
        assert_eq!(Scaling::CommuteMap.to_string(), "commute_map");
    }
}
