//! # Dense linear algebra kernels
//!
//! Eigen-decomposition backends and the small set of dense routines the
//! estimators are built from: eigenpair ordering, canonical signs, the
//! rank-reducing inverse square root of a symmetric positive semi-definite
//! matrix and the symmetric generalized eigenproblem `C_t r = C_0 r λ`.
//!
//! The public surface works on `ndarray` arrays; the default backend runs on
//! `nalgebra` and converts through `nshare`.

use std::cmp::Ordering;

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use nshare::{IntoNalgebra, IntoNdarray2};

use crate::error::{KineticsError, Result};

/// Backend for real symmetric eigenproblems.
///
/// Implementations return eigenvalues and the matching eigenvectors as
/// columns, in any order.
pub trait SymmetricEigenSolver: Send + Sync {
    fn eigh(&self, matrix: ArrayView2<f64>) -> Result<(Array1<f64>, Array2<f64>)>;
}

/// Symmetric eigensolver backed by `nalgebra::SymmetricEigen`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NalgebraEigenSolver;

impl SymmetricEigenSolver for NalgebraEigenSolver {
    fn eigh(&self, matrix: ArrayView2<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
        if matrix.nrows() != matrix.ncols() {
            return Err(KineticsError::Dimension {
                expected: matrix.nrows(),
                found: matrix.ncols(),
            });
        }
        let m: DMatrix<f64> = matrix.to_owned().into_nalgebra();
        let eigen = SymmetricEigen::new(m);
        let values = Array1::from(eigen.eigenvalues.as_slice().to_vec());
        let vectors = eigen.eigenvectors.into_ndarray2();
        if values.iter().any(|v| !v.is_finite()) || vectors.iter().any(|v| !v.is_finite()) {
            return Err(KineticsError::numerical(
                "symmetric eigendecomposition produced non-finite values",
            ));
        }
        Ok((values, vectors))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Largest value first.
    Descending,
    /// Largest absolute value first.
    ByMagnitude,
}

/// Reorders eigenvalues and eigenvector columns. The sort is stable, so
/// equal keys keep the backend's order.
pub fn sort_eigenpairs(
    values: &Array1<f64>,
    vectors: &Array2<f64>,
    order: SortOrder,
) -> (Array1<f64>, Array2<f64>) {
    let key = |v: f64| match order {
        SortOrder::Descending => v,
        SortOrder::ByMagnitude => v.abs(),
    };
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| {
        key(values[b])
            .partial_cmp(&key(values[a]))
            .unwrap_or(Ordering::Equal)
    });
    (values.select(Axis(0), &idx), vectors.select(Axis(1), &idx))
}

/// Flips columns so that the entry of largest magnitude in each is positive.
pub fn canonical_signs(vectors: &mut Array2<f64>) {
    for mut col in vectors.columns_mut() {
        let mut pivot = 0.0f64;
        for &v in col.iter() {
            if v.abs() > pivot.abs() {
                pivot = v;
            }
        }
        if pivot < 0.0 {
            col.mapv_inplace(|v| -v);
        }
    }
}

/// `(A + Aᵀ) / 2`
pub fn symmetrize(a: ArrayView2<f64>) -> Array2<f64> {
    (&a + &a.t()) * 0.5
}

/// Largest absolute entry of `A - Aᵀ`.
pub fn max_asymmetry(a: ArrayView2<f64>) -> f64 {
    let mut worst = 0.0f64;
    for i in 0..a.nrows() {
        for j in (i + 1)..a.ncols() {
            worst = worst.max((a[[i, j]] - a[[j, i]]).abs());
        }
    }
    worst
}

/// Returns `L` (`d × r`) with `Lᵀ C L = I_r`, dropping eigen-directions of `C`
/// whose eigenvalue is not above `epsilon`. `r` is the retained rank.
pub fn spd_inv_split<S: SymmetricEigenSolver + ?Sized>(
    c: ArrayView2<f64>,
    epsilon: f64,
    solver: &S,
) -> Result<Array2<f64>> {
    let (values, vectors) = solver.eigh(symmetrize(c).view())?;
    let (values, mut vectors) = sort_eigenpairs(&values, &vectors, SortOrder::Descending);
    let rank = values.iter().take_while(|&&v| v > epsilon).count();
    if rank == 0 {
        return Err(KineticsError::Singularity(format!(
            "covariance matrix has no eigenvalue above epsilon = {epsilon:e}"
        )));
    }
    canonical_signs(&mut vectors);
    let retained: Vec<usize> = (0..rank).collect();
    let mut l = vectors.select(Axis(1), &retained);
    for (k, mut col) in l.columns_mut().into_iter().enumerate() {
        col /= values[k].sqrt();
    }
    log::debug!(
        "rank reduction kept {} of {} directions (epsilon = {:e})",
        rank,
        values.len(),
        epsilon
    );
    Ok(l)
}

/// Solution of a symmetric generalized eigenproblem.
#[derive(Debug, Clone)]
pub struct GeneralizedEigen {
    /// Sorted by absolute value, largest first.
    pub eigenvalues: Array1<f64>,
    /// `C_0`-orthonormal right eigenvectors as columns.
    pub eigenvectors: Array2<f64>,
    pub rank: usize,
}

/// Solves `C_t r = C_0 r λ` for symmetric `C_t` and symmetric positive
/// semi-definite `C_0`, after removing the numerical null space of `C_0`.
pub fn eig_corr<S: SymmetricEigenSolver + ?Sized>(
    c0: ArrayView2<f64>,
    ct: ArrayView2<f64>,
    epsilon: f64,
    solver: &S,
) -> Result<GeneralizedEigen> {
    if c0.dim() != ct.dim() || c0.nrows() != c0.ncols() {
        return Err(KineticsError::Dimension {
            expected: c0.nrows(),
            found: ct.nrows(),
        });
    }
    let l = spd_inv_split(c0, epsilon, solver)?;
    let ct_whitened = l.t().dot(&ct).dot(&l);
    let (values, vectors) = solver.eigh(symmetrize(ct_whitened.view()).view())?;
    let (values, vectors) = sort_eigenpairs(&values, &vectors, SortOrder::ByMagnitude);
    let mut r = l.dot(&vectors);
    canonical_signs(&mut r);
    Ok(GeneralizedEigen {
        rank: l.ncols(),
        eigenvalues: values,
        eigenvectors: r,
    })
}

/// Solves the dense square system `A x = b` with partial-pivot LU.
pub fn solve(a: ArrayView2<f64>, b: ArrayView1<f64>) -> Result<Array1<f64>> {
    if a.nrows() != a.ncols() || a.nrows() != b.len() {
        return Err(KineticsError::Dimension {
            expected: a.nrows(),
            found: b.len(),
        });
    }
    let m: DMatrix<f64> = a.to_owned().into_nalgebra();
    let rhs = DVector::from_vec(b.to_vec());
    let x = m
        .lu()
        .solve(&rhs)
        .ok_or_else(|| KineticsError::Singularity("linear system is singular".into()))?;
    if x.iter().any(|v| !v.is_finite()) {
        return Err(KineticsError::Singularity(
            "linear system solution is not finite".into(),
        ));
    }
    Ok(Array1::from(x.as_slice().to_vec()))
}

pub fn inverse(a: ArrayView2<f64>) -> Result<Array2<f64>> {
    if a.nrows() != a.ncols() {
        return Err(KineticsError::Dimension {
            expected: a.nrows(),
            found: a.ncols(),
        });
    }
    let m: DMatrix<f64> = a.to_owned().into_nalgebra();
    let inv = m
        .try_inverse()
        .ok_or_else(|| KineticsError::Singularity("matrix is not invertible".into()))?;
    Ok(inv.into_ndarray2())
}

/// Right singular vector for the smallest singular value of a square matrix,
/// together with that singular value.
pub fn null_vector(a: ArrayView2<f64>) -> Result<(Array1<f64>, f64)> {
    if a.nrows() != a.ncols() {
        return Err(KineticsError::Dimension {
            expected: a.nrows(),
            found: a.ncols(),
        });
    }
    let m: DMatrix<f64> = a.to_owned().into_nalgebra();
    let svd = m.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| KineticsError::numerical("singular value decomposition failed"))?;
    let (k, sigma) = svd
        .singular_values
        .iter()
        .copied()
        .enumerate()
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
        .ok_or_else(|| KineticsError::numerical("empty matrix has no null vector"))?;
    let v = Array1::from_iter(v_t.row(k).iter().copied());
    Ok((v, sigma))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_eigh_diagonal() {
        let a = array![[3.0, 0.0], [0.0, 1.0]];
        let (values, vectors) = NalgebraEigenSolver.eigh(a.view()).unwrap();
        let (values, vectors) = sort_eigenpairs(&values, &vectors, SortOrder::Descending);
        assert_abs_diff_eq!(values[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(values[1], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(vectors[[0, 0]].abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_sort_by_magnitude() {
        let values = array![0.5, -0.9, 0.1];
        let vectors = Array2::eye(3);
        let (v, vec) = sort_eigenpairs(&values, &vectors, SortOrder::ByMagnitude);
        assert_eq!(v.to_vec(), vec![-0.9, 0.5, 0.1]);
        assert_eq!(vec[[1, 0]], 1.0);
    }

    #[test]
    fn test_canonical_signs() {
        let mut v = array![[-0.2, 0.1], [-0.9, -0.3]];
        canonical_signs(&mut v);
        assert_eq!(v[[1, 0]], 0.9);
        assert_eq!(v[[1, 1]], 0.3);
        assert_eq!(v[[0, 1]], -0.1);
    }

    #[test]
    fn test_spd_inv_split_drops_null_space() {
        // rank-one matrix padded with an exactly zero direction
        let c = array![[2.0, 2.0, 0.0], [2.0, 2.0, 0.0], [0.0, 0.0, 1.0]];
        let l = spd_inv_split(c.view(), 1e-10, &NalgebraEigenSolver).unwrap();
        assert_eq!(l.ncols(), 2);
        let id = l.t().dot(&c).dot(&l);
        assert_abs_diff_eq!(id, Array2::eye(2), epsilon = 1e-10);
    }

    #[test]
    fn test_spd_inv_split_zero_matrix() {
        let c = Array2::<f64>::zeros((2, 2));
        assert!(matches!(
            spd_inv_split(c.view(), 1e-10, &NalgebraEigenSolver),
            Err(KineticsError::Singularity(_))
        ));
    }

    #[test]
    fn test_eig_corr_residual() {
        let c0 = array![[2.0, 0.3, 0.1], [0.3, 1.5, 0.2], [0.1, 0.2, 1.0]];
        let ct = array![[1.2, 0.1, 0.0], [0.1, 0.4, 0.05], [0.0, 0.05, 0.1]];
        let sol = eig_corr(c0.view(), ct.view(), 1e-12, &NalgebraEigenSolver).unwrap();
        assert_eq!(sol.rank, 3);
        for k in 0..3 {
            let r = sol.eigenvectors.column(k);
            let lhs = ct.dot(&r);
            let rhs = c0.dot(&r) * sol.eigenvalues[k];
            assert_abs_diff_eq!(lhs, rhs, epsilon = 1e-10);
        }
        for k in 1..3 {
            assert!(sol.eigenvalues[k - 1].abs() >= sol.eigenvalues[k].abs());
        }
        // C0-orthonormality
        let gram = sol.eigenvectors.t().dot(&c0).dot(&sol.eigenvectors);
        assert_abs_diff_eq!(gram, Array2::eye(3), epsilon = 1e-10);
    }

    #[test]
    fn test_solve() {
        let a = array![[4.0, 1.0], [2.0, 3.0]];
        let b = array![1.0, 2.0];
        let x = solve(a.view(), b.view()).unwrap();
        assert_abs_diff_eq!(a.dot(&x), b, epsilon = 1e-12);

        let singular = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(solve(singular.view(), b.view()).is_err());
    }

    #[test]
    fn test_inverse() {
        let a = array![[2.0, 1.0], [1.0, 1.0]];
        let inv = inverse(a.view()).unwrap();
        assert_abs_diff_eq!(a.dot(&inv), Array2::eye(2), epsilon = 1e-12);
        assert!(inverse(array![[1.0, 1.0], [1.0, 1.0]].view()).is_err());
    }

    #[test]
    fn test_null_vector() {
        let a = array![[1.0, -1.0], [-1.0, 1.0]];
        let (v, sigma) = null_vector(a.view()).unwrap();
        assert_abs_diff_eq!(sigma, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v[0].abs(), v[1].abs(), epsilon = 1e-12);
        assert_abs_diff_eq!(a.dot(&v), Array1::zeros(2), epsilon = 1e-12);
    }

    #[test]
    fn test_max_asymmetry() {
        let a = array![[1.0, 2.0], [2.5, 1.0]];
        assert_abs_diff_eq!(max_asymmetry(a.view()), 0.5);
        assert_abs_diff_eq!(max_asymmetry(symmetrize(a.view()).view()), 0.0);
    }
}
