//! Feasible rotations of the dominant eigenvectors onto membership
//! functions (Deuflhard & Weber, "Robust Perron cluster analysis in
//! conformation dynamics", 2005; Röblitz & Weber, 2013).

use ndarray::{s, Array2, ArrayView2};

use crate::error::{KineticsError, Result};

const VERTEX_TOLERANCE: f64 = 1e-10;

/// Greedy search for the `m` rows of `x` that span the largest simplex.
/// These rows become the vertices of the initial membership simplex.
pub(crate) fn index_search(x: ArrayView2<f64>) -> Result<Vec<usize>> {
    let (n, m) = x.dim();
    if n < m {
        return Err(KineticsError::Singularity(format!(
            "cannot pick {m} vertices from {n} states"
        )));
    }
    let mut index = vec![0usize; m];
    let mut ortho = x.to_owned();

    let mut max_dist = 0.0;
    for (i, row) in ortho.rows().into_iter().enumerate() {
        let dist = row.dot(&row).sqrt();
        if dist > max_dist {
            max_dist = dist;
            index[0] = i;
        }
    }
    let anchor = ortho.row(index[0]).to_owned();
    for mut row in ortho.rows_mut() {
        row -= &anchor;
    }

    for j in 1..m {
        max_dist = 0.0;
        let previous = ortho.row(index[j - 1]).to_owned();
        for i in 0..n {
            let mut row = ortho.row_mut(i);
            let projection = row.dot(&previous);
            row.scaled_add(-projection, &previous);
            let dist = row.dot(&row).sqrt();
            if dist > max_dist && !index[..j].contains(&i) {
                max_dist = dist;
                index[j] = i;
            }
        }
        if max_dist < VERTEX_TOLERANCE {
            return Err(KineticsError::Singularity(format!(
                "eigenvector rows span only {j} independent vertices, {m} requested"
            )));
        }
        ortho /= max_dist;
    }
    Ok(index)
}

/// Completes a rotation from its inner `(m-1)×(m-1)` block so that
/// `X·A` has rows summing to one and no negative entries. Returns `None`
/// when the block admits no such completion.
pub(crate) fn fill_matrix(mut rot: Array2<f64>, x: ArrayView2<f64>) -> Option<Array2<f64>> {
    let m = rot.nrows();
    for i in 1..m {
        let inner: f64 = rot.slice(s![i, 1..]).sum();
        rot[[i, 0]] = -inner;
    }

    let dummy = -x.slice(s![.., 1..]).dot(&rot.slice(s![1.., ..]));
    for j in 0..m {
        rot[[0, j]] = dummy
            .column(j)
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
    }

    let total = rot.row(0).sum();
    if !(total > 0.0 && total.is_finite()) {
        return None;
    }
    rot /= total;
    if rot.row(0).iter().any(|&v| !(v > 0.0)) {
        return None;
    }
    Some(rot)
}

/// Builds a rotation from a flattened inner block.
pub(crate) fn rotation_from_inner(alpha: &[f64], m: usize) -> Array2<f64> {
    let mut rot = Array2::zeros((m, m));
    for (k, &a) in alpha.iter().enumerate() {
        rot[[1 + k / (m - 1), 1 + k % (m - 1)]] = a;
    }
    rot
}

/// `Σ_i Σ_j A_ij² / A_0j`, the crispness of the memberships `X·A`; equals
/// `m` for crisp memberships.
pub(crate) fn crispness(rot: &Array2<f64>) -> f64 {
    let m = rot.nrows();
    let mut result = 0.0;
    for i in 0..m {
        for j in 0..m {
            result += rot[[i, j]] * rot[[i, j]] / rot[[0, j]];
        }
    }
    result
}

/// Negative crispness of the completed rotation, `+∞` when infeasible.
pub(crate) fn objective(alpha: &[f64], x: ArrayView2<f64>) -> f64 {
    let m = x.ncols();
    match fill_matrix(rotation_from_inner(alpha, m), x) {
        Some(rot) => {
            let value = -crispness(&rot);
            if value.is_finite() {
                value
            } else {
                f64::INFINITY
            }
        }
        None => f64::INFINITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn two_state_vectors() -> Array2<f64> {
        array![[1.0, 1.0], [1.0, -1.0]]
    }

    #[test]
    fn test_index_search_two_states() {
        let index = index_search(two_state_vectors().view()).unwrap();
        assert_eq!(index, vec![0, 1]);
    }

    #[test]
    fn test_index_search_picks_extremes() {
        // the middle row is a convex combination of the outer rows
        let x = array![[1.0, -1.0], [1.0, 0.1], [1.0, 1.2]];
        let mut index = index_search(x.view()).unwrap();
        index.sort_unstable();
        assert_eq!(index, vec![0, 2]);
    }

    #[test]
    fn test_index_search_degenerate() {
        let x = array![[1.0, 0.5], [1.0, 0.5], [1.0, 0.5]];
        assert!(matches!(
            index_search(x.view()),
            Err(KineticsError::Singularity(_))
        ));
    }

    #[test]
    fn test_fill_matrix_feasible() {
        let x = two_state_vectors();
        let rot = fill_matrix(rotation_from_inner(&[0.3], 2), x.view()).unwrap();
        let memberships = x.dot(&rot);
        for row in memberships.rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
            assert!(row.iter().all(|&v| v >= -1e-12));
        }
        assert_abs_diff_eq!(crispness(&rot), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_block_is_infeasible() {
        let x = two_state_vectors();
        assert!(fill_matrix(rotation_from_inner(&[0.0], 2), x.view()).is_none());
        assert_eq!(objective(&[0.0], x.view()), f64::INFINITY);
    }

    #[test]
    fn test_rotation_from_inner_layout() {
        let rot = rotation_from_inner(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(rot, array![[0.0, 0.0, 0.0], [0.0, 1.0, 2.0], [0.0, 3.0, 4.0]]);
    }
}
