use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{KineticsError, Result};

/// Weighted first and second moments of a set of frame pairs `(x_t, y_t)`,
/// with the second moments centred at the block's own means.
///
/// Blocks combine with the pairwise update of Chan et al., which is
/// associative and commutative, so trajectories can be processed in any
/// order and merged at the end.
#[derive(Debug, Clone)]
pub(crate) struct Moments {
    pub n_pairs: usize,
    pub weight: f64,
    pub mean_x: Array1<f64>,
    pub mean_y: Array1<f64>,
    pub m_xx: Array2<f64>,
    pub m_xy: Array2<f64>,
    pub m_yy: Array2<f64>,
}

fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    a.view()
        .insert_axis(Axis(1))
        .dot(&b.view().insert_axis(Axis(0)))
}

impl Moments {
    pub fn from_pairs(
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
        w: ArrayView1<f64>,
    ) -> Result<Self> {
        debug_assert_eq!(x.dim(), y.dim());
        debug_assert_eq!(x.nrows(), w.len());

        let dim = x.ncols();
        let weight = w.sum();
        if weight == 0.0 {
            if w.iter().any(|&v| v != 0.0) {
                return Err(KineticsError::numerical(
                    "frame weights of a trajectory cancel to zero",
                ));
            }
            return Ok(Moments {
                n_pairs: x.nrows(),
                weight,
                mean_x: Array1::zeros(dim),
                mean_y: Array1::zeros(dim),
                m_xx: Array2::zeros((dim, dim)),
                m_xy: Array2::zeros((dim, dim)),
                m_yy: Array2::zeros((dim, dim)),
            });
        }

        let mean_x = w.dot(&x) / weight;
        let mean_y = w.dot(&y) / weight;
        let xc = &x - &mean_x;
        let yc = &y - &mean_y;
        let w_col = w.insert_axis(Axis(1));
        let xw = &xc * &w_col;
        let yw = &yc * &w_col;

        Ok(Moments {
            n_pairs: x.nrows(),
            weight,
            m_xx: xw.t().dot(&xc),
            m_xy: xw.t().dot(&yc),
            m_yy: yw.t().dot(&yc),
            mean_x,
            mean_y,
        })
    }

    pub fn dim(&self) -> usize {
        self.mean_x.len()
    }

    pub fn merge(mut self, other: Moments) -> Result<Self> {
        if other.weight == 0.0 {
            self.n_pairs += other.n_pairs;
            return Ok(self);
        }
        if self.weight == 0.0 {
            let mut other = other;
            other.n_pairs += self.n_pairs;
            return Ok(other);
        }

        let total = self.weight + other.weight;
        if total == 0.0 {
            return Err(KineticsError::numerical(
                "accumulated frame weights cancel to zero",
            ));
        }
        let dx = &other.mean_x - &self.mean_x;
        let dy = &other.mean_y - &self.mean_y;
        let f = self.weight * other.weight / total;
        let share = other.weight / total;

        self.m_xx = self.m_xx + &other.m_xx + outer(&dx, &dx) * f;
        self.m_xy = self.m_xy + &other.m_xy + outer(&dx, &dy) * f;
        self.m_yy = self.m_yy + &other.m_yy + outer(&dy, &dy) * f;
        self.mean_x = self.mean_x + dx * share;
        self.mean_y = self.mean_y + dy * share;
        self.weight = total;
        self.n_pairs += other.n_pairs;
        Ok(self)
    }

    /// Second moments about an arbitrary `(shift_x, shift_y)` instead of the
    /// block means: `M + W (μ - s)(ν - t)ᵀ`.
    pub fn shifted(
        &self,
        shift_x: &Array1<f64>,
        shift_y: &Array1<f64>,
    ) -> (Array2<f64>, Array2<f64>, Array2<f64>) {
        let dx = &self.mean_x - shift_x;
        let dy = &self.mean_y - shift_y;
        (
            &self.m_xx + &(outer(&dx, &dx) * self.weight),
            &self.m_xy + &(outer(&dx, &dy) * self.weight),
            &self.m_yy + &(outer(&dy, &dy) * self.weight),
        )
    }
}
