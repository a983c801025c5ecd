use std::ops::AddAssign;

use anyhow::anyhow;
use nalgebra_sparse::CsrMatrix;
use num_traits::{Float, NumCast};

use super::MatrixSum;

fn cast<M: NumCast + Copy, T: NumCast>(value: M) -> anyhow::Result<T> {
    <T as NumCast>::from(value).ok_or_else(|| anyhow!("Failed to convert to target type"))
}

impl<M: NumCast + Copy> MatrixSum for CsrMatrix<M> {
    type Item = M;

    fn sum_row<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: Float + NumCast + AddAssign + std::iter::Sum,
    {
        let mut result = vec![T::zero(); self.nrows()];
        for (row, row_vec) in self.row_iter().enumerate() {
            result[row] = row_vec
                .values()
                .iter()
                .map(|&v| cast(v))
                .sum::<anyhow::Result<T>>()?;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra_sparse::CooMatrix;

    fn sample() -> CsrMatrix<f64> {
        let mut coo = CooMatrix::new(3, 3);
        coo.push(0, 0, 0.5);
        coo.push(0, 2, 0.5);
        coo.push(1, 1, 1.0);
        coo.push(2, 0, 0.25);
        coo.push(2, 1, 0.75);
        CsrMatrix::from(&coo)
    }

    #[test]
    fn test_sum_row() {
        let sums: Vec<f64> = sample().sum_row().unwrap();
        assert_eq!(sums, vec![1.0, 1.0, 1.0]);
    }
}
