use std::ops::AddAssign;

use num_traits::{Float, NumCast};

pub mod csr;

pub trait MatrixSum {
    type Item: NumCast;

    fn sum_row<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: Float + NumCast + AddAssign + std::iter::Sum;
}
