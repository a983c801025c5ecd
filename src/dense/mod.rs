use anyhow::bail;
use ndarray::{Array2, Axis};
use num_traits::Float;

use crate::utils::{ClipNegative, Direction, Normalize};

impl<T: Float> Normalize<T> for Array2<T> {
    fn normalize(&mut self, sums: &[T], target: T, direction: &Direction) -> anyhow::Result<()> {
        match direction {
            Direction::ROW => {
                if sums.len() != self.nrows() {
                    bail!(
                        "Length of sums ({}) does not match number of rows ({})",
                        sums.len(),
                        self.nrows()
                    );
                }

                for (i, row) in self.rows_mut().into_iter().enumerate() {
                    if sums[i] == T::zero() {
                        bail!("Row {} sums to zero and cannot be normalized", i);
                    }
                    let scale = target / sums[i];
                    for val in row {
                        *val = *val * scale;
                    }
                }
            }
            Direction::COLUMN => {
                if sums.len() != self.ncols() {
                    bail!(
                        "Length of sums ({}) does not match number of columns ({})",
                        sums.len(),
                        self.ncols()
                    );
                }

                for (j, col) in self.columns_mut().into_iter().enumerate() {
                    if sums[j] == T::zero() {
                        bail!("Column {} sums to zero and cannot be normalized", j);
                    }
                    let scale = target / sums[j];
                    for val in col {
                        *val = *val * scale;
                    }
                }
            }
        }
        Ok(())
    }

    fn normalize_to(&mut self, target: T, direction: &Direction) -> anyhow::Result<()> {
        let axis = match direction {
            Direction::ROW => Axis(1),
            Direction::COLUMN => Axis(0),
        };
        let sums: Vec<T> = self
            .lanes(axis)
            .into_iter()
            .map(|lane| lane.iter().fold(T::zero(), |acc, &v| acc + v))
            .collect();
        self.normalize(&sums, target, direction)
    }
}

impl<T: Float> ClipNegative<T> for Array2<T> {
    fn clip_negative(&mut self) -> T {
        let mut most_negative = T::zero();
        for val in self.iter_mut() {
            if *val < T::zero() {
                most_negative = most_negative.min(*val);
                *val = T::zero();
            }
        }
        most_negative
    }
}
