use num_traits::Float;

/// Axis along which a matrix operation is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ROW,
    COLUMN,
}

pub trait Normalize<T: Float> {
    /// Rescales every row (or column) so that its entries sum to `target`,
    /// given the current sums.
    fn normalize(&mut self, sums: &[T], target: T, direction: &Direction) -> anyhow::Result<()>;

    /// Computes the sums along `direction` and rescales them to `target`.
    fn normalize_to(&mut self, target: T, direction: &Direction) -> anyhow::Result<()>;
}

pub trait ClipNegative<T: Float> {
    /// Replaces negative entries by zero and returns the most negative value seen.
    fn clip_negative(&mut self) -> T;
}
