pub mod covariance;
pub mod dimred;
pub mod linalg;
pub mod markov;
pub mod sparse;
mod dense;
mod error;
mod utils;

pub use error::{KineticsError, Result};
pub use utils::ClipNegative;
pub use utils::Direction;
pub use utils::Normalize;

pub use covariance::{Covariance, CovarianceBuilder, CovarianceModel, Weights};
pub use dimred::tica::{TICAConfig, TICAModel, TICA};
pub use markov::pcca::{PCCABuilder, PCCAModel, PCCA};
pub use markov::TransitionMatrix;
