//! # Dimensionality Reduction
//!
//! Linear projections of time series onto their slowest-decorrelating
//! directions.
//!
//! ## Currently Available
//! - **TICA** ([`tica`]): time-lagged independent component analysis, the
//!   generalized eigenproblem of the lagged and instantaneous covariances.
//!
//! ## Algorithm Selection Guide
//! - Use **TICA** when the slow processes of a trajectory matter more than
//!   its largest-variance directions, for example as a featurization before
//!   discretization and Markov model estimation.

pub mod tica;
