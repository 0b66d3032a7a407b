//! Test fixtures: reference oracles and synthetic data.
//!
//! Public so integration tests, doc examples and benchmarks can share them.

mod data;
mod oracles;

pub use data::{
    classification_accuracy, random_features, synthetic_binary_labels, synthetic_classification,
    synthetic_regression_targets,
};
pub use oracles::{AbsoluteDeviation, Counting, HingeLoss, LeastSquares, Quadratic};
