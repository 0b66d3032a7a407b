//! Errors raised by the bundle method and its inner QP solver.

use super::config::ConfigError;

/// Failure of the box-constrained QP solver.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QpError {
    /// The multiplier bracket of the Dai-Fletcher projector diverged: no point
    /// satisfies both the linear constraint and the box.
    #[error("infeasible QP: projection multiplier bracket diverged (step {step:e})")]
    Infeasible {
        /// Size of the bracketing step when the search gave up.
        step: f64,
    },

    /// The returned solution violates the box or the linear constraint.
    #[error("QP solution left the feasible set (violation {violation:e})")]
    LeftFeasibleSet {
        /// Largest violation of a bound or of the linear constraint.
        violation: f64,
    },

    /// Buffers passed to the solver do not agree on the problem dimension.
    #[error("QP dimension mismatch: hessian is {hessian}x{hessian}, {field} has length {len}")]
    DimensionMismatch {
        hessian: usize,
        field: &'static str,
        len: usize,
    },
}

/// Errors produced while training with the bundle method.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// Regularization constant must be strictly positive and finite.
    #[error("lambda must be positive and finite, got {0}")]
    InvalidLambda(f64),

    /// A weight or gradient vector has the wrong number of entries.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The oracle returned a negative or non-finite loss.
    #[error("loss must be finite and non-negative, got {0}")]
    InvalidLoss(f64),

    /// The incrementally maintained Gram matrix drifted from its definition.
    ///
    /// This signals an implementation bug, not a data problem.
    #[error(
        "Gram matrix inconsistency at ({row}, {col}): stored {stored:e}, recomputed {expected:e}"
    )]
    GramMismatch {
        row: usize,
        col: usize,
        stored: f64,
        expected: f64,
    },

    /// The inner QP could not be solved.
    #[error(transparent)]
    Qp(#[from] QpError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A dedicated thread pool could not be created.
    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
