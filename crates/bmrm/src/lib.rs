//! bmrm: Bundle methods for regularized risk minimization.
//!
//! Minimizes `J(w) = R(w) + lambda/2 ||w||^2` where the convex, non-negative
//! risk `R` is only available through a loss/subgradient oracle. Each outer
//! iteration adds a cutting plane to a bounded bundle and solves the dual of
//! the resulting piecewise-quadratic model with a Dai-Fletcher
//! projected-gradient QP solver.
//!
//! # Key Types
//!
//! - [`BundleSolver`] - Outer loop with gap-based stopping rules
//! - [`BundleConfig`] - Configuration builder
//! - [`CuttingPlanePool`] - Bounded cutting-plane bundle with aggregation
//! - [`LossGradientOracle`] - The risk function seen by the solver
//!
//! # Training
//!
//! Use `BundleConfig::builder()` to configure, then [`BundleSolver::train`],
//! or [`optimize`] for a one-shot call. See the [`training::bundle`] module for
//! details.

// Re-export approx traits for users who want to compare weight vectors
pub use approx;

pub mod testing;
pub mod training;
pub mod utils;

// =============================================================================
// Convenience Re-exports
// =============================================================================

// Solver and configuration (most users want these)
pub use training::bundle::{
    optimize, BundleConfig, BundleError, BundleSolver, CuttingPlanePool, StopReason, TrainSummary,
};

// The oracle contract
pub use training::{LossGradientOracle, Verbosity};

// Shared utilities
pub use utils::{run_with_threads, Parallelism};
