//! Bundle method for regularized risk minimization.
//!
//! Minimizes `J(w) = R(w) + lambda/2 ||w||^2` for a convex, non-negative risk
//! `R` given only through a [`LossGradientOracle`](crate::training::LossGradientOracle).
//!
//! # Components
//!
//! | Type | Role |
//! |------|------|
//! | [`BundleSolver`] | Outer loop: oracle calls, gap bookkeeping, stopping rules |
//! | [`CuttingPlanePool`] | Bounded bundle of cutting planes and the dual QP built from it |
//! | [`DaiFletcherQp`] | Projected-gradient solver for the dual QP |
//! | [`FeasibleSet`] | Projection onto a box with one linear constraint |
//!
//! The outer loop talks to the pool through the [`InnerSolver`] trait, so a
//! different subproblem solver can be plugged in with
//! [`BundleSolver::with_inner_solver`].
//!
//! # Example
//!
//! ```
//! use bmrm::training::bundle::{BundleConfig, BundleSolver, ConvergenceParams};
//! use bmrm::testing::{synthetic_classification, classification_accuracy, HingeLoss};
//!
//! let (x, y) = synthetic_classification(100, 4, 42, 0.0);
//! let config = BundleConfig::builder()
//!     .lambda(0.1)
//!     .convergence(ConvergenceParams {
//!         gamma_tol: 1e-3,
//!         epsilon_tol: 1e-3,
//!         rel_gamma_tol: 0.0,
//!         rel_epsilon_tol: 0.0,
//!         max_iterations: 200,
//!     })
//!     .build()
//!     .unwrap();
//!
//! let mut solver = BundleSolver::with_config(HingeLoss::new(x.clone(), y.clone()), 4, config).unwrap();
//! let mut w = ndarray::Array1::zeros(4);
//! solver.train(&mut w).unwrap();
//! assert!(classification_accuracy(&x, &y, &w) > 0.8);
//! ```

mod config;
mod error;
mod pool;
mod projection;
mod qp;
mod trainer;

pub use config::{BundleConfig, ConfigError, ConvergenceParams, EvictionPolicy, PoolParams, QpParams};
pub use error::{BundleError, QpError};
pub use pool::{CuttingPlane, CuttingPlanePool};
pub use projection::{FeasibleSet, Projection};
pub use qp::{BoxQp, DaiFletcherQp, QpOutcome};
pub use trainer::{optimize, BundleSolver, InnerSolver, StopReason, TrainSummary};
