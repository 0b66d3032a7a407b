//! Training infrastructure for the bundle method.
//!
//! ## Shared Infrastructure
//!
//! - [`LossGradientOracle`]: The risk function and its subgradients
//! - [`TrainingLogger`], [`Verbosity`]: Structured logging
//!
//! ## Solvers
//!
//! - [`bundle`]: Bundle method (BMRM) with a bounded cutting-plane pool and
//!   the Dai-Fletcher QP solver
//! - [`train_independent`]: Train many independent problems, optionally in parallel

mod batch;
pub mod bundle;
mod logger;
mod oracle;

pub use batch::{train_independent, train_independent_threaded, Problem};
pub use logger::{TrainingLogger, Verbosity};
pub use oracle::LossGradientOracle;

// Re-export the bundle entry points at the training level
pub use bundle::{optimize, BundleConfig, BundleError, BundleSolver, TrainSummary};
