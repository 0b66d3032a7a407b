//! Bundle-method configuration with builder pattern.
//!
//! [`BundleConfig`] is an immutable value handed to the solver at construction.
//! It composes nested parameter groups for the outer loop
//! ([`ConvergenceParams`]), the cutting-plane pool ([`PoolParams`]) and the
//! inner QP solver ([`QpParams`]), and uses `bon` for the builder with
//! validation at build time.
//!
//! All types are `serde`-(de)serializable with defaults for missing fields, so an
//! orchestrator can read them from whatever configuration source it uses.
//!
//! # Example
//!
//! ```
//! use bmrm::training::bundle::{BundleConfig, ConvergenceParams, EvictionPolicy, PoolParams};
//!
//! let config = BundleConfig::builder()
//!     .lambda(0.1)
//!     .convergence(ConvergenceParams { max_iterations: 200, ..Default::default() })
//!     .pool(PoolParams { max_pool_size: 50, eviction: EvictionPolicy::RemoveAllIdle, ..Default::default() })
//!     .build()
//!     .unwrap();
//! assert_eq!(config.pool.max_pool_size, 50);
//! ```

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::training::Verbosity;

// =============================================================================
// ConfigError
// =============================================================================

/// Errors that can occur during configuration validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Regularization constant must be positive and finite.
    #[error("lambda must be positive and finite, got {0}")]
    InvalidLambda(f64),

    /// A stopping tolerance is negative or NaN.
    #[error("{field} must be non-negative, got {value}")]
    InvalidTolerance { field: &'static str, value: f64 },

    /// An iteration cap is zero.
    #[error("{field} must be at least 1")]
    InvalidIterationCap { field: &'static str },

    /// The pool must hold at least two planes so aggregation has a victim.
    #[error("max_pool_size must be at least 2, got {0}")]
    InvalidPoolSize(usize),

    /// Planes must be allowed to idle for at least two iterations.
    #[error("idle_age must be at least 2, got {0}")]
    InvalidIdleAge(usize),

    /// QP scaling factor must be positive and finite.
    #[error("scale must be positive and finite, got {0}")]
    InvalidScale(f64),

    /// QP solver tolerance must be positive.
    #[error("QP tolerance must be positive, got {0}")]
    InvalidQpTolerance(f64),

    /// Nonmonotone line search needs a memory of at least one value.
    #[error("nonmonotone_memory must be at least 1, got {0}")]
    InvalidNonmonotoneMemory(usize),
}

// =============================================================================
// ConvergenceParams
// =============================================================================

/// Stopping rules of the outer bundle loop.
///
/// Training stops as soon as *any* of the four gap tests passes:
/// `gamma < gamma_tol`, `epsilon < epsilon_tol`, `gamma / J(w_t) < rel_gamma_tol`
/// or `epsilon / min J < rel_epsilon_tol`, where `gamma = J(w_t) - J_t(w_t)` and
/// `epsilon = min_{t' <= t} J(w_t') - J_t(w_t)`. Set a tolerance to `0.0` to
/// disable its test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceParams {
    /// Absolute tolerance on `gamma`. Default: 0.01.
    pub gamma_tol: f64,
    /// Absolute tolerance on `epsilon`. Default: 0.01.
    pub epsilon_tol: f64,
    /// Relative tolerance on `gamma`. Default: 0.1.
    pub rel_gamma_tol: f64,
    /// Relative tolerance on `epsilon`. Default: 0.1.
    pub rel_epsilon_tol: f64,
    /// Outer iteration budget. Exhausting it is a warning, not an error. Default: 4000.
    pub max_iterations: usize,
}

impl Default for ConvergenceParams {
    fn default() -> Self {
        Self {
            gamma_tol: 0.01,
            epsilon_tol: 0.01,
            rel_gamma_tol: 0.1,
            rel_epsilon_tol: 0.1,
            max_iterations: 4000,
        }
    }
}

impl ConvergenceParams {
    /// Validate the parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("gamma_tol", self.gamma_tol),
            ("epsilon_tol", self.epsilon_tol),
            ("rel_gamma_tol", self.rel_gamma_tol),
            ("rel_epsilon_tol", self.rel_epsilon_tol),
        ] {
            if !(value >= 0.0) {
                return Err(ConfigError::InvalidTolerance { field, value });
            }
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidIterationCap {
                field: "max_iterations",
            });
        }
        Ok(())
    }
}

// =============================================================================
// PoolParams
// =============================================================================

/// How idle cutting planes are dropped before a new plane is inserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Reuse the single laziest slot if it has been idle long enough,
    /// otherwise grow the pool by one.
    #[default]
    RemoveLaziestIdle,
    /// Drop every idle plane at once, compacting the pool, then grow by one.
    ///
    /// Keeps the pool smaller but usually costs more outer iterations.
    RemoveAllIdle,
}

/// Parameters of the cutting-plane pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolParams {
    /// Maximum number of planes kept. Beyond this, planes are aggregated. Default: 100.
    pub max_pool_size: usize,
    /// Iterations a plane may stay inactive (zero multiplier) before it may be
    /// evicted. Minimum 2. Default: 9.
    pub idle_age: usize,
    /// Eviction policy. Default: [`EvictionPolicy::RemoveLaziestIdle`].
    pub eviction: EvictionPolicy,
    /// Scaling factor applied to the dual QP. Default: 1.0.
    pub scale: f64,
}

impl Default for PoolParams {
    fn default() -> Self {
        Self {
            max_pool_size: 100,
            idle_age: 9,
            eviction: EvictionPolicy::default(),
            scale: 1.0,
        }
    }
}

impl PoolParams {
    /// Validate the parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pool_size < 2 {
            return Err(ConfigError::InvalidPoolSize(self.max_pool_size));
        }
        if self.idle_age < 2 {
            return Err(ConfigError::InvalidIdleAge(self.idle_age));
        }
        if !(self.scale > 0.0 && self.scale.is_finite()) {
            return Err(ConfigError::InvalidScale(self.scale));
        }
        Ok(())
    }
}

// =============================================================================
// QpParams
// =============================================================================

/// Parameters of the Dai-Fletcher projected-gradient QP solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QpParams {
    /// Initial KKT tolerance. The outer loop anneals it every iteration. Default: 1e-6.
    pub tolerance: f64,
    /// Floor for the annealed KKT tolerance. Below it the projected-gradient
    /// iterates are dominated by roundoff. Default: 1e-12.
    pub min_tolerance: f64,
    /// Secant iterations allowed per projection. Default: 200.
    pub max_projection_iterations: usize,
    /// Projected-gradient iterations allowed per solve. Default: 300000.
    pub max_iterations: usize,
    /// Number of recent objective values the nonmonotone line search may
    /// exceed before the reference value is reset. Default: 2.
    pub nonmonotone_memory: usize,
    /// `true` solves `a'x <= b` (non-negative slack), `false` solves `a'x = b`.
    /// Default: true.
    pub nonnegative_slack: bool,
}

impl Default for QpParams {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            min_tolerance: 1e-12,
            max_projection_iterations: 200,
            max_iterations: 300_000,
            nonmonotone_memory: 2,
            nonnegative_slack: true,
        }
    }
}

impl QpParams {
    /// Validate the parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for value in [self.tolerance, self.min_tolerance] {
            if !(value > 0.0) {
                return Err(ConfigError::InvalidQpTolerance(value));
            }
        }
        if self.max_projection_iterations == 0 {
            return Err(ConfigError::InvalidIterationCap {
                field: "max_projection_iterations",
            });
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidIterationCap {
                field: "qp.max_iterations",
            });
        }
        if self.nonmonotone_memory == 0 {
            return Err(ConfigError::InvalidNonmonotoneMemory(
                self.nonmonotone_memory,
            ));
        }
        Ok(())
    }
}

// =============================================================================
// BundleConfig
// =============================================================================

/// Complete configuration of a bundle-method run.
///
/// # Structure
///
/// - **Regularization**: `lambda` in `lambda/2 ||w||^2`
/// - **Convergence**: outer stopping rules via [`ConvergenceParams`]
/// - **Pool**: bundle memory via [`PoolParams`]
/// - **QP**: inner solver via [`QpParams`]
/// - **Diagnostics**: Gram-matrix verification and verbosity
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(
    derive(Clone, Debug),
    finish_fn(vis = "", name = __build_internal)
)]
#[serde(default)]
pub struct BundleConfig {
    /// Regularization constant. Default: 1.0.
    #[builder(default = 1.0)]
    pub lambda: f64,

    /// Outer-loop stopping rules.
    #[builder(default)]
    pub convergence: ConvergenceParams,

    /// Cutting-plane pool parameters.
    #[builder(default)]
    pub pool: PoolParams,

    /// Inner QP solver parameters.
    #[builder(default)]
    pub qp: QpParams,

    /// Recompute the Gram matrix after every insertion and fail on drift.
    ///
    /// Quadratic in the pool size per iteration. Default: on in debug builds.
    #[builder(default = cfg!(debug_assertions))]
    pub verify_gram: bool,

    /// Verbosity level. Default: `Warning`.
    #[builder(default)]
    pub verbosity: Verbosity,
}

/// Custom finishing function that validates the config.
impl<S: bundle_config_builder::IsComplete> BundleConfigBuilder<S> {
    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any parameter is invalid:
    /// - `lambda <= 0` or non-finite
    /// - negative tolerances or zero iteration caps
    /// - `max_pool_size < 2`, `idle_age < 2`, `scale <= 0`
    pub fn build(self) -> Result<BundleConfig, ConfigError> {
        let config = self.__build_internal();
        config.validate()?;
        Ok(config)
    }
}

impl BundleConfig {
    /// Validate the configuration.
    ///
    /// Called by the builder; call it again after deserializing or mutating fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.lambda > 0.0 && self.lambda.is_finite()) {
            return Err(ConfigError::InvalidLambda(self.lambda));
        }
        self.convergence.validate()?;
        self.pool.validate()?;
        self.qp.validate()?;
        Ok(())
    }
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self::builder().build().expect("default config is valid")
    }
}

// =============================================================================
// Tests
// =============================================================================
