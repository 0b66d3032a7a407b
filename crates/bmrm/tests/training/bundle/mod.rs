//! Bundle-method integration tests.

mod pool;
mod qp;

use bmrm::training::bundle::{BundleConfig, ConvergenceParams, EvictionPolicy, PoolParams};
use bmrm::Verbosity;

/// Absolute-gap convergence only, with relative tests disabled.
pub fn absolute_convergence(tol: f64, max_iterations: usize) -> ConvergenceParams {
    ConvergenceParams {
        gamma_tol: tol,
        epsilon_tol: tol,
        rel_gamma_tol: 0.0,
        rel_epsilon_tol: 0.0,
        max_iterations,
    }
}

pub fn config(lambda: f64, convergence: ConvergenceParams) -> BundleConfig {
    BundleConfig::builder()
        .lambda(lambda)
        .convergence(convergence)
        .verify_gram(true)
        .verbosity(Verbosity::Silent)
        .build()
        .expect("valid config")
}

pub fn pool_config(
    lambda: f64,
    convergence: ConvergenceParams,
    max_pool_size: usize,
    idle_age: usize,
    eviction: EvictionPolicy,
) -> BundleConfig {
    BundleConfig::builder()
        .lambda(lambda)
        .convergence(convergence)
        .pool(PoolParams {
            max_pool_size,
            idle_age,
            eviction,
            ..Default::default()
        })
        .verify_gram(true)
        .verbosity(Verbosity::Silent)
        .build()
        .expect("valid config")
}
