//! Training many independent problems at once.
//!
//! A single bundle-method run is sequential, so the only parallelism is across
//! problems: each [`Problem`] gets its own solver and bundle.

use ndarray::{Array1, ArrayView1, ArrayViewMut1};

use super::bundle::{BundleConfig, BundleError, BundleSolver, TrainSummary};
use super::LossGradientOracle;
use crate::utils::{run_with_threads, Parallelism};

/// One independent problem: an oracle and its weight vector.
///
/// `weights` is the starting point on input and the solution on output.
#[derive(Debug, Clone)]
pub struct Problem<O> {
    pub oracle: O,
    pub weights: Array1<f64>,
    summary: Option<TrainSummary>,
}

impl<O> Problem<O> {
    pub fn new(oracle: O, weights: Array1<f64>) -> Self {
        Self {
            oracle,
            weights,
            summary: None,
        }
    }

    /// Summary of the last training run on this problem.
    pub fn summary(&self) -> Option<&TrainSummary> {
        self.summary.as_ref()
    }
}

/// Borrowed oracle, so a solver can run without taking ownership.
struct OracleRef<'a, O>(&'a mut O);

impl<O: LossGradientOracle> LossGradientOracle for OracleRef<'_, O> {
    #[inline]
    fn compute_loss_gradient(&mut self, w: ArrayView1<'_, f64>, gradient: ArrayViewMut1<'_, f64>) -> f64 {
        self.0.compute_loss_gradient(w, gradient)
    }
}

fn train_one<O: LossGradientOracle>(config: &BundleConfig, problem: &mut Problem<O>) -> Result<f64, BundleError> {
    let dim_w = problem.weights.len();
    let mut solver = BundleSolver::with_config(OracleRef(&mut problem.oracle), dim_w, config.clone())?;
    let loss = solver.train(&mut problem.weights)?;
    problem.summary = solver.summary().cloned();
    Ok(loss)
}

/// Train every problem with the same configuration.
///
/// Returns the final loss of each problem, in order. Problems are independent:
/// a failing problem does not stop the others, but the first error (in problem
/// order) is returned.
///
/// # Example
///
/// ```
/// use bmrm::testing::Quadratic;
/// use bmrm::training::{train_independent, Problem};
/// use bmrm::training::bundle::BundleConfig;
/// use bmrm::Parallelism;
/// use ndarray::Array1;
///
/// let mut problems: Vec<_> = [1.0, 2.0, 3.0]
///     .into_iter()
///     .map(|t| Problem::new(Quadratic::new(vec![t]), Array1::zeros(1)))
///     .collect();
/// let losses = train_independent(&BundleConfig::default(), &mut problems, Parallelism::Parallel).unwrap();
/// assert_eq!(losses.len(), 3);
/// ```
pub fn train_independent<O>(
    config: &BundleConfig,
    problems: &mut [Problem<O>],
    parallelism: Parallelism,
) -> Result<Vec<f64>, BundleError>
where
    O: LossGradientOracle + Send,
{
    config.validate()?;
    parallelism
        .maybe_par_map(problems, |problem| train_one(config, problem))
        .into_iter()
        .collect()
}

/// [`train_independent`] inside a thread pool of `n_threads` threads.
///
/// See [`run_with_threads`] for the thread count semantics.
pub fn train_independent_threaded<O>(
    config: &BundleConfig,
    problems: &mut [Problem<O>],
    n_threads: usize,
) -> Result<Vec<f64>, BundleError>
where
    O: LossGradientOracle + Send,
{
    run_with_threads(n_threads, |parallelism| train_independent(config, problems, parallelism))?
}
