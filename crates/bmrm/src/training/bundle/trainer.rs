//! Outer loop of the bundle method for regularized risk minimization.
//!
//! Minimizes `J(w) = R(w) + lambda/2 ||w||^2` for a convex, non-negative risk
//! `R` that is only accessible through a [`LossGradientOracle`]. Every outer
//! iteration queries the oracle at the current `w_t`, adds the cutting plane
//! `<v - w_t, g_t> + R(w_t)` to the bundle and minimizes the piecewise-linear
//! model `J_t(v) = max_i(<v, g_i> + offset_i) + lambda/2 ||v||^2`. The model
//! value at its minimizer is a lower bound on `min J`, which drives the stopping
//! rules.

use std::fmt;

use ndarray::{Array1, ArrayView1, ArrayViewMut1};

use crate::training::{LossGradientOracle, TrainingLogger, Verbosity};

use super::config::{BundleConfig, ConvergenceParams};
use super::error::BundleError;
use super::pool::CuttingPlanePool;

// =============================================================================
// InnerSolver
// =============================================================================

/// Solver for the bundle subproblem.
///
/// Owns the cutting planes. [`CuttingPlanePool`] is the standard implementation.
pub trait InnerSolver {
    /// Tolerance for subsequent subproblem solves.
    fn set_tolerance(&mut self, tolerance: f64);

    /// Add the plane of `(gradient, loss)` taken at `w`, re-solve, and
    /// overwrite `w` with the new minimizer of the model.
    ///
    /// Returns the model value at the new `w`, a lower bound on the objective.
    fn solve(
        &mut self,
        w: ArrayViewMut1<'_, f64>,
        gradient: ArrayView1<'_, f64>,
        loss: f64,
    ) -> Result<f64, BundleError>;

    /// Value of the regularizer at `w`.
    fn regularizer_value(&self, w: ArrayView1<'_, f64>) -> f64;

    /// Forget every cutting plane.
    fn reset(&mut self);

    /// Whether the last subproblem was solved to tolerance.
    ///
    /// `false` means the returned lower bound comes from an iterate that stopped
    /// at an iteration cap.
    fn subproblem_converged(&self) -> bool {
        true
    }
}

// =============================================================================
// Training summary
// =============================================================================

/// Which rule ended training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// `gamma < gamma_tol`
    Gamma,
    /// `epsilon < epsilon_tol`
    Epsilon,
    /// `gamma / J(w_t) < rel_gamma_tol`
    RelativeGamma,
    /// `epsilon / min J < rel_epsilon_tol`
    RelativeEpsilon,
    /// Iteration budget exhausted before any gap test passed.
    MaxIterations,
}

impl StopReason {
    #[inline]
    pub fn converged(self) -> bool {
        !matches!(self, StopReason::MaxIterations)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopReason::Gamma => "gamma",
            StopReason::Epsilon => "epsilon",
            StopReason::RelativeGamma => "relative gamma",
            StopReason::RelativeEpsilon => "relative epsilon",
            StopReason::MaxIterations => "max iterations",
        };
        f.write_str(name)
    }
}

/// Record of one call to [`BundleSolver::train`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainSummary {
    /// Outer iterations, i.e. oracle calls.
    pub iterations: usize,
    pub stop_reason: StopReason,
    /// Loss at the final oracle call.
    pub loss: f64,
    /// Objective at the returned weights.
    pub best_objective: f64,
    /// `min J - J_t(w_t)` at the last iteration.
    pub epsilon: f64,
    /// `J(w_t) - J_t(w_t)` at the last iteration.
    pub gamma: f64,
    /// Lower bound returned by the inner solver after each subproblem.
    pub lower_bounds: Vec<f64>,
}

impl TrainSummary {
    #[inline]
    pub fn converged(&self) -> bool {
        self.stop_reason.converged()
    }
}

/// Statistics of one outer iteration, for logging.
struct IterationStats {
    iteration: usize,
    loss: f64,
    objective: f64,
    lower_bound: f64,
    epsilon: f64,
    gamma: f64,
}

impl fmt::Display for IterationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] loss={:.6} obj={:.6} lb={:.6} eps={:.3e} gamma={:.3e}",
            self.iteration, self.loss, self.objective, self.lower_bound, self.epsilon, self.gamma
        )
    }
}

/// First gap test that passes, in the order gamma, epsilon, relative gamma, relative epsilon.
fn gap_test(params: &ConvergenceParams, gamma: f64, epsilon: f64, objective: f64, min_objective: f64) -> Option<StopReason> {
    if gamma < params.gamma_tol {
        Some(StopReason::Gamma)
    } else if epsilon < params.epsilon_tol {
        Some(StopReason::Epsilon)
    } else if gamma / objective < params.rel_gamma_tol {
        Some(StopReason::RelativeGamma)
    } else if epsilon / min_objective < params.rel_epsilon_tol {
        Some(StopReason::RelativeEpsilon)
    } else {
        None
    }
}

// =============================================================================
// BundleSolver
// =============================================================================

/// Bundle-method trainer.
///
/// # Example
///
/// ```
/// use bmrm::training::bundle::BundleSolver;
/// use bmrm::testing::Quadratic;
/// use ndarray::Array1;
///
/// // J(w) = (w - 3)^2 + 0.5 w^2 is minimized at w = 2.
/// let mut solver = BundleSolver::new(Quadratic::new(vec![3.0]), 1.0, 1).unwrap();
/// solver.set_convergence(1e-4, 1e-4, 0.0, 0.0, 200).unwrap();
///
/// let mut w = Array1::zeros(1);
/// solver.train(&mut w).unwrap();
/// assert!((w[0] - 2.0).abs() < 0.05);
/// assert!(solver.summary().unwrap().converged());
/// ```
#[derive(Debug)]
pub struct BundleSolver<O, S = CuttingPlanePool> {
    oracle: O,
    inner: S,
    dim_w: usize,
    config: BundleConfig,
    summary: Option<TrainSummary>,
}

impl<O: LossGradientOracle> BundleSolver<O> {
    /// Create a solver with default configuration.
    ///
    /// # Errors
    ///
    /// [`BundleError::InvalidLambda`] unless `lambda` is positive and finite.
    pub fn new(oracle: O, lambda: f64, dim_w: usize) -> Result<Self, BundleError> {
        if !(lambda > 0.0 && lambda.is_finite()) {
            return Err(BundleError::InvalidLambda(lambda));
        }
        let config = BundleConfig::builder().lambda(lambda).build()?;
        Self::with_config(oracle, dim_w, config)
    }

    /// Create a solver from a full configuration.
    pub fn with_config(oracle: O, dim_w: usize, config: BundleConfig) -> Result<Self, BundleError> {
        let inner = CuttingPlanePool::new(dim_w, &config)?;
        Self::with_inner_solver(oracle, inner, dim_w, config)
    }
}

impl<O: LossGradientOracle, S: InnerSolver> BundleSolver<O, S> {
    /// Create a solver around a custom inner solver.
    ///
    /// Only the convergence and verbosity settings of `config` are used here;
    /// `inner` is expected to have been built for the same `lambda`.
    pub fn with_inner_solver(oracle: O, inner: S, dim_w: usize, config: BundleConfig) -> Result<Self, BundleError> {
        config.validate()?;
        Ok(Self {
            oracle,
            inner,
            dim_w,
            config,
            summary: None,
        })
    }

    /// Replace the stopping rules.
    ///
    /// A tolerance of `0.0` disables its test.
    pub fn set_convergence(
        &mut self,
        gamma_tol: f64,
        epsilon_tol: f64,
        rel_gamma_tol: f64,
        rel_epsilon_tol: f64,
        max_iterations: usize,
    ) -> Result<(), BundleError> {
        let convergence = ConvergenceParams {
            gamma_tol,
            epsilon_tol,
            rel_gamma_tol,
            rel_epsilon_tol,
            max_iterations,
        };
        convergence.validate()?;
        self.config.convergence = convergence;
        Ok(())
    }

    #[inline]
    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    #[inline]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    #[inline]
    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    #[inline]
    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    /// Summary of the last completed [`train`](Self::train) call.
    #[inline]
    pub fn summary(&self) -> Option<&TrainSummary> {
        self.summary.as_ref()
    }

    /// Minimize the regularized risk starting from `w`.
    ///
    /// On return `w` holds the best iterate seen from the second iteration on
    /// (or the starting point if training stopped after one iteration). Returns
    /// the loss of the final oracle call. The bundle is cleared at the start of
    /// every call, so the oracle may change between calls.
    ///
    /// Running out of iterations is not an error: a warning is logged and
    /// [`TrainSummary::stop_reason`] is [`StopReason::MaxIterations`].
    ///
    /// On error `w` is reset the same way, to the best iterate evaluated before
    /// the failure, and no summary is recorded.
    ///
    /// # Errors
    ///
    /// - [`BundleError::DimensionMismatch`] if `w` has the wrong length
    /// - [`BundleError::InvalidLoss`] if the oracle returns a negative or non-finite loss
    /// - [`BundleError::Qp`] if a subproblem is infeasible
    /// - [`BundleError::GramMismatch`] from the pool's verification mode
    pub fn train(&mut self, w: &mut Array1<f64>) -> Result<f64, BundleError> {
        if w.len() != self.dim_w {
            return Err(BundleError::DimensionMismatch {
                expected: self.dim_w,
                actual: w.len(),
            });
        }
        self.summary = None;
        self.inner.reset();

        let params = self.config.convergence.clone();
        let mut logger = TrainingLogger::new(self.config.verbosity);
        if logger.enabled(Verbosity::Info) {
            logger.info(&format!(
                "gamma_tol={} epsilon_tol={} rel_gamma_tol={} rel_epsilon_tol={}",
                params.gamma_tol, params.epsilon_tol, params.rel_gamma_tol, params.rel_epsilon_tol
            ));
        }
        logger.start_training(params.max_iterations);

        let mut gradient = Array1::zeros(self.dim_w);
        let mut w_best = w.clone();
        let mut best_objective = f64::INFINITY;
        let mut min_objective = f64::INFINITY;
        let mut lower_bound = f64::NEG_INFINITY;
        let mut epsilon = 0.0;
        let mut inner_tolerance = 1.0;
        let mut lower_bounds = Vec::new();
        let mut iteration = 0;

        let (stop_reason, loss, gamma) = loop {
            iteration += 1;

            let loss = self
                .oracle
                .compute_loss_gradient(w.view(), gradient.view_mut());
            if !(loss >= 0.0 && loss.is_finite()) {
                w.assign(&w_best);
                return Err(BundleError::InvalidLoss(loss));
            }
            let objective = loss + self.inner.regularizer_value(w.view());
            min_objective = min_objective.min(objective);

            // The starting point only counts as best if nothing else was evaluated.
            if iteration == 1 || iteration == 2 || objective < best_objective {
                best_objective = objective;
                if iteration >= 2 {
                    w_best.assign(w);
                }
            }

            let prev_epsilon = epsilon;
            epsilon = min_objective - lower_bound;
            let gamma = objective - lower_bound;

            logger.log_iteration(&IterationStats {
                iteration,
                loss,
                objective,
                lower_bound,
                epsilon,
                gamma,
            });

            if iteration >= 2 {
                if let Some(reason) = gap_test(&params, gamma, epsilon, objective, min_objective) {
                    if logger.enabled(Verbosity::Info) {
                        logger.info(&format!(
                            "Converged on {} criterion: epsilon={:.3e} gamma={:.3e}",
                            reason, epsilon, gamma
                        ));
                    }
                    break (reason, loss, gamma);
                }
            }
            if iteration >= params.max_iterations {
                if logger.enabled(Verbosity::Warning) {
                    logger.warn(&format!(
                        "Bundle method exceeded maximum number of iterations ({})",
                        params.max_iterations
                    ));
                }
                break (StopReason::MaxIterations, loss, gamma);
            }

            inner_tolerance = f64::min(inner_tolerance, epsilon);
            if prev_epsilon < epsilon {
                inner_tolerance *= 0.2;
            }
            self.inner.set_tolerance(inner_tolerance * 0.5);

            lower_bound = match self.inner.solve(w.view_mut(), gradient.view(), loss) {
                Ok(lower_bound) => lower_bound,
                Err(err) => {
                    w.assign(&w_best);
                    return Err(err);
                }
            };
            lower_bounds.push(lower_bound);
            if !self.inner.subproblem_converged() && logger.enabled(Verbosity::Warning) {
                logger.warn(&format!(
                    "Subproblem at iteration {} stopped at its iteration cap; lower bound {:.6} may be loose",
                    iteration, lower_bound
                ));
            }
        };

        w.assign(&w_best);
        logger.finish_training(iteration);

        self.summary = Some(TrainSummary {
            iterations: iteration,
            stop_reason,
            loss,
            best_objective,
            epsilon,
            gamma,
            lower_bounds,
        });
        Ok(loss)
    }
}

/// Train once from an immutable configuration.
///
/// `lambda` overrides `config.lambda`.
///
/// # Example
///
/// ```
/// use bmrm::training::bundle::{optimize, BundleConfig};
/// use bmrm::testing::AbsoluteDeviation;
/// use ndarray::Array1;
///
/// let mut w = Array1::zeros(2);
/// let oracle = AbsoluteDeviation::new(vec![1.0, -1.0]);
/// let loss = optimize(&mut w, oracle, 0.1, &BundleConfig::default()).unwrap();
/// assert!(loss >= 0.0);
/// ```
pub fn optimize<O: LossGradientOracle>(
    w: &mut Array1<f64>,
    oracle: O,
    lambda: f64,
    config: &BundleConfig,
) -> Result<f64, BundleError> {
    if !(lambda > 0.0 && lambda.is_finite()) {
        return Err(BundleError::InvalidLambda(lambda));
    }
    let config = BundleConfig {
        lambda,
        ..config.clone()
    };
    let mut solver = BundleSolver::with_config(oracle, w.len(), config)?;
    solver.train(w)
}

// =============================================================================
// Tests
// =============================================================================
