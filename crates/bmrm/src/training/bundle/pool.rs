//! Bounded pool of cutting planes and the dual QP built from it.
//!
//! Every outer iteration of the bundle method contributes one cutting plane
//! `R(v) >= <v, g_t> + offset_t`. The pool keeps at most `max_pool_size` of
//! them in fixed slots together with the derived dual QP data:
//!
//! - `Q[i][j] = scale / lambda * <g_i, g_j>` (Gram matrix of the slot gradients)
//! - `f[i] = -offset_i * scale`
//! - `x[i]`, the dual multiplier of slot `i`, with `0 <= x[i] <= 1`, `sum x <= 1`
//!
//! Only the row and column of the slot that changed are recomputed on insert.
//! Planes whose multiplier stays zero for `idle_age` iterations are evicted
//! according to [`EvictionPolicy`]; once the pool is full, the laziest plane is
//! merged into a single aggregated plane instead.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, Axis};

use super::config::{BundleConfig, EvictionPolicy, PoolParams};
use super::error::BundleError;
use super::qp::{BoxQp, DaiFletcherQp, QpOutcome};
use super::trainer::InnerSolver;

/// Multipliers at or below this are treated as zero.
const ZERO_EPS: f64 = 1e-16;
/// Absolute tolerance of the Gram-matrix consistency check.
const GRAM_TOL: f64 = 1e-15;

// =============================================================================
// CuttingPlane
// =============================================================================

/// One linearization of the risk: `R(v) >= <v, gradient> + offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct CuttingPlane {
    pub gradient: Array1<f64>,
    /// `R(w_t) - <w_t, gradient>`.
    pub offset: f64,
    /// Pool iteration at which the plane was inserted.
    pub entered: usize,
    /// Last pool iteration at which the plane had a positive multiplier.
    pub last_active: usize,
    /// Whether this slot holds the aggregate of evicted planes.
    ///
    /// The aggregated plane is never idle and never chosen for eviction.
    pub aggregated: bool,
}

/// Where the next plane goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Reuse(usize),
    Append,
}

// =============================================================================
// CuttingPlanePool
// =============================================================================

/// Cutting-plane bundle with its dual QP.
///
/// # Example
///
/// ```
/// use bmrm::training::bundle::{BundleConfig, CuttingPlanePool};
/// use ndarray::{array, Array1};
///
/// let config = BundleConfig::builder().lambda(1.0).build().unwrap();
/// let mut pool = CuttingPlanePool::new(1, &config).unwrap();
///
/// // Plane of (w - 3)^2 at w = 0: gradient -6, offset 9.
/// pool.update(array![-6.0].view(), 9.0).unwrap();
/// pool.solve_qp().unwrap();
///
/// // Minimizer of 0.5 w^2 + max(0, 9 - 6w).
/// let mut w = Array1::zeros(1);
/// let lower_bound = pool.get_solution(w.view_mut());
/// assert!((w[0] - 1.5).abs() < 1e-6);
/// assert!((lower_bound - 1.125).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct CuttingPlanePool {
    lambda: f64,
    dim_w: usize,
    params: PoolParams,
    verify_gram: bool,

    /// Occupied slots, in slot order.
    planes: Vec<CuttingPlane>,
    /// Gram matrix, `capacity x capacity`. Only the leading `len x len` block is live.
    hessian: Array2<f64>,
    linear: Array1<f64>,
    x: Array1<f64>,
    constraint: Array1<f64>,
    lower: Array1<f64>,
    upper: Array1<f64>,

    iteration: usize,
    qp: DaiFletcherQp,
    last_outcome: Option<QpOutcome>,
}

impl CuttingPlanePool {
    /// Create an empty pool for weight vectors of length `dim_w`.
    ///
    /// # Errors
    ///
    /// [`BundleError::Config`] if `config` does not validate.
    pub fn new(dim_w: usize, config: &BundleConfig) -> Result<Self, BundleError> {
        config.validate()?;
        let capacity = config.pool.max_pool_size;
        Ok(Self {
            lambda: config.lambda,
            dim_w,
            params: config.pool.clone(),
            verify_gram: config.verify_gram,
            planes: Vec::with_capacity(capacity),
            hessian: Array2::zeros((capacity, capacity)),
            linear: Array1::zeros(capacity),
            x: Array1::zeros(capacity),
            constraint: Array1::ones(capacity),
            lower: Array1::zeros(capacity),
            upper: Array1::ones(capacity),
            iteration: 0,
            qp: DaiFletcherQp::new(config.qp.clone()),
            last_outcome: None,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of occupied slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.planes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    /// Maximum number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.params.max_pool_size
    }

    /// Number of `update` calls since construction or the last `reset`.
    #[inline]
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    #[inline]
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    #[inline]
    pub fn planes(&self) -> &[CuttingPlane] {
        &self.planes
    }

    /// Slot of the aggregated plane, if one exists.
    pub fn aggregated_slot(&self) -> Option<usize> {
        self.planes.iter().position(|p| p.aggregated)
    }

    /// Live block of the dual Hessian.
    pub fn hessian(&self) -> ArrayView2<'_, f64> {
        let n = self.len();
        self.hessian.slice(s![..n, ..n])
    }

    /// Live part of the dual linear term.
    pub fn linear(&self) -> ArrayView1<'_, f64> {
        self.linear.slice(s![..self.len()])
    }

    /// Dual multipliers of the occupied slots.
    pub fn multipliers(&self) -> ArrayView1<'_, f64> {
        self.x.slice(s![..self.len()])
    }

    /// Statistics of the most recent QP solve.
    #[inline]
    pub fn last_outcome(&self) -> Option<&QpOutcome> {
        self.last_outcome.as_ref()
    }

    /// Current tolerance of the QP solver.
    #[inline]
    pub fn qp_tolerance(&self) -> f64 {
        self.qp.tolerance()
    }

    // =========================================================================
    // Bundle operations
    // =========================================================================

    /// Insert the plane `(gradient, offset)` and return the slot it landed in.
    ///
    /// The occupied count grows by at most one. With verification enabled the
    /// whole Gram matrix is recomputed afterwards.
    ///
    /// # Errors
    ///
    /// - [`BundleError::DimensionMismatch`] if `gradient` has the wrong length
    /// - [`BundleError::GramMismatch`] if verification finds a drifted entry
    pub fn update(&mut self, gradient: ArrayView1<'_, f64>, offset: f64) -> Result<usize, BundleError> {
        if gradient.len() != self.dim_w {
            return Err(BundleError::DimensionMismatch {
                expected: self.dim_w,
                actual: gradient.len(),
            });
        }
        self.iteration += 1;

        let slot = match self.params.eviction {
            EvictionPolicy::RemoveLaziestIdle => self.laziest_idle_slot(),
            EvictionPolicy::RemoveAllIdle => {
                self.remove_all_idle();
                Slot::Append
            }
        };

        let plane = CuttingPlane {
            gradient: gradient.to_owned(),
            offset,
            entered: self.iteration,
            last_active: self.iteration,
            aggregated: false,
        };
        let idx = match slot {
            Slot::Reuse(idx) => {
                self.planes[idx] = plane;
                idx
            }
            Slot::Append if self.len() < self.capacity() => {
                self.planes.push(plane);
                self.len() - 1
            }
            Slot::Append => {
                let victim = self.aggregate();
                self.planes[victim] = plane;
                victim
            }
        };

        self.refresh_gram(idx, None);
        self.x[idx] = 0.0;
        self.linear[idx] = -offset * self.params.scale;

        if self.verify_gram {
            self.check_gram()?;
        }
        Ok(idx)
    }

    /// Solve the dual QP over the occupied slots, warm-started from the current multipliers.
    pub fn solve_qp(&mut self) -> Result<QpOutcome, BundleError> {
        let n = self.len();
        let qp = BoxQp {
            hessian: self.hessian.slice(s![..n, ..n]),
            linear: self.linear.slice(s![..n]),
            constraint: self.constraint.slice(s![..n]),
            rhs: 1.0,
            lower: self.lower.slice(s![..n]),
            upper: self.upper.slice(s![..n]),
        };
        let outcome = self.qp.solve(&qp, self.x.slice_mut(s![..n]))?;
        if !outcome.converged {
            log::debug!(
                "QP solver stopped after {} iterations without meeting the KKT test",
                outcome.iterations
            );
        }
        self.last_outcome = Some(outcome);
        Ok(outcome)
    }

    /// Write the primal solution `w = -(1/lambda) sum_i x_i g_i` and return the
    /// lower bound `-(0.5 x'Qx + f'x) / scale`.
    ///
    /// Slots with a positive multiplier are marked active at the current iteration.
    pub fn get_solution(&mut self, mut w: ArrayViewMut1<'_, f64>) -> f64 {
        let n = self.len();
        let x = self.x.slice(s![..n]);

        let mut quadratic = 0.0;
        let mut linear = 0.0;
        for i in (0..n).filter(|&i| x[i] > ZERO_EPS) {
            let row: f64 = (0..n)
                .filter(|&j| x[j] > ZERO_EPS)
                .map(|j| self.hessian[[i, j]] * x[j])
                .sum();
            quadratic += x[i] * row;
            linear += self.linear[i] * x[i];
        }

        w.fill(0.0);
        for (i, plane) in self.planes.iter_mut().enumerate() {
            if x[i] > ZERO_EPS {
                w.scaled_add(-x[i], &plane.gradient);
                if !plane.aggregated {
                    plane.last_active = self.iteration;
                }
            }
        }
        w *= 1.0 / self.lambda;

        (-0.5 * quadratic - linear) / self.params.scale
    }

    /// `0.5 * lambda * ||w||^2`.
    #[inline]
    pub fn regularizer_value(&self, w: ArrayView1<'_, f64>) -> f64 {
        0.5 * self.lambda * w.dot(&w)
    }

    /// Drop every plane and zero all derived state.
    pub fn reset(&mut self) {
        self.planes.clear();
        self.hessian.fill(0.0);
        self.linear.fill(0.0);
        self.x.fill(0.0);
        self.iteration = 0;
        self.last_outcome = None;
        let tolerance = self.qp.params().tolerance;
        self.qp.set_tolerance(tolerance);
    }

    /// Recompute the Gram matrix from the stored gradients and compare.
    ///
    /// # Errors
    ///
    /// [`BundleError::GramMismatch`] for the first entry off by more than `1e-15`.
    pub fn check_gram(&self) -> Result<(), BundleError> {
        let n = self.len();
        for i in 0..n {
            for j in i..n {
                let expected = self.gram_entry(i, j);
                for (row, col) in [(i, j), (j, i)] {
                    let stored = self.hessian[[row, col]];
                    if (stored - expected).abs() > GRAM_TOL {
                        return Err(BundleError::GramMismatch {
                            row,
                            col,
                            stored,
                            expected,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Eviction and aggregation
    // =========================================================================

    #[inline]
    fn gram_entry(&self, i: usize, j: usize) -> f64 {
        self.planes[i].gradient.dot(&self.planes[j].gradient) * self.params.scale / self.lambda
    }

    /// Recompute row and column `idx` of the Gram matrix, optionally skipping one slot.
    fn refresh_gram(&mut self, idx: usize, skip: Option<usize>) {
        for i in 0..self.len() {
            if Some(i) == skip {
                continue;
            }
            let value = self.gram_entry(idx, i);
            self.hessian[[idx, i]] = value;
            self.hessian[[i, idx]] = value;
        }
    }

    #[inline]
    fn is_idle(&self, plane: &CuttingPlane) -> bool {
        !plane.aggregated && self.iteration.saturating_sub(plane.last_active) >= self.params.idle_age
    }

    /// Reuse the least recently active slot if it has idled long enough.
    fn laziest_idle_slot(&self) -> Slot {
        let laziest = self
            .planes
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.aggregated)
            .min_by_key(|(_, p)| p.last_active);
        match laziest {
            Some((idx, plane)) if self.is_idle(plane) => Slot::Reuse(idx),
            _ => Slot::Append,
        }
    }

    /// Evict every idle plane. Survivors keep their relative order.
    fn remove_all_idle(&mut self) {
        let n = self.len();
        let keep: Vec<usize> = (0..n).filter(|&i| !self.is_idle(&self.planes[i])).collect();
        let k = keep.len();
        if k == n {
            return;
        }

        let hessian = self.hessian.select(Axis(0), &keep).select(Axis(1), &keep);
        let linear = self.linear.select(Axis(0), &keep);
        let x = self.x.select(Axis(0), &keep);

        self.hessian.slice_mut(s![..n, ..n]).fill(0.0);
        self.hessian.slice_mut(s![..k, ..k]).assign(&hessian);
        self.linear.slice_mut(s![..n]).fill(0.0);
        self.linear.slice_mut(s![..k]).assign(&linear);
        self.x.slice_mut(s![..n]).fill(0.0);
        self.x.slice_mut(s![..k]).assign(&x);

        let mut slot = 0;
        self.planes.retain(|_| {
            let kept = keep.binary_search(&slot).is_ok();
            slot += 1;
            kept
        });

        log::debug!(
            "Removed {} idle cutting planes at iteration {}",
            n - k,
            self.iteration
        );
    }

    /// Fold one plane into the aggregated plane and return the freed slot.
    ///
    /// Requires a full pool of at least two slots.
    fn aggregate(&mut self) -> usize {
        let n = self.len();
        debug_assert!(n >= 2);

        let agg = match self.aggregated_slot() {
            Some(idx) => idx,
            None => {
                let idx = self
                    .planes
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, p)| p.entered)
                    .map_or(0, |(i, _)| i);
                self.planes[idx].aggregated = true;
                idx
            }
        };

        // Earliest, laziest and most recently active among the other slots.
        let mut others = (0..n).filter(|&i| i != agg);
        let first = others.next().unwrap_or(0);
        let (mut earliest, mut laziest, mut busiest) = (first, first, first);
        for i in others {
            let p = &self.planes[i];
            if p.entered < self.planes[earliest].entered {
                earliest = i;
            }
            if p.last_active < self.planes[laziest].last_active {
                laziest = i;
            }
            if p.last_active > self.planes[busiest].last_active {
                busiest = i;
            }
        }
        let victim = if laziest == busiest { earliest } else { laziest };

        let x_agg = self.x[agg];
        let x_victim = self.x[victim];
        let victim_gradient = std::mem::take(&mut self.planes[victim].gradient);
        let victim_offset = self.planes[victim].offset;

        if x_agg.abs() < ZERO_EPS {
            let aggregated = &mut self.planes[agg];
            aggregated.gradient = victim_gradient;
            aggregated.offset = victim_offset;
            self.x[agg] = x_victim;
        } else if x_victim > ZERO_EPS {
            let total = x_agg + x_victim;
            let aggregated = &mut self.planes[agg];
            aggregated.gradient *= x_agg;
            aggregated.gradient.scaled_add(x_victim, &victim_gradient);
            aggregated.gradient /= total;
            aggregated.offset = (x_agg * aggregated.offset + x_victim * victim_offset) / total;
            self.x[agg] = 0.0;
        }

        self.refresh_gram(agg, Some(victim));
        self.linear[agg] = -self.planes[agg].offset * self.params.scale;

        log::debug!(
            "Aggregated cutting plane {} into slot {} at iteration {}",
            victim,
            agg,
            self.iteration
        );
        victim
    }
}

impl InnerSolver for CuttingPlanePool {
    fn set_tolerance(&mut self, tolerance: f64) {
        self.qp.set_tolerance(tolerance);
    }

    fn solve(
        &mut self,
        mut w: ArrayViewMut1<'_, f64>,
        gradient: ArrayView1<'_, f64>,
        loss: f64,
    ) -> Result<f64, BundleError> {
        if w.len() != self.dim_w {
            return Err(BundleError::DimensionMismatch {
                expected: self.dim_w,
                actual: w.len(),
            });
        }
        let offset = loss - w.dot(&gradient);
        self.update(gradient, offset)?;
        self.solve_qp()?;
        Ok(self.get_solution(w.view_mut()))
    }

    fn regularizer_value(&self, w: ArrayView1<'_, f64>) -> f64 {
        CuttingPlanePool::regularizer_value(self, w)
    }

    fn reset(&mut self) {
        CuttingPlanePool::reset(self);
    }

    fn subproblem_converged(&self) -> bool {
        self.last_outcome.map_or(true, |outcome| outcome.converged)
    }
}

// =============================================================================
// Tests
// =============================================================================
