//! Dai-Fletcher projected-gradient solver for the bundle dual.
//!
//! Solves the small dense QP
//!
//! ```text
//! minimize    0.5 x'Qx + f'x
//! subject to  a'x <= b        (a'x = b without non-negative slack)
//!             l <= x <= u
//! ```
//!
//! with a spectral (Barzilai-Borwein) projected-gradient method, an adaptive
//! nonmonotone line search and a KKT-based stopping test. Projections use
//! [`FeasibleSet::project`].
//!
//! The solver is warm-started: `x` is both input and output, and the outer
//! bundle loop feeds back the previous dual solution with one new coordinate.

use ndarray::{Array1, ArrayView1, ArrayView2, ArrayViewMut1, Zip};

use super::config::QpParams;
use super::error::QpError;
use super::projection::FeasibleSet;

/// Smallest spectral step.
const ALPHA_MIN: f64 = 1e-10;
/// Largest spectral step. Also the initial nonmonotone reference value.
const ALPHA_MAX: f64 = 1e10;
/// Threshold for treating a coordinate as zero or at a bound.
const EPS_SV: f64 = 1e-15;
/// Curvature `d'Qd` below `EPS_CURVATURE * d'd` counts as non-positive.
const EPS_CURVATURE: f64 = 1e-20;
/// Largest constraint violation, relative to `1 + |b|`, accepted in a returned solution.
const FEASIBILITY_TOL: f64 = 1e-9;

// =============================================================================
// Problem
// =============================================================================

/// A box-constrained QP with one linear constraint, borrowed from the caller.
#[derive(Debug, Clone, Copy)]
pub struct BoxQp<'a> {
    /// Symmetric positive semi-definite Hessian `Q`, `n x n`.
    pub hessian: ArrayView2<'a, f64>,
    /// Linear term `f`.
    pub linear: ArrayView1<'a, f64>,
    /// Constraint normal `a`.
    pub constraint: ArrayView1<'a, f64>,
    /// Constraint right-hand side `b`.
    pub rhs: f64,
    /// Lower bounds `l`.
    pub lower: ArrayView1<'a, f64>,
    /// Upper bounds `u`.
    pub upper: ArrayView1<'a, f64>,
}

impl<'a> BoxQp<'a> {
    /// Number of variables.
    #[inline]
    pub fn dim(&self) -> usize {
        self.hessian.nrows()
    }

    /// Objective value `0.5 x'Qx + f'x`.
    pub fn objective(&self, x: ArrayView1<'_, f64>) -> f64 {
        0.5 * x.dot(&self.hessian.dot(&x)) + self.linear.dot(&x)
    }

    /// The feasible set of this QP.
    pub fn feasible_set(&self, nonnegative_slack: bool) -> FeasibleSet<'a> {
        FeasibleSet {
            constraint: self.constraint,
            rhs: self.rhs,
            lower: self.lower,
            upper: self.upper,
            nonnegative_slack,
        }
    }

    fn check_dims(&self, x_len: usize) -> Result<usize, QpError> {
        let n = self.dim();
        let fields = [
            ("hessian columns", self.hessian.ncols()),
            ("linear", self.linear.len()),
            ("constraint", self.constraint.len()),
            ("lower", self.lower.len()),
            ("upper", self.upper.len()),
            ("x", x_len),
        ];
        for (field, len) in fields {
            if len != n {
                return Err(QpError::DimensionMismatch {
                    hessian: n,
                    field,
                    len,
                });
            }
        }
        Ok(n)
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Statistics of one QP solve.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QpOutcome {
    /// Projected-gradient iterations.
    pub iterations: usize,
    /// Secant iterations summed over all projections.
    pub projections: usize,
    /// Iterations where the full step was rejected by the nonmonotone test.
    pub line_search_fallbacks: usize,
    /// Estimate of the linear-constraint multiplier from the KKT test.
    pub kkt_multiplier: f64,
    /// `false` if the iteration cap was hit before the KKT test passed.
    pub converged: bool,
}

// =============================================================================
// Solver
// =============================================================================

/// Scratch vectors, resized to the problem dimension on every solve.
#[derive(Debug, Clone, Default)]
struct Workspace {
    g: Array1<f64>,
    t: Array1<f64>,
    y: Array1<f64>,
    tmp: Array1<f64>,
    d: Array1<f64>,
    qd: Array1<f64>,
    x_plus: Array1<f64>,
    t_plus: Array1<f64>,
    x_best: Array1<f64>,
}

impl Workspace {
    fn resize(&mut self, n: usize) {
        if self.g.len() == n {
            return;
        }
        for v in [
            &mut self.g,
            &mut self.t,
            &mut self.y,
            &mut self.tmp,
            &mut self.d,
            &mut self.qd,
            &mut self.x_plus,
            &mut self.t_plus,
            &mut self.x_best,
        ] {
            *v = Array1::zeros(n);
        }
    }
}

enum Kkt {
    Satisfied(f64),
    Violated,
    NoInterior,
}

/// Dai-Fletcher projected-gradient QP solver.
///
/// # Example
///
/// ```
/// use bmrm::training::bundle::{BoxQp, DaiFletcherQp, QpParams};
/// use ndarray::{array, Array1};
///
/// let q = array![[2.0, 0.0], [0.0, 2.0]];
/// let f = array![-2.0, -2.0];
/// let (a, l, u) = (Array1::ones(2), Array1::zeros(2), Array1::ones(2));
/// let qp = BoxQp {
///     hessian: q.view(),
///     linear: f.view(),
///     constraint: a.view(),
///     rhs: 1.0,
///     lower: l.view(),
///     upper: u.view(),
/// };
///
/// let mut x = Array1::zeros(2);
/// let outcome = DaiFletcherQp::new(QpParams::default()).solve(&qp, x.view_mut()).unwrap();
/// assert!(outcome.converged);
/// assert!((x[0] - 0.5).abs() < 1e-6 && (x[1] - 0.5).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct DaiFletcherQp {
    params: QpParams,
    tolerance: f64,
    workspace: Workspace,
}

impl DaiFletcherQp {
    pub fn new(params: QpParams) -> Self {
        let tolerance = params.tolerance.max(params.min_tolerance);
        Self {
            params,
            tolerance,
            workspace: Workspace::default(),
        }
    }

    #[inline]
    pub fn params(&self) -> &QpParams {
        &self.params
    }

    /// Current KKT tolerance.
    #[inline]
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Override the KKT tolerance for subsequent solves.
    ///
    /// Values below [`QpParams::min_tolerance`] are raised to it.
    #[inline]
    pub fn set_tolerance(&mut self, tolerance: f64) {
        self.tolerance = tolerance.max(self.params.min_tolerance);
    }

    /// Solve `qp`, using `x` as the starting point and writing the solution into it.
    ///
    /// # Errors
    ///
    /// - [`QpError::DimensionMismatch`] if the buffers disagree in length
    /// - [`QpError::Infeasible`] if a projection fails
    /// - [`QpError::LeftFeasibleSet`] if roundoff pushed the solution out of the feasible set
    ///
    /// If the iteration cap is hit first, `x` is the iterate with the lowest
    /// objective seen and [`QpOutcome::converged`] is `false`.
    pub fn solve(&mut self, qp: &BoxQp<'_>, mut x: ArrayViewMut1<'_, f64>) -> Result<QpOutcome, QpError> {
        let n = qp.check_dims(x.len())?;
        let mut outcome = QpOutcome::default();
        if n == 0 {
            outcome.converged = true;
            return Ok(outcome);
        }

        let Self {
            params,
            tolerance,
            workspace: ws,
        } = self;
        let tol = *tolerance;
        let max_proj = params.max_projection_iterations;
        ws.resize(n);

        let set = qp.feasible_set(params.nonnegative_slack);
        let f = qp.linear;
        let sparsity = if tol <= 1e-5 || n <= 20 { 0.0 } else { EPS_SV };

        // Feasible starting point.
        ws.tmp.assign(&x);
        outcome.projections += set.project(ws.tmp.view(), x.view_mut(), max_proj)?.iterations;

        sparse_product(qp.hessian, x.view(), sparsity, ws.t.view_mut());
        Zip::from(&mut ws.g).and(&ws.t).and(f).for_each(|g, &t, &f| *g = t + f);

        // Projected gradient with unit step decides whether x is already optimal.
        Zip::from(&mut ws.y).and(&x).and(&ws.g).for_each(|y, &x, &g| *y = x - g);
        outcome.projections += set.project(ws.y.view(), ws.tmp.view_mut(), max_proj)?.iterations;
        let max_move = Zip::from(&ws.tmp)
            .and(&x)
            .fold(ALPHA_MIN, |acc, &p, &x| acc.max((p - x).abs()));
        if max_move < tol * 1e-3 {
            if let Kkt::Satisfied(multiplier) = kkt_status(qp, x.view(), ws.g.view(), tol) {
                outcome.kkt_multiplier = multiplier;
            }
            outcome.converged = true;
            return Ok(outcome);
        }

        let mut alpha = 1.0 / max_move;
        ws.x_best.assign(&x);
        let fv0 = objective_from_product(x.view(), ws.t.view(), f);

        // Adaptive nonmonotone line search state.
        let memory = params.nonmonotone_memory;
        let mut f_ref = ALPHA_MAX;
        let mut f_best = fv0;
        let mut f_cand = fv0;
        let mut since_best = 0;
        let (mut ak_old, mut bk_old) = (0.0, 0.0);

        for iteration in 1..=params.max_iterations {
            outcome.iterations = iteration;

            Zip::from(&mut ws.tmp)
                .and(&x)
                .and(&ws.g)
                .for_each(|p, &x, &g| *p = x - alpha * g);
            outcome.projections += set.project(ws.tmp.view(), ws.y.view_mut(), max_proj)?.iterations;

            Zip::from(&mut ws.d).and(&ws.y).and(&x).for_each(|d, &y, &x| *d = y - x);
            let gd = ws.d.dot(&ws.g);

            // Qd directly or as Qy - t, whichever has fewer non-zero coefficients.
            let nnz_d = ws.d.iter().filter(|v| v.abs() > sparsity * 1e-2).count();
            let nnz_y = ws.y.iter().filter(|v| v.abs() > sparsity).count();
            if nnz_d < nnz_y {
                sparse_product(qp.hessian, ws.d.view(), sparsity * 1e-2, ws.qd.view_mut());
            } else {
                sparse_product(qp.hessian, ws.y.view(), sparsity, ws.qd.view_mut());
                ws.qd -= &ws.t;
            }

            let ak = ws.d.dot(&ws.d);
            let bk = ws.d.dot(&ws.qd);
            // x + step d stays feasible only for step in [0, 1].
            let exact_step = if bk > EPS_CURVATURE * ak && gd < 0.0 {
                (-gd / bk).min(1.0)
            } else {
                1.0
            };

            let mut fv = trial_step(ws, x.view(), f, 1.0);
            if (iteration == 1 && fv >= fv0) || (iteration > 1 && fv >= f_ref) {
                outcome.line_search_fallbacks += 1;
                fv = trial_step(ws, x.view(), f, exact_step);
            }

            // Secant pair (s, y) = (x+ - x, t+ - t), then accept the step.
            let mut ak = 0.0;
            let mut bk = 0.0;
            Zip::from(&ws.x_plus)
                .and(&x)
                .and(&ws.t_plus)
                .and(&ws.t)
                .for_each(|&xp, &x, &tp, &t| {
                    let s = xp - x;
                    ak += s * s;
                    bk += s * (tp - t);
                });
            x.assign(&ws.x_plus);
            ws.t.assign(&ws.t_plus);
            Zip::from(&mut ws.g).and(&ws.t).and(f).for_each(|g, &t, &f| *g = t + f);

            if fv < f_best {
                f_best = fv;
                f_cand = fv;
                since_best = 0;
                ws.x_best.assign(&x);
            } else {
                f_cand = f_cand.max(fv);
                since_best += 1;
                if since_best == memory {
                    f_ref = f_cand;
                    f_cand = fv;
                    since_best = 0;
                }
            }

            // Barzilai-Borwein step.
            if bk <= EPS_CURVATURE * ak {
                alpha = ALPHA_MAX;
            } else {
                alpha = if bk_old < EPS_CURVATURE * ak_old {
                    ak / bk
                } else {
                    (ak_old + ak) / (bk_old + bk)
                };
                alpha = alpha.clamp(ALPHA_MIN, ALPHA_MAX);
            }
            ak_old = ak;
            bk_old = bk;

            let step_norm = ak.sqrt();
            let x_norm = x.dot(&x).sqrt();
            if step_norm < tol * 10.0 * x_norm {
                match kkt_status(qp, x.view(), ws.g.view(), tol) {
                    Kkt::Satisfied(multiplier) => {
                        outcome.kkt_multiplier = multiplier;
                        outcome.converged = true;
                        break;
                    }
                    Kkt::NoInterior if step_norm < tol * 0.5 * x_norm => {
                        outcome.converged = true;
                        break;
                    }
                    _ => {}
                }
            }
        }

        if !outcome.converged {
            x.assign(&ws.x_best);
        }
        let violation = set.violation(x.view());
        if violation > FEASIBILITY_TOL * (1.0 + qp.rhs.abs()) {
            return Err(QpError::LeftFeasibleSet { violation });
        }
        Ok(outcome)
    }
}

/// `out = Q v`, skipping coefficients with `|v_i| <= threshold`.
fn sparse_product(q: ArrayView2<'_, f64>, v: ArrayView1<'_, f64>, threshold: f64, mut out: ArrayViewMut1<'_, f64>) {
    out.fill(0.0);
    for (i, &vi) in v.iter().enumerate() {
        if vi.abs() > threshold {
            out.scaled_add(vi, &q.row(i));
        }
    }
}

/// `x'(0.5 t + f)` where `t = Qx`.
fn objective_from_product(x: ArrayView1<'_, f64>, t: ArrayView1<'_, f64>, f: ArrayView1<'_, f64>) -> f64 {
    Zip::from(x)
        .and(t)
        .and(f)
        .fold(0.0, |acc, &x, &t, &f| acc + x * (0.5 * t + f))
}

/// Fill `x_plus = x + step d`, `t_plus = t + step Qd` and return the objective at `x_plus`.
fn trial_step(ws: &mut Workspace, x: ArrayView1<'_, f64>, f: ArrayView1<'_, f64>, step: f64) -> f64 {
    Zip::from(&mut ws.x_plus)
        .and(x)
        .and(&ws.d)
        .for_each(|xp, &x, &d| *xp = x + step * d);
    Zip::from(&mut ws.t_plus)
        .and(&ws.t)
        .and(&ws.qd)
        .for_each(|tp, &t, &qd| *tp = t + step * qd);
    objective_from_product(ws.x_plus.view(), ws.t_plus.view(), f)
}

/// KKT test at `x` with gradient `g`.
///
/// Interior coordinates give the multiplier estimate; coordinates at a bound
/// must have a reduced gradient of the right sign.
fn kkt_status(qp: &BoxQp<'_>, x: ArrayView1<'_, f64>, g: ArrayView1<'_, f64>, tol: f64) -> Kkt {
    let a = qp.constraint;
    let is_interior = |i: usize| x[i] > qp.lower[i] + EPS_SV && x[i] < qp.upper[i] - EPS_SV;

    let mut interior = 0usize;
    let mut multiplier = 0.0;
    for i in 0..x.len() {
        if is_interior(i) {
            interior += 1;
            multiplier -= a[i] * g[i];
        }
    }
    if interior == 0 {
        return Kkt::NoInterior;
    }
    multiplier /= interior as f64;

    for i in 0..x.len() {
        let reduced = g[i] + multiplier * a[i];
        let ok = if is_interior(i) {
            reduced.abs() <= tol
        } else if x[i] <= qp.lower[i] + EPS_SV {
            reduced >= -tol
        } else {
            reduced <= tol
        };
        if !ok {
            return Kkt::Violated;
        }
    }
    Kkt::Satisfied(multiplier)
}

// =============================================================================
// Tests
// =============================================================================
