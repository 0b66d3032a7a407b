//! Dai-Fletcher projection onto a box with one linear constraint.
//!
//! Solves
//!
//! ```text
//! minimize    0.5 ||z - p||^2
//! subject to  a'z <= b        (a'z = b without non-negative slack)
//!             l <= z <= u
//! ```
//!
//! For a fixed multiplier `lambda` of the linear constraint the minimizer is
//! `z(lambda) = clip(p + lambda a, l, u)`, so the projection reduces to finding
//! a root of the monotone piecewise-linear residual `r(lambda) = a'z(lambda) - b`.
//! The root is bracketed with geometrically growing steps and then refined by a
//! safeguarded secant method (Dai & Fletcher, Math. Program. 2006).

use ndarray::{ArrayView1, ArrayViewMut1, Zip};

use super::error::QpError;

/// Residual tolerance of the secant phase.
const RESIDUAL_TOL: f64 = 1e-15;
/// Relative multiplier step below which the secant phase stops.
const MULTIPLIER_TOL: f64 = 1e-15;
/// A bracketing step beyond this means the feasible set is empty.
const BRACKET_LIMIT: f64 = 1e30;
/// First bracketing step.
const INITIAL_STEP: f64 = 0.5;
/// Bisection steps allowed when pulling an overshooting multiplier back.
const MAX_BISECTIONS: usize = 100;

/// Feasible set of the bundle dual: a box intersected with one linear constraint.
#[derive(Debug, Clone, Copy)]
pub struct FeasibleSet<'a> {
    /// Constraint normal `a`.
    pub constraint: ArrayView1<'a, f64>,
    /// Constraint right-hand side `b`.
    pub rhs: f64,
    /// Lower bounds `l`.
    pub lower: ArrayView1<'a, f64>,
    /// Upper bounds `u`.
    pub upper: ArrayView1<'a, f64>,
    /// `true` for `a'z <= b`, `false` for `a'z = b`.
    pub nonnegative_slack: bool,
}

/// Result of a single projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Secant iterations spent. Zero when the unconstrained clip was already feasible.
    pub iterations: usize,
    /// Multiplier of the linear constraint at the projected point.
    pub multiplier: f64,
}

impl FeasibleSet<'_> {
    /// Number of variables.
    #[inline]
    pub fn len(&self) -> usize {
        self.constraint.len()
    }

    /// Whether the set has no variables.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.constraint.is_empty()
    }

    /// Write `clip(point + lambda a, l, u)` into `out` and return `a'out - b`.
    fn residual(&self, point: ArrayView1<'_, f64>, lambda: f64, out: &mut ArrayViewMut1<'_, f64>) -> f64 {
        let mut dot = 0.0;
        Zip::from(out.view_mut())
            .and(point)
            .and(self.constraint)
            .and(self.lower)
            .and(self.upper)
            .for_each(|z, &p, &a, &l, &u| {
                let mut v = p + lambda * a;
                if v > u {
                    v = u;
                } else if v < l {
                    v = l;
                }
                *z = v;
                dot += a * v;
            });
        dot - self.rhs
    }

    /// Largest violation of a bound or of the linear constraint at `z`; zero if feasible.
    pub fn violation(&self, z: ArrayView1<'_, f64>) -> f64 {
        let outside_box = Zip::from(z)
            .and(self.lower)
            .and(self.upper)
            .fold(0.0_f64, |acc, &v, &l, &u| acc.max(l - v).max(v - u));
        let r = self.constraint.dot(&z) - self.rhs;
        let linear = if self.nonnegative_slack { r.max(0.0) } else { r.abs() };
        outside_box.max(linear)
    }

    /// Whether `z` satisfies the box and the linear constraint up to `tol`.
    #[inline]
    pub fn contains(&self, z: ArrayView1<'_, f64>, tol: f64) -> bool {
        self.violation(z) <= tol
    }

    /// Project `point` onto the set, writing the result into `out`.
    ///
    /// # Errors
    ///
    /// [`QpError::Infeasible`] if the multiplier bracket diverges, i.e. the box
    /// and the linear constraint do not intersect.
    pub fn project(
        &self,
        point: ArrayView1<'_, f64>,
        mut out: ArrayViewMut1<'_, f64>,
        max_iterations: usize,
    ) -> Result<Projection, QpError> {
        debug_assert_eq!(point.len(), self.len());
        debug_assert_eq!(out.len(), self.len());

        let mut lambda = 0.0;
        let mut dlambda = INITIAL_STEP;
        let mut r = self.residual(point, lambda, &mut out);

        let feasible = if self.nonnegative_slack {
            r < RESIDUAL_TOL
        } else {
            r.abs() < RESIDUAL_TOL
        };
        if feasible {
            return Ok(Projection {
                iterations: 0,
                multiplier: 0.0,
            });
        }

        // Bracketing
        let (mut lambda_l, mut lambda_u, mut rl, mut ru);
        if r < 0.0 {
            lambda_l = lambda;
            rl = r;
            lambda += dlambda;
            r = self.residual(point, lambda, &mut out);
            while r < 0.0 && dlambda < BRACKET_LIMIT {
                lambda_l = lambda;
                let s = (rl / r - 1.0).max(0.1);
                dlambda += dlambda / s;
                lambda += dlambda;
                rl = r;
                r = self.residual(point, lambda, &mut out);
            }
            lambda_u = lambda;
            ru = r;
        } else {
            lambda_u = lambda;
            ru = r;
            lambda -= dlambda;
            r = self.residual(point, lambda, &mut out);
            while r > 0.0 && dlambda < BRACKET_LIMIT {
                lambda_u = lambda;
                let s = (ru / r - 1.0).max(0.1);
                dlambda += dlambda / s;
                lambda -= dlambda;
                ru = r;
                r = self.residual(point, lambda, &mut out);
            }
            lambda_l = lambda;
            rl = r;
        }

        if dlambda >= BRACKET_LIMIT {
            return Err(QpError::Infeasible { step: dlambda });
        }

        // Secant
        let mut s = 1.0 - rl / ru;
        dlambda /= s;
        lambda = lambda_u - dlambda;
        r = self.residual(point, lambda, &mut out);

        let mut iterations = 1;
        while r.abs() > RESIDUAL_TOL
            && dlambda > MULTIPLIER_TOL * (1.0 + lambda.abs())
            && iterations < max_iterations
        {
            iterations += 1;
            if r > 0.0 {
                if s <= 2.0 {
                    lambda_u = lambda;
                    ru = r;
                    s = 1.0 - rl / ru;
                    dlambda = (lambda_u - lambda_l) / s;
                    lambda = lambda_u - dlambda;
                } else {
                    s = (ru / r - 1.0).max(0.1);
                    dlambda = (lambda_u - lambda) / s;
                    let lambda_new = (0.75 * lambda_l + 0.25 * lambda).max(lambda - dlambda);
                    lambda_u = lambda;
                    ru = r;
                    lambda = lambda_new;
                    s = (lambda_u - lambda_l) / (lambda_u - lambda);
                }
            } else if s >= 2.0 {
                lambda_l = lambda;
                rl = r;
                s = 1.0 - rl / ru;
                dlambda = (lambda_u - lambda_l) / s;
                lambda = lambda_u - dlambda;
            } else {
                s = (rl / r - 1.0).max(0.1);
                dlambda = (lambda - lambda_l) / s;
                let lambda_new = (0.75 * lambda_u + 0.25 * lambda).min(lambda + dlambda);
                lambda_l = lambda;
                rl = r;
                lambda = lambda_new;
                s = (lambda_u - lambda_l) / (lambda_u - lambda);
            }
            r = self.residual(point, lambda, &mut out);
        }

        // The secant phase can stop just past the root, which breaks a'z <= b.
        if self.nonnegative_slack && r > 0.0 {
            lambda = self.bisect_feasible(point, lambda_l, lambda, &mut out);
        }

        Ok(Projection {
            iterations,
            multiplier: lambda,
        })
    }

    /// Shrink `[lambda_l, lambda_u]` around the root keeping `r(lambda_l) <= 0`,
    /// then write `z(lambda_l)` into `out` and return `lambda_l`.
    fn bisect_feasible(
        &self,
        point: ArrayView1<'_, f64>,
        mut lambda_l: f64,
        mut lambda_u: f64,
        out: &mut ArrayViewMut1<'_, f64>,
    ) -> f64 {
        for _ in 0..MAX_BISECTIONS {
            let mid = 0.5 * (lambda_l + lambda_u);
            if mid <= lambda_l || mid >= lambda_u {
                break;
            }
            let r = self.residual(point, mid, out);
            if r > 0.0 {
                lambda_u = mid;
            } else {
                lambda_l = mid;
                if r > -RESIDUAL_TOL {
                    break;
                }
            }
        }
        self.residual(point, lambda_l, out);
        lambda_l
    }
}

// =============================================================================
// Tests
// =============================================================================
