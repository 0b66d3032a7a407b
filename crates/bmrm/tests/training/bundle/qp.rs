//! Dai-Fletcher QP solver: optimality on the bundle dual.

use approx::assert_abs_diff_eq;
use bmrm::training::bundle::{BoxQp, DaiFletcherQp, QpParams};
use ndarray::{array, Array1, Array2};
use rand::prelude::*;
use rstest::rstest;

struct Problem {
    hessian: Array2<f64>,
    linear: Array1<f64>,
    constraint: Array1<f64>,
    lower: Array1<f64>,
    upper: Array1<f64>,
}

impl Problem {
    fn simplex(hessian: Array2<f64>, linear: Array1<f64>) -> Self {
        let n = linear.len();
        Self {
            hessian,
            linear,
            constraint: Array1::ones(n),
            lower: Array1::zeros(n),
            upper: Array1::ones(n),
        }
    }

    /// A bundle-shaped dual: Gram matrix of random gradients, negative offsets.
    fn random(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = rng.gen_range(2..=8);
        let m = rng.gen_range(1..=5);
        let g: Array2<f64> = Array2::from_shape_simple_fn((n, m), || rng.gen_range(-1.0..1.0));
        let linear: Array1<f64> = Array1::from_shape_simple_fn(n, || -rng.gen_range(0.5..1.5));
        Self::simplex(g.dot(&g.t()), linear)
    }

    fn qp(&self) -> BoxQp<'_> {
        BoxQp {
            hessian: self.hessian.view(),
            linear: self.linear.view(),
            constraint: self.constraint.view(),
            rhs: 1.0,
            lower: self.lower.view(),
            upper: self.upper.view(),
        }
    }
}

fn solver(tolerance: f64) -> DaiFletcherQp {
    DaiFletcherQp::new(QpParams {
        tolerance,
        ..Default::default()
    })
}

#[test]
fn symmetric_problem_splits_evenly() {
    let problem = Problem::simplex(array![[2.0, 0.0], [0.0, 2.0]], array![-2.0, -2.0]);
    let mut x = Array1::zeros(2);
    let outcome = solver(1e-8).solve(&problem.qp(), x.view_mut()).unwrap();

    assert!(outcome.converged);
    assert_abs_diff_eq!(x, array![0.5, 0.5], epsilon = 1e-6);
    assert_abs_diff_eq!(problem.qp().objective(x.view()), -1.5, epsilon = 1e-9);
}

#[test]
fn warm_start_at_optimum_stops_immediately() {
    let problem = Problem::simplex(array![[2.0, 0.0], [0.0, 2.0]], array![-2.0, -2.0]);
    let mut x = array![0.5, 0.5];
    let outcome = solver(1e-6).solve(&problem.qp(), x.view_mut()).unwrap();

    assert!(outcome.converged);
    assert_eq!(outcome.iterations, 0);
    assert_eq!(x, array![0.5, 0.5]);
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
#[case(5)]
#[case(8)]
#[case(13)]
#[case(21)]
#[case(34)]
fn random_bundle_duals_are_solved(#[case] seed: u64) {
    let problem = Problem::random(seed);
    let qp = problem.qp();
    let n = qp.dim();

    let mut x = Array1::zeros(n);
    let outcome = solver(1e-8).solve(&qp, x.view_mut()).unwrap();
    assert!(outcome.converged, "seed {seed}: {outcome:?}");

    let set = qp.feasible_set(true);
    assert!(set.contains(x.view(), 1e-9));

    // x is a fixed point of the projected gradient step.
    let gradient = problem.hessian.dot(&x) + &problem.linear;
    let mut projected = Array1::zeros(n);
    set.project((&x - &gradient).view(), projected.view_mut(), 200)
        .unwrap();
    assert_abs_diff_eq!(projected, x, epsilon = 1e-4);

    // No vertex of the feasible set does better.
    let objective = qp.objective(x.view());
    assert!(objective <= 1e-12);
    for i in 0..n {
        let mut vertex = Array1::zeros(n);
        vertex[i] = 1.0;
        assert!(objective <= qp.objective(vertex.view()) + 1e-9);
    }
}

#[test]
fn equality_variant_lands_on_the_constraint() {
    let problem = Problem::simplex(array![[4.0, 1.0], [1.0, 4.0]], array![1.0, 1.0]);
    let mut x = Array1::zeros(2);
    let mut qp_solver = DaiFletcherQp::new(QpParams {
        tolerance: 1e-8,
        nonnegative_slack: false,
        ..Default::default()
    });
    let outcome = qp_solver.solve(&problem.qp(), x.view_mut()).unwrap();

    assert!(outcome.converged);
    assert_abs_diff_eq!(x.sum(), 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(x, array![0.5, 0.5], epsilon = 1e-6);
}
