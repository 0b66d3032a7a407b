//! Training many independent problems.

use bmrm::testing::{classification_accuracy, synthetic_classification, HingeLoss, LeastSquares};
use bmrm::testing::{random_features, synthetic_regression_targets};
use bmrm::training::bundle::{BundleConfig, ConvergenceParams};
use bmrm::training::{train_independent, train_independent_threaded, Problem};
use bmrm::{Parallelism, Verbosity};
use ndarray::Array1;

fn config(lambda: f64) -> BundleConfig {
    BundleConfig::builder()
        .lambda(lambda)
        .convergence(ConvergenceParams {
            gamma_tol: 1e-4,
            epsilon_tol: 1e-4,
            rel_gamma_tol: 0.0,
            rel_epsilon_tol: 0.0,
            max_iterations: 500,
        })
        .verbosity(Verbosity::Silent)
        .build()
        .unwrap()
}

#[test]
fn one_vs_rest_style_batch_trains_in_parallel() {
    let mut problems: Vec<_> = (0..6)
        .map(|seed| {
            let (x, y) = synthetic_classification(80, 3, seed, 0.0);
            Problem::new(HingeLoss::new(x, y), Array1::zeros(3))
        })
        .collect();

    let losses = train_independent_threaded(&config(0.01), &mut problems, 3).unwrap();

    assert_eq!(losses.len(), 6);
    for problem in &problems {
        assert!(problem.summary().unwrap().converged());
        let accuracy = classification_accuracy(
            problem.oracle.features(),
            problem.oracle.labels(),
            &problem.weights,
        );
        assert!(accuracy >= 0.85, "accuracy {accuracy}");
    }
}

#[test]
fn regression_batch_is_deterministic_across_parallelism() {
    let build = || -> Vec<_> {
        (0..4)
            .map(|seed| {
                let x = random_features(60, 3, seed, -1.0, 1.0);
                let (y, _) = synthetic_regression_targets(&x, seed + 100, 0.05);
                Problem::new(LeastSquares::new(x, y), Array1::zeros(3))
            })
            .collect()
    };

    let mut sequential = build();
    let mut parallel = build();
    train_independent(&config(0.1), &mut sequential, Parallelism::Sequential).unwrap();
    train_independent(&config(0.1), &mut parallel, Parallelism::Parallel).unwrap();

    for (a, b) in sequential.iter().zip(&parallel) {
        assert_eq!(a.weights, b.weights);
        assert_eq!(a.summary(), b.summary());
    }
}
