use ndarray::{Array1, Array2};
use rand::prelude::*;

/// Generate random dense features, `rows x cols`, uniform in `[min, max]`.
pub fn random_features(rows: usize, cols: usize, seed: u64, min: f64, max: f64) -> Array2<f64> {
    assert!(max >= min);
    let mut rng = StdRng::seed_from_u64(seed);
    let width = max - min;
    Array2::from_shape_simple_fn((rows, cols), || min + rng.r#gen::<f64>() * width)
}

/// Generate regression targets as a linear model of the features plus uniform noise.
///
/// Returns `(targets, weights)`. There is no bias term, so the weights are
/// recoverable by a model through the origin.
pub fn synthetic_regression_targets(
    features: &Array2<f64>,
    seed: u64,
    noise_amplitude: f64,
) -> (Array1<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let weights: Array1<f64> = (0..features.ncols())
        .map(|_| rng.r#gen::<f64>() * 2.0 - 1.0)
        .collect();

    let mut targets = features.dot(&weights);
    if noise_amplitude > 0.0 {
        targets.mapv_inplace(|y| y + (rng.r#gen::<f64>() * 2.0 - 1.0) * noise_amplitude);
    }
    (targets, weights)
}

/// Generate `+1 / -1` labels from the sign of a noisy linear score.
///
/// With zero noise the labels are linearly separable through the origin.
pub fn synthetic_binary_labels(features: &Array2<f64>, seed: u64, noise_amplitude: f64) -> Array1<f64> {
    let (score, _weights) = synthetic_regression_targets(features, seed, noise_amplitude);
    score.mapv(|s| if s > 0.0 { 1.0 } else { -1.0 })
}

/// Features and `+1 / -1` labels for a binary classification problem.
pub fn synthetic_classification(rows: usize, cols: usize, seed: u64, noise_amplitude: f64) -> (Array2<f64>, Array1<f64>) {
    let features = random_features(rows, cols, seed, -1.0, 1.0);
    let labels = synthetic_binary_labels(&features, seed.wrapping_add(1), noise_amplitude);
    (features, labels)
}

/// Fraction of rows where `sign(x_i . w)` matches the label.
pub fn classification_accuracy(features: &Array2<f64>, labels: &Array1<f64>, w: &Array1<f64>) -> f64 {
    assert_eq!(features.nrows(), labels.len());
    let scores = features.dot(w);
    let correct = scores
        .iter()
        .zip(labels.iter())
        .filter(|&(&s, &y)| s * y > 0.0)
        .count();
    correct as f64 / labels.len().max(1) as f64
}
