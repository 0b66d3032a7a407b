//! Reference loss oracles.
//!
//! Small convex losses with known minimizers, used by doc examples, tests
//! and benchmarks.

use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, Zip};

use crate::training::LossGradientOracle;

/// `sum_i (w_i - t_i)^2` with gradient `2 (w - t)`.
#[derive(Debug, Clone)]
pub struct Quadratic {
    target: Array1<f64>,
}

impl Quadratic {
    pub fn new(target: Vec<f64>) -> Self {
        Self {
            target: Array1::from(target),
        }
    }

    pub fn target(&self) -> ArrayView1<'_, f64> {
        self.target.view()
    }
}

impl LossGradientOracle for Quadratic {
    fn compute_loss_gradient(&mut self, w: ArrayView1<'_, f64>, mut gradient: ArrayViewMut1<'_, f64>) -> f64 {
        let mut loss = 0.0;
        Zip::from(&mut gradient)
            .and(w)
            .and(&self.target)
            .for_each(|g, &wi, &ti| {
                let d = wi - ti;
                loss += d * d;
                *g = 2.0 * d;
            });
        loss
    }
}

/// `sum_i |w_i - t_i|` with subgradient `sign(w - t)`, zero at equality.
#[derive(Debug, Clone)]
pub struct AbsoluteDeviation {
    target: Array1<f64>,
}

impl AbsoluteDeviation {
    pub fn new(target: Vec<f64>) -> Self {
        Self {
            target: Array1::from(target),
        }
    }
}

impl LossGradientOracle for AbsoluteDeviation {
    fn compute_loss_gradient(&mut self, w: ArrayView1<'_, f64>, mut gradient: ArrayViewMut1<'_, f64>) -> f64 {
        let mut loss = 0.0;
        Zip::from(&mut gradient)
            .and(w)
            .and(&self.target)
            .for_each(|g, &wi, &ti| {
                let d = wi - ti;
                loss += d.abs();
                *g = if d > 0.0 {
                    1.0
                } else if d < 0.0 {
                    -1.0
                } else {
                    0.0
                };
            });
        loss
    }
}

/// Mean hinge loss of a linear classifier without bias.
///
/// `R(w) = (1/n) sum_i max(0, 1 - y_i x_i'w)` with labels in `{-1, +1}`.
#[derive(Debug, Clone)]
pub struct HingeLoss {
    features: Array2<f64>,
    labels: Array1<f64>,
    margins: Array1<f64>,
}

impl HingeLoss {
    /// # Panics
    ///
    /// If the number of rows and labels differ.
    pub fn new(features: Array2<f64>, labels: Array1<f64>) -> Self {
        assert_eq!(features.nrows(), labels.len(), "one label per row");
        let margins = Array1::zeros(labels.len());
        Self {
            features,
            labels,
            margins,
        }
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn labels(&self) -> &Array1<f64> {
        &self.labels
    }
}

impl LossGradientOracle for HingeLoss {
    fn compute_loss_gradient(&mut self, w: ArrayView1<'_, f64>, mut gradient: ArrayViewMut1<'_, f64>) -> f64 {
        let n = self.labels.len();
        gradient.fill(0.0);
        if n == 0 {
            return 0.0;
        }

        self.margins.assign(&self.features.dot(&w));
        let inv_n = 1.0 / n as f64;
        let mut loss = 0.0;
        for ((row, &y), &score) in self
            .features
            .rows()
            .into_iter()
            .zip(self.labels.iter())
            .zip(self.margins.iter())
        {
            let violation = 1.0 - y * score;
            if violation > 0.0 {
                loss += violation;
                gradient.scaled_add(-y * inv_n, &row);
            }
        }
        loss * inv_n
    }
}

/// `(1/2n) ||Xw - y||^2` with gradient `(1/n) X'(Xw - y)`.
#[derive(Debug, Clone)]
pub struct LeastSquares {
    features: Array2<f64>,
    targets: Array1<f64>,
}

impl LeastSquares {
    /// # Panics
    ///
    /// If the number of rows and targets differ.
    pub fn new(features: Array2<f64>, targets: Array1<f64>) -> Self {
        assert_eq!(features.nrows(), targets.len(), "one target per row");
        Self { features, targets }
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }
}

impl LossGradientOracle for LeastSquares {
    fn compute_loss_gradient(&mut self, w: ArrayView1<'_, f64>, mut gradient: ArrayViewMut1<'_, f64>) -> f64 {
        let n = self.targets.len();
        if n == 0 {
            gradient.fill(0.0);
            return 0.0;
        }
        let inv_n = 1.0 / n as f64;
        let residual = self.features.dot(&w) - &self.targets;
        gradient.assign(&(self.features.t().dot(&residual) * inv_n));
        0.5 * inv_n * residual.dot(&residual)
    }
}

/// Wraps an oracle and counts its evaluations.
#[derive(Debug, Clone)]
pub struct Counting<O> {
    inner: O,
    calls: usize,
}

impl<O> Counting<O> {
    pub fn new(inner: O) -> Self {
        Self { inner, calls: 0 }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn into_inner(self) -> O {
        self.inner
    }
}

impl<O: LossGradientOracle> LossGradientOracle for Counting<O> {
    fn compute_loss_gradient(&mut self, w: ArrayView1<'_, f64>, gradient: ArrayViewMut1<'_, f64>) -> f64 {
        self.calls += 1;
        self.inner.compute_loss_gradient(w, gradient)
    }
}
