//! The loss/gradient oracle consumed by the bundle method.

use ndarray::{ArrayView1, ArrayViewMut1};

/// A convex, non-negative risk function with (sub)gradients.
///
/// The bundle method only ever sees the loss through this trait: at every outer
/// iteration it asks for `R(w)` and a subgradient `∂R(w)` at the current weights
/// and turns them into a cutting plane `<v - w, ∂R(w)> + R(w) <= R(v)`.
///
/// Implementations may keep internal state (caches, scratch buffers), hence
/// `&mut self`. They must be deterministic for the solver to be deterministic.
///
/// # Contract
///
/// - `gradient` has the same length as `w`; implementations overwrite every entry.
/// - The returned loss is finite and `>= 0`.
///
/// Functions and closures with the matching signature implement the trait:
///
/// ```
/// use bmrm::training::LossGradientOracle;
/// use ndarray::{array, Array1, ArrayView1, ArrayViewMut1};
///
/// fn squared(w: ArrayView1<f64>, mut g: ArrayViewMut1<f64>) -> f64 {
///     g[0] = 2.0 * (w[0] - 3.0);
///     (w[0] - 3.0).powi(2)
/// }
///
/// let mut oracle = squared;
/// let mut grad = Array1::zeros(1);
/// let loss = oracle.compute_loss_gradient(array![1.0].view(), grad.view_mut());
/// assert_eq!(loss, 4.0);
/// assert_eq!(grad[0], -4.0);
/// ```
pub trait LossGradientOracle {
    /// Evaluate the loss at `w` and write a subgradient into `gradient`.
    fn compute_loss_gradient(&mut self, w: ArrayView1<'_, f64>, gradient: ArrayViewMut1<'_, f64>)
        -> f64;
}

impl<F> LossGradientOracle for F
where
    F: FnMut(ArrayView1<'_, f64>, ArrayViewMut1<'_, f64>) -> f64,
{
    #[inline]
    fn compute_loss_gradient(
        &mut self,
        w: ArrayView1<'_, f64>,
        gradient: ArrayViewMut1<'_, f64>,
    ) -> f64 {
        self(w, gradient)
    }
}
