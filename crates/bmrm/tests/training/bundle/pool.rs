//! Cutting-plane pool: bounded size, eviction and aggregation.

use super::{absolute_convergence, pool_config};
use approx::assert_abs_diff_eq;
use bmrm::training::bundle::{CuttingPlanePool, EvictionPolicy};
use ndarray::{array, Array1, Array2};

const GRADIENTS: [[f64; 2]; 5] = [[1.0, 0.0], [0.0, 1.0], [-1.0, 0.5], [0.3, -1.0], [-0.5, -0.5]];
const LOWER_BOUNDS: [f64; 5] = [0.5, 0.75, 33.0 / 34.0, 1.0, 1.0];

fn small_pool(idle_age: usize) -> CuttingPlanePool {
    let cfg = pool_config(1.0, absolute_convergence(0.01, 100), 3, idle_age, EvictionPolicy::RemoveLaziestIdle);
    CuttingPlanePool::new(2, &cfg).unwrap()
}

/// Insert one plane, solve and read back the lower bound.
fn step(pool: &mut CuttingPlanePool, k: usize) -> (usize, f64) {
    let idx = pool.update(Array1::from(GRADIENTS[k].to_vec()).view(), 1.0).unwrap();
    pool.solve_qp().unwrap();
    let mut w = Array1::zeros(2);
    let lb = pool.get_solution(w.view_mut());
    (idx, lb)
}

#[test]
fn full_pool_aggregates_instead_of_growing() {
    let mut pool = small_pool(100);

    for k in 0..3 {
        let (idx, lb) = step(&mut pool, k);
        assert_eq!(idx, k);
        assert_abs_diff_eq!(lb, LOWER_BOUNDS[k], epsilon = 1e-4);
    }
    assert!(pool.aggregated_slot().is_none());

    // Nothing is idle yet, so the oldest plane becomes the aggregate and the
    // laziest other plane (slot 1, multiplier zero) makes room.
    let (idx, lb) = step(&mut pool, 3);
    assert_eq!(idx, 1);
    assert_eq!(pool.len(), 3);
    assert_eq!(pool.aggregated_slot(), Some(0));
    assert_eq!(pool.planes().iter().filter(|p| p.aggregated).count(), 1);
    assert_eq!(pool.planes()[0].gradient, array![1.0, 0.0]);
    assert_abs_diff_eq!(lb, LOWER_BOUNDS[3], epsilon = 1e-4);

    // Both the aggregate and the victim carry weight now: weighted merge.
    let x_agg = pool.multipliers()[0];
    let x_victim = pool.multipliers()[2];
    assert!(x_agg > 1e-3 && x_victim > 1e-3);
    let total = x_agg + x_victim;
    let merged = (array![1.0, 0.0] * x_agg + array![-1.0, 0.5] * x_victim) / total;

    let idx = pool
        .update(Array1::from(GRADIENTS[4].to_vec()).view(), 1.0)
        .unwrap();
    assert_eq!(idx, 2);
    assert_eq!(pool.multipliers()[0], 0.0);
    assert_abs_diff_eq!(pool.planes()[0].gradient, merged, epsilon = 1e-12);
    assert_abs_diff_eq!(pool.planes()[0].offset, 1.0, epsilon = 1e-12);
    assert_eq!(pool.planes().iter().filter(|p| p.aggregated).count(), 1);
    pool.check_gram().unwrap();

    pool.solve_qp().unwrap();
    let mut w = Array1::zeros(2);
    let lb = pool.get_solution(w.view_mut());
    assert_abs_diff_eq!(lb, LOWER_BOUNDS[4], epsilon = 1e-4);
}

#[test]
fn idle_plane_is_reused_before_aggregating() {
    let mut pool = small_pool(2);
    let expected_slots = [0, 1, 2, 1, 2];

    for k in 0..5 {
        let (idx, lb) = step(&mut pool, k);
        assert_eq!(idx, expected_slots[k], "insert {k}");
        assert!(pool.len() <= 3);
        assert_abs_diff_eq!(lb, LOWER_BOUNDS[k], epsilon = 1e-4);
        if k == 3 {
            // Slot 1 idled since its second iteration and was overwritten.
            assert!(pool.aggregated_slot().is_none());
            assert_eq!(pool.planes()[1].gradient, array![0.3, -1.0]);
        }
    }
    assert_eq!(pool.aggregated_slot(), Some(0));
}

#[test]
fn pool_of_three_aggregates_on_fourth_insert_with_short_idle_age() {
    // Every plane stays active, so nothing is idle by the 4th insert.
    let gradients = [[1.0, 0.0], [0.0, 1.0], [-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0]];
    let lower_bounds = [0.5, 0.75, 1.0, 1.0, 1.0];
    let expected_slots = [0, 1, 2, 1, 2];
    let mut pool = small_pool(2);

    for (k, gradient) in gradients.iter().enumerate() {
        let idx = pool.update(Array1::from(gradient.to_vec()).view(), 1.0).unwrap();
        pool.solve_qp().unwrap();
        let mut w = Array1::zeros(2);
        let lb = pool.get_solution(w.view_mut());

        assert_eq!(idx, expected_slots[k], "insert {k}");
        assert!(pool.len() <= 3);
        assert_abs_diff_eq!(lb, lower_bounds[k], epsilon = 1e-4);
        let aggregated = pool.planes().iter().filter(|p| p.aggregated).count();
        if k < 3 {
            assert_eq!(aggregated, 0, "insert {k}");
        } else {
            assert_eq!(aggregated, 1, "insert {k}");
            assert_eq!(pool.aggregated_slot(), Some(0));
        }
        if k == 2 {
            assert!(pool.multipliers().iter().all(|&v| v > 0.3));
        }
        if k == 3 {
            // The first two planes carried weight 1/3 each and were merged.
            assert_abs_diff_eq!(pool.planes()[0].gradient, array![0.5, 0.5], epsilon = 1e-4);
            assert_abs_diff_eq!(pool.planes()[0].offset, 1.0, epsilon = 1e-12);
        }
        pool.check_gram().unwrap();
    }
}

#[test]
fn gram_matrix_tracks_every_insert() {
    let mut pool = small_pool(2);
    for k in 0..5 {
        step(&mut pool, k);

        let n = pool.len();
        let g = Array2::from_shape_fn((n, 2), |(i, j)| pool.planes()[i].gradient[j]);
        let expected = g.dot(&g.t());
        assert_abs_diff_eq!(pool.hessian().to_owned(), expected, epsilon = 1e-15);
        assert_abs_diff_eq!(pool.linear().to_owned(), Array1::from_elem(n, -1.0));
    }
}

#[test]
fn remove_all_idle_keeps_pool_bounded() {
    let cfg = pool_config(1.0, absolute_convergence(0.01, 100), 3, 2, EvictionPolicy::RemoveAllIdle);
    let mut pool = CuttingPlanePool::new(2, &cfg).unwrap();

    for k in 0..5 {
        step(&mut pool, k);
        assert!(pool.len() <= 3);
        pool.check_gram().unwrap();
        for plane in pool.planes().iter().filter(|p| !p.aggregated) {
            assert!(plane.entered <= pool.iteration());
        }
    }
}

#[test]
fn multipliers_stay_feasible() {
    let mut pool = small_pool(100);
    for k in 0..5 {
        step(&mut pool, k);
        let x = pool.multipliers();
        assert!(x.iter().all(|&v| (-1e-12..=1.0 + 1e-12).contains(&v)));
        assert!(x.sum() <= 1.0 + 1e-9);
    }
}
