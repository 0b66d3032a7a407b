//! Component benchmarks: bundle-method training and the QP subproblem.

#[path = "../../common/mod.rs"]
mod common;

use common::criterion_config::default_criterion;

use bmrm::testing::{synthetic_classification, HingeLoss};
use bmrm::training::bundle::{
	BoxQp, BundleConfig, BundleSolver, ConvergenceParams, DaiFletcherQp, EvictionPolicy, PoolParams, QpParams,
};
use bmrm::training::{train_independent, Problem};
use bmrm::{Parallelism, Verbosity};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::{Array1, Array2};
use rand::prelude::*;

fn config(lambda: f64, pool: PoolParams) -> BundleConfig {
	BundleConfig::builder()
		.lambda(lambda)
		.convergence(ConvergenceParams {
			gamma_tol: 1e-3,
			epsilon_tol: 1e-3,
			rel_gamma_tol: 0.0,
			rel_epsilon_tol: 0.0,
			max_iterations: 500,
		})
		.pool(pool)
		.verify_gram(false)
		.verbosity(Verbosity::Silent)
		.build()
		.unwrap()
}

fn bench_train_hinge(c: &mut Criterion) {
	let num_features = 50;
	let mut group = c.benchmark_group("component/train/bundle/hinge");

	for num_rows in [1_000usize, 10_000] {
		let (x, y) = synthetic_classification(num_rows, num_features, 42, 0.1);
		let cfg = config(0.01, PoolParams::default());

		group.throughput(Throughput::Elements((num_rows * num_features) as u64));
		group.bench_with_input(BenchmarkId::new("train", num_rows), &(x, y), |b, (x, y)| {
			b.iter(|| {
				let oracle = HingeLoss::new(x.clone(), y.clone());
				let mut solver = BundleSolver::with_config(oracle, num_features, cfg.clone()).unwrap();
				let mut w = Array1::zeros(num_features);
				black_box(solver.train(&mut w).unwrap())
			})
		});
	}

	group.finish();
}

fn bench_pool_policies(c: &mut Criterion) {
	let num_features = 20;
	let num_rows = 2_000usize;
	let (x, y) = synthetic_classification(num_rows, num_features, 7, 0.1);
	let mut group = c.benchmark_group("component/train/bundle/pool");

	for (name, pool) in [
		("full", PoolParams::default()),
		(
			"laziest_10",
			PoolParams {
				max_pool_size: 10,
				idle_age: 2,
				..Default::default()
			},
		),
		(
			"all_idle_10",
			PoolParams {
				max_pool_size: 10,
				idle_age: 2,
				eviction: EvictionPolicy::RemoveAllIdle,
				..Default::default()
			},
		),
	] {
		let cfg = config(0.01, pool);
		group.bench_function(name, |b| {
			b.iter(|| {
				let oracle = HingeLoss::new(x.clone(), y.clone());
				let mut solver = BundleSolver::with_config(oracle, num_features, cfg.clone()).unwrap();
				let mut w = Array1::zeros(num_features);
				black_box(solver.train(&mut w).unwrap())
			})
		});
	}

	group.finish();
}

fn bench_qp_solve(c: &mut Criterion) {
	let mut group = c.benchmark_group("component/qp/dai_fletcher");

	for dim in [10usize, 50, 100] {
		let mut rng = StdRng::seed_from_u64(42);
		let g: Array2<f64> = Array2::from_shape_simple_fn((dim, 20), || rng.gen_range(-1.0..1.0));
		let hessian = g.dot(&g.t());
		let linear: Array1<f64> = Array1::from_shape_simple_fn(dim, || -rng.gen_range(0.5..1.5));
		let (constraint, lower, upper) = (Array1::ones(dim), Array1::zeros(dim), Array1::ones(dim));
		let qp = BoxQp {
			hessian: hessian.view(),
			linear: linear.view(),
			constraint: constraint.view(),
			rhs: 1.0,
			lower: lower.view(),
			upper: upper.view(),
		};
		let mut solver = DaiFletcherQp::new(QpParams::default());

		group.bench_with_input(BenchmarkId::new("solve", dim), &qp, |b, qp| {
			b.iter(|| {
				let mut x = Array1::zeros(dim);
				black_box(solver.solve(black_box(qp), x.view_mut()).unwrap())
			})
		});
	}

	group.finish();
}

fn bench_independent_problems(c: &mut Criterion) {
	let num_features = 20;
	let mut group = c.benchmark_group("component/train/bundle/independent");

	for parallelism in [Parallelism::Sequential, Parallelism::Parallel] {
		let name = if parallelism.is_parallel() { "parallel" } else { "sequential" };
		let cfg = config(0.01, PoolParams::default());
		group.bench_function(name, |b| {
			b.iter(|| {
				let mut problems: Vec<_> = (0..8)
					.map(|seed| {
						let (x, y) = synthetic_classification(1_000, num_features, seed, 0.1);
						Problem::new(HingeLoss::new(x, y), Array1::zeros(num_features))
					})
					.collect();
				black_box(train_independent(&cfg, &mut problems, parallelism).unwrap())
			})
		});
	}

	group.finish();
}

criterion_group! {
	name = benches;
	config = default_criterion();
	targets = bench_train_hinge, bench_pool_policies, bench_qp_solve, bench_independent_problems
}
criterion_main!(benches);
