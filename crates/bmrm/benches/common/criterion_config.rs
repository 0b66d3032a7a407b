use std::time::Duration;

use criterion::Criterion;

/// Baseline Criterion configuration for the bundle benchmarks.
///
/// A full training run is tens of milliseconds, so a short measurement window
/// with few samples is enough.
pub fn default_criterion() -> Criterion {
    Criterion::default()
        // Allows `--bench` command-line overrides.
        .configure_from_args()
        .warm_up_time(Duration::from_secs(2))
        .measurement_time(Duration::from_secs(10))
        .sample_size(10)
}
