//! Verbosity-gated training logger.
//!
//! [`TrainingLogger`] forwards messages to the [`log`] facade, so output ends up
//! wherever the embedding application installed its logger. The [`Verbosity`]
//! level is a second, per-trainer gate on top of the global `log` filter:
//! orchestration code that trains thousands of small problems keeps them quiet
//! without touching the global logger.

use std::fmt::Display;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Verbosity level for training output.
///
/// Levels are ordered: a logger at `Info` also emits `Warning` messages.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// No output at all.
    Silent,
    /// Only non-fatal problems, e.g. an exhausted iteration budget.
    #[default]
    Warning,
    /// Start/stop messages and the stopping criterion that fired.
    Info,
    /// Per-iteration convergence statistics.
    Debug,
}

/// Logger used by the bundle trainer.
#[derive(Debug, Clone)]
pub struct TrainingLogger {
    verbosity: Verbosity,
    started: Option<Instant>,
}

impl TrainingLogger {
    /// Create a logger with the given verbosity.
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            started: None,
        }
    }

    /// Configured verbosity.
    #[inline]
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Whether messages at `level` are emitted.
    #[inline]
    pub fn enabled(&self, level: Verbosity) -> bool {
        level != Verbosity::Silent && self.verbosity >= level
    }

    pub fn warn(&self, message: &str) {
        if self.enabled(Verbosity::Warning) {
            log::warn!("{}", message);
        }
    }

    pub fn info(&self, message: &str) {
        if self.enabled(Verbosity::Info) {
            log::info!("{}", message);
        }
    }

    pub fn debug(&self, message: &str) {
        if self.enabled(Verbosity::Debug) {
            log::debug!("{}", message);
        }
    }

    /// Mark the start of a training run.
    pub fn start_training(&mut self, max_iterations: usize) {
        self.started = Some(Instant::now());
        self.info(&format!(
            "Starting bundle method: at most {} iterations",
            max_iterations
        ));
    }

    /// Log one outer iteration. `stats` is only formatted at `Debug` verbosity.
    pub fn log_iteration(&self, stats: &impl Display) {
        if self.enabled(Verbosity::Debug) {
            log::debug!("{}", stats);
        }
    }

    /// Mark the end of a training run.
    pub fn finish_training(&mut self, iterations: usize) {
        if let Some(started) = self.started.take() {
            self.info(&format!(
                "Training finished after {} iterations in {:.3?}",
                iterations,
                started.elapsed()
            ));
        }
    }
}

impl Default for TrainingLogger {
    fn default() -> Self {
        Self::new(Verbosity::default())
    }
}
