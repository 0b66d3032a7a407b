//! Shared helpers for the benchmark suites.

pub mod criterion_config;
