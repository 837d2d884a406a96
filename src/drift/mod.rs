//! Drift detection between feature populations and between model performance snapshots.
//!
//! - Population Stability Index over baseline quantile bins (numeric) or
//!   category frequencies (categorical)
//! - Two-sample Kolmogorov–Smirnov statistic (numeric)
//! - Relative drop of classification metrics (concept drift)

mod engine;
pub mod evaluation;
mod statistical;
mod types;

pub use engine::DriftEngine;
pub use evaluation::classification_metrics;
pub use types::{
    ComparedKind, ConceptDrift, DriftReport, DriftStatus, DriftTest, FeatureDrift, MetricDrift,
    PerformanceSnapshot,
};

// Exposed for property tests and benchmarks
pub use statistical::{
    categorical_psi, ks_statistic, numeric_psi, psi_from_counts, quantile,
    relative_performance_drop, QuantileBins,
};
