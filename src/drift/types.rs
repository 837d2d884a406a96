//! Type definitions for drift reports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Statistic that pushed a feature over its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftTest {
    Psi,
    Ks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparedKind {
    Numeric,
    Categorical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    Stable,
    Drifted,
    /// Baseline or current has no non-missing values; no statistic was computed
    InsufficientData,
}

/// Divergence of one drift-comparable feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDrift {
    pub feature: String,
    pub kind: ComparedKind,
    /// Non-missing values on each side
    pub baseline_count: usize,
    pub current_count: usize,
    pub psi: Option<f64>,
    /// Numeric features only
    pub ks: Option<f64>,
    pub status: DriftStatus,
    pub triggered_by: Vec<DriftTest>,
}

impl FeatureDrift {
    pub fn is_drifted(&self) -> bool {
        self.status == DriftStatus::Drifted
    }
}

/// Metric name → value, e.g. `{"pr_auc": 0.71, "recall": 0.64}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerformanceSnapshot {
    pub metrics: BTreeMap<String, f64>,
}

impl PerformanceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, metric: &str, value: f64) -> Self {
        self.metrics.insert(metric.to_string(), value);
        self
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.metrics.get(metric).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDrift {
    pub metric: String,
    pub baseline: f64,
    pub current: f64,
    /// `(baseline − current) / |baseline|`; `None` when the baseline is zero
    pub relative_drop: Option<f64>,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptDrift {
    /// Metrics present in both snapshots, by name
    pub metrics: Vec<MetricDrift>,
    pub has_concept_drift: bool,
}

/// Immutable result of comparing two feature tables (and optionally two performance snapshots).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub schema_version: u32,
    /// One entry per drift-comparable feature, in schema order
    pub features: Vec<FeatureDrift>,
    /// Names of drifted features, in schema order
    pub flagged: Vec<String>,
    pub has_data_drift: bool,
    pub concept: Option<ConceptDrift>,
    pub has_concept_drift: bool,
}

impl DriftReport {
    pub fn feature(&self, name: &str) -> Option<&FeatureDrift> {
        self.features.iter().find(|f| f.feature == name)
    }

    pub fn flagged_features(&self) -> impl Iterator<Item = &FeatureDrift> {
        self.features.iter().filter(|f| f.is_drifted())
    }

    pub fn insufficient_data(&self) -> impl Iterator<Item = &FeatureDrift> {
        self.features
            .iter()
            .filter(|f| f.status == DriftStatus::InsufficientData)
    }

    /// Flagged share of the features that could actually be compared.
    pub fn flagged_share(&self) -> f64 {
        let compared = self
            .features
            .iter()
            .filter(|f| f.status != DriftStatus::InsufficientData)
            .count();
        if compared == 0 {
            0.0
        } else {
            self.flagged.len() as f64 / compared as f64
        }
    }
}
