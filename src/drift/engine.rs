//! Drift engine: per-feature PSI/KS between two feature tables, plus concept drift.

use super::statistical::{categorical_psi, ks_statistic, numeric_psi, relative_performance_drop};
use super::types::{
    ComparedKind, ConceptDrift, DriftReport, DriftStatus, DriftTest, FeatureDrift, MetricDrift,
    PerformanceSnapshot,
};
use crate::config::DriftConfig;
use crate::error::Result;
use crate::features::{FeatureDef, FeatureSchema, FeatureTable};
use tracing::{info, warn};

/// Pure comparison of feature populations. Holds only its configuration.
#[derive(Debug, Clone)]
pub struct DriftEngine {
    config: DriftConfig,
}

impl DriftEngine {
    pub fn new(config: DriftConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    /// Compare every drift-comparable feature of `schema` between two tables.
    ///
    /// Both tables must have been produced under `schema`.
    pub fn compare(
        &self,
        baseline: &FeatureTable,
        current: &FeatureTable,
        schema: &FeatureSchema,
    ) -> Result<DriftReport> {
        baseline.ensure_schema(schema)?;
        current.ensure_schema(schema)?;

        let features: Vec<FeatureDrift> = schema
            .features()
            .iter()
            .enumerate()
            .filter(|(_, def)| def.drift_comparable)
            .map(|(i, def)| self.compare_feature(i, def, baseline, current))
            .collect();
        let flagged: Vec<String> = features
            .iter()
            .filter(|f| f.is_drifted())
            .map(|f| f.feature.clone())
            .collect();

        let report = DriftReport {
            schema_version: schema.version(),
            has_data_drift: !flagged.is_empty(),
            features,
            flagged,
            concept: None,
            has_concept_drift: false,
        };
        if report.has_data_drift {
            warn!(flagged = ?report.flagged, "data drift detected");
        } else {
            info!(features = report.features.len(), "no data drift");
        }
        Ok(report)
    }

    /// [`compare`](Self::compare) plus concept drift from two performance snapshots.
    pub fn compare_with_performance(
        &self,
        baseline: &FeatureTable,
        current: &FeatureTable,
        schema: &FeatureSchema,
        baseline_performance: &PerformanceSnapshot,
        current_performance: &PerformanceSnapshot,
    ) -> Result<DriftReport> {
        let mut report = self.compare(baseline, current, schema)?;
        let concept = self.compare_performance(baseline_performance, current_performance);
        report.has_concept_drift = concept.has_concept_drift;
        report.concept = Some(concept);
        Ok(report)
    }

    /// Relative drop of every metric present in both snapshots.
    pub fn compare_performance(
        &self,
        baseline: &PerformanceSnapshot,
        current: &PerformanceSnapshot,
    ) -> ConceptDrift {
        let metrics: Vec<MetricDrift> = baseline
            .metrics
            .iter()
            .filter_map(|(name, &b)| {
                let c = current.get(name)?;
                let relative_drop = relative_performance_drop(b, c);
                Some(MetricDrift {
                    metric: name.clone(),
                    baseline: b,
                    current: c,
                    relative_drop,
                    degraded: relative_drop
                        .is_some_and(|d| d >= self.config.performance_drop_threshold),
                })
            })
            .collect();
        let has_concept_drift = metrics.iter().any(|m| m.degraded);
        if has_concept_drift {
            warn!(
                degraded = ?metrics.iter().filter(|m| m.degraded).map(|m| m.metric.as_str()).collect::<Vec<_>>(),
                "concept drift detected"
            );
        }
        ConceptDrift {
            metrics,
            has_concept_drift,
        }
    }

    fn compare_feature(
        &self,
        index: usize,
        def: &FeatureDef,
        baseline: &FeatureTable,
        current: &FeatureTable,
    ) -> FeatureDrift {
        let (kind, baseline_count, current_count, psi, ks) = if def.is_categorical() {
            let b = baseline.categorical_column(index);
            let c = current.categorical_column(index);
            let psi = categorical_psi(&b, &c, self.config.psi_epsilon);
            (ComparedKind::Categorical, b.len(), c.len(), psi, None)
        } else {
            let b = baseline.numeric_column(index);
            let c = current.numeric_column(index);
            let psi = numeric_psi(&b, &c, self.config.psi_bins, self.config.psi_epsilon);
            (ComparedKind::Numeric, b.len(), c.len(), psi, ks_statistic(&b, &c))
        };

        let mut triggered_by = Vec::new();
        if psi.is_some_and(|v| v > self.config.psi_threshold) {
            triggered_by.push(DriftTest::Psi);
        }
        if ks.is_some_and(|v| v > self.config.ks_threshold) {
            triggered_by.push(DriftTest::Ks);
        }
        let status = if psi.is_none() {
            DriftStatus::InsufficientData
        } else if triggered_by.is_empty() {
            DriftStatus::Stable
        } else {
            DriftStatus::Drifted
        };

        FeatureDrift {
            feature: def.name.clone(),
            kind,
            baseline_count,
            current_count,
            psi,
            ks,
            status,
            triggered_by,
        }
    }
}
