//! Combines a drift report with configurable thresholds; produces a severity.

use crate::config::AlertConfig;
use crate::drift::DriftReport;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Warn,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Warn => "warn",
            Severity::Critical => "critical",
        }
    }
}

/// One reason the assessment is above `none`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum AlertTrigger {
    ConceptDrift { metrics: Vec<String> },
    CriticalPsi { feature: String, psi: f64 },
    CriticalKs { feature: String, ks: f64 },
    FlaggedShare { share: f64 },
    DataDrift { features: Vec<String> },
    InsufficientData { features: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertAssessment {
    pub severity: Severity,
    pub triggers: Vec<AlertTrigger>,
}

/// Stateless. Delivery of the alert is the caller's concern.
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    config: AlertConfig,
}

impl AlertPolicy {
    pub fn new(config: AlertConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    pub fn classify(&self, report: &DriftReport) -> Severity {
        self.evaluate(report).severity
    }

    pub fn evaluate(&self, report: &DriftReport) -> AlertAssessment {
        let mut triggers = Vec::new();

        if let Some(concept) = report.concept.as_ref().filter(|c| c.has_concept_drift) {
            triggers.push(AlertTrigger::ConceptDrift {
                metrics: concept
                    .metrics
                    .iter()
                    .filter(|m| m.degraded)
                    .map(|m| m.metric.clone())
                    .collect(),
            });
        }
        for f in &report.features {
            if let Some(psi) = f.psi.filter(|v| *v >= self.config.critical_psi) {
                triggers.push(AlertTrigger::CriticalPsi {
                    feature: f.feature.clone(),
                    psi,
                });
            }
            if let Some(ks) = f.ks.filter(|v| *v >= self.config.critical_ks) {
                triggers.push(AlertTrigger::CriticalKs {
                    feature: f.feature.clone(),
                    ks,
                });
            }
        }
        let share = report.flagged_share();
        if report.has_data_drift && share >= self.config.critical_flagged_share {
            triggers.push(AlertTrigger::FlaggedShare { share });
        }

        if report.has_data_drift {
            triggers.push(AlertTrigger::DataDrift {
                features: report.flagged.clone(),
            });
        }
        if self.config.warn_on_insufficient_data {
            let features: Vec<String> =
                report.insufficient_data().map(|f| f.feature.clone()).collect();
            if !features.is_empty() {
                triggers.push(AlertTrigger::InsufficientData { features });
            }
        }

        let severity = triggers
            .iter()
            .map(|t| self.severity_of(t))
            .max()
            .unwrap_or(Severity::None);
        AlertAssessment { severity, triggers }
    }

    pub fn severity_of(&self, trigger: &AlertTrigger) -> Severity {
        match trigger {
            AlertTrigger::ConceptDrift { .. } if self.config.concept_drift_critical => {
                Severity::Critical
            }
            AlertTrigger::CriticalPsi { .. }
            | AlertTrigger::CriticalKs { .. }
            | AlertTrigger::FlaggedShare { .. } => Severity::Critical,
            AlertTrigger::ConceptDrift { .. }
            | AlertTrigger::DataDrift { .. }
            | AlertTrigger::InsufficientData { .. } => Severity::Warn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drift::{
        ComparedKind, ConceptDrift, DriftStatus, DriftTest, FeatureDrift, MetricDrift,
    };

    fn feature(name: &str, psi: Option<f64>, ks: Option<f64>, status: DriftStatus) -> FeatureDrift {
        FeatureDrift {
            feature: name.to_string(),
            kind: ComparedKind::Numeric,
            baseline_count: 100,
            current_count: 100,
            psi,
            ks,
            triggered_by: if status == DriftStatus::Drifted {
                vec![DriftTest::Psi]
            } else {
                Vec::new()
            },
            status,
        }
    }

    fn report(features: Vec<FeatureDrift>) -> DriftReport {
        let flagged: Vec<String> = features
            .iter()
            .filter(|f| f.is_drifted())
            .map(|f| f.feature.clone())
            .collect();
        DriftReport {
            schema_version: 1,
            has_data_drift: !flagged.is_empty(),
            features,
            flagged,
            concept: None,
            has_concept_drift: false,
        }
    }

    fn stable(name: &str) -> FeatureDrift {
        feature(name, Some(0.01), Some(0.02), DriftStatus::Stable)
    }

    #[test]
    fn quiet_report_is_none() {
        let policy = AlertPolicy::new(AlertConfig::default());
        let r = report(vec![stable("a"), stable("b")]);
        assert_eq!(policy.classify(&r), Severity::None);
        assert!(policy.evaluate(&r).triggers.is_empty());
    }

    #[test]
    fn mild_drift_on_few_features_warns() {
        let policy = AlertPolicy::new(AlertConfig::default());
        let mut features: Vec<FeatureDrift> = (0..9).map(|i| stable(&format!("f{i}"))).collect();
        features.push(feature("x", Some(0.25), Some(0.05), DriftStatus::Drifted));
        assert_eq!(policy.classify(&report(features)), Severity::Warn);
    }

    #[test]
    fn large_psi_is_critical() {
        let policy = AlertPolicy::new(AlertConfig::default());
        let mut features: Vec<FeatureDrift> = (0..9).map(|i| stable(&format!("f{i}"))).collect();
        features.push(feature("x", Some(3.0), Some(0.05), DriftStatus::Drifted));
        let assessment = policy.evaluate(&report(features));
        assert_eq!(assessment.severity, Severity::Critical);
        assert!(assessment
            .triggers
            .iter()
            .any(|t| matches!(t, AlertTrigger::CriticalPsi { feature, .. } if feature == "x")));
    }

    #[test]
    fn wide_spread_drift_is_critical() {
        let policy = AlertPolicy::new(AlertConfig::default());
        let features = vec![
            feature("a", Some(0.25), Some(0.05), DriftStatus::Drifted),
            stable("b"),
        ];
        let assessment = policy.evaluate(&report(features));
        assert_eq!(assessment.severity, Severity::Critical);
        assert!(assessment
            .triggers
            .contains(&AlertTrigger::FlaggedShare { share: 0.5 }));
    }

    #[test]
    fn insufficient_data_warns_when_enabled() {
        let r = report(vec![stable("a"), feature("b", None, None, DriftStatus::InsufficientData)]);
        assert_eq!(AlertPolicy::new(AlertConfig::default()).classify(&r), Severity::Warn);
        let quiet = AlertConfig {
            warn_on_insufficient_data: false,
            ..AlertConfig::default()
        };
        assert_eq!(AlertPolicy::new(quiet).classify(&r), Severity::None);
    }

    #[test]
    fn concept_drift_escalates() {
        let mut r = report(vec![stable("a")]);
        r.concept = Some(ConceptDrift {
            metrics: vec![MetricDrift {
                metric: "pr_auc".into(),
                baseline: 0.8,
                current: 0.5,
                relative_drop: Some(0.375),
                degraded: true,
            }],
            has_concept_drift: true,
        });
        r.has_concept_drift = true;
        assert_eq!(AlertPolicy::new(AlertConfig::default()).classify(&r), Severity::Critical);
        let lenient = AlertConfig {
            concept_drift_critical: false,
            ..AlertConfig::default()
        };
        assert_eq!(AlertPolicy::new(lenient).classify(&r), Severity::Warn);
    }
}
