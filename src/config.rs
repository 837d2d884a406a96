//! Scorer configuration. Every component receives its section explicitly; nothing here is global.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Page name that marks an identity as churned.
pub const DEFAULT_CHURN_PAGE: &str = "Cancellation Confirmation";

/// Upper bound on `features.lookback_days` (ten years).
pub const MAX_LOOKBACK_DAYS: u32 = 3_650;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Windowed aggregation and sparsity gate
    pub features: AggregationConfig,
    /// Per-feature and performance drift thresholds
    pub drift: DriftConfig,
    /// Severity classification of drift reports
    pub alert: AlertConfig,
    /// Probability → label decision for served scores
    pub scoring: ScoringConfig,
    /// Logging
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Lookback window length in days, anchored at the cutoff time
    pub lookback_days: u32,
    /// Identities with fewer in-window events are excluded
    pub min_events_per_user: usize,
    /// Identities with fewer in-window sessions are excluded
    pub min_sessions_per_user: usize,
    /// Terminal page that defines churn and the leakage cutoff
    pub churn_page: String,
    /// Emit the one-hot gender features
    pub include_gender: bool,
    /// Emit the current subscription level feature
    pub include_level: bool,
    /// Emit the distinct location count
    pub include_location: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// A feature is flagged when its PSI exceeds this
    pub psi_threshold: f64,
    /// A numeric feature is flagged when its KS statistic exceeds this
    pub ks_threshold: f64,
    /// Number of quantile bins derived from the baseline
    pub psi_bins: usize,
    /// Floor applied to empty bin fractions
    pub psi_epsilon: f64,
    /// Relative performance drop that counts as concept drift
    pub performance_drop_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Any feature PSI at or above this is critical
    pub critical_psi: f64,
    /// Any feature KS at or above this is critical
    pub critical_ks: f64,
    /// Share of drift-comparable features flagged that is critical (0.0–1.0)
    pub critical_flagged_share: f64,
    /// Concept drift escalates straight to critical
    pub concept_drift_critical: bool,
    /// Features that could not be compared raise a warning
    pub warn_on_insufficient_data: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Probability at or above this is labelled churn (0.0–1.0)
    pub decision_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            min_events_per_user: 15,
            min_sessions_per_user: 2,
            churn_page: DEFAULT_CHURN_PAGE.to_string(),
            include_gender: true,
            include_level: true,
            include_location: false,
        }
    }
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            psi_threshold: 0.2,
            ks_threshold: 0.1,
            psi_bins: 10,
            psi_epsilon: 1e-6,
            performance_drop_threshold: 0.1,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            critical_psi: 0.5,
            critical_ks: 0.3,
            critical_flagged_share: 0.3,
            concept_drift_critical: true,
            warn_on_insufficient_data: true,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            decision_threshold: 0.5,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

impl ScorerConfig {
    /// Load from a JSON file if present; otherwise return the defaults.
    ///
    /// A file that exists but does not parse or validate is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config: ScorerConfig = serde_json::from_str(&data)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.features.validate()?;
        self.drift.validate()?;
        self.alert.validate()?;
        self.scoring.validate()
    }
}

impl AggregationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lookback_days == 0 || self.lookback_days > MAX_LOOKBACK_DAYS {
            return Err(Error::config(format!(
                "features.lookback_days must be between 1 and {MAX_LOOKBACK_DAYS}, got {}",
                self.lookback_days
            )));
        }
        if self.churn_page.trim().is_empty() {
            return Err(Error::config("features.churn_page must not be empty"));
        }
        Ok(())
    }
}

impl DriftConfig {
    pub fn validate(&self) -> Result<()> {
        positive("drift.psi_threshold", self.psi_threshold)?;
        positive("drift.ks_threshold", self.ks_threshold)?;
        positive("drift.performance_drop_threshold", self.performance_drop_threshold)?;
        if self.psi_bins < 2 {
            return Err(Error::config("drift.psi_bins must be at least 2"));
        }
        if !(self.psi_epsilon > 0.0 && self.psi_epsilon < 1.0) {
            return Err(Error::config("drift.psi_epsilon must be in (0, 1)"));
        }
        Ok(())
    }
}

impl AlertConfig {
    pub fn validate(&self) -> Result<()> {
        positive("alert.critical_psi", self.critical_psi)?;
        positive("alert.critical_ks", self.critical_ks)?;
        if !(self.critical_flagged_share > 0.0 && self.critical_flagged_share <= 1.0) {
            return Err(Error::config("alert.critical_flagged_share must be in (0, 1]"));
        }
        Ok(())
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.decision_threshold) {
            return Err(Error::config("scoring.decision_threshold must be in [0, 1]"));
        }
        Ok(())
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::config(format!("{name} must be a positive number, got {value}")))
    }
}
