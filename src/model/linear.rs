//! Logistic regression stored as JSON.

use super::{ChurnClassifier, DesignMatrix};
use crate::error::{Error, Result};
use crate::features::FeatureSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// `sigmoid(intercept + Σ wᵢxᵢ)`. `NaN` inputs contribute nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub schema_version: u32,
    pub schema_fingerprint: String,
    /// Design-matrix column names, in order
    pub columns: Vec<String>,
    pub weights: Vec<f64>,
    pub intercept: f64,
}

impl LogisticModel {
    pub fn load(path: &Path, schema: &FeatureSchema) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let model: Self = serde_json::from_str(&content)?;
        model.validate(schema)?;
        tracing::info!(path = %path.display(), columns = model.columns.len(), "loaded churn model");
        Ok(model)
    }

    pub fn validate(&self, schema: &FeatureSchema) -> Result<()> {
        schema.ensure_matches(self.schema_version, &self.schema_fingerprint)?;
        if self.columns != DesignMatrix::columns_for(schema) {
            return Err(Error::schema("model columns do not match the feature schema"));
        }
        if self.weights.len() != self.columns.len() {
            return Err(Error::schema(format!(
                "model has {} weights for {} columns",
                self.weights.len(),
                self.columns.len()
            )));
        }
        Ok(())
    }
}

impl ChurnClassifier for LogisticModel {
    fn predict_proba(&self, row: &[f64]) -> f64 {
        let z: f64 = self.intercept
            + self
                .weights
                .iter()
                .zip(row)
                .filter(|(_, x)| x.is_finite())
                .map(|(w, x)| w * x)
                .sum::<f64>();
        1.0 / (1.0 + (-z).exp())
    }
}
