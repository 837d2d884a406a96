//! Leakage-safe windowed feature extraction from cleaned events.

mod behavioral;
mod pipeline;
pub mod schema;
mod table;

pub use behavioral::WindowStats;
pub use pipeline::{
    Aggregation, AggregatedIdentity, AggregationBatch, ChurnLabel, Exclusion, ExclusionReason,
    Window, WindowedAggregator,
};
pub use schema::{FeatureDef, FeatureKind, FeatureSchema, SchemaBuilder};
pub use table::{FeatureRow, FeatureTable};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One feature value. `Missing` is a sentinel distinct from a genuine zero and
/// is written as `null` in feature table files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Category(String),
    Missing,
}

impl FeatureValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_category(&self) -> Option<&str> {
        match self {
            FeatureValue::Category(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FeatureValue::Missing)
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Number(v)
    }
}

/// Schema-conformant features for one identity as of one snapshot time.
///
/// Only [`FeatureSchema`] constructs these, so `values` always lines up with
/// the declarations of the schema whose fingerprint the vector carries.
/// Serialize-only: reading vectors back goes through [`FeatureSchema::vector`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    identity: String,
    schema_version: u32,
    schema_fingerprint: String,
    snapshot: DateTime<Utc>,
    values: Vec<FeatureValue>,
}

impl FeatureVector {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn schema_fingerprint(&self) -> &str {
        &self.schema_fingerprint
    }

    /// Whether this vector was built under exactly `schema`.
    pub fn conforms_to(&self, schema: &FeatureSchema) -> bool {
        self.schema_version == schema.version() && self.schema_fingerprint == schema.fingerprint()
    }

    /// Time the features are valid as of (the identity's cutoff time).
    pub fn snapshot(&self) -> DateTime<Utc> {
        self.snapshot
    }

    pub fn values(&self) -> &[FeatureValue] {
        &self.values
    }

    pub fn get(&self, schema: &FeatureSchema, name: &str) -> Option<&FeatureValue> {
        schema.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Numeric value by name; `None` for missing, categorical or undeclared features.
    pub fn number(&self, schema: &FeatureSchema, name: &str) -> Option<f64> {
        self.get(schema, name).and_then(FeatureValue::as_f64)
    }
}
