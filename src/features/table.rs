//! Feature tables: one schema-conformant row per identity plus snapshot metadata.

use super::{FeatureSchema, FeatureValue, FeatureVector};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub vector: FeatureVector,
    /// Training label; `None` for unlabelled (serving or monitoring) rows
    pub churned: Option<bool>,
}

/// Immutable once built. Row order carries no meaning.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    schema_version: u32,
    schema_fingerprint: String,
    snapshot_time: Option<DateTime<Utc>>,
    window_days: u32,
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    /// Snapshot time is the latest row snapshot; `None` for an empty table.
    pub fn new(schema: &FeatureSchema, window_days: u32, rows: Vec<FeatureRow>) -> Result<Self> {
        let snapshot_time = rows.iter().map(|r| r.vector.snapshot()).max();
        Self::with_snapshot(schema, window_days, snapshot_time, rows)
    }

    pub fn with_snapshot(
        schema: &FeatureSchema,
        window_days: u32,
        snapshot_time: Option<DateTime<Utc>>,
        rows: Vec<FeatureRow>,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for row in &rows {
            if !row.vector.conforms_to(schema) {
                schema.ensure_matches(row.vector.schema_version(), row.vector.schema_fingerprint())?;
            }
            if !seen.insert(row.vector.identity()) {
                return Err(Error::feature(format!(
                    "identity '{}' appears more than once",
                    row.vector.identity()
                )));
            }
        }
        Ok(Self {
            schema_version: schema.version(),
            schema_fingerprint: schema.fingerprint().to_string(),
            snapshot_time,
            window_days,
            rows,
        })
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn schema_fingerprint(&self) -> &str {
        &self.schema_fingerprint
    }

    pub fn snapshot_time(&self) -> Option<DateTime<Utc>> {
        self.snapshot_time
    }

    pub fn window_days(&self) -> u32 {
        self.window_days
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Hard error unless this table was produced under `schema`.
    pub fn ensure_schema(&self, schema: &FeatureSchema) -> Result<()> {
        schema.ensure_matches(self.schema_version, &self.schema_fingerprint)
    }

    /// Values of the feature at schema position `index`, one per row.
    pub fn column(&self, index: usize) -> impl Iterator<Item = &FeatureValue> + '_ {
        self.rows.iter().filter_map(move |r| r.vector.values().get(index))
    }

    /// Non-missing numeric values of a column.
    pub fn numeric_column(&self, index: usize) -> Vec<f64> {
        self.column(index).filter_map(FeatureValue::as_f64).collect()
    }

    /// Non-missing categories of a column.
    pub fn categorical_column(&self, index: usize) -> Vec<&str> {
        self.column(index).filter_map(FeatureValue::as_category).collect()
    }

    pub fn labels(&self) -> Vec<Option<bool>> {
        self.rows.iter().map(|r| r.churned).collect()
    }
}
