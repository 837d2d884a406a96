//! Feature tables → numeric model input.

use crate::error::Result;
use crate::features::{FeatureKind, FeatureSchema, FeatureTable, FeatureValue, FeatureVector};
use ndarray::Array2;

/// Numeric input for a classifier: one row per identity.
///
/// Categorical features are one-hot encoded over their declared vocabulary
/// (`<feature>=<category>` columns); missing values are `NaN`.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    pub columns: Vec<String>,
    pub identities: Vec<String>,
    pub values: Array2<f64>,
    /// Present only when every row carries a label
    pub labels: Option<Vec<bool>>,
}

impl DesignMatrix {
    /// Column names a schema expands to.
    pub fn columns_for(schema: &FeatureSchema) -> Vec<String> {
        let mut columns = Vec::new();
        for def in schema.features() {
            match &def.kind {
                FeatureKind::Numeric => columns.push(def.name.clone()),
                FeatureKind::Categorical { categories } => {
                    columns.extend(categories.iter().map(|c| format!("{}={}", def.name, c)))
                }
            }
        }
        columns
    }

    pub fn from_table(table: &FeatureTable, schema: &FeatureSchema) -> Result<Self> {
        table.ensure_schema(schema)?;
        let vectors: Vec<&FeatureVector> = table.rows().iter().map(|r| &r.vector).collect();
        let mut matrix = Self::from_vectors(&vectors, schema)?;
        matrix.labels = table.rows().iter().map(|r| r.churned).collect();
        Ok(matrix)
    }

    pub fn from_vectors(vectors: &[&FeatureVector], schema: &FeatureSchema) -> Result<Self> {
        let columns = Self::columns_for(schema);
        let mut data = Vec::with_capacity(vectors.len() * columns.len());
        for v in vectors {
            if !v.conforms_to(schema) {
                schema.ensure_matches(v.schema_version(), v.schema_fingerprint())?;
            }
            for (def, value) in schema.features().iter().zip(v.values()) {
                encode(&def.kind, value, &mut data);
            }
        }
        let values = Array2::from_shape_vec((vectors.len(), columns.len()), data)?;
        Ok(Self {
            columns,
            identities: vectors.iter().map(|v| v.identity().to_string()).collect(),
            values,
            labels: None,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }
}

fn encode(kind: &FeatureKind, value: &FeatureValue, out: &mut Vec<f64>) {
    match kind {
        FeatureKind::Numeric => out.push(value.as_f64().unwrap_or(f64::NAN)),
        FeatureKind::Categorical { categories } => match value.as_category() {
            Some(c) => out.extend(categories.iter().map(|k| if k == c { 1.0 } else { 0.0 })),
            None => out.extend(std::iter::repeat(f64::NAN).take(categories.len())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureRow, FeatureSchema};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn schema() -> FeatureSchema {
        FeatureSchema::builder(1)
            .numeric("events", FeatureValue::Missing, true)
            .categorical("level", &["free", "paid"], FeatureValue::Missing, true)
            .build()
            .unwrap()
    }

    #[test]
    fn one_hot_and_nan_encoding() {
        let s = schema();
        let mut computed = BTreeMap::new();
        computed.insert("level", FeatureValue::Category("paid".into()));
        let a = s.project("a", Utc::now(), &computed).unwrap();
        let mut computed = BTreeMap::new();
        computed.insert("events", FeatureValue::Number(20.0));
        let b = s.project("b", Utc::now(), &computed).unwrap();

        let table = FeatureTable::new(
            &s,
            30,
            vec![
                FeatureRow { vector: a, churned: Some(true) },
                FeatureRow { vector: b, churned: Some(false) },
            ],
        )
        .unwrap();
        let m = DesignMatrix::from_table(&table, &s).unwrap();
        assert_eq!(m.columns, vec!["events", "level=free", "level=paid"]);
        assert_eq!(m.values.shape(), &[2, 3]);
        assert!(m.values[[0, 0]].is_nan());
        assert_eq!(m.values[[0, 1]], 0.0);
        assert_eq!(m.values[[0, 2]], 1.0);
        assert_eq!(m.values[[1, 0]], 20.0);
        assert!(m.values[[1, 1]].is_nan());
        assert_eq!(m.labels, Some(vec![true, false]));
    }

    #[test]
    fn vectors_from_a_same_version_layout_are_rejected() {
        let s = schema();
        let other = FeatureSchema::builder(1)
            .categorical("level", &["free", "paid"], FeatureValue::Missing, true)
            .numeric("events", FeatureValue::Missing, true)
            .build()
            .unwrap();
        let v = other.project("a", Utc::now(), &BTreeMap::new()).unwrap();
        let err = DesignMatrix::from_vectors(&[&v], &s).unwrap_err();
        assert!(err.is_schema_mismatch());
    }

    #[test]
    fn unlabelled_rows_drop_labels() {
        let s = schema();
        let v = s.project("a", Utc::now(), &BTreeMap::new()).unwrap();
        let table = FeatureTable::new(&s, 30, vec![FeatureRow { vector: v, churned: None }]).unwrap();
        assert_eq!(DesignMatrix::from_table(&table, &s).unwrap().labels, None);
    }
}
