//! Feature table file: ndjson, one header object then one JSON array per identity.
//!
//! ```text
//! {"format":"churn-feature-table/v1","schema_version":1,"schema_fingerprint":"…","snapshot_time":"…","window_days":30,"columns":[…]}
//! [1,"42",1538352117000,0,…]
//! ```
//!
//! Row columns: `schema_version`, `user_id`, `snapshot_ts` (epoch ms), `churned`
//! (1, 0 or null), then the schema's features in declaration order. Missing
//! feature values are `null`.

use crate::error::{Error, Result};
use crate::features::{FeatureDef, FeatureKind, FeatureRow, FeatureSchema, FeatureTable, FeatureValue};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

pub const TABLE_FORMAT: &str = "churn-feature-table/v1";

const META_COLUMNS: [&str; 4] = ["schema_version", "user_id", "snapshot_ts", "churned"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableHeader {
    pub format: String,
    pub schema_version: u32,
    pub schema_fingerprint: String,
    pub snapshot_time: Option<DateTime<Utc>>,
    pub window_days: u32,
    pub columns: Vec<String>,
}

impl TableHeader {
    fn for_schema(schema: &FeatureSchema, table: &FeatureTable) -> Self {
        Self {
            format: TABLE_FORMAT.to_string(),
            schema_version: table.schema_version(),
            schema_fingerprint: table.schema_fingerprint().to_string(),
            snapshot_time: table.snapshot_time(),
            window_days: table.window_days(),
            columns: expected_columns(schema),
        }
    }
}

fn expected_columns(schema: &FeatureSchema) -> Vec<String> {
    META_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(schema.names().map(str::to_string))
        .collect()
}

/// Write `table` to `path`, replacing any existing file.
pub fn write_table(path: &Path, table: &FeatureTable, schema: &FeatureSchema) -> Result<()> {
    table.ensure_schema(schema)?;
    let mut w = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut w, &TableHeader::for_schema(schema, table))?;
    writeln!(w)?;
    for row in table.rows() {
        let v = &row.vector;
        let mut cells: Vec<Value> = Vec::with_capacity(META_COLUMNS.len() + v.values().len());
        cells.push(Value::from(v.schema_version()));
        cells.push(Value::from(v.identity()));
        cells.push(Value::from(v.snapshot().timestamp_millis()));
        cells.push(row.churned.map_or(Value::Null, |c| Value::from(u8::from(c))));
        for value in v.values() {
            cells.push(serde_json::to_value(value)?);
        }
        serde_json::to_writer(&mut w, &cells)?;
        writeln!(w)?;
    }
    w.flush()?;
    info!(path = %path.display(), rows = table.len(), "wrote feature table");
    Ok(())
}

/// Read a table written under `schema`. Any other schema version or layout is rejected.
pub fn read_table(path: &Path, schema: &FeatureSchema) -> Result<FeatureTable> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines().enumerate();

    let header: TableHeader = match lines.next() {
        Some((_, line)) => serde_json::from_str(&line?).map_err(|e| Error::table(1, e.to_string()))?,
        None => return Err(Error::table(1, "missing header")),
    };
    if header.format != TABLE_FORMAT {
        return Err(Error::table(1, format!("unsupported format '{}'", header.format)));
    }
    schema.ensure_matches(header.schema_version, &header.schema_fingerprint)?;
    if header.columns != expected_columns(schema) {
        return Err(Error::table(1, "column list does not match the feature schema"));
    }

    let mut rows = Vec::new();
    for (i, line) in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(parse_row(&line, schema).map_err(|msg| Error::table(i + 1, msg))?);
    }
    let table = FeatureTable::with_snapshot(schema, header.window_days, header.snapshot_time, rows)?;
    info!(path = %path.display(), rows = table.len(), "read feature table");
    Ok(table)
}

fn parse_row(line: &str, schema: &FeatureSchema) -> std::result::Result<FeatureRow, String> {
    let cells: Vec<Value> = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let expected = META_COLUMNS.len() + schema.len();
    if cells.len() != expected {
        return Err(format!("expected {} columns, found {}", expected, cells.len()));
    }

    let version = cells[0]
        .as_u64()
        .ok_or_else(|| "schema_version must be an integer".to_string())?;
    if version != u64::from(schema.version()) {
        return Err(format!(
            "row schema version {} does not match v{}",
            version,
            schema.version()
        ));
    }
    let identity = cells[1]
        .as_str()
        .ok_or_else(|| "user_id must be a string".to_string())?;
    let snapshot = cells[2]
        .as_i64()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .ok_or_else(|| "snapshot_ts must be epoch milliseconds".to_string())?;
    let churned = match &cells[3] {
        Value::Null => None,
        v => match v.as_u64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => return Err("churned must be 0, 1 or null".to_string()),
        },
    };

    let values = schema
        .features()
        .iter()
        .zip(&cells[META_COLUMNS.len()..])
        .map(|(def, cell)| parse_value(def, cell))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let vector = schema
        .vector(identity, snapshot, values)
        .map_err(|e| e.to_string())?;
    Ok(FeatureRow { vector, churned })
}

fn parse_value(def: &FeatureDef, cell: &Value) -> std::result::Result<FeatureValue, String> {
    match (&def.kind, cell) {
        (_, Value::Null) => Ok(FeatureValue::Missing),
        (FeatureKind::Numeric, Value::Number(n)) => n
            .as_f64()
            .map(FeatureValue::Number)
            .ok_or_else(|| format!("'{}' is out of range", def.name)),
        (FeatureKind::Categorical { .. }, Value::String(s)) => Ok(FeatureValue::Category(s.clone())),
        _ => Err(format!("'{}' has a value of the wrong kind", def.name)),
    }
}
