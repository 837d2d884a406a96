//! Crate-wide error type.
//!
//! Only configuration and contract violations are errors. Data-quality outcomes
//! (dropped events, excluded identities, features without enough data for a
//! drift test) are ordinary return values.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A table or vector was produced under a different schema than the caller expects.
    #[error(
        "schema mismatch: expected v{expected_version} ({expected_fingerprint}), found v{found_version} ({found_fingerprint})"
    )]
    SchemaMismatch {
        expected_version: u32,
        found_version: u32,
        expected_fingerprint: String,
        found_fingerprint: String,
    },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("feature error: {0}")]
    Feature(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid payload: {0}")]
    Payload(String),

    #[error("feature table line {line}: {message}")]
    TableFormat { line: usize, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("matrix shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl Error {
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn feature(msg: impl Into<String>) -> Self {
        Self::Feature(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn payload(msg: impl Into<String>) -> Self {
        Self::Payload(msg.into())
    }

    pub fn table(line: usize, msg: impl Into<String>) -> Self {
        Self::TableFormat {
            line,
            message: msg.into(),
        }
    }

    /// True for errors that mean "wrong schema", which callers must never auto-migrate.
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(self, Self::SchemaMismatch { .. })
    }
}
