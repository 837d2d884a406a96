//! Structured logging setup and ndjson report output.

mod format;

pub use format::{ReportLine, StructuredLogger};
