//! JSON log lines: one JSON object per line (ndjson).
//!
//! Diagnostics go through `tracing` to stderr; reports go to stdout as
//! [`ReportLine`]s so they can be piped without filtering log noise.

use crate::config::LogConfig;
use chrono::Utc;
use serde::Serialize;
use std::io::Write;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// One report emitted by the binary, e.g. a drift report or an alert assessment.
#[derive(Debug, Serialize)]
pub struct ReportLine<'a, T: Serialize> {
    pub ts: String,
    pub kind: &'a str,
    pub report: &'a T,
}

impl<'a, T: Serialize> ReportLine<'a, T> {
    pub fn new(kind: &'a str, report: &'a T) -> Self {
        Self {
            ts: Utc::now().to_rfc3339(),
            kind,
            report,
        }
    }
}

pub struct StructuredLogger;

impl StructuredLogger {
    /// Install the global subscriber; level from `RUST_LOG` or the configured default.
    ///
    /// Returns false if a subscriber was already installed.
    pub fn init(config: &LogConfig) -> bool {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
        if config.json {
            let fmt = tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::NONE)
                .with_writer(std::io::stderr);
            tracing_subscriber::registry().with(filter).with(fmt).try_init().is_ok()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .is_ok()
        }
    }

    /// Write a single JSON line without going through tracing.
    pub fn emit_json(event: &impl Serialize, w: &mut impl Write) -> std::io::Result<()> {
        let line = serde_json::to_string(event).map_err(std::io::Error::from)?;
        writeln!(w, "{}", line)
    }
}
