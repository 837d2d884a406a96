//! Churn Scorer: leakage-safe churn features and drift monitoring.
//!
//! Modular structure:
//! - [`events`]: Raw event normalization (coercion, dedup, registration invariant)
//! - [`features`]: Versioned feature schema and windowed per-identity aggregation
//! - [`drift`]: PSI/KS data drift and performance (concept) drift
//! - [`alert`]: Drift report → severity
//! - [`model`]: Design matrices, classifier boundary, serving
//! - [`storage`]: Event log reader and feature table files
//! - [`logging`]: Structured JSON logging

pub mod alert;
pub mod config;
pub mod drift;
pub mod error;
pub mod events;
pub mod features;
pub mod logging;
pub mod model;
pub mod storage;

pub use alert::{AlertPolicy, Severity};
pub use config::ScorerConfig;
pub use drift::{DriftEngine, DriftReport};
pub use error::{Error, Result};
pub use events::{CleanedEvent, EventNormalizer, RawEvent};
pub use features::{FeatureSchema, FeatureTable, FeatureVector, WindowedAggregator};
pub use logging::StructuredLogger;
