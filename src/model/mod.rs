//! Model boundary: design matrices in, churn probabilities out.
//!
//! Training happens elsewhere; anything implementing [`ChurnClassifier`] can be
//! scored against feature tables built here.

mod design;
mod linear;

pub use design::DesignMatrix;
pub use linear::LogisticModel;

use crate::error::{Error, Result};
use crate::events::{EventNormalizer, NormalizationReport, RawEvent};
use crate::features::{Aggregation, WindowedAggregator};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A trained binary classifier over one design-matrix row.
pub trait ChurnClassifier: Send + Sync {
    /// Probability of churn in [0, 1]. Missing inputs arrive as `NaN`.
    fn predict_proba(&self, row: &[f64]) -> f64;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub identity: String,
    pub churn_probability: f64,
    pub churn_label: bool,
}

/// Score every row; a probability at or above `threshold` predicts churn.
pub fn score(
    model: &dyn ChurnClassifier,
    matrix: &DesignMatrix,
    threshold: f64,
) -> Vec<Prediction> {
    matrix
        .values
        .rows()
        .into_iter()
        .zip(&matrix.identities)
        .map(|(row, identity)| {
            let p = match row.as_slice() {
                Some(slice) => model.predict_proba(slice),
                None => model.predict_proba(&row.to_vec()),
            };
            let p = p.clamp(0.0, 1.0);
            Prediction {
                identity: identity.clone(),
                churn_probability: p,
                churn_label: p >= threshold,
            }
        })
        .collect()
}

/// Feature extraction result for one serving payload.
#[derive(Debug, Clone)]
pub struct ServingOutcome {
    pub normalization: NormalizationReport,
    /// Features, or the reason the identity cannot be scored yet
    pub aggregation: Aggregation,
}

/// Build the served feature vector for one identity's raw events.
///
/// The reference time is the payload's latest event; the payload must hold a
/// single identity with at least one usable event.
pub fn serve(
    raw: &[RawEvent],
    normalizer: &EventNormalizer,
    aggregator: &WindowedAggregator,
) -> Result<ServingOutcome> {
    let batch = normalizer.normalize(raw);
    if batch.events.is_empty() {
        return Err(Error::payload(format!(
            "no usable events in payload ({} dropped)",
            batch.report.dropped_total()
        )));
    }
    let aggregation = aggregator.aggregate_serving(&batch.events)?;
    match &aggregation {
        Aggregation::Features(a) => debug!(identity = a.vector.identity(), "served features"),
        Aggregation::Excluded(e) => {
            info!(identity = %e.identity, reason = e.reason.as_str(), "serving payload too sparse")
        }
    }
    Ok(ServingOutcome {
        normalization: batch.report,
        aggregation,
    })
}
