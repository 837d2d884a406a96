//! Feature extraction pipeline: identity events → leakage cutoff → window → stats → vector.

use super::{FeatureRow, FeatureSchema, FeatureTable, FeatureVector, WindowStats};
use crate::config::AggregationConfig;
use crate::error::{Error, Result};
use crate::events::{group_by_identity, CleanedEvent};
use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Admitted time range for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    /// Cutoff time; features are valid as of this instant
    pub end: DateTime<Utc>,
    /// The end is a terminal (churn) event and is itself excluded
    pub end_is_terminal: bool,
}

impl Window {
    pub fn admits(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && if self.end_is_terminal { ts < self.end } else { ts <= self.end }
    }
}

/// Training-time outcome. Never part of the served feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChurnLabel {
    /// A terminal event exists anywhere in the identity's history
    pub churned: bool,
    /// Non-terminal activity exists after the first terminal event
    pub resumed_after_churn: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    InsufficientSessions,
    InsufficientEvents,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::InsufficientSessions => "insufficient_sessions",
            ExclusionReason::InsufficientEvents => "insufficient_events",
        }
    }
}

/// An identity that failed the sparsity gate. Not a zero-valued vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub identity: String,
    pub reason: ExclusionReason,
    /// In-window counts that were checked
    pub event_count: usize,
    pub session_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedIdentity {
    pub vector: FeatureVector,
    pub label: ChurnLabel,
    pub window: Window,
    pub account_age_clamped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    Features(AggregatedIdentity),
    Excluded(Exclusion),
}

impl Aggregation {
    pub fn features(&self) -> Option<&AggregatedIdentity> {
        match self {
            Aggregation::Features(a) => Some(a),
            Aggregation::Excluded(_) => None,
        }
    }

    pub fn exclusion(&self) -> Option<&Exclusion> {
        match self {
            Aggregation::Excluded(e) => Some(e),
            Aggregation::Features(_) => None,
        }
    }
}

/// Result of aggregating a whole batch for training.
#[derive(Debug, Clone)]
pub struct AggregationBatch {
    /// Labelled rows, sorted by identity
    pub table: FeatureTable,
    pub exclusions: Vec<Exclusion>,
    /// Rows whose account age had to be clamped to 0
    pub clamped_account_ages: usize,
}

impl AggregationBatch {
    pub fn exclusion_counts(&self) -> BTreeMap<ExclusionReason, usize> {
        let mut counts = BTreeMap::new();
        for e in &self.exclusions {
            *counts.entry(e.reason).or_insert(0) += 1;
        }
        counts
    }
}

pub struct WindowedAggregator {
    config: AggregationConfig,
    schema: FeatureSchema,
}

impl WindowedAggregator {
    pub fn new(config: AggregationConfig, schema: FeatureSchema) -> Self {
        Self { config, schema }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    fn is_terminal(&self, e: &CleanedEvent) -> bool {
        e.page == self.config.churn_page
    }

    fn first_terminal(&self, events: &[CleanedEvent]) -> Option<DateTime<Utc>> {
        events.iter().filter(|e| self.is_terminal(e)).map(|e| e.ts).min()
    }

    /// First terminal event if any, otherwise the last event.
    pub fn training_reference_time(&self, events: &[CleanedEvent]) -> Option<DateTime<Utc>> {
        self.first_terminal(events)
            .or_else(|| events.iter().map(|e| e.ts).max())
    }

    /// Latest event time in the payload.
    pub fn serving_reference_time(events: &[CleanedEvent]) -> Option<DateTime<Utc>> {
        events.iter().map(|e| e.ts).max()
    }

    /// The window anchored at the cutoff: the first terminal event at or before
    /// `reference_time`, else `reference_time` itself.
    pub fn window(&self, events: &[CleanedEvent], reference_time: DateTime<Utc>) -> Window {
        let (end, end_is_terminal) = match self.first_terminal(events) {
            Some(t) if t <= reference_time => (t, true),
            _ => (reference_time, false),
        };
        // Saturates at the earliest representable instant
        let start = Duration::try_days(i64::from(self.config.lookback_days))
            .and_then(|lookback| end.checked_sub_signed(lookback))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Window {
            start,
            end,
            end_is_terminal,
        }
    }

    pub fn label(&self, events: &[CleanedEvent]) -> ChurnLabel {
        match self.first_terminal(events) {
            Some(t) => ChurnLabel {
                churned: true,
                resumed_after_churn: events.iter().any(|e| e.ts > t && !self.is_terminal(e)),
            },
            None => ChurnLabel {
                churned: false,
                resumed_after_churn: false,
            },
        }
    }

    /// Aggregate one identity's events as of `reference_time`.
    ///
    /// Input order does not matter. All events must share one identity.
    pub fn aggregate(
        &self,
        events: &[CleanedEvent],
        reference_time: DateTime<Utc>,
    ) -> Result<Aggregation> {
        let identity = single_identity(events)?;
        let window = self.window(events, reference_time);

        let mut admitted: Vec<&CleanedEvent> =
            events.iter().filter(|e| window.admits(e.ts)).collect();
        admitted.sort_by(|a, b| a.canonical_cmp(b));

        let registration = events.iter().filter_map(|e| e.registration).min();
        let stats = WindowStats::from_events(&admitted, window.end, registration);

        let reason = if stats.num_sessions < self.config.min_sessions_per_user {
            Some(ExclusionReason::InsufficientSessions)
        } else if stats.num_events < self.config.min_events_per_user {
            Some(ExclusionReason::InsufficientEvents)
        } else {
            None
        };
        if let Some(reason) = reason {
            debug!(identity, reason = reason.as_str(), "identity excluded");
            return Ok(Aggregation::Excluded(Exclusion {
                identity: identity.to_string(),
                reason,
                event_count: stats.num_events,
                session_count: stats.num_sessions,
            }));
        }

        if stats.account_age_clamped {
            warn!(identity, "registration after cutoff; account age clamped to 0");
        }
        let vector = self
            .schema
            .project(identity, window.end, &stats.to_features())?;
        Ok(Aggregation::Features(AggregatedIdentity {
            vector,
            label: self.label(events),
            window,
            account_age_clamped: stats.account_age_clamped,
        }))
    }

    /// Aggregate with the training reference time (first terminal event or last event).
    pub fn aggregate_for_training(&self, events: &[CleanedEvent]) -> Result<Aggregation> {
        let reference = self
            .training_reference_time(events)
            .ok_or_else(|| Error::payload("no events to aggregate"))?;
        self.aggregate(events, reference)
    }

    /// Aggregate a serving payload: one identity, reference = latest event time.
    pub fn aggregate_serving(&self, events: &[CleanedEvent]) -> Result<Aggregation> {
        let reference = Self::serving_reference_time(events)
            .ok_or_else(|| Error::payload("no events to aggregate"))?;
        self.aggregate(events, reference)
    }

    /// Aggregate every identity in a cleaned batch into a labelled table.
    ///
    /// Identities are independent, so they are processed in parallel; row order
    /// is by identity regardless of scheduling.
    pub fn aggregate_all(&self, events: Vec<CleanedEvent>) -> Result<AggregationBatch> {
        let groups: Vec<(String, Vec<CleanedEvent>)> =
            group_by_identity(events).into_iter().collect();
        let outcomes: Vec<Result<Aggregation>> = groups
            .par_iter()
            .map(|(_, events)| self.aggregate_for_training(events))
            .collect();

        let mut rows = Vec::new();
        let mut exclusions = Vec::new();
        let mut clamped_account_ages = 0;
        for outcome in outcomes {
            match outcome? {
                Aggregation::Features(a) => {
                    if a.account_age_clamped {
                        clamped_account_ages += 1;
                    }
                    rows.push(FeatureRow {
                        vector: a.vector,
                        churned: Some(a.label.churned),
                    });
                }
                Aggregation::Excluded(e) => exclusions.push(e),
            }
        }

        let table = FeatureTable::new(&self.schema, self.config.lookback_days, rows)?;
        let batch = AggregationBatch {
            table,
            exclusions,
            clamped_account_ages,
        };
        info!(
            identities = groups.len(),
            rows = batch.table.len(),
            excluded = batch.exclusions.len(),
            clamped = clamped_account_ages,
            "aggregated feature table"
        );
        for (reason, count) in batch.exclusion_counts() {
            debug!(reason = reason.as_str(), count, "excluded identities");
        }
        Ok(batch)
    }
}

fn single_identity(events: &[CleanedEvent]) -> Result<&str> {
    let first = events
        .first()
        .ok_or_else(|| Error::payload("no events to aggregate"))?;
    if let Some(other) = events.iter().find(|e| e.user_id != first.user_id) {
        return Err(Error::payload(format!(
            "events must belong to a single identity, found '{}' and '{}'",
            first.user_id, other.user_id
        )));
    }
    Ok(&first.user_id)
}
