//! Activity events: untrusted raw records and their normalized form.

mod normalizer;

pub use normalizer::{DropReason, EventNormalizer, NormalizationReport, NormalizedBatch};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One raw event-log record, exactly as received.
///
/// Fields that are numeric in a healthy log are kept as loose JSON values so a
/// malformed field does not reject the whole record; the normalizer decides.
/// Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawEvent {
    pub user_id: Option<Value>,
    pub session_id: Option<Value>,
    pub item_in_session: Option<Value>,
    /// Event time, epoch milliseconds
    pub ts: Option<Value>,
    /// Registration time, epoch milliseconds
    pub registration: Option<Value>,
    pub page: Option<String>,
    pub level: Option<String>,
    pub gender: Option<String>,
    pub location: Option<String>,
    pub artist: Option<String>,
    pub song: Option<String>,
    /// Song duration in seconds
    pub length: Option<Value>,
}

/// Subscription level, closed vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Free,
    Paid,
    Unknown,
}

impl Level {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "free" => Level::Free,
            "paid" => Level::Paid,
            _ => Level::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Free => "free",
            Level::Paid => "paid",
            Level::Unknown => "unknown",
        }
    }
}

/// A normalized event. Identity is non-empty, times are absolute, and
/// `registration <= ts` whenever a registration time is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedEvent {
    pub user_id: String,
    pub session_id: Option<i64>,
    pub item_in_session: Option<i64>,
    pub ts: DateTime<Utc>,
    /// Earliest registration time observed for this identity
    pub registration: Option<DateTime<Utc>>,
    pub page: String,
    pub level: Level,
    pub gender: Option<String>,
    pub location: Option<String>,
    pub artist: Option<String>,
    pub song: Option<String>,
    /// Seconds
    pub length: Option<f64>,
}

impl CleanedEvent {
    /// Total order over every field: identity, time, session, position first.
    ///
    /// Used to sort batches and to choose deterministically between duplicates.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.user_id
            .cmp(&other.user_id)
            .then_with(|| self.ts.cmp(&other.ts))
            .then_with(|| self.session_id.cmp(&other.session_id))
            .then_with(|| self.item_in_session.cmp(&other.item_in_session))
            .then_with(|| self.page.cmp(&other.page))
            .then_with(|| self.level.cmp(&other.level))
            .then_with(|| self.registration.cmp(&other.registration))
            .then_with(|| self.gender.cmp(&other.gender))
            .then_with(|| self.location.cmp(&other.location))
            .then_with(|| self.artist.cmp(&other.artist))
            .then_with(|| self.song.cmp(&other.song))
            .then_with(|| cmp_opt_f64(self.length, other.length))
    }

    pub(crate) fn dedup_key(&self) -> (String, Option<i64>, Option<i64>, DateTime<Utc>) {
        (
            self.user_id.clone(),
            self.session_id,
            self.item_in_session,
            self.ts,
        )
    }
}

fn cmp_opt_f64(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (a, b) => a.is_some().cmp(&b.is_some()),
    }
}

/// Split a batch into per-identity event lists. Each list keeps canonical order.
pub fn group_by_identity(events: Vec<CleanedEvent>) -> BTreeMap<String, Vec<CleanedEvent>> {
    let mut groups: BTreeMap<String, Vec<CleanedEvent>> = BTreeMap::new();
    for e in events {
        groups.entry(e.user_id.clone()).or_default().push(e);
    }
    for list in groups.values_mut() {
        list.sort_by(|a, b| a.canonical_cmp(b));
    }
    groups
}
