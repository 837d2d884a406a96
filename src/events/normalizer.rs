//! Raw events → cleaned events: coercion, vocabulary enforcement, deduplication.

use super::{CleanedEvent, Level, RawEvent};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Identity values that mean "no identity".
const PLACEHOLDER_IDENTITIES: &[&str] = &["none", "null", "nan", "undefined"];

/// f64 values beyond this cannot be represented as i64 milliseconds.
const I64_SAFE_LIMIT: f64 = 9.0e18;

/// Why a record did not make it into the cleaned batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Record could not be parsed at all (reported by the log reader)
    MalformedRecord,
    MissingIdentity,
    BadTimestamp,
    Duplicate,
    /// Event time precedes the identity's registration time
    PreRegistration,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::MalformedRecord => "malformed_record",
            DropReason::MissingIdentity => "missing_identity",
            DropReason::BadTimestamp => "bad_timestamp",
            DropReason::Duplicate => "duplicate",
            DropReason::PreRegistration => "pre_registration",
        }
    }
}

/// Row accounting for one normalization run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizationReport {
    pub input_rows: usize,
    pub kept: usize,
    pub dropped: BTreeMap<DropReason, usize>,
    /// Present numeric fields that failed to parse and became missing
    pub coerced_to_missing: usize,
    /// Present level values outside {free, paid}
    pub unknown_levels: usize,
}

impl NormalizationReport {
    pub fn dropped_total(&self) -> usize {
        self.dropped.values().sum()
    }

    pub fn dropped_for(&self, reason: DropReason) -> usize {
        self.dropped.get(&reason).copied().unwrap_or(0)
    }

    /// Account for records the reader could not parse.
    pub fn record_malformed(&mut self, count: usize) {
        if count > 0 {
            self.input_rows += count;
            *self.dropped.entry(DropReason::MalformedRecord).or_insert(0) += count;
        }
    }

    fn drop(&mut self, reason: DropReason) {
        *self.dropped.entry(reason).or_insert(0) += 1;
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedBatch {
    /// Sorted by identity, time, session, position
    pub events: Vec<CleanedEvent>,
    pub report: NormalizationReport,
}

/// Stateless cleaner for raw event records.
#[derive(Debug, Clone, Default)]
pub struct EventNormalizer {
    extra_placeholders: Vec<String>,
}

impl EventNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat additional identity tokens as placeholders (compared case-insensitively).
    pub fn with_placeholders<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_placeholders
            .extend(tokens.into_iter().map(|t| t.into().to_ascii_lowercase()));
        self
    }

    pub fn normalize(&self, raw: &[RawEvent]) -> NormalizedBatch {
        let mut report = NormalizationReport {
            input_rows: raw.len(),
            ..Default::default()
        };

        let mut parsed = Vec::with_capacity(raw.len());
        for r in raw {
            match self.clean_one(r, &mut report) {
                Ok(e) => parsed.push(e),
                Err(reason) => report.drop(reason),
            }
        }

        // An event older than its own registration is dropped before it can
        // influence the identity's registration time or win a duplicate tie.
        let mut consistent = Vec::with_capacity(parsed.len());
        for e in parsed {
            match e.registration {
                Some(reg) if e.ts < reg => report.drop(DropReason::PreRegistration),
                _ => consistent.push(e),
            }
        }

        // Earliest registration per identity, over the surviving records.
        let mut registrations: HashMap<String, DateTime<Utc>> = HashMap::new();
        for e in &consistent {
            if let Some(reg) = e.registration {
                registrations
                    .entry(e.user_id.clone())
                    .and_modify(|cur| *cur = (*cur).min(reg))
                    .or_insert(reg);
            }
        }

        let mut unique: BTreeMap<_, CleanedEvent> = BTreeMap::new();
        for mut e in consistent {
            e.registration = registrations.get(&e.user_id).copied();
            if e.registration.is_some_and(|reg| e.ts < reg) {
                report.drop(DropReason::PreRegistration);
                continue;
            }
            match unique.entry(e.dedup_key()) {
                std::collections::btree_map::Entry::Vacant(slot) => {
                    slot.insert(e);
                }
                std::collections::btree_map::Entry::Occupied(mut slot) => {
                    report.drop(DropReason::Duplicate);
                    if e.canonical_cmp(slot.get()).is_lt() {
                        slot.insert(e);
                    }
                }
            }
        }

        let mut events: Vec<CleanedEvent> = unique.into_values().collect();
        events.sort_by(|a, b| a.canonical_cmp(b));
        report.kept = events.len();

        info!(
            input = report.input_rows,
            kept = report.kept,
            dropped = report.dropped_total(),
            "normalized event batch"
        );
        for (reason, count) in &report.dropped {
            debug!(reason = reason.as_str(), count, "dropped events");
        }

        NormalizedBatch { events, report }
    }

    fn clean_one(
        &self,
        r: &RawEvent,
        report: &mut NormalizationReport,
    ) -> Result<CleanedEvent, DropReason> {
        let user_id = r
            .user_id
            .as_ref()
            .and_then(|v| self.identity(v))
            .ok_or(DropReason::MissingIdentity)?;
        let ts = r
            .ts
            .as_ref()
            .and_then(coerce_millis)
            .ok_or(DropReason::BadTimestamp)?;

        let mut missing = 0usize;
        let mut loose = |field: &Option<Value>, coerce: fn(&Value) -> Option<f64>| match field {
            None | Some(Value::Null) => None,
            Some(v) => {
                let out = coerce(v);
                if out.is_none() {
                    missing += 1;
                }
                out
            }
        };
        let session_id = loose(&r.session_id, coerce_integral).map(|v| v as i64);
        let item_in_session = loose(&r.item_in_session, coerce_integral).map(|v| v as i64);
        let length = loose(&r.length, coerce_f64);
        let registration = match &r.registration {
            None | Some(Value::Null) => None,
            Some(v) => {
                let out = coerce_millis(v);
                if out.is_none() {
                    missing += 1;
                }
                out
            }
        };
        report.coerced_to_missing += missing;

        let level = match r.level.as_deref() {
            Some(raw) => {
                let level = Level::parse(raw);
                if level == Level::Unknown {
                    report.unknown_levels += 1;
                }
                level
            }
            None => Level::Unknown,
        };

        Ok(CleanedEvent {
            user_id,
            session_id,
            item_in_session,
            ts,
            registration,
            page: r.page.as_deref().map(str::trim).unwrap_or_default().to_string(),
            level,
            gender: non_empty(&r.gender),
            location: non_empty(&r.location),
            artist: non_empty(&r.artist),
            song: non_empty(&r.song),
            length,
        })
    }

    fn identity(&self, v: &Value) -> Option<String> {
        let id = match v {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let lowered = id.to_ascii_lowercase();
        if id.is_empty()
            || PLACEHOLDER_IDENTITIES.contains(&lowered.as_str())
            || self.extra_placeholders.iter().any(|p| *p == lowered)
        {
            return None;
        }
        Some(id)
    }
}

fn non_empty(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn coerce_f64(v: &Value) -> Option<f64> {
    let f = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    f.is_finite().then_some(f)
}

/// Integral numbers only; `"3"` and `3.0` qualify, `3.5` does not.
fn coerce_integral(v: &Value) -> Option<f64> {
    if let Value::Number(n) = v {
        if let Some(i) = n.as_i64() {
            return Some(i as f64);
        }
    }
    coerce_f64(v).filter(|f| f.fract() == 0.0 && f.abs() < I64_SAFE_LIMIT)
}

fn coerce_millis(v: &Value) -> Option<DateTime<Utc>> {
    let ms = match v {
        Value::Number(n) => match n.as_i64() {
            Some(i) => i,
            None => coerce_integral(v)? as i64,
        },
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(i) => i,
            Err(_) => coerce_integral(v)? as i64,
        },
        _ => return None,
    };
    Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(user: Value, session: i64, item: i64, ts: i64) -> RawEvent {
        RawEvent {
            user_id: Some(user),
            session_id: Some(json!(session)),
            item_in_session: Some(json!(item)),
            ts: Some(json!(ts)),
            registration: Some(json!(1_000)),
            page: Some("NextSong".into()),
            level: Some("paid".into()),
            ..Default::default()
        }
    }

    #[test]
    fn drops_missing_and_placeholder_identities() {
        let batch = EventNormalizer::new().normalize(&[
            raw(json!(""), 1, 0, 5_000),
            raw(json!("   "), 1, 1, 5_000),
            raw(json!("None"), 1, 2, 5_000),
            raw(Value::Null, 1, 3, 5_000),
            raw(json!(7), 1, 4, 5_000),
        ]);
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].user_id, "7");
        assert_eq!(batch.report.dropped_for(DropReason::MissingIdentity), 4);
    }

    #[test]
    fn custom_placeholders_are_case_insensitive() {
        let n = EventNormalizer::new().with_placeholders(["Guest"]);
        let batch = n.normalize(&[raw(json!("guest"), 1, 0, 5_000)]);
        assert!(batch.events.is_empty());
    }

    #[test]
    fn bad_timestamps_are_dropped_not_defaulted() {
        let mut a = raw(json!("u"), 1, 0, 0);
        a.ts = Some(json!("yesterday"));
        let mut b = raw(json!("u"), 1, 1, 0);
        b.ts = None;
        let mut c = raw(json!("u"), 1, 2, 0);
        c.ts = Some(json!("5000"));
        let batch = EventNormalizer::new().normalize(&[a, b, c]);
        assert_eq!(batch.report.dropped_for(DropReason::BadTimestamp), 2);
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].ts.timestamp_millis(), 5_000);
    }

    #[test]
    fn unparsable_numbers_become_missing_not_zero() {
        let mut e = raw(json!("u"), 1, 0, 5_000);
        e.session_id = Some(json!("abc"));
        e.length = Some(json!("n/a"));
        e.item_in_session = Some(json!(2.5));
        let batch = EventNormalizer::new().normalize(&[e]);
        let c = &batch.events[0];
        assert_eq!(c.session_id, None);
        assert_eq!(c.length, None);
        assert_eq!(c.item_in_session, None);
        assert_eq!(batch.report.coerced_to_missing, 3);
    }

    #[test]
    fn unknown_levels_map_to_unknown() {
        let mut e = raw(json!("u"), 1, 0, 5_000);
        e.level = Some("gold".into());
        let batch = EventNormalizer::new().normalize(&[e]);
        assert_eq!(batch.events[0].level, Level::Unknown);
        assert_eq!(batch.report.unknown_levels, 1);
    }

    #[test]
    fn duplicates_collapse_to_one_copy() {
        let e = raw(json!("u"), 1, 0, 5_000);
        let batch = EventNormalizer::new().normalize(&[e.clone(), e]);
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.report.dropped_for(DropReason::Duplicate), 1);
    }

    #[test]
    fn duplicate_choice_does_not_depend_on_input_order() {
        let a = raw(json!("u"), 1, 0, 5_000);
        let mut b = a.clone();
        b.page = Some("Thumbs Up".into());
        let n = EventNormalizer::new();
        let first = n.normalize(&[a.clone(), b.clone()]);
        let second = n.normalize(&[b, a]);
        assert_eq!(first.events, second.events);
        assert_eq!(first.events[0].page, "NextSong");
    }

    #[test]
    fn pre_registration_events_are_dropped() {
        let mut early = raw(json!("u"), 1, 0, 500);
        early.registration = Some(json!(1_000));
        let ok = raw(json!("u"), 1, 1, 2_000);
        let batch = EventNormalizer::new().normalize(&[early, ok]);
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.report.dropped_for(DropReason::PreRegistration), 1);
        assert!(batch
            .events
            .iter()
            .all(|e| e.registration.map_or(true, |r| r <= e.ts)));
    }

    #[test]
    fn dropped_events_do_not_move_registration() {
        let good: Vec<RawEvent> = (0..5).map(|i| raw(json!("u"), 1, i, 5_000 + i)).collect();
        let mut corrupt = raw(json!("u"), 0, 0, 200);
        corrupt.registration = Some(json!(400));
        let mut with_corrupt = good.clone();
        with_corrupt.push(corrupt);

        let n = EventNormalizer::new();
        let clean = n.normalize(&good);
        let mixed = n.normalize(&with_corrupt);
        assert_eq!(mixed.report.dropped_for(DropReason::PreRegistration), 1);
        assert_eq!(clean.events, mixed.events);
        assert_eq!(mixed.events[0].registration.map(|r| r.timestamp_millis()), Some(1_000));
    }

    #[test]
    fn events_without_registration_check_against_identity() {
        let mut early = raw(json!("u"), 1, 0, 500);
        early.registration = None;
        let ok = raw(json!("u"), 1, 1, 2_000);
        let batch = EventNormalizer::new().normalize(&[early, ok]);
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.report.dropped_for(DropReason::PreRegistration), 1);
    }

    #[test]
    fn registration_is_earliest_seen_for_identity() {
        let mut a = raw(json!("u"), 1, 0, 5_000);
        a.registration = Some(json!(3_000));
        let mut b = raw(json!("u"), 1, 1, 6_000);
        b.registration = Some(json!("garbage"));
        let mut c = raw(json!("u"), 1, 2, 7_000);
        c.registration = Some(json!(2_000));
        let batch = EventNormalizer::new().normalize(&[a, b, c]);
        assert!(batch
            .events
            .iter()
            .all(|e| e.registration.map(|r| r.timestamp_millis()) == Some(2_000)));
    }

    #[test]
    fn report_accounts_for_every_row() {
        let e = raw(json!("u"), 1, 0, 5_000);
        let mut bad = e.clone();
        bad.ts = None;
        let mut batch = EventNormalizer::new().normalize(&[e.clone(), e, bad]);
        batch.report.record_malformed(2);
        let r = &batch.report;
        assert_eq!(r.input_rows, 5);
        assert_eq!(r.kept + r.dropped_total(), r.input_rows);
    }
}
