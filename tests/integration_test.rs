//! Integration test: normalize, aggregate, table files, drift, alert, serving.

use churn_scorer::{
    alert::{AlertPolicy, Severity},
    config::{AggregationConfig, AlertConfig, DriftConfig, ScorerConfig},
    drift::DriftEngine,
    events::{DropReason, EventNormalizer, RawEvent},
    features::{
        schema::{ACCOUNT_AGE_DAYS, NUM_EVENTS, NUM_LOCATIONS, NUM_SESSIONS},
        Aggregation, ExclusionReason, FeatureRow, FeatureSchema, FeatureTable, FeatureValue,
        WindowedAggregator,
    },
    model::{serve, DesignMatrix},
    storage::{read_events, read_table, write_table},
};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;

const DAY_MS: i64 = 86_400_000;
const MINUTE_MS: i64 = 60_000;
const T0: i64 = 1_538_352_000_000;

fn raw(user: &str, session: i64, item: i64, ts: i64, page: &str) -> RawEvent {
    serde_json::from_value(json!({
        "userId": user,
        "sessionId": session,
        "itemInSession": item,
        "ts": ts,
        "registration": T0 - 10 * DAY_MS,
        "page": page,
        "level": "paid",
        "gender": "F",
        "artist": format!("artist-{}", item % 3),
        "song": format!("song-{item}"),
        "length": 200.5,
    }))
    .unwrap()
}

/// `sessions` sessions of `per_session` songs, one session per day.
fn active_user(user: &str, sessions: i64, per_session: i64) -> Vec<RawEvent> {
    let mut out = Vec::new();
    for s in 0..sessions {
        for i in 0..per_session {
            out.push(raw(user, s + 1, i, T0 + s * DAY_MS + i * MINUTE_MS, "NextSong"));
        }
    }
    out
}

fn aggregator() -> WindowedAggregator {
    WindowedAggregator::new(AggregationConfig::default(), FeatureSchema::churn_v1())
}

fn cleaned(raw: &[RawEvent]) -> Vec<churn_scorer::CleanedEvent> {
    EventNormalizer::new().normalize(raw).events
}

#[test]
fn config_load_default() {
    let c = ScorerConfig::load(Path::new("nonexistent.json")).unwrap();
    assert_eq!(c.features.lookback_days, 30);
    assert_eq!(c.features.min_events_per_user, 15);
    assert_eq!(c.features.min_sessions_per_user, 2);
    assert_eq!(c.drift.psi_threshold, 0.2);
    assert_eq!(c.drift.ks_threshold, 0.1);
    assert_eq!(c.drift.performance_drop_threshold, 0.1);
}

#[test]
fn config_load_partial_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"features": {"lookback_days": 14}, "drift": {"psi_threshold": 0.25}}"#)
        .unwrap();
    let c = ScorerConfig::load(&path).unwrap();
    assert_eq!(c.features.lookback_days, 14);
    assert_eq!(c.features.min_events_per_user, 15);
    assert_eq!(c.drift.psi_threshold, 0.25);
    assert_eq!(c.drift.ks_threshold, 0.1);
}

#[test]
fn duplicate_submission_is_kept_once() {
    let e = raw("a", 1, 0, T0, "NextSong");
    let batch = EventNormalizer::new().normalize(&[e.clone(), e]);
    assert_eq!(batch.events.len(), 1);
    assert_eq!(batch.report.dropped_for(DropReason::Duplicate), 1);
}

#[test]
fn fourteen_events_in_one_session_is_insufficient_sessions() {
    let events = cleaned(&active_user("a", 1, 14));
    assert_eq!(events.len(), 14);
    match aggregator().aggregate_for_training(&events).unwrap() {
        Aggregation::Excluded(e) => {
            assert_eq!(e.reason, ExclusionReason::InsufficientSessions);
            assert_eq!(e.event_count, 14);
            assert_eq!(e.session_count, 1);
        }
        other => panic!("expected exclusion, got {other:?}"),
    }
}

#[test]
fn events_after_cancellation_never_change_features() {
    let mut history = active_user("b", 2, 10);
    history.push(raw("b", 3, 0, T0 + 2 * DAY_MS, "Cancellation Confirmation"));

    let mut with_tail = history.clone();
    for i in 0..25 {
        with_tail.push(raw("b", 4, i, T0 + 3 * DAY_MS + i * MINUTE_MS, "Thumbs Up"));
    }

    let agg = aggregator();
    let before = agg.aggregate_for_training(&cleaned(&history)).unwrap();
    let after = agg.aggregate_for_training(&cleaned(&with_tail)).unwrap();
    let before = before.features().unwrap();
    let after = after.features().unwrap();
    assert_eq!(before.vector, after.vector);
    assert!(before.label.churned);
    assert!(!before.label.resumed_after_churn);
    assert!(after.label.resumed_after_churn);
    assert_eq!(before.vector.number(agg.schema(), NUM_EVENTS), Some(20.0));
}

#[test]
fn pre_registration_events_are_dropped() {
    let events = active_user("a", 2, 10);
    let mut corrupt = events.clone();
    // Claims an earlier registration than the rest of the history, but predates it
    let mut early = raw("a", 0, 0, T0 - 20 * DAY_MS, "NextSong");
    early.registration = Some(json!(T0 - 15 * DAY_MS));
    corrupt.push(early);

    let batch = EventNormalizer::new().normalize(&corrupt);
    assert_eq!(batch.report.dropped_for(DropReason::PreRegistration), 1);
    assert!(batch
        .events
        .iter()
        .all(|e| e.registration.map_or(true, |r| r <= e.ts)));

    let agg = aggregator();
    let clean = agg.aggregate_for_training(&cleaned(&events)).unwrap();
    let mixed = agg.aggregate_for_training(&batch.events).unwrap();
    assert_eq!(clean.features().unwrap().vector, mixed.features().unwrap().vector);
    assert_eq!(
        mixed.features().unwrap().vector.number(agg.schema(), ACCOUNT_AGE_DAYS),
        Some(11.0)
    );
}

#[test]
fn configured_feature_groups_shape_the_vector() {
    let config = AggregationConfig {
        include_gender: false,
        include_location: true,
        ..AggregationConfig::default()
    };
    let schema = FeatureSchema::churn(&config);
    let mut events = active_user("a", 2, 10);
    for (i, e) in events.iter_mut().enumerate() {
        e.location = Some(if i % 2 == 0 { "Boston, MA" } else { "Tampa, FL" }.to_string());
    }
    let agg = WindowedAggregator::new(config, schema.clone());
    let outcome = agg.aggregate_for_training(&cleaned(&events)).unwrap();
    let vector = &outcome.features().unwrap().vector;
    assert_eq!(vector.values().len(), schema.len());
    assert_eq!(vector.number(&schema, NUM_LOCATIONS), Some(2.0));
    assert!(vector.get(&schema, "gender_f").is_none());

    let default_agg = aggregator();
    let table = default_agg.aggregate_all(cleaned(&events)).unwrap().table;
    assert!(table.ensure_schema(&schema).unwrap_err().is_schema_mismatch());
}

#[test]
fn batch_to_file_and_back() {
    let mut events = active_user("a", 2, 10);
    events.extend(active_user("b", 3, 8));
    events.extend(active_user("c", 1, 30));
    let batch = aggregator()
        .aggregate_all(cleaned(&events))
        .unwrap();
    assert_eq!(batch.table.len(), 2);
    assert_eq!(batch.exclusions.len(), 1);
    assert_eq!(batch.exclusions[0].identity, "c");

    let schema = FeatureSchema::churn_v1();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("features.ndjson");
    write_table(&path, &batch.table, &schema).unwrap();
    let back = read_table(&path, &schema).unwrap();
    assert_eq!(back, batch.table);

    let a = &back.rows()[0];
    assert_eq!(a.vector.identity(), "a");
    assert_eq!(a.churned, Some(false));
    assert_eq!(a.vector.number(&schema, NUM_SESSIONS), Some(2.0));
    // Registered 10 days before the first event, anchored on the last one
    assert_eq!(a.vector.number(&schema, ACCOUNT_AGE_DAYS), Some(11.0));

    let matrix = DesignMatrix::from_table(&back, &schema).unwrap();
    assert_eq!(matrix.n_rows(), 2);
    assert_eq!(matrix.labels, Some(vec![false, false]));
}

#[test]
fn event_log_directory_feeds_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = active_user("a", 2, 10)
        .iter()
        .map(|e| serde_json::to_string(e).unwrap())
        .collect();
    std::fs::write(dir.path().join("part-0.json"), lines.join("\n") + "\n{broken\n").unwrap();

    let log = read_events(dir.path()).unwrap();
    assert_eq!(log.malformed, 1);
    let mut batch = EventNormalizer::new().normalize(&log.events);
    batch.report.record_malformed(log.malformed);
    assert_eq!(batch.report.input_rows, 21);
    assert_eq!(batch.report.kept, 20);
    assert_eq!(batch.report.dropped_for(DropReason::MalformedRecord), 1);
}

#[test]
fn identical_tables_do_not_alert() {
    let mut events = Vec::new();
    for u in 0..20 {
        events.extend(active_user(&format!("u{u}"), 2 + u % 3, 8 + u % 5));
    }
    let table = aggregator().aggregate_all(cleaned(&events)).unwrap().table;
    let schema = FeatureSchema::churn_v1();
    let report = DriftEngine::new(DriftConfig::default())
        .compare(&table, &table, &schema)
        .unwrap();
    assert!(!report.has_data_drift);
    assert!(report.features.iter().all(|f| f.psi.map_or(true, |p| p == 0.0)));
    assert!(report.feature("gender_m").is_none());
    let severity = AlertPolicy::new(AlertConfig {
        warn_on_insufficient_data: false,
        ..AlertConfig::default()
    })
    .classify(&report);
    assert_eq!(severity, Severity::None);
}

#[test]
fn shifted_feature_alerts() {
    let schema = FeatureSchema::builder(1)
        .numeric("x", FeatureValue::Missing, true)
        .build()
        .unwrap();
    let table = |lo: f64| {
        let rows = (0..=100)
            .map(|i| {
                let mut computed = BTreeMap::new();
                computed.insert("x", FeatureValue::Number(lo + f64::from(i)));
                FeatureRow {
                    vector: schema
                        .project(&format!("u{i}"), chrono::Utc::now(), &computed)
                        .unwrap(),
                    churned: None,
                }
            })
            .collect();
        FeatureTable::new(&schema, 30, rows).unwrap()
    };
    let report = DriftEngine::new(DriftConfig::default())
        .compare(&table(0.0), &table(200.0), &schema)
        .unwrap();
    assert!(report.feature("x").unwrap().psi.unwrap() > 0.2);
    assert_eq!(report.flagged, vec!["x".to_string()]);
    let severity = AlertPolicy::new(AlertConfig::default()).classify(&report);
    assert_ne!(severity, Severity::None);
}

#[test]
fn serving_matches_training_for_active_identity() {
    let raw_events = active_user("a", 3, 6);
    let agg = aggregator();
    let outcome = serve(&raw_events, &EventNormalizer::new(), &agg).unwrap();
    let served = outcome.aggregation.features().unwrap().vector.clone();
    let trained = agg.aggregate_for_training(&cleaned(&raw_events)).unwrap();
    assert_eq!(served, trained.features().unwrap().vector);
    assert_eq!(outcome.normalization.kept, 18);
}

#[test]
fn serving_rejects_mixed_identities() {
    let mut raw_events = active_user("a", 2, 10);
    raw_events.extend(active_user("b", 2, 10));
    assert!(serve(&raw_events, &EventNormalizer::new(), &aggregator()).is_err());
}
