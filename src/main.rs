//! Churn scorer entrypoint: batch feature extraction, scoring, evaluation and drift checks.
//!
//! Configuration is read from `CHURN_CONFIG_PATH` (default `config.json`); a
//! missing file means defaults.

use churn_scorer::{
    alert::{AlertPolicy, Severity},
    config::ScorerConfig,
    drift::{classification_metrics, DriftEngine, PerformanceSnapshot},
    events::{group_by_identity, EventNormalizer},
    features::{Aggregation, FeatureSchema, FeatureVector, WindowedAggregator},
    logging::{ReportLine, StructuredLogger},
    model::{score, DesignMatrix, LogisticModel},
    storage::{read_events, read_table, write_table},
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const USAGE: &str = "usage:
  churn-scorer features <events path> <table out>
  churn-scorer score <model.json> <events path>
  churn-scorer evaluate <model.json> <labelled table> <metrics out>
  churn-scorer drift <baseline table> <current table> [<baseline metrics> <current metrics>]";

fn build_features(config: &ScorerConfig, events: &Path, out: &Path) -> CliResult<()> {
    let schema = FeatureSchema::churn(&config.features);
    let log = read_events(events)?;
    let mut batch = EventNormalizer::new().normalize(&log.events);
    batch.report.record_malformed(log.malformed);
    for (reason, count) in &batch.report.dropped {
        info!(reason = reason.as_str(), count, "dropped events");
    }

    let aggregator = WindowedAggregator::new(config.features.clone(), schema.clone());
    let aggregated = aggregator.aggregate_all(batch.events)?;
    for (reason, count) in aggregated.exclusion_counts() {
        info!(reason = reason.as_str(), count, "excluded identities");
    }
    write_table(out, &aggregated.table, &schema)?;
    Ok(())
}

fn score_events(config: &ScorerConfig, model_path: &Path, events: &Path) -> CliResult<()> {
    let schema = FeatureSchema::churn(&config.features);
    let model = LogisticModel::load(model_path, &schema)?;
    let log = read_events(events)?;
    let batch = EventNormalizer::new().normalize(&log.events);
    let aggregator = WindowedAggregator::new(config.features.clone(), schema.clone());

    let mut vectors: Vec<FeatureVector> = Vec::new();
    for (identity, events) in group_by_identity(batch.events) {
        match aggregator.aggregate_serving(&events)? {
            Aggregation::Features(a) => vectors.push(a.vector),
            Aggregation::Excluded(e) => {
                info!(identity = %identity, reason = e.reason.as_str(), "not scored")
            }
        }
    }
    let refs: Vec<&FeatureVector> = vectors.iter().collect();
    let matrix = DesignMatrix::from_vectors(&refs, &schema)?;
    let mut stdout = std::io::stdout().lock();
    for prediction in score(&model, &matrix, config.scoring.decision_threshold) {
        StructuredLogger::emit_json(&ReportLine::new("prediction", &prediction), &mut stdout)?;
    }
    stdout.flush()?;
    Ok(())
}

fn evaluate(config: &ScorerConfig, model_path: &Path, table: &Path, out: &Path) -> CliResult<()> {
    let schema = FeatureSchema::churn(&config.features);
    let model = LogisticModel::load(model_path, &schema)?;
    let table = read_table(table, &schema)?;
    let matrix = DesignMatrix::from_table(&table, &schema)?;
    let labels = matrix
        .labels
        .clone()
        .ok_or("evaluation needs a fully labelled table")?;
    let threshold = config.scoring.decision_threshold;
    let scores: Vec<f64> = score(&model, &matrix, threshold)
        .into_iter()
        .map(|p| p.churn_probability)
        .collect();
    let metrics = classification_metrics(&labels, &scores, threshold)?;
    std::fs::write(out, serde_json::to_string_pretty(&metrics)?)?;
    info!(path = %out.display(), metrics = metrics.metrics.len(), "wrote performance snapshot");
    Ok(())
}

fn load_snapshot(path: &Path) -> CliResult<PerformanceSnapshot> {
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

fn check_drift(config: &ScorerConfig, args: &[PathBuf]) -> CliResult<Severity> {
    let schema = FeatureSchema::churn(&config.features);
    let baseline = read_table(&args[0], &schema)?;
    let current = read_table(&args[1], &schema)?;
    let engine = DriftEngine::new(config.drift.clone());
    let report = match args {
        [_, _, b, c] => engine.compare_with_performance(
            &baseline,
            &current,
            &schema,
            &load_snapshot(b)?,
            &load_snapshot(c)?,
        )?,
        _ => engine.compare(&baseline, &current, &schema)?,
    };
    let assessment = AlertPolicy::new(config.alert.clone()).evaluate(&report);
    if assessment.severity != Severity::None {
        warn!(severity = assessment.severity.as_str(), triggers = assessment.triggers.len(), "drift alert");
    }

    let mut stdout = std::io::stdout().lock();
    StructuredLogger::emit_json(&ReportLine::new("drift_report", &report), &mut stdout)?;
    StructuredLogger::emit_json(&ReportLine::new("alert", &assessment), &mut stdout)?;
    stdout.flush()?;
    Ok(assessment.severity)
}

fn main() -> CliResult<()> {
    let config_path = std::env::var("CHURN_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"));
    let config = ScorerConfig::load(&config_path)?;
    StructuredLogger::init(&config.log);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let paths: Vec<PathBuf> = args.iter().skip(1).map(PathBuf::from).collect();
    match (args.first().map(String::as_str), paths.len()) {
        (Some("features"), 2) => build_features(&config, &paths[0], &paths[1]),
        (Some("score"), 2) => score_events(&config, &paths[0], &paths[1]),
        (Some("evaluate"), 3) => evaluate(&config, &paths[0], &paths[1], &paths[2]),
        (Some("drift"), 2 | 4) => {
            let severity = check_drift(&config, &paths)?;
            if severity == Severity::Critical {
                std::process::exit(2);
            }
            Ok(())
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(64);
        }
    }
}
