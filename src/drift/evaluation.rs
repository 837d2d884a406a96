//! Classification metrics that feed concept-drift comparison.

use super::types::PerformanceSnapshot;
use crate::error::{Error, Result};

pub const ACCURACY: &str = "accuracy";
pub const PRECISION: &str = "precision";
pub const RECALL: &str = "recall";
pub const F1: &str = "f1";
pub const ROC_AUC: &str = "roc_auc";
pub const PR_AUC: &str = "pr_auc";

/// Score a set of predictions against known labels.
///
/// A score at or above `threshold` predicts churn. Metrics that are undefined
/// for the given labels (e.g. recall with no churners) are left out of the snapshot.
pub fn classification_metrics(
    labels: &[bool],
    scores: &[f64],
    threshold: f64,
) -> Result<PerformanceSnapshot> {
    if labels.len() != scores.len() {
        return Err(Error::payload(format!(
            "{} labels but {} scores",
            labels.len(),
            scores.len()
        )));
    }
    let mut snapshot = PerformanceSnapshot::new();
    if labels.is_empty() {
        return Ok(snapshot);
    }

    let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
    for (&label, &score) in labels.iter().zip(scores) {
        match (label, score >= threshold) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (false, false) => tn += 1,
            (true, false) => fn_ += 1,
        }
    }
    let n = labels.len() as f64;
    snapshot = snapshot.with(ACCURACY, (tp + tn) as f64 / n);

    let precision = (tp + fp > 0).then(|| tp as f64 / (tp + fp) as f64);
    let recall = (tp + fn_ > 0).then(|| tp as f64 / (tp + fn_) as f64);
    if let Some(p) = precision {
        snapshot = snapshot.with(PRECISION, p);
    }
    if let Some(r) = recall {
        snapshot = snapshot.with(RECALL, r);
    }
    if let (Some(p), Some(r)) = (precision, recall) {
        let f1 = if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) };
        snapshot = snapshot.with(F1, f1);
    }
    if let Some(auc) = roc_auc(labels, scores) {
        snapshot = snapshot.with(ROC_AUC, auc);
    }
    if let Some(auc) = pr_auc(labels, scores) {
        snapshot = snapshot.with(PR_AUC, auc);
    }
    Ok(snapshot)
}

/// Rank-based ROC AUC (ties share their average rank). Needs both classes.
pub fn roc_auc(labels: &[bool], scores: &[f64]) -> Option<f64> {
    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // ranks are 1-based
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            if labels[k] {
                positive_rank_sum += avg_rank;
            }
        }
        i = j + 1;
    }
    let p = positives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64))
}

/// Trapezoid area under the precision-recall curve, one point per distinct score.
pub fn pr_auc(labels: &[bool], scores: &[f64]) -> Option<f64> {
    let positives = labels.iter().filter(|&&l| l).count();
    if positives == 0 {
        return None;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut area = 0.0;
    let (mut prev_recall, mut prev_precision) = (0.0, 1.0);
    let (mut tp, mut fp) = (0usize, 0usize);
    let mut i = 0;
    while i < order.len() {
        let score = scores[order[i]];
        while i < order.len() && scores[order[i]] == score {
            if labels[order[i]] {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        let recall = tp as f64 / positives as f64;
        let precision = tp as f64 / (tp + fp) as f64;
        area += (recall - prev_recall) * (precision + prev_precision) / 2.0;
        prev_recall = recall;
        prev_precision = precision;
    }
    Some(area)
}
