//! Statistical helpers for drift detection: quantile bins, PSI, KS.

use std::collections::BTreeMap;

/// Linear-interpolated quantile of an ascending, non-empty sample.
pub fn quantile(sorted: &[f64], p: f64) -> f64 {
    let pos = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Bin layout derived from a baseline sample only.
///
/// Interior bins are `[e_i, e_{i+1})` between deduplicated baseline quantiles
/// (the last one closed). Bin 0 catches values below the baseline minimum and
/// the final bin catches values above its maximum; neither holds baseline mass.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantileBins {
    edges: Vec<f64>,
}

impl QuantileBins {
    /// `None` when the baseline has no finite values.
    pub fn from_baseline(baseline: &[f64], bins: usize) -> Option<Self> {
        let mut sorted: Vec<f64> = baseline.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);
        let bins = bins.max(1);
        let mut edges: Vec<f64> = Vec::with_capacity(bins + 1);
        for i in 0..=bins {
            let q = quantile(&sorted, i as f64 / bins as f64);
            // Interpolation rounding must not produce a descending edge.
            let q = edges.last().map_or(q, |prev| q.max(*prev));
            if edges.last() != Some(&q) {
                edges.push(q);
            }
        }
        Some(Self { edges })
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    fn interior(&self) -> usize {
        (self.edges.len() - 1).max(1)
    }

    /// Interior bins plus the underflow and overflow bins.
    pub fn len(&self) -> usize {
        self.interior() + 2
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn bin_of(&self, v: f64) -> usize {
        let first = self.edges[0];
        let last = self.edges[self.edges.len() - 1];
        if v < first {
            0
        } else if v > last {
            self.interior() + 1
        } else {
            self.edges.partition_point(|e| *e <= v).min(self.interior())
        }
    }

    pub fn counts(&self, values: &[f64]) -> Vec<usize> {
        let mut counts = vec![0; self.len()];
        for &v in values {
            counts[self.bin_of(v)] += 1;
        }
        counts
    }
}

/// PSI over aligned bin counts; each bin fraction is floored at `epsilon`.
pub fn psi_from_counts(baseline: &[usize], current: &[usize], epsilon: f64) -> f64 {
    let base_total: usize = baseline.iter().sum();
    let cur_total: usize = current.iter().sum();
    if base_total == 0 || cur_total == 0 {
        return 0.0;
    }
    baseline
        .iter()
        .zip(current)
        .map(|(&b, &c)| {
            let b_pct = (b as f64 / base_total as f64).max(epsilon);
            let c_pct = (c as f64 / cur_total as f64).max(epsilon);
            (c_pct - b_pct) * (c_pct / b_pct).ln()
        })
        .sum()
}

/// PSI of a numeric feature over quantile bins of the baseline. `None` if either side is empty.
pub fn numeric_psi(baseline: &[f64], current: &[f64], bins: usize, epsilon: f64) -> Option<f64> {
    if current.is_empty() {
        return None;
    }
    let layout = QuantileBins::from_baseline(baseline, bins)?;
    Some(psi_from_counts(
        &layout.counts(baseline),
        &layout.counts(current),
        epsilon,
    ))
}

/// PSI over category frequencies (union of categories seen on either side).
pub fn categorical_psi(baseline: &[&str], current: &[&str], epsilon: f64) -> Option<f64> {
    if baseline.is_empty() || current.is_empty() {
        return None;
    }
    let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for &c in baseline {
        counts.entry(c).or_default().0 += 1;
    }
    for &c in current {
        counts.entry(c).or_default().1 += 1;
    }
    let (b, c): (Vec<usize>, Vec<usize>) = counts.values().copied().unzip();
    Some(psi_from_counts(&b, &c, epsilon))
}

/// Two-sample Kolmogorov–Smirnov statistic: the largest gap between the empirical CDFs.
pub fn ks_statistic(baseline: &[f64], current: &[f64]) -> Option<f64> {
    if baseline.is_empty() || current.is_empty() {
        return None;
    }
    let mut b = baseline.to_vec();
    let mut c = current.to_vec();
    b.sort_by(f64::total_cmp);
    c.sort_by(f64::total_cmp);

    let mut support: Vec<f64> = b.iter().chain(&c).copied().collect();
    support.sort_by(f64::total_cmp);
    support.dedup();

    let (nb, nc) = (b.len() as f64, c.len() as f64);
    let d = support
        .iter()
        .map(|v| {
            let fb = b.partition_point(|x| x <= v) as f64 / nb;
            let fc = c.partition_point(|x| x <= v) as f64 / nc;
            (fb - fc).abs()
        })
        .fold(0.0, f64::max);
    Some(d)
}

/// `(baseline − current) / |baseline|`; `None` when the baseline is zero or not finite.
pub fn relative_performance_drop(baseline: f64, current: f64) -> Option<f64> {
    if baseline == 0.0 || !baseline.is_finite() || !current.is_finite() {
        return None;
    }
    Some((baseline - current) / baseline.abs())
}
