//! Cluster-membership histograms and the distances between them.

/// Additive smoothing applied to every histogram bin before comparing, so
/// empty bins never produce `ln(0)` or a division by zero.
pub const SMOOTHING_EPSILON: f64 = 1e-5;

/// Normalised frequency of each of `k` labels, or `None` when there are
/// no labels to count.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn histogram(labels: impl IntoIterator<Item = usize>, k: usize) -> Option<Vec<f64>> {
    let mut counts = vec![0_usize; k];
    let mut total = 0_usize;
    for label in labels {
        if let Some(count) = counts.get_mut(label) {
            *count += 1;
            total += 1;
        }
    }
    if total == 0 {
        return None;
    }
    Some(counts.into_iter().map(|c| c as f64 / total as f64).collect())
}

#[allow(clippy::cast_precision_loss)]
fn smooth(frequencies: &[f64]) -> impl Iterator<Item = f64> + '_ {
    let denominator = (frequencies.len() as f64).mul_add(SMOOTHING_EPSILON, 1.0);
    frequencies
        .iter()
        .map(move |f| (f + SMOOTHING_EPSILON) / denominator)
}

/// Smoothed `KL(p || q)` in nats. Never negative.
#[must_use]
pub fn kl_divergence(p: &[f64], q: &[f64]) -> f64 {
    let value: f64 = smooth(p)
        .zip(smooth(q))
        .map(|(p, q)| p * (p / q).ln())
        .sum();
    value.max(0.0)
}

/// Mean absolute difference between two band vectors.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_absolute_difference(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let total: f64 = a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum();
    total / a.len() as f64
}
