//! Seeded k-means over pixel band vectors.
//!
//! Centroids are initialised with k-means++ and refined with Lloyd
//! iterations. All randomness comes from one `StdRng` seeded by the
//! caller, so identical inputs produce identical labels.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::ChangeError;

/// Upper bound on the number of pixels the model is fit on.
pub const MAX_FIT_SAMPLES: usize = 10_000;

/// Lloyd iteration cap.
pub const MAX_ITERATIONS: usize = 100;

/// A fitted partition of band space into `k` clusters.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterModel {
    centroids: Array2<f32>,
}

impl ClusterModel {
    /// Fits `k` clusters to the rows of `data`.
    ///
    /// When `data` has more than [`MAX_FIT_SAMPLES`] rows, a seeded random
    /// subset is used for fitting.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeError::InvalidClusterCount`] if `k` is zero or
    /// larger than the number of rows.
    pub fn fit(data: ArrayView2<'_, f32>, k: usize, seed: u64) -> Result<Self, ChangeError> {
        let rows = data.nrows();
        if k == 0 || k > rows {
            return Err(ChangeError::InvalidClusterCount { k, pixels: rows });
        }

        let mut rng = StdRng::seed_from_u64(seed);

        let sample = if rows > MAX_FIT_SAMPLES {
            let mut indices = rand::seq::index::sample(&mut rng, rows, MAX_FIT_SAMPLES).into_vec();
            indices.sort_unstable();
            data.select(Axis(0), &indices)
        } else {
            data.to_owned()
        };

        let mut centroids = init_plus_plus(sample.view(), k, &mut rng);
        let mut assignments = vec![usize::MAX; sample.nrows()];

        for iteration in 0..MAX_ITERATIONS {
            let mut changed = false;
            for (row, assignment) in sample.axis_iter(Axis(0)).zip(assignments.iter_mut()) {
                let nearest = nearest(centroids.view(), row);
                if *assignment != nearest {
                    *assignment = nearest;
                    changed = true;
                }
            }
            if !changed {
                log::trace!("k-means converged after {iteration} iterations (k={k})");
                break;
            }
            update_centroids(&mut centroids, sample.view(), &assignments);
        }

        Ok(Self { centroids })
    }

    /// Number of clusters.
    #[must_use]
    pub fn k(&self) -> usize {
        self.centroids.nrows()
    }

    /// Label of the centroid nearest to `point`. Ties go to the lower index.
    #[must_use]
    pub fn predict(&self, point: ArrayView1<'_, f32>) -> usize {
        nearest(self.centroids.view(), point)
    }

    /// Labels every row of `data`.
    #[must_use]
    pub fn predict_all(&self, data: ArrayView2<'_, f32>) -> Vec<usize> {
        data.axis_iter(Axis(0)).map(|row| self.predict(row)).collect()
    }
}

/// Cluster count used when the caller does not choose one:
/// `round(sqrt(n / 2))`, kept within `2..=16`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn default_cluster_count(pixels: usize) -> usize {
    let k = (pixels as f64 / 2.0).sqrt().round() as usize;
    k.clamp(2, 16)
}

fn squared_distance(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum()
}

fn nearest(centroids: ArrayView2<'_, f32>, point: ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (index, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
        let distance = squared_distance(centroid, point);
        if distance < best_distance {
            best = index;
            best_distance = distance;
        }
    }
    best
}

fn init_plus_plus(sample: ArrayView2<'_, f32>, k: usize, rng: &mut StdRng) -> Array2<f32> {
    let rows = sample.nrows();
    let mut chosen = Vec::with_capacity(k);
    chosen.push(rng.random_range(0..rows));

    let mut distances: Vec<f64> = sample
        .axis_iter(Axis(0))
        .map(|row| squared_distance(row, sample.row(chosen[0])))
        .collect();

    while chosen.len() < k {
        let total: f64 = distances.iter().sum();
        let next = if total > 0.0 {
            let mut target = rng.random_range(0.0..total);
            distances
                .iter()
                .position(|d| {
                    target -= d;
                    target < 0.0
                })
                .unwrap_or(rows - 1)
        } else {
            // Every remaining point coincides with a centroid.
            rng.random_range(0..rows)
        };
        chosen.push(next);

        for (row, distance) in sample.axis_iter(Axis(0)).zip(distances.iter_mut()) {
            *distance = distance.min(squared_distance(row, sample.row(next)));
        }
    }

    sample.select(Axis(0), &chosen)
}

/// Moves each centroid to the mean of its members. A cluster that lost
/// all members keeps its previous centroid.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn update_centroids(centroids: &mut Array2<f32>, sample: ArrayView2<'_, f32>, assignments: &[usize]) {
    let (k, bands) = centroids.dim();
    let mut sums = Array2::<f64>::zeros((k, bands));
    let mut counts = vec![0_usize; k];

    for (row, &cluster) in sample.axis_iter(Axis(0)).zip(assignments) {
        counts[cluster] += 1;
        for (sum, value) in sums.row_mut(cluster).iter_mut().zip(row.iter()) {
            *sum += f64::from(*value);
        }
    }

    for (cluster, count) in counts.into_iter().enumerate() {
        if count == 0 {
            continue;
        }
        for (centroid, sum) in centroids.row_mut(cluster).iter_mut().zip(sums.row(cluster)) {
            *centroid = (sum / count as f64) as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn two_blobs() -> Array2<f32> {
        array![
            [0.0, 0.0],
            [0.1, 0.0],
            [0.0, 0.1],
            [10.0, 10.0],
            [10.1, 10.0],
            [10.0, 10.1],
        ]
    }

    #[test]
    fn separates_well_separated_blobs() {
        let data = two_blobs();
        let model = ClusterModel::fit(data.view(), 2, 7).unwrap();
        let labels = model.predict_all(data.view());
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn same_seed_same_model() {
        let data = two_blobs();
        let a = ClusterModel::fit(data.view(), 3, 42).unwrap();
        let b = ClusterModel::fit(data.view(), 3, 42).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn identical_points_do_not_break_initialisation() {
        let data = Array2::<f32>::from_elem((5, 3), 1.5);
        let model = ClusterModel::fit(data.view(), 3, 0).unwrap();
        assert_eq!(model.k(), 3);
        assert!(model.predict_all(data.view()).iter().all(|&l| l < 3));
    }

    #[test]
    fn subsamples_large_inputs() {
        let rows = MAX_FIT_SAMPLES + 500;
        let data = Array2::from_shape_fn((rows, 1), |(i, _)| if i % 2 == 0 { 0.0 } else { 100.0 });
        let model = ClusterModel::fit(data.view(), 2, 1).unwrap();
        assert_ne!(model.predict(array![0.0_f32].view()), model.predict(array![100.0_f32].view()));
    }

    #[test]
    fn rejects_bad_cluster_counts() {
        let data = two_blobs();
        assert!(ClusterModel::fit(data.view(), 0, 0).is_err());
        assert!(ClusterModel::fit(data.view(), 7, 0).is_err());
    }

    #[test]
    fn default_cluster_count_is_bounded() {
        assert_eq!(default_cluster_count(1), 2);
        assert_eq!(default_cluster_count(50), 5);
        assert_eq!(default_cluster_count(1_000_000), 16);
    }
}
