use anyhow::{anyhow, bail};
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::utils::squared_euclidean;

#[derive(Debug, Clone)]
pub struct KMeansConfig {
    pub k: usize,
    /// Independent seedings; the run with the lowest inertia wins.
    pub n_init: usize,
    pub max_iter: usize,
    /// Relative to the mean per-feature variance of the input.
    pub tol: f64,
    pub seed: u64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        KMeansConfig {
            k: 2,
            n_init: 1,
            max_iter: 300,
            tol: 1e-4,
            seed: 42,
        }
    }
}

impl KMeansConfig {
    pub fn k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[derive(Debug, Clone)]
pub struct KMeansResult {
    pub labels: Vec<usize>,
    pub centroids: Array2<f64>,
    pub inertia: f64,
    pub n_iter: usize,
}

impl KMeansResult {
    /// Assigns each row of `x` to its nearest centroid.
    pub fn predict(&self, x: ArrayView2<f64>) -> anyhow::Result<Vec<usize>> {
        if x.ncols() != self.centroids.ncols() {
            bail!(
                "Expected {} features, got {}",
                self.centroids.ncols(),
                x.ncols()
            );
        }
        Ok(assign(x, self.centroids.view()).into_iter().map(|(c, _)| c).collect())
    }
}

pub struct KMeans {
    config: KMeansConfig,
}

fn nearest(row: ArrayView1<f64>, centroids: ArrayView2<f64>) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (c, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
        let d = squared_euclidean(row, centroid);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

fn assign(x: ArrayView2<f64>, centroids: ArrayView2<f64>) -> Vec<(usize, f64)> {
    (0..x.nrows())
        .into_par_iter()
        .map(|i| nearest(x.row(i), centroids))
        .collect()
}

/// Index into the cumulative sum of `weights` hit by `target`.
fn search_cumulative(weights: &[f64], target: f64) -> usize {
    let mut acc = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        acc += w;
        if target < acc {
            return i;
        }
    }
    weights.len() - 1
}

impl KMeans {
    pub fn new(config: KMeansConfig) -> Self {
        KMeans { config }
    }

    pub fn fit(&self, x: ArrayView2<f64>) -> anyhow::Result<KMeansResult> {
        let (n_samples, n_features) = x.dim();
        let k = self.config.k;
        if k == 0 {
            bail!("Number of clusters must be at least 1");
        }
        if n_samples < k {
            bail!(
                "n_samples={} should be >= n_clusters={}",
                n_samples,
                k
            );
        }
        if n_features == 0 {
            bail!("Cannot cluster samples without features");
        }
        if self.config.n_init == 0 {
            bail!("n_init must be at least 1");
        }

        let mean_variance = x.var_axis(Axis(0), 0.0).mean().unwrap_or(0.0);
        let tol = self.config.tol * mean_variance;

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut best: Option<KMeansResult> = None;
        for run in 0..self.config.n_init {
            let init = self.init_plus_plus(x, &mut rng);
            let result = self.lloyd(x, init, tol);
            debug!(
                "k-means run {}: inertia {:.4} after {} iterations",
                run, result.inertia, result.n_iter
            );
            if best.as_ref().map_or(true, |b| result.inertia < b.inertia) {
                best = Some(result);
            }
        }

        let best = best.ok_or_else(|| anyhow!("k-means produced no result"))?;
        info!(
            "k-means with k={} converged in {} iterations (inertia {:.4})",
            k, best.n_iter, best.inertia
        );
        Ok(best)
    }

    /// Greedy k-means++ seeding: each new centre is the best of several D^2-weighted draws.
    fn init_plus_plus(&self, x: ArrayView2<f64>, rng: &mut ChaCha8Rng) -> Array2<f64> {
        let n_samples = x.nrows();
        let k = self.config.k;
        let n_local_trials = 2 + (k as f64).ln().floor() as usize;

        let mut centers = Array2::zeros((k, x.ncols()));
        let first = rng.random_range(0..n_samples);
        centers.row_mut(0).assign(&x.row(first));

        let mut closest: Vec<f64> = (0..n_samples)
            .into_par_iter()
            .map(|i| squared_euclidean(x.row(i), x.row(first)))
            .collect();
        let mut potential: f64 = closest.iter().sum();

        for c in 1..k {
            let mut best_candidate = 0;
            let mut best_potential = f64::INFINITY;
            let mut best_dist = Vec::new();
            for _ in 0..n_local_trials {
                let candidate = if potential > 0.0 {
                    search_cumulative(&closest, rng.random::<f64>() * potential)
                } else {
                    rng.random_range(0..n_samples)
                };
                let dist: Vec<f64> = (0..n_samples)
                    .into_par_iter()
                    .map(|i| closest[i].min(squared_euclidean(x.row(i), x.row(candidate))))
                    .collect();
                let pot: f64 = dist.iter().sum();
                if pot < best_potential {
                    best_potential = pot;
                    best_candidate = candidate;
                    best_dist = dist;
                }
            }
            centers.row_mut(c).assign(&x.row(best_candidate));
            closest = best_dist;
            potential = best_potential;
        }
        centers
    }

    fn lloyd(&self, x: ArrayView2<f64>, mut centers: Array2<f64>, tol: f64) -> KMeansResult {
        let k = self.config.k;
        let n_features = x.ncols();
        let mut n_iter = 0;

        for iteration in 0..self.config.max_iter {
            n_iter = iteration + 1;
            let assignment = assign(x, centers.view());

            let mut sums = Array2::<f64>::zeros((k, n_features));
            let mut counts = vec![0usize; k];
            for (i, &(c, _)) in assignment.iter().enumerate() {
                let mut row = sums.row_mut(c);
                row += &x.row(i);
                counts[c] += 1;
            }

            // Empty clusters take the points that sit farthest from their centre.
            let mut far: Vec<usize> = (0..assignment.len()).collect();
            far.sort_by(|&a, &b| {
                assignment[b]
                    .1
                    .partial_cmp(&assignment[a].1)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let mut far_iter = far.into_iter();

            let mut new_centers = Array2::<f64>::zeros((k, n_features));
            for c in 0..k {
                if counts[c] > 0 {
                    let mean: Array1<f64> = sums.row(c).mapv(|v| v / counts[c] as f64);
                    new_centers.row_mut(c).assign(&mean);
                } else if let Some(p) = far_iter.next() {
                    new_centers.row_mut(c).assign(&x.row(p));
                }
            }

            let shift: f64 = (0..k)
                .map(|c| squared_euclidean(centers.row(c), new_centers.row(c)))
                .sum();
            centers = new_centers;
            if shift <= tol {
                break;
            }
        }

        let assignment = assign(x, centers.view());
        let inertia = assignment.iter().map(|(_, d)| d).sum();
        KMeansResult {
            labels: assignment.into_iter().map(|(c, _)| c).collect(),
            centroids: centers,
            inertia,
            n_iter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn two_blobs() -> Array2<f64> {
        array![
            [0.0, 0.1],
            [0.2, 0.0],
            [0.1, 0.2],
            [-0.1, 0.0],
            [10.0, 10.1],
            [10.2, 9.9],
            [9.9, 10.0],
            [10.1, 10.2],
        ]
    }

    #[test]
    fn test_separates_blobs() {
        let x = two_blobs();
        let result = KMeans::new(KMeansConfig::default()).fit(x.view()).unwrap();
        let first = result.labels[0];
        assert!(result.labels[..4].iter().all(|&l| l == first));
        assert!(result.labels[4..].iter().all(|&l| l != first));
        assert!(result.inertia < 1.0);
    }

    #[test]
    fn test_seed_is_reproducible() {
        let x = two_blobs();
        let a = KMeans::new(KMeansConfig::default().n_init(3)).fit(x.view()).unwrap();
        let b = KMeans::new(KMeansConfig::default().n_init(3)).fit(x.view()).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_relative_eq!(a.inertia, b.inertia);
    }

    #[test]
    fn test_predict_matches_fit() {
        let x = two_blobs();
        let result = KMeans::new(KMeansConfig::default()).fit(x.view()).unwrap();
        assert_eq!(result.predict(x.view()).unwrap(), result.labels);
        assert!(result.predict(array![[1.0]].view()).is_err());
    }

    #[test]
    fn test_k_equals_n_gives_zero_inertia() {
        let x = array![[0.0], [5.0], [9.0]];
        let result = KMeans::new(KMeansConfig::default().k(3)).fit(x.view()).unwrap();
        assert_relative_eq!(result.inertia, 0.0);
    }

    #[test]
    fn test_rejects_too_few_samples() {
        let x = array![[0.0, 1.0]];
        assert!(KMeans::new(KMeansConfig::default()).fit(x.view()).is_err());
    }

    #[test]
    fn test_search_cumulative() {
        let w = [1.0, 0.0, 3.0];
        assert_eq!(search_cumulative(&w, 0.5), 0);
        assert_eq!(search_cumulative(&w, 1.0), 2);
        assert_eq!(search_cumulative(&w, 10.0), 2);
    }

    #[test]
    fn test_empty_cluster_is_reseeded() {
        let x = two_blobs();
        // Identical centres: every point lands in cluster 0 and cluster 1 starts empty.
        let init = Array2::zeros((2, 2));
        let result = KMeans::new(KMeansConfig::default()).lloyd(x.view(), init, 1e-8);
        let first = result.labels[0];
        assert!(result.labels[..4].iter().all(|&l| l == first));
        assert!(result.labels[4..].iter().all(|&l| l != first));
        assert!(result.inertia < 1.0);
        assert!(result.n_iter >= 2);
    }
}
