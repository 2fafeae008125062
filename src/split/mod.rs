//! # Stratified sampling
//!
//! Train/test splitting and k-fold partitioning that keep the class proportions of the
//! labels in every part.
//!
//! All randomness is drawn from a [`ChaCha8Rng`] seeded by the caller, so a given seed
//! reproduces the same partition on every platform.

use anyhow::bail;
use log::warn;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::utils::unique_labels;

/// Indices of a train/test partition.
#[derive(Debug, Clone)]
pub struct TrainTestIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

fn class_counts(labels: &[usize], classes: &[usize]) -> Vec<usize> {
    classes
        .iter()
        .map(|c| labels.iter().filter(|&&l| l == *c).count())
        .collect()
}

/// Spreads `n_draws` over the classes proportionally to `counts`. Rounding leftovers go to
/// the classes with the largest fractional share; equal shares are broken at random.
fn approximate_mode(counts: &[usize], n_draws: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return vec![0; counts.len()];
    }
    let continuous: Vec<f64> = counts
        .iter()
        .map(|&c| c as f64 * n_draws as f64 / total as f64)
        .collect();
    let mut floored: Vec<usize> = continuous.iter().map(|v| v.floor() as usize).collect();
    let mut need = n_draws.saturating_sub(floored.iter().sum());

    if need > 0 {
        let remainder: Vec<f64> = continuous
            .iter()
            .zip(floored.iter())
            .map(|(&c, &f)| c - f as f64)
            .collect();
        let mut levels = remainder.clone();
        levels.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        levels.dedup();
        for level in levels {
            let mut inds: Vec<usize> = (0..remainder.len())
                .filter(|&i| remainder[i] == level)
                .collect();
            inds.shuffle(rng);
            let add = inds.len().min(need);
            for &i in &inds[..add] {
                floored[i] += 1;
            }
            need -= add;
            if need == 0 {
                break;
            }
        }
    }
    floored
}

/// Stratified shuffle split: `ceil(test_size * n)` samples go to the test side.
pub fn train_test_split_stratified(
    labels: &[usize],
    test_size: f64,
    seed: u64,
) -> anyhow::Result<TrainTestIndices> {
    if !(test_size > 0.0 && test_size < 1.0) {
        bail!("test_size must lie strictly between 0 and 1, got {}", test_size);
    }
    let n = labels.len();
    let n_test = (test_size * n as f64).ceil() as usize;
    let n_train = n.saturating_sub(n_test);

    let classes = unique_labels(labels);
    let counts = class_counts(labels, &classes);
    if let Some(min) = counts.iter().min() {
        if *min < 2 {
            bail!(
                "The least populated class has only {} member, which is too few; \
                 the minimum number of members in any class cannot be less than 2",
                min
            );
        }
    }
    if n_train < classes.len() {
        bail!(
            "The train size ({}) should be greater or equal to the number of classes ({})",
            n_train,
            classes.len()
        );
    }
    if n_test < classes.len() {
        bail!(
            "The test size ({}) should be greater or equal to the number of classes ({})",
            n_test,
            classes.len()
        );
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let n_i = approximate_mode(&counts, n_train, &mut rng);
    let remaining: Vec<usize> = counts.iter().zip(n_i.iter()).map(|(c, t)| c - t).collect();
    let t_i = approximate_mode(&remaining, n_test, &mut rng);

    let mut train = Vec::with_capacity(n_train);
    let mut test = Vec::with_capacity(n_test);
    for (k, class) in classes.iter().enumerate() {
        let mut members: Vec<usize> = (0..n).filter(|&i| labels[i] == *class).collect();
        members.shuffle(&mut rng);
        train.extend_from_slice(&members[..n_i[k]]);
        test.extend_from_slice(&members[n_i[k]..n_i[k] + t_i[k]]);
    }
    train.shuffle(&mut rng);
    test.shuffle(&mut rng);

    Ok(TrainTestIndices { train, test })
}

/// K-fold partitioning that preserves class proportions in each fold.
#[derive(Debug, Clone, Copy)]
pub struct StratifiedKFold {
    n_splits: usize,
    shuffle: bool,
    seed: u64,
}

impl StratifiedKFold {
    /// Folds in label order, without shuffling.
    pub fn new(n_splits: usize) -> Self {
        StratifiedKFold {
            n_splits,
            shuffle: false,
            seed: 0,
        }
    }

    pub fn shuffled(n_splits: usize, seed: u64) -> Self {
        StratifiedKFold {
            n_splits,
            shuffle: true,
            seed,
        }
    }

    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    /// Returns one [`TrainTestIndices`] per fold, test indices ascending.
    pub fn split(&self, labels: &[usize]) -> anyhow::Result<Vec<TrainTestIndices>> {
        let k = self.n_splits;
        let n = labels.len();
        if k < 2 {
            bail!("Stratified k-fold needs at least 2 splits, got {}", k);
        }
        if k > n {
            bail!("Cannot have number of splits {} greater than the number of samples {}", k, n);
        }

        let classes = unique_labels(labels);
        let counts = class_counts(labels, &classes);
        if counts.iter().all(|&c| c < k) {
            bail!(
                "n_splits={} cannot be greater than the number of members in each class",
                k
            );
        }
        if let Some(min) = counts.iter().min() {
            if *min < k {
                warn!(
                    "The least populated class has only {} members, which is less than n_splits={}",
                    min, k
                );
            }
        }

        // Deal the label-sorted samples round-robin over the folds.
        let mut ordered: Vec<usize> = Vec::with_capacity(n);
        for (class_idx, &count) in counts.iter().enumerate() {
            ordered.extend(std::iter::repeat(class_idx).take(count));
        }
        let mut allocation = vec![vec![0usize; classes.len()]; k];
        for (pos, &class_idx) in ordered.iter().enumerate() {
            allocation[pos % k][class_idx] += 1;
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut test_fold = vec![0usize; n];
        for (class_idx, class) in classes.iter().enumerate() {
            let mut folds_for_class: Vec<usize> = Vec::with_capacity(counts[class_idx]);
            for (fold, alloc) in allocation.iter().enumerate() {
                folds_for_class.extend(std::iter::repeat(fold).take(alloc[class_idx]));
            }
            if self.shuffle {
                folds_for_class.shuffle(&mut rng);
            }
            let members = (0..n).filter(|&i| labels[i] == *class);
            for (sample, fold) in members.zip(folds_for_class) {
                test_fold[sample] = fold;
            }
        }

        Ok((0..k)
            .map(|fold| {
                let (test, train): (Vec<usize>, Vec<usize>) =
                    (0..n).partition(|&i| test_fold[i] == fold);
                TrainTestIndices { train, test }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pos: usize, neg: usize) -> Vec<usize> {
        let mut y = vec![1; pos];
        y.extend(vec![0; neg]);
        y
    }

    #[test]
    fn test_split_sizes_and_strata() {
        let y = labels(30, 20);
        let split = train_test_split_stratified(&y, 0.3, 42).unwrap();
        assert_eq!(split.test.len(), 15);
        assert_eq!(split.train.len(), 35);

        let test_pos = split.test.iter().filter(|&&i| y[i] == 1).count();
        assert_eq!(test_pos, 9);

        let mut all: Vec<usize> = split.train.iter().chain(split.test.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_is_reproducible() {
        let y = labels(12, 9);
        let a = train_test_split_stratified(&y, 0.3, 7).unwrap();
        let b = train_test_split_stratified(&y, 0.3, 7).unwrap();
        assert_eq!(a.train, b.train);
        assert_eq!(a.test, b.test);
    }

    #[test]
    fn test_split_rejects_singleton_class() {
        let y = labels(10, 1);
        assert!(train_test_split_stratified(&y, 0.3, 42).is_err());
        assert!(train_test_split_stratified(&labels(5, 5), 1.5, 42).is_err());
    }

    #[test]
    fn test_kfold_covers_every_sample_once() {
        let y = labels(13, 7);
        let folds = StratifiedKFold::new(5).split(&y).unwrap();
        assert_eq!(folds.len(), 5);
        let mut seen = vec![0; y.len()];
        for fold in &folds {
            assert_eq!(fold.train.len() + fold.test.len(), y.len());
            for &i in &fold.test {
                seen[i] += 1;
            }
            let pos = fold.test.iter().filter(|&&i| y[i] == 1).count();
            assert!(pos == 2 || pos == 3);
        }
        assert!(seen.iter().all(|&s| s == 1));
    }

    #[test]
    fn test_kfold_shuffled_differs_but_keeps_strata() {
        let y = labels(20, 20);
        let plain = StratifiedKFold::new(4).split(&y).unwrap();
        let shuffled = StratifiedKFold::shuffled(4, 42).split(&y).unwrap();
        assert_ne!(plain[0].test, shuffled[0].test);
        for fold in &shuffled {
            let pos = fold.test.iter().filter(|&&i| y[i] == 1).count();
            assert_eq!(pos, 5);
        }
    }

    #[test]
    fn test_kfold_errors() {
        assert!(StratifiedKFold::new(1).split(&labels(3, 3)).is_err());
        assert!(StratifiedKFold::new(10).split(&labels(3, 3)).is_err());
        assert!(StratifiedKFold::new(4).split(&labels(3, 3)).is_err());
    }
}
