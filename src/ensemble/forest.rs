use std::fmt;

use anyhow::bail;
use log::debug;
use ndarray::{Array1, Array2, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::ensemble::tree::{DecisionTree, MaxFeatures, TreeParams};
use crate::utils::{argmax, unique_labels, NormalizeSum};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassWeight {
    Uniform,
    /// `n_samples / (n_classes * class_count)`, computed on the full training labels.
    Balanced,
}

/// Hyperparameters of a [`RandomForestClassifier`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub class_weight: ClassWeight,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        ForestParams {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            class_weight: ClassWeight::Uniform,
            seed: 42,
        }
    }
}

impl ForestParams {
    pub fn n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn min_samples_split(mut self, n: usize) -> Self {
        self.min_samples_split = n;
        self
    }

    pub fn min_samples_leaf(mut self, n: usize) -> Self {
        self.min_samples_leaf = n;
        self
    }

    pub fn max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn class_weight(mut self, class_weight: ClassWeight) -> Self {
        self.class_weight = class_weight;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            max_features: self.max_features,
        }
    }
}

impl fmt::Display for ForestParams {
    /// Only the searchable hyperparameters, in name order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let depth = match self.max_depth {
            Some(d) => d.to_string(),
            None => "None".to_string(),
        };
        write!(
            f,
            "max_depth={}, max_features={}, min_samples_leaf={}, min_samples_split={}, n_estimators={}",
            depth, self.max_features, self.min_samples_leaf, self.min_samples_split, self.n_estimators
        )
    }
}

/// Bagged ensemble of [`DecisionTree`]s voting by averaged class probabilities.
#[derive(Debug, Clone)]
pub struct RandomForestClassifier {
    params: ForestParams,
    classes: Vec<usize>,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForestClassifier {
    pub fn fit(params: &ForestParams, x: ArrayView2<f64>, y: &[usize]) -> anyhow::Result<Self> {
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 || n_features == 0 {
            bail!("Cannot fit a forest on an empty {}x{} matrix", n_samples, n_features);
        }
        if y.len() != n_samples {
            bail!("Got {} labels for {} samples", y.len(), n_samples);
        }
        if params.n_estimators == 0 {
            bail!("n_estimators must be at least 1");
        }

        let classes = unique_labels(y);
        let encoded: Vec<usize> = y
            .iter()
            .map(|label| classes.binary_search(label).unwrap_or_default())
            .collect();
        let class_weights: Vec<f64> = match params.class_weight {
            ClassWeight::Uniform => vec![1.0; classes.len()],
            ClassWeight::Balanced => (0..classes.len())
                .map(|c| {
                    let count = encoded.iter().filter(|&&e| e == c).count();
                    n_samples as f64 / (classes.len() as f64 * count as f64)
                })
                .collect(),
        };
        debug!("Class weights {:?} for classes {:?}", class_weights, classes);

        let mut seeder = ChaCha8Rng::seed_from_u64(params.seed);
        let tree_seeds: Vec<u64> = (0..params.n_estimators).map(|_| seeder.random()).collect();
        let tree_params = params.tree_params();

        let trees = tree_seeds
            .par_iter()
            .map(|&seed| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let mut weights = vec![0.0; n_samples];
                if params.bootstrap {
                    for _ in 0..n_samples {
                        weights[rng.random_range(0..n_samples)] += 1.0;
                    }
                } else {
                    weights.fill(1.0);
                }
                for (w, &c) in weights.iter_mut().zip(encoded.iter()) {
                    *w *= class_weights[c];
                }
                DecisionTree::fit(&tree_params, x, &encoded, &weights, classes.len(), &mut rng)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(RandomForestClassifier {
            params: *params,
            classes,
            n_features,
            trees,
        })
    }

    /// Class probabilities per row, columns ordered as [`classes`](Self::classes).
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> anyhow::Result<Array2<f64>> {
        if x.ncols() != self.n_features {
            bail!(
                "Model was fitted on {} features, got {}",
                self.n_features,
                x.ncols()
            );
        }
        let n_classes = self.classes.len();
        let rows: Vec<Vec<f64>> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let row = x.row(i);
                let mut acc = vec![0.0; n_classes];
                for tree in &self.trees {
                    for (a, p) in acc.iter_mut().zip(tree.predict_proba_row(row)) {
                        *a += p;
                    }
                }
                let n_trees = self.trees.len() as f64;
                acc.iter_mut().for_each(|a| *a /= n_trees);
                acc
            })
            .collect();
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Ok(Array2::from_shape_vec((x.nrows(), n_classes), flat)?)
    }

    /// Predicted labels in the original label space.
    pub fn predict(&self, x: ArrayView2<f64>) -> anyhow::Result<Vec<usize>> {
        let proba = self.predict_proba(x)?;
        Ok(proba
            .rows()
            .into_iter()
            .map(|row| self.classes[argmax(&row.to_vec())])
            .collect())
    }

    /// Mean accuracy on the given data.
    pub fn score(&self, x: ArrayView2<f64>, y: &[usize]) -> anyhow::Result<f64> {
        let predicted = self.predict(x)?;
        crate::metrics::accuracy(y, &predicted)
    }

    /// Impurity-based importances averaged over the trees that split at least once.
    pub fn feature_importances(&self) -> Array1<f64> {
        let mut total = vec![0.0; self.n_features];
        let mut used = 0usize;
        for tree in self.trees.iter().filter(|t| t.node_count() > 1) {
            for (t, v) in total.iter_mut().zip(tree.feature_importances()) {
                *t += v;
            }
            used += 1;
        }
        if used > 0 {
            total.iter_mut().for_each(|t| *t /= used as f64);
        }
        total.normalize_sum();
        Array1::from(total)
    }

    pub fn classes(&self) -> &[usize] {
        &self.classes
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }
}
