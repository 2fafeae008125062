use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail};
use ndarray::{ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::utils::{argmax, NormalizeSum, ZeroVec};

// Feature values closer than this are treated as equal when placing thresholds.
const FEATURE_THRESHOLD: f64 = 1e-7;

/// Number of candidate features examined at each split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaxFeatures {
    Sqrt,
    Log2,
    All,
    Count(usize),
    Fraction(f64),
}

impl MaxFeatures {
    pub fn resolve(&self, n_features: usize) -> usize {
        let n = match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2().floor() as usize,
            MaxFeatures::All => n_features,
            MaxFeatures::Count(c) => *c,
            MaxFeatures::Fraction(f) => (f * n_features as f64).floor() as usize,
        };
        n.clamp(1, n_features.max(1))
    }
}

impl fmt::Display for MaxFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxFeatures::Sqrt => write!(f, "sqrt"),
            MaxFeatures::Log2 => write!(f, "log2"),
            MaxFeatures::All => write!(f, "all"),
            MaxFeatures::Count(c) => write!(f, "{}", c),
            MaxFeatures::Fraction(x) => write!(f, "{}", x),
        }
    }
}

impl FromStr for MaxFeatures {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqrt" => Ok(MaxFeatures::Sqrt),
            "log2" => Ok(MaxFeatures::Log2),
            "all" | "none" => Ok(MaxFeatures::All),
            other => {
                if let Ok(c) = other.parse::<usize>() {
                    if c == 0 {
                        bail!("max_features must be at least 1");
                    }
                    Ok(MaxFeatures::Count(c))
                } else if let Ok(x) = other.parse::<f64>() {
                    if !(x > 0.0 && x <= 1.0) {
                        bail!("Fractional max_features must lie in (0, 1], got {}", x);
                    }
                    Ok(MaxFeatures::Fraction(x))
                } else {
                    Err(anyhow!("Unknown max_features '{}'", s))
                }
            }
        }
    }
}

/// Growth limits of a single tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
}

impl Default for TreeParams {
    fn default() -> Self {
        TreeParams {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        /// Class probabilities.
        distribution: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    proxy: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

/// CART classification tree on Gini impurity with per-sample weights.
#[derive(Debug, Clone)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    n_classes: usize,
    n_features: usize,
    importances: Vec<f64>,
}

fn gini(counts: &[f64], total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    1.0 - counts.iter().map(|c| (c / total) * (c / total)).sum::<f64>()
}

struct Builder<'a, R: Rng> {
    x: ArrayView2<'a, f64>,
    y: &'a [usize],
    weight: &'a [f64],
    n_classes: usize,
    params: TreeParams,
    max_features: usize,
    rng: &'a mut R,
    nodes: Vec<Node>,
    importances: Vec<f64>,
    features: Vec<usize>,
    left_counts: Vec<f64>,
    right_counts: Vec<f64>,
}

impl<R: Rng> Builder<'_, R> {
    fn class_counts(&self, samples: &[usize]) -> Vec<f64> {
        let mut counts = vec![0.0; self.n_classes];
        for &s in samples {
            counts[self.y[s]] += self.weight[s];
        }
        counts
    }

    fn build(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let counts = self.class_counts(&samples);
        let node_weight: f64 = counts.iter().sum();
        let impurity = gini(&counts, node_weight);

        let n = samples.len();
        let is_leaf = self.params.max_depth.is_some_and(|d| depth >= d)
            || n < self.params.min_samples_split
            || n < 2 * self.params.min_samples_leaf
            || impurity <= f64::EPSILON;

        let split = if is_leaf {
            None
        } else {
            self.best_split(&samples)
        };

        let id = self.nodes.len();
        let Some(split) = split else {
            let mut distribution = counts;
            distribution.normalize_sum();
            self.nodes.push(Node::Leaf { distribution });
            return id;
        };

        let left_counts = self.class_counts(&split.left);
        let right_counts = self.class_counts(&split.right);
        let left_weight: f64 = left_counts.iter().sum();
        let right_weight: f64 = right_counts.iter().sum();
        self.importances[split.feature] += node_weight * impurity
            - left_weight * gini(&left_counts, left_weight)
            - right_weight * gini(&right_counts, right_weight);

        // Reserve the slot; children are filled in below.
        self.nodes.push(Node::Leaf {
            distribution: Vec::new(),
        });
        let left = self.build(split.left, depth + 1);
        let right = self.build(split.right, depth + 1);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    /// Best threshold over a random draw of candidate features. Constant features are
    /// skipped without counting against `max_features`.
    fn best_split(&mut self, samples: &[usize]) -> Option<SplitCandidate> {
        let n = samples.len();
        let min_leaf = self.params.min_samples_leaf;
        self.features.shuffle(&mut *self.rng);

        let mut best: Option<SplitCandidate> = None;
        let mut visited = 0;
        let mut column: Vec<(f64, usize)> = Vec::with_capacity(n);

        for fi in 0..self.features.len() {
            if visited >= self.max_features {
                break;
            }
            let feature = self.features[fi];
            column.clear();
            column.extend(samples.iter().map(|&s| (self.x[[s, feature]], s)));
            column.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

            if column[n - 1].0 <= column[0].0 + FEATURE_THRESHOLD {
                continue;
            }
            visited += 1;

            self.left_counts.zero_len(self.n_classes);
            self.right_counts.zero_len(self.n_classes);
            for &(_, s) in column.iter() {
                self.right_counts[self.y[s]] += self.weight[s];
            }
            let mut left_weight = 0.0;
            let mut right_weight: f64 = self.right_counts.iter().sum();

            for p in 0..n - 1 {
                let s = column[p].1;
                let w = self.weight[s];
                self.left_counts[self.y[s]] += w;
                self.right_counts[self.y[s]] -= w;
                left_weight += w;
                right_weight -= w;

                if column[p + 1].0 <= column[p].0 + FEATURE_THRESHOLD {
                    continue;
                }
                let n_left = p + 1;
                if n_left < min_leaf || n - n_left < min_leaf {
                    continue;
                }

                let proxy = -left_weight * gini(&self.left_counts, left_weight)
                    - right_weight * gini(&self.right_counts, right_weight);
                if best.as_ref().map_or(true, |b| proxy > b.proxy) {
                    let mut threshold = (column[p].0 + column[p + 1].0) / 2.0;
                    if threshold >= column[p + 1].0 {
                        threshold = column[p].0;
                    }
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        proxy,
                        left: Vec::new(),
                        right: Vec::new(),
                    });
                }
            }
        }

        let mut best = best?;
        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&s| self.x[[s, best.feature]] <= best.threshold);
        best.left = left;
        best.right = right;
        Some(best)
    }
}

impl DecisionTree {
    /// Fits a tree on the rows of `x` with a positive weight. Labels in `y` are class
    /// indices below `n_classes`.
    pub fn fit<R: Rng>(
        params: &TreeParams,
        x: ArrayView2<f64>,
        y: &[usize],
        sample_weight: &[f64],
        n_classes: usize,
        rng: &mut R,
    ) -> anyhow::Result<Self> {
        let (n_samples, n_features) = x.dim();
        if y.len() != n_samples || sample_weight.len() != n_samples {
            bail!(
                "Got {} labels and {} weights for {} samples",
                y.len(),
                sample_weight.len(),
                n_samples
            );
        }
        if params.min_samples_split < 2 {
            bail!("min_samples_split must be at least 2, got {}", params.min_samples_split);
        }
        if params.min_samples_leaf < 1 {
            bail!("min_samples_leaf must be at least 1");
        }
        if params.max_depth == Some(0) {
            bail!("max_depth must be at least 1");
        }
        if let Some(&bad) = y.iter().find(|&&c| c >= n_classes) {
            bail!("Class index {} out of range for {} classes", bad, n_classes);
        }
        let samples: Vec<usize> = (0..n_samples).filter(|&i| sample_weight[i] > 0.0).collect();
        if samples.is_empty() {
            bail!("No samples with positive weight to fit a tree on");
        }

        let mut builder = Builder {
            x: x.reborrow(),
            y,
            weight: sample_weight,
            n_classes,
            params: *params,
            max_features: params.max_features.resolve(n_features),
            rng,
            nodes: Vec::new(),
            importances: vec![0.0; n_features],
            features: (0..n_features).collect(),
            left_counts: Vec::new(),
            right_counts: Vec::new(),
        };
        builder.build(samples, 0);

        let Builder {
            nodes, importances, ..
        } = builder;
        Ok(DecisionTree {
            nodes,
            n_classes,
            n_features,
            importances,
        })
    }

    fn leaf(&self, row: ArrayView1<f64>) -> &[f64] {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { distribution } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn predict_proba_row(&self, row: ArrayView1<f64>) -> &[f64] {
        self.leaf(row)
    }

    /// Class indices of the most probable class per row.
    pub fn predict(&self, x: ArrayView2<f64>) -> Vec<usize> {
        x.rows()
            .into_iter()
            .map(|row| argmax(self.leaf(row)))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], id: usize) -> usize {
            match &nodes[id] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Mean decrease in impurity per feature, summing to one unless the tree never split.
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut importances = self.importances.clone();
        importances.normalize_sum();
        importances
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn fit(params: TreeParams, x: ArrayView2<f64>, y: &[usize]) -> DecisionTree {
        let w = vec![1.0; y.len()];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        DecisionTree::fit(&params, x, y, &w, 2, &mut rng).unwrap()
    }

    #[test]
    fn test_max_features_resolve() {
        assert_eq!(MaxFeatures::Sqrt.resolve(100), 10);
        assert_eq!(MaxFeatures::Sqrt.resolve(2), 1);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
        assert_eq!(MaxFeatures::Fraction(0.5).resolve(9), 4);
        assert_eq!(MaxFeatures::Count(50).resolve(9), 9);
        assert_eq!("sqrt".parse::<MaxFeatures>().unwrap(), MaxFeatures::Sqrt);
        assert_eq!("7".parse::<MaxFeatures>().unwrap(), MaxFeatures::Count(7));
        assert_eq!("0.25".parse::<MaxFeatures>().unwrap(), MaxFeatures::Fraction(0.25));
        assert!("1.5".parse::<MaxFeatures>().is_err());
        assert!("auto-ish".parse::<MaxFeatures>().is_err());
    }

    #[test]
    fn test_learns_threshold() {
        let x = array![[1.0, 0.0], [2.0, 0.0], [3.0, 0.0], [10.0, 0.0], [11.0, 0.0], [12.0, 0.0]];
        let y = [0, 0, 0, 1, 1, 1];
        let tree = fit(TreeParams::default(), x.view(), &y);
        assert_eq!(tree.predict(x.view()), y.to_vec());
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.predict(array![[6.4, 5.0], [6.6, 5.0]].view()), vec![0, 1]);

        let importances = tree.feature_importances();
        assert_relative_eq!(importances[0], 1.0);
        assert_relative_eq!(importances[1], 0.0);
    }

    #[test]
    fn test_min_samples_leaf_blocks_split() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = [0, 0, 0, 1];
        let params = TreeParams {
            min_samples_leaf: 2,
            ..TreeParams::default()
        };
        let tree = fit(params, x.view(), &y);
        // The pure split at 3.5 would leave a single sample on the right.
        assert!(tree.node_count() <= 3);
        let leaf = tree.predict_proba_row(array![4.0].view());
        assert!(leaf[1] < 1.0);
    }

    #[test]
    fn test_max_depth_and_min_split() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0]];
        let y = [0, 1, 0, 1, 0, 1];
        let shallow = fit(
            TreeParams {
                max_depth: Some(1),
                ..TreeParams::default()
            },
            x.view(),
            &y,
        );
        assert!(shallow.depth() <= 1);

        let stump = fit(
            TreeParams {
                min_samples_split: 10,
                ..TreeParams::default()
            },
            x.view(),
            &y,
        );
        assert_eq!(stump.node_count(), 1);
        assert_relative_eq!(stump.predict_proba_row(x.row(0))[0], 0.5);
        assert!(stump.feature_importances().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_weights_shift_leaf_distribution() {
        let x = array![[1.0], [1.0], [1.0]];
        let y = [0, 1, 1];
        let w = [4.0, 1.0, 1.0];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let tree = DecisionTree::fit(&TreeParams::default(), x.view(), &y, &w, 2, &mut rng).unwrap();
        let p = tree.predict_proba_row(x.row(0));
        assert_relative_eq!(p[0], 4.0 / 6.0);
        assert_eq!(tree.predict(x.view()), vec![0, 0, 0]);
    }

    #[test]
    fn test_fit_errors() {
        let x = array![[1.0], [2.0]];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let params = TreeParams::default();
        assert!(DecisionTree::fit(&params, x.view(), &[0], &[1.0, 1.0], 2, &mut rng).is_err());
        assert!(DecisionTree::fit(&params, x.view(), &[0, 2], &[1.0, 1.0], 2, &mut rng).is_err());
        assert!(DecisionTree::fit(&params, x.view(), &[0, 1], &[0.0, 0.0], 2, &mut rng).is_err());
        let bad = TreeParams {
            min_samples_split: 1,
            ..params
        };
        assert!(DecisionTree::fit(&bad, x.view(), &[0, 1], &[1.0, 1.0], 2, &mut rng).is_err());
    }
}
