//! # Tree ensembles
//!
//! - [`DecisionTree`]: weighted CART classifier on Gini impurity
//! - [`RandomForestClassifier`]: bootstrap-aggregated trees with per-split feature
//!   subsampling, fitted in parallel on the rayon pool
//!
//! Both report mean-decrease-in-impurity feature importances.

mod forest;
mod tree;

pub use forest::{ClassWeight, ForestParams, RandomForestClassifier};
pub use tree::{DecisionTree, MaxFeatures, TreeParams};
