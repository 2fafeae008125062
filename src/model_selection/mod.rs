//! # Model selection
//!
//! Exhaustive hyperparameter search and k-fold scoring for [`RandomForestClassifier`].
//!
//! Every (candidate, fold) fit is an independent task on the rayon pool, so the degree of
//! parallelism follows whatever pool the caller installs. Scoring is plain accuracy.

use std::time::Instant;

use anyhow::{anyhow, bail};
use log::info;
use ndarray::ArrayView2;
use rayon::prelude::*;

use crate::ensemble::{ForestParams, MaxFeatures, RandomForestClassifier};
use crate::split::{StratifiedKFold, TrainTestIndices};
use crate::utils::{select_labels, select_rows};

/// Value lists for the searchable forest hyperparameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamGrid {
    pub n_estimators: Vec<usize>,
    pub max_depth: Vec<Option<usize>>,
    pub min_samples_split: Vec<usize>,
    pub min_samples_leaf: Vec<usize>,
    pub max_features: Vec<MaxFeatures>,
}

impl Default for ParamGrid {
    fn default() -> Self {
        ParamGrid {
            n_estimators: vec![100],
            max_depth: vec![Some(8)],
            min_samples_split: vec![20],
            min_samples_leaf: vec![20],
            max_features: vec![MaxFeatures::Sqrt],
        }
    }
}

impl ParamGrid {
    /// Cartesian product over the lists, parameter names in alphabetical order with the
    /// last one varying fastest. Fields not in the grid come from `base`.
    pub fn candidates(&self, base: &ForestParams) -> anyhow::Result<Vec<ForestParams>> {
        if self.n_estimators.is_empty()
            || self.max_depth.is_empty()
            || self.min_samples_split.is_empty()
            || self.min_samples_leaf.is_empty()
            || self.max_features.is_empty()
        {
            bail!("Every parameter grid entry needs at least one value");
        }

        let mut out = Vec::new();
        for &max_depth in &self.max_depth {
            for &max_features in &self.max_features {
                for &min_samples_leaf in &self.min_samples_leaf {
                    for &min_samples_split in &self.min_samples_split {
                        for &n_estimators in &self.n_estimators {
                            out.push(
                                base.max_depth(max_depth)
                                    .max_features(max_features)
                                    .min_samples_leaf(min_samples_leaf)
                                    .min_samples_split(min_samples_split)
                                    .n_estimators(n_estimators),
                            );
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct CandidateResult {
    pub params: ForestParams,
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
    pub std_score: f64,
    /// 1 is best; tied candidates share the lower rank.
    pub rank: usize,
}

#[derive(Debug)]
pub struct GridSearchResult {
    pub candidates: Vec<CandidateResult>,
    pub best_index: usize,
    /// Best candidate refitted on all the data passed to the search.
    pub best_estimator: RandomForestClassifier,
}

impl GridSearchResult {
    pub fn best_params(&self) -> &ForestParams {
        &self.candidates[self.best_index].params
    }

    pub fn best_score(&self) -> f64 {
        self.candidates[self.best_index].mean_score
    }
}

fn fit_and_score(
    params: &ForestParams,
    x: ArrayView2<f64>,
    y: &[usize],
    fold: &TrainTestIndices,
) -> anyhow::Result<f64> {
    let x_train = select_rows(x, &fold.train)?;
    let y_train = select_labels(y, &fold.train);
    let x_test = select_rows(x, &fold.test)?;
    let y_test = select_labels(y, &fold.test);
    let model = RandomForestClassifier::fit(params, x_train.view(), &y_train)?;
    model.score(x_test.view(), &y_test)
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}

pub struct GridSearchCV {
    base: ForestParams,
    grid: ParamGrid,
    cv: StratifiedKFold,
}

impl GridSearchCV {
    pub fn new(base: ForestParams, grid: ParamGrid, cv: StratifiedKFold) -> Self {
        GridSearchCV { base, grid, cv }
    }

    pub fn fit(&self, x: ArrayView2<f64>, y: &[usize]) -> anyhow::Result<GridSearchResult> {
        if x.nrows() != y.len() {
            bail!("Got {} labels for {} samples", y.len(), x.nrows());
        }
        let candidates = self.grid.candidates(&self.base)?;
        let folds = self.cv.split(y)?;
        let n_folds = folds.len();
        info!(
            "Fitting {} folds for each of {} candidates, totalling {} fits",
            n_folds,
            candidates.len(),
            n_folds * candidates.len()
        );

        let tasks: Vec<(usize, usize)> = (0..candidates.len())
            .flat_map(|c| (0..n_folds).map(move |f| (c, f)))
            .collect();
        let scores = tasks
            .par_iter()
            .map(|&(c, f)| -> anyhow::Result<f64> {
                let started = Instant::now();
                let score = fit_and_score(&candidates[c], x, y, &folds[f])?;
                info!(
                    "[CV {}/{}] END {}; accuracy={:.3}; total time={:.1}s",
                    f + 1,
                    n_folds,
                    candidates[c],
                    score,
                    started.elapsed().as_secs_f64()
                );
                Ok(score)
            })
            .collect::<anyhow::Result<Vec<f64>>>()?;

        let mut results: Vec<CandidateResult> = candidates
            .iter()
            .enumerate()
            .map(|(c, params)| {
                let fold_scores = scores[c * n_folds..(c + 1) * n_folds].to_vec();
                let (mean_score, std_score) = mean_std(&fold_scores);
                CandidateResult {
                    params: *params,
                    fold_scores,
                    mean_score,
                    std_score,
                    rank: 0,
                }
            })
            .collect();
        let means: Vec<f64> = results.iter().map(|r| r.mean_score).collect();
        for r in results.iter_mut() {
            r.rank = 1 + means.iter().filter(|&&m| m > r.mean_score).count();
        }

        let best_index = results
            .iter()
            .position(|r| r.rank == 1)
            .ok_or_else(|| anyhow!("Grid search produced no ranked candidate"))?;
        info!(
            "Best candidate {} with mean accuracy {:.4}",
            results[best_index].params, results[best_index].mean_score
        );

        let best_estimator = RandomForestClassifier::fit(&results[best_index].params, x, y)?;
        Ok(GridSearchResult {
            candidates: results,
            best_index,
            best_estimator,
        })
    }
}

/// Accuracy of `params` on each fold of `cv`.
pub fn cross_val_score(
    params: &ForestParams,
    x: ArrayView2<f64>,
    y: &[usize],
    cv: &StratifiedKFold,
) -> anyhow::Result<Vec<f64>> {
    if x.nrows() != y.len() {
        bail!("Got {} labels for {} samples", y.len(), x.nrows());
    }
    let folds = cv.split(y)?;
    folds
        .par_iter()
        .map(|fold| fit_and_score(params, x, y, fold))
        .collect()
}
