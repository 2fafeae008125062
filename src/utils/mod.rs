use std::cmp::Ordering;

use anyhow::bail;
use ndarray::{Array2, ArrayView1, ArrayView2};

pub trait ZeroVec {
    fn zero_len(&mut self, len: usize);
}

impl<T: Default + Clone> ZeroVec for Vec<T> {
    fn zero_len(&mut self, len: usize) {
        self.clear();
        self.resize(len, T::default());
    }
}

/// Rescales a slice in place so that it sums to one. All-zero input is left untouched.
pub trait NormalizeSum {
    fn normalize_sum(&mut self);
}

impl NormalizeSum for [f64] {
    fn normalize_sum(&mut self) {
        let total: f64 = self.iter().sum();
        if total > 0.0 {
            for v in self.iter_mut() {
                *v /= total;
            }
        }
    }
}

/// Indices that order `values` from largest to smallest. NaN sorts last.
pub fn argsort_desc(values: &[f64]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or_else(|| values[a].is_nan().cmp(&values[b].is_nan()))
    });
    idx
}

/// Index of the largest value, first occurrence on ties.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v.partial_cmp(&values[best]) == Some(Ordering::Greater) {
            best = i;
        }
    }
    best
}

/// Copies the given rows into a new owned matrix.
pub fn select_rows(x: ArrayView2<f64>, rows: &[usize]) -> anyhow::Result<Array2<f64>> {
    let n = x.nrows();
    if let Some(&bad) = rows.iter().find(|&&r| r >= n) {
        bail!("Row index {} out of bounds for matrix with {} rows", bad, n);
    }
    Ok(x.select(ndarray::Axis(0), rows))
}

pub fn select_labels(y: &[usize], rows: &[usize]) -> Vec<usize> {
    rows.iter().map(|&r| y[r]).collect()
}

/// Sorted distinct labels.
pub fn unique_labels(y: &[usize]) -> Vec<usize> {
    let mut classes = y.to_vec();
    classes.sort_unstable();
    classes.dedup();
    classes
}

pub fn squared_euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x - y) * (x - y))
        .sum()
}
