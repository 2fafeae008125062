use std::sync::Arc;

use anyhow::{anyhow, bail};
use log::debug;
use nalgebra::DMatrix;
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;

/// Thin singular value decomposition backend used by [`Pca`].
pub trait SVDImplementation: Send + Sync {
    /// Returns `(u, s, vt)` with singular values in descending order.
    fn compute(&self, matrix: ArrayView2<f64>) -> anyhow::Result<(Array2<f64>, Array1<f64>, Array2<f64>)>;
}

pub struct NalgebraSVD;

impl SVDImplementation for NalgebraSVD {
    fn compute(&self, matrix: ArrayView2<f64>) -> anyhow::Result<(Array2<f64>, Array1<f64>, Array2<f64>)> {
        let (rows, cols) = matrix.dim();
        let dm = DMatrix::from_fn(rows, cols, |i, j| matrix[[i, j]]);
        let svd = dm.svd(true, true);
        let u = svd.u.ok_or_else(|| anyhow!("SVD did not produce left singular vectors"))?;
        let vt = svd
            .v_t
            .ok_or_else(|| anyhow!("SVD did not produce right singular vectors"))?;
        let sv = svd.singular_values;

        let mut order: Vec<usize> = (0..sv.len()).collect();
        order.sort_by(|&a, &b| sv[b].partial_cmp(&sv[a]).unwrap_or(std::cmp::Ordering::Equal));

        let s = Array1::from_iter(order.iter().map(|&k| sv[k]));
        let u = Array2::from_shape_fn((u.nrows(), order.len()), |(i, k)| u[(i, order[k])]);
        let vt = Array2::from_shape_fn((order.len(), vt.ncols()), |(k, j)| vt[(order[k], j)]);
        Ok((u, s, vt))
    }
}

pub struct PCABuilder<S: SVDImplementation> {
    n_components: Option<usize>,
    center: bool,
    scale: bool,
    svd_implementation: Arc<S>,
}

impl<S: SVDImplementation> PCABuilder<S> {
    pub fn new(svd_implementation: S) -> Self {
        PCABuilder {
            n_components: None,
            center: true,
            scale: false,
            svd_implementation: Arc::new(svd_implementation),
        }
    }

    pub fn n_components(mut self, n_components: usize) -> Self {
        self.n_components = Some(n_components);
        self
    }

    pub fn center(mut self, center: bool) -> Self {
        self.center = center;
        self
    }

    pub fn scale(mut self, scale: bool) -> Self {
        self.scale = scale;
        self
    }

    pub fn build(self) -> Pca<S> {
        Pca {
            n_components: self.n_components,
            center: self.center,
            scale: self.scale,
            svd_implementation: self.svd_implementation,
            components: None,
            mean: None,
            std_dev: None,
            explained_variance_ratio: None,
        }
    }
}

pub struct Pca<S: SVDImplementation> {
    n_components: Option<usize>,
    center: bool,
    scale: bool,
    svd_implementation: Arc<S>,
    components: Option<Array2<f64>>,
    mean: Option<Array1<f64>>,
    std_dev: Option<Array1<f64>>,
    explained_variance_ratio: Option<Array1<f64>>,
}

impl<S: SVDImplementation> Pca<S> {
    pub fn fit(&mut self, x: ArrayView2<f64>) -> anyhow::Result<()> {
        let (n_samples, n_features) = x.dim();
        if n_samples < 2 {
            bail!("PCA needs at least 2 samples, got {}", n_samples);
        }
        let max_components = n_samples.min(n_features);
        let n_components = self.n_components.unwrap_or(max_components);
        if n_components == 0 || n_components > max_components {
            bail!(
                "n_components={} must be between 1 and min(n_samples, n_features)={}",
                n_components,
                max_components
            );
        }

        let mean = if self.center {
            Some(
                x.mean_axis(Axis(0))
                    .ok_or_else(|| anyhow!("Failed to compute column means"))?,
            )
        } else {
            None
        };

        // Constant columns keep unit scale.
        let std_dev = if self.scale {
            Some(x.std_axis(Axis(0), 0.0).mapv(|s| if s > 0.0 { s } else { 1.0 }))
        } else {
            None
        };

        let x_preprocessed = self.preprocess(x, &mean, &std_dev);
        let (_u, s, vt) = self.svd_implementation.compute(x_preprocessed.view())?;

        let components = vt.slice(s![..n_components, ..]).to_owned();
        let eigenvalues = s.mapv(|x| x * x / (n_samples as f64 - 1.0));
        let total_variance = eigenvalues.sum();
        let explained_variance_ratio = if total_variance > 0.0 {
            eigenvalues.slice(s![..n_components]).mapv(|e| e / total_variance)
        } else {
            Array1::zeros(n_components)
        };
        debug!(
            "PCA kept {} components explaining {:.4} of the variance",
            n_components,
            explained_variance_ratio.sum()
        );

        self.components = Some(components);
        self.mean = mean;
        self.std_dev = std_dev;
        self.explained_variance_ratio = Some(explained_variance_ratio);
        Ok(())
    }

    fn preprocess(
        &self,
        x: ArrayView2<f64>,
        mean: &Option<Array1<f64>>,
        std_dev: &Option<Array1<f64>>,
    ) -> Array2<f64> {
        let mut x_preprocessed = x.to_owned();

        if let Some(m) = mean {
            x_preprocessed
                .axis_iter_mut(Axis(0))
                .into_par_iter()
                .for_each(|mut row| {
                    row -= m;
                });
        }

        if let Some(s) = std_dev {
            x_preprocessed
                .axis_iter_mut(Axis(0))
                .into_par_iter()
                .for_each(|mut row| {
                    row /= s;
                });
        }

        x_preprocessed
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> anyhow::Result<Array2<f64>> {
        let components = self
            .components
            .as_ref()
            .ok_or_else(|| anyhow!("PCA has not been fitted yet"))?;
        if x.ncols() != components.ncols() {
            bail!(
                "Expected {} features, got {}",
                components.ncols(),
                x.ncols()
            );
        }
        let x_preprocessed = self.preprocess(x, &self.mean, &self.std_dev);
        Ok(x_preprocessed.dot(&components.t()))
    }

    pub fn fit_transform(&mut self, x: ArrayView2<f64>) -> anyhow::Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }

    pub fn components(&self) -> Option<&Array2<f64>> {
        self.components.as_ref()
    }

    pub fn explained_variance_ratio(&self) -> Option<&Array1<f64>> {
        self.explained_variance_ratio.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_pca_shapes() {
        let x = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.5], [7.0, 8.0, 9.0], [2.0, 1.0, 0.0]];
        let mut pca = PCABuilder::new(NalgebraSVD).n_components(2).build();
        let transformed = pca.fit_transform(x.view()).unwrap();
        assert_eq!(transformed.shape(), &[4, 2]);
        assert_eq!(pca.components().unwrap().shape(), &[2, 3]);
    }

    #[test]
    fn test_pca_collinear_data_has_one_component() {
        let x = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0], [4.0, 8.0]];
        let mut pca = PCABuilder::new(NalgebraSVD).build();
        pca.fit(x.view()).unwrap();
        let ratio = pca.explained_variance_ratio().unwrap();
        assert_relative_eq!(ratio[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(ratio[1], 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_pca_projection_preserves_distances() {
        let x = array![[0.0, 0.0], [3.0, 4.0], [6.0, 8.0]];
        let mut pca = PCABuilder::new(NalgebraSVD).n_components(1).build();
        let t = pca.fit_transform(x.view()).unwrap();
        assert_relative_eq!((t[[0, 0]] - t[[2, 0]]).abs(), 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pca_errors() {
        let x = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let pca = PCABuilder::new(NalgebraSVD).n_components(2).build();
        assert!(pca.transform(x.view()).is_err());

        let mut too_many = PCABuilder::new(NalgebraSVD).n_components(3).build();
        assert!(too_many.fit(x.view()).is_err());
    }
}
