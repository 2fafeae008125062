use anyhow::bail;
use log::{info, warn};
use ndarray::{Array2, ArrayView2};

/// How the gradient step size is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LearningRate {
    /// `max(n_samples / early_exaggeration / 4, 50)`
    Auto,
    Fixed(f64),
}

const EARLY_EXAGGERATION: f64 = 12.0;

impl LearningRate {
    pub fn resolve(&self, n_samples: usize) -> f64 {
        match self {
            LearningRate::Auto => (n_samples as f64 / EARLY_EXAGGERATION / 4.0).max(50.0),
            LearningRate::Fixed(lr) => *lr,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TsneConfig {
    pub output_dim: u8,
    pub perplexity: f64,
    pub learning_rate: LearningRate,
    pub epochs: usize,
    /// Barnes-Hut accuracy trade-off; `0.0` switches to the exact gradient.
    pub theta: f64,
}

impl Default for TsneConfig {
    fn default() -> Self {
        TsneConfig {
            output_dim: 2,
            perplexity: 30.0,
            learning_rate: LearningRate::Auto,
            epochs: 1000,
            theta: 0.5,
        }
    }
}

impl TsneConfig {
    pub fn perplexity(mut self, perplexity: f64) -> Self {
        self.perplexity = perplexity;
        self
    }

    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn learning_rate(mut self, learning_rate: LearningRate) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn theta(mut self, theta: f64) -> Self {
        self.theta = theta;
        self
    }

    fn validate(&self, n_obs: usize) -> anyhow::Result<()> {
        if self.output_dim == 0 {
            bail!("t-SNE output dimension must be at least 1");
        }
        if self.perplexity <= 0.0 {
            bail!("Perplexity must be positive, got {}", self.perplexity);
        }
        if n_obs < 4 {
            bail!("t-SNE needs at least 4 samples, got {}", n_obs);
        }
        if self.perplexity >= n_obs as f64 {
            bail!(
                "Perplexity {} must be less than the number of samples ({})",
                self.perplexity,
                n_obs
            );
        }
        if self.epochs == 0 {
            bail!("t-SNE needs at least one epoch");
        }
        if self.theta < 0.0 {
            bail!("Barnes-Hut theta must be non-negative, got {}", self.theta);
        }
        Ok(())
    }
}

/// Perplexity handed to the backend, which needs `3 * perplexity <= n_samples - 1`.
fn effective_perplexity(perplexity: f64, n_obs: usize) -> f64 {
    let limit = ((n_obs - 1) / 3) as f64;
    if perplexity > limit {
        warn!(
            "Perplexity {} is too large for {} samples, using {}",
            perplexity, n_obs, limit
        );
        limit
    } else {
        perplexity
    }
}

fn euclidean(sample_a: &&[f64], sample_b: &&[f64]) -> f64 {
    sample_a
        .iter()
        .zip(sample_b.iter())
        .map(|(&a, &b)| num_traits::Float::powi(a - b, 2))
        .sum::<f64>()
        .sqrt()
}

/// Embeds the rows of `x` into `config.output_dim` dimensions.
pub fn embed(x: ArrayView2<f64>, config: &TsneConfig) -> anyhow::Result<Array2<f64>> {
    let (n_obs, n_dim) = x.dim();
    config.validate(n_obs)?;
    if n_dim == 0 {
        bail!("Cannot embed samples without features");
    }

    let perplexity = effective_perplexity(config.perplexity, n_obs);
    let learning_rate = config.learning_rate.resolve(n_obs);
    info!(
        "Running t-SNE on {} samples x {} features (perplexity {}, learning rate {:.1}, {} epochs)",
        n_obs, n_dim, perplexity, learning_rate, config.epochs
    );

    let owned = x.as_standard_layout();
    let x_slice = match owned.as_slice() {
        Some(slice) => slice,
        None => bail!("t-SNE input is not contiguous"),
    };
    let x_chunked_slice: Vec<&[f64]> = x_slice.chunks(n_dim).collect();

    let mut tsne = bhtsne::tSNE::new(&x_chunked_slice);
    tsne.embedding_dim(config.output_dim)
        .perplexity(perplexity)
        .epochs(config.epochs)
        .learning_rate(learning_rate);
    if config.theta > 0.0 {
        tsne.barnes_hut(config.theta, euclidean);
    } else {
        tsne.exact(euclidean);
    }
    let embedding = tsne.embedding();

    let result = Array2::from_shape_vec((n_obs, config.output_dim as usize), embedding)?;
    Ok(result)
}
