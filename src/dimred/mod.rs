//! # Dimensionality Reduction
//!
//! Algorithms for projecting high-dimensional count profiles into a few dimensions for
//! visualization.
//!
//! ## Available
//! - **PCA** ([`pca`]): linear projection, used as an optional denoising step
//! - **t-SNE** ([`tsne`]): Barnes-Hut t-Distributed Stochastic Neighbor Embedding for
//!   non-linear visualization of local structure
//!
//! ## Usage Notes
//! - t-SNE distances are Euclidean on the raw input; when the feature count is very large,
//!   reducing to a few dozen principal components first speeds up the neighbour search
//!   without changing the picture much
//! - t-SNE embeddings are not reproducible run to run; the Barnes-Hut backend draws its
//!   initial layout from the thread-local generator

pub mod pca;
pub mod tsne;

pub use pca::{NalgebraSVD, PCABuilder, Pca, SVDImplementation};
pub use tsne::{embed, LearningRate, TsneConfig};
