mod kmeans;
pub use kmeans::KMeans;
pub use kmeans::KMeansConfig;
pub use kmeans::KMeansResult;
