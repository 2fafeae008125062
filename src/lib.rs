pub mod clustering;
pub mod dataset;
pub mod dimred;
pub mod ensemble;
pub mod labels;
pub mod metrics;
pub mod model_selection;
pub mod pipeline;
pub mod plot;
pub mod split;
mod utils;

pub use dataset::{CountMatrix, LabeledMatrix};
pub use pipeline::{run, PipelineConfig, PipelineReport};
