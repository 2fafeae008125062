//! # lactotype
//!
//! Command-line entry point: runs the full pipeline on one tab-separated count matrix and
//! prints the evaluation summary.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use env_logger::Env;

use lactotype::clustering::KMeansConfig;
use lactotype::dimred::TsneConfig;
use lactotype::ensemble::MaxFeatures;
use lactotype::labels::LabelRule;
use lactotype::model_selection::ParamGrid;
use lactotype::{run, PipelineConfig};

/// A `--max-depth` entry: a depth or `none` for unlimited.
#[derive(Debug, Clone, Copy)]
struct Depth(Option<usize>);

impl FromStr for Depth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("none") {
            return Ok(Depth(None));
        }
        s.parse::<usize>()
            .map(|d| Depth(Some(d)))
            .map_err(|e| format!("invalid depth '{}': {}", s, e))
    }
}

#[derive(Parser)]
#[command(name = "lactotype")]
#[command(about = "t-SNE, k-means and random forest classification of lactotype count data", long_about = None)]
struct Cli {
    /// Tab-separated count matrix, features as rows and samples as columns
    input: PathBuf,

    /// Directory receiving df.csv and the figures
    #[arg(short, long, default_value = "new")]
    output_dir: PathBuf,

    /// Sample-name substring marking the positive class
    #[arg(short, long, default_value = "crispatus")]
    pattern: String,

    #[arg(long, default_value = "42")]
    seed: u64,

    /// Fraction of samples held out for testing
    #[arg(long, default_value = "0.3")]
    test_size: f64,

    #[arg(long, default_value = "30")]
    perplexity: f64,

    #[arg(long, default_value = "1000")]
    tsne_epochs: usize,

    /// Reduce to this many principal components before t-SNE
    #[arg(long)]
    pca_components: Option<usize>,

    /// Number of k-means clusters
    #[arg(long, default_value = "2")]
    clusters: usize,

    #[arg(long, value_delimiter = ',', default_value = "100")]
    n_estimators: Vec<usize>,

    /// Tree depths to search, `none` for unlimited
    #[arg(long, value_delimiter = ',', default_value = "8")]
    max_depth: Vec<Depth>,

    #[arg(long, value_delimiter = ',', default_value = "20")]
    min_samples_split: Vec<usize>,

    #[arg(long, value_delimiter = ',', default_value = "20")]
    min_samples_leaf: Vec<usize>,

    /// Features per split: sqrt, log2, all, a count or a fraction
    #[arg(long, value_delimiter = ',', default_value = "sqrt")]
    max_features: Vec<MaxFeatures>,

    /// Folds of the grid search
    #[arg(long, default_value = "5")]
    grid_folds: usize,

    /// Folds of the shuffled cross-validation of the best model
    #[arg(long, default_value = "10")]
    cv_folds: usize,

    /// Worker threads (default: all cores)
    #[arg(short, long)]
    threads: Option<usize>,
}

impl Cli {
    fn into_config(self) -> PipelineConfig {
        let grid = ParamGrid {
            n_estimators: self.n_estimators,
            max_depth: self.max_depth.into_iter().map(|d| d.0).collect(),
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            max_features: self.max_features,
        };
        PipelineConfig::new(&self.input)
            .output_dir(&self.output_dir)
            .label_rule(LabelRule::new(&self.pattern, LabelRule::default().column()))
            .kmeans(KMeansConfig::default().k(self.clusters))
            .seed(self.seed)
            .test_size(self.test_size)
            .tsne(
                TsneConfig::default()
                    .perplexity(self.perplexity)
                    .epochs(self.tsne_epochs),
            )
            .pca_components(self.pca_components)
            .grid(grid)
            .grid_folds(self.grid_folds)
            .cv_folds(self.cv_folds)
            .threads(self.threads)
    }
}

fn format_scores(scores: &[f64]) -> String {
    let parts: Vec<String> = scores.iter().map(|s| format!("{:.4}", s)).collect();
    format!("[{}]", parts.join(" "))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Cli::parse().into_config();
    let report = run(&config)?;

    println!(
        "Labelled data saved to {}",
        config.output_dir.join(lactotype::pipeline::LABELED_TABLE).display()
    );
    println!("Best parameters from GridSearchCV: {}", report.best_params);
    println!("Accuracy for each fold: {}", format_scores(&report.cv_scores));
    println!("Mean accuracy across all folds: {:.4}", report.cv_mean);
    println!("Test Accuracy: {:.4}", report.test_accuracy);
    println!("Classification report:\n{}", report.classification_report);
    println!("{}", report.confusion);
    println!("FP: {}", report.rates.fp);
    Ok(())
}
