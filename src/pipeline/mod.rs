//! # Lactotype pipeline
//!
//! End-to-end run over one count matrix:
//!
//! 1. read and transpose the matrix, label samples, write `df.csv`
//! 2. stratified train/test split
//! 3. t-SNE of the training samples (optionally after PCA) and k-means on the training
//!    features, rendered to `tsne_kmeans.png`
//! 4. random forest grid search, then k-fold cross-validation of the best candidate
//! 5. test-set evaluation rendered to `confusion_matrix.png`
//! 6. impurity importances of the top features rendered to `top_feature_importance.png`
//!
//! All parallel work runs on the global rayon pool unless [`PipelineConfig::threads`] is
//! set, in which case a dedicated pool is installed around the whole run.

use std::path::{Path, PathBuf};

use anyhow::Context;
use log::info;
use ndarray::Array2;

use crate::clustering::{KMeans, KMeansConfig};
use crate::dataset::read_count_matrix;
use crate::dimred::{embed, NalgebraSVD, PCABuilder, TsneConfig};
use crate::ensemble::{ClassWeight, ForestParams};
use crate::labels::{ClassNames, LabelRule, NEGATIVE, POSITIVE};
use crate::metrics::{accuracy, confusion_matrix, BinaryRates, ClassificationReport};
use crate::model_selection::{cross_val_score, CandidateResult, GridSearchCV, ParamGrid};
use crate::plot::{plot_confusion_matrix, plot_feature_importances, plot_tsne_clusters};
use crate::split::{train_test_split_stratified, StratifiedKFold};
use crate::utils::{argsort_desc, select_labels, select_rows};

pub const LABELED_TABLE: &str = "df.csv";
pub const TSNE_FIGURE: &str = "tsne_kmeans.png";
pub const CONFUSION_FIGURE: &str = "confusion_matrix.png";
pub const IMPORTANCE_FIGURE: &str = "top_feature_importance.png";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub label_rule: LabelRule,
    pub class_names: ClassNames,
    pub test_size: f64,
    pub seed: u64,
    pub tsne: TsneConfig,
    /// Principal components kept before t-SNE; `None` embeds the raw counts.
    pub pca_components: Option<usize>,
    pub kmeans: KMeansConfig,
    pub grid: ParamGrid,
    /// Non-searched forest settings shared by every candidate.
    pub forest: ForestParams,
    pub grid_folds: usize,
    pub cv_folds: usize,
    /// The importance plot shows `n_features / importance_divisor` features (at least one).
    pub importance_divisor: usize,
    pub threads: Option<usize>,
}

impl PipelineConfig {
    pub fn new<P: AsRef<Path>>(input: P) -> Self {
        let seed = 42;
        PipelineConfig {
            input: input.as_ref().to_path_buf(),
            output_dir: PathBuf::from("new"),
            label_rule: LabelRule::default(),
            class_names: ClassNames::default(),
            test_size: 0.3,
            seed,
            tsne: TsneConfig::default(),
            pca_components: None,
            kmeans: KMeansConfig::default().seed(seed),
            grid: ParamGrid::default(),
            forest: ForestParams::default()
                .class_weight(ClassWeight::Balanced)
                .seed(seed),
            grid_folds: 5,
            cv_folds: 10,
            importance_divisor: 5,
            threads: None,
        }
    }

    pub fn output_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.output_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn label_rule(mut self, rule: LabelRule) -> Self {
        self.label_rule = rule;
        self
    }

    pub fn test_size(mut self, test_size: f64) -> Self {
        self.test_size = test_size;
        self
    }

    /// Seeds the split, k-means, the forests and the shuffled cross-validation.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.kmeans = self.kmeans.seed(seed);
        self.forest = self.forest.seed(seed);
        self
    }

    pub fn tsne(mut self, tsne: TsneConfig) -> Self {
        self.tsne = tsne;
        self
    }

    pub fn pca_components(mut self, n: Option<usize>) -> Self {
        self.pca_components = n;
        self
    }

    pub fn kmeans(mut self, kmeans: KMeansConfig) -> Self {
        self.kmeans = kmeans;
        self
    }

    pub fn grid(mut self, grid: ParamGrid) -> Self {
        self.grid = grid;
        self
    }

    pub fn grid_folds(mut self, folds: usize) -> Self {
        self.grid_folds = folds;
        self
    }

    pub fn cv_folds(mut self, folds: usize) -> Self {
        self.cv_folds = folds;
        self
    }

    pub fn threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }

    fn artifact(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub n_samples: usize,
    pub n_features: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub cluster_sizes: Vec<usize>,
    pub candidates: Vec<CandidateResult>,
    pub best_params: ForestParams,
    pub cv_scores: Vec<f64>,
    pub cv_mean: f64,
    pub test_accuracy: f64,
    pub classification_report: ClassificationReport,
    /// Positive class first: `[[TP, FN], [FP, TN]]`.
    pub confusion: Array2<usize>,
    pub rates: BinaryRates,
    /// Every feature with its importance, most important first.
    pub ranked_importances: Vec<(String, f64)>,
    pub artifacts: Vec<PathBuf>,
}

pub fn run(config: &PipelineConfig) -> anyhow::Result<PipelineReport> {
    match config.threads {
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .context("Failed to build the worker pool")?;
            info!("Running on a dedicated pool of {} threads", n);
            pool.install(|| run_steps(config))
        }
        None => run_steps(config),
    }
}

fn run_steps(config: &PipelineConfig) -> anyhow::Result<PipelineReport> {
    let mut artifacts = Vec::new();

    let matrix = read_count_matrix(&config.input)?;
    let labeled = config.label_rule.apply(matrix)?;
    let table_path = config.artifact(LABELED_TABLE);
    labeled.write_tsv(&table_path)?;
    artifacts.push(table_path);

    let x = labeled.matrix.values.view();
    let y = &labeled.labels;
    let (n_samples, n_features) = x.dim();

    let split = train_test_split_stratified(y, config.test_size, config.seed)?;
    let x_train = select_rows(x, &split.train)?;
    let y_train = select_labels(y, &split.train);
    let x_test = select_rows(x, &split.test)?;
    let y_test = select_labels(y, &split.test);
    info!(
        "Split {} samples into {} train / {} test",
        n_samples,
        split.train.len(),
        split.test.len()
    );

    let embedding = match config.pca_components {
        Some(n_components) => {
            let mut pca = PCABuilder::new(NalgebraSVD)
                .n_components(n_components)
                .build();
            let reduced = pca.fit_transform(x_train.view())?;
            embed(reduced.view(), &config.tsne)?
        }
        None => embed(x_train.view(), &config.tsne)?,
    };
    let clusters = KMeans::new(config.kmeans.clone()).fit(x_train.view())?;
    let mut cluster_sizes = vec![0; config.kmeans.k];
    for &c in &clusters.labels {
        cluster_sizes[c] += 1;
    }
    info!(
        "k-means: {} clusters of sizes {:?}, inertia {:.3}",
        config.kmeans.k, cluster_sizes, clusters.inertia
    );
    let tsne_path = config.artifact(TSNE_FIGURE);
    plot_tsne_clusters(&tsne_path, embedding.view(), &clusters.labels)?;
    artifacts.push(tsne_path);

    let search = GridSearchCV::new(
        config.forest,
        config.grid.clone(),
        StratifiedKFold::new(config.grid_folds),
    )
    .fit(x_train.view(), &y_train)?;
    let best_params = *search.best_params();

    let cv_scores = cross_val_score(
        &best_params,
        x_train.view(),
        &y_train,
        &StratifiedKFold::shuffled(config.cv_folds, config.seed),
    )?;
    let cv_mean = cv_scores.iter().sum::<f64>() / cv_scores.len() as f64;
    info!("Cross-validated mean accuracy {:.4}", cv_mean);

    let model = &search.best_estimator;
    let prediction = model.predict(x_test.view())?;
    let test_accuracy = accuracy(&y_test, &prediction)?;
    let classification_report = ClassificationReport::new(&y_test, &prediction)?;
    let confusion = confusion_matrix(&y_test, &prediction, &[POSITIVE, NEGATIVE])?;
    let rates = BinaryRates::from_confusion(&confusion)?;
    info!("Test accuracy {:.4}", test_accuracy);
    let confusion_path = config.artifact(CONFUSION_FIGURE);
    plot_confusion_matrix(&confusion_path, &confusion, &rates, &config.class_names)?;
    artifacts.push(confusion_path);

    let importances = model.feature_importances().to_vec();
    let ranked_importances: Vec<(String, f64)> = argsort_desc(&importances)
        .into_iter()
        .map(|i| (labeled.matrix.feature_names[i].clone(), importances[i]))
        .collect();
    let n_top = (n_features / config.importance_divisor.max(1)).max(1);
    let (top_names, top_values): (Vec<String>, Vec<f64>) =
        ranked_importances.iter().take(n_top).cloned().unzip();
    let importance_path = config.artifact(IMPORTANCE_FIGURE);
    plot_feature_importances(&importance_path, &top_names, &top_values)?;
    artifacts.push(importance_path);

    Ok(PipelineReport {
        n_samples,
        n_features,
        n_train: split.train.len(),
        n_test: split.test.len(),
        cluster_sizes,
        candidates: search.candidates.clone(),
        best_params,
        cv_scores,
        cv_mean,
        test_accuracy,
        classification_report,
        confusion,
        rates,
        ranked_importances,
        artifacts,
    })
}
