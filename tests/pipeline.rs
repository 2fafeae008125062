use std::fmt::Write as _;
use std::path::Path;

use lactotype::dimred::TsneConfig;
use lactotype::ensemble::MaxFeatures;
use lactotype::model_selection::ParamGrid;
use lactotype::pipeline::{CONFUSION_FIGURE, IMPORTANCE_FIGURE, LABELED_TABLE, TSNE_FIGURE};
use lactotype::{run, PipelineConfig};

const N_SAMPLES: usize = 60;
const N_FEATURES: usize = 20;
const INFORMATIVE: usize = 8;

fn is_crispatus(sample: usize) -> bool {
    sample % 5 < 2
}

/// Features x samples table; the first few features are raised in crispatus samples.
fn write_counts(path: &Path) {
    let mut text = String::from("gene");
    for s in 0..N_SAMPLES {
        let species = if is_crispatus(s) { "crispatus" } else { "iners" };
        write!(text, "\tS{:02}_{}", s, species).unwrap();
    }
    text.push('\n');
    for f in 0..N_FEATURES {
        write!(text, "K{:05}", f).unwrap();
        for s in 0..N_SAMPLES {
            let noise = (s * 7 + f * 13) % 17;
            let signal = if f < INFORMATIVE && is_crispatus(s) { 60 } else { 0 };
            write!(text, "\t{}", noise + signal).unwrap();
        }
        text.push('\n');
    }
    std::fs::write(path, text).unwrap();
}

fn small_config(input: &Path, output: &Path) -> PipelineConfig {
    PipelineConfig::new(input)
        .output_dir(output)
        .tsne(TsneConfig::default().perplexity(5.0).epochs(250))
        .grid(ParamGrid {
            n_estimators: vec![10],
            max_depth: vec![Some(4), None],
            min_samples_split: vec![2],
            min_samples_leaf: vec![1],
            max_features: vec![MaxFeatures::Sqrt],
        })
        .grid_folds(3)
        .cv_folds(5)
}

#[test]
fn test_full_run_writes_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("counts.tsv");
    write_counts(&input);
    let output = dir.path().join("new");

    let report = run(&small_config(&input, &output)).unwrap();

    for name in [LABELED_TABLE, TSNE_FIGURE, CONFUSION_FIGURE, IMPORTANCE_FIGURE] {
        assert!(output.join(name).exists(), "missing {}", name);
    }
    assert_eq!(report.artifacts.len(), 4);

    assert_eq!((report.n_samples, report.n_features), (N_SAMPLES, N_FEATURES));
    assert_eq!(report.n_test, 18);
    assert_eq!(report.n_train + report.n_test, N_SAMPLES);
    assert_eq!(report.cluster_sizes.iter().sum::<usize>(), report.n_train);

    assert_eq!(report.candidates.len(), 2);
    assert_eq!(report.cv_scores.len(), 5);
    assert!(report.cv_mean > 0.85);
    assert!(report.test_accuracy > 0.85);
    assert_eq!(report.confusion.sum(), report.n_test);
    assert_eq!(report.rates.tp + report.rates.fn_, 7);

    assert_eq!(report.ranked_importances.len(), N_FEATURES);
    let top = &report.ranked_importances[0].0;
    let top_index: usize = top.trim_start_matches('K').parse().unwrap();
    assert!(top_index < INFORMATIVE, "unexpected top feature {}", top);
}

#[test]
fn test_labeled_table_layout() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("counts.tsv");
    write_counts(&input);
    let output = dir.path().join("out");

    run(&small_config(&input, &output).threads(Some(2))).unwrap();

    let table = std::fs::read_to_string(output.join(LABELED_TABLE)).unwrap();
    let mut lines = table.lines();
    let header: Vec<&str> = lines.next().unwrap().split('\t').collect();
    assert_eq!(header.len(), N_FEATURES + 2);
    assert_eq!(header[1], "Lactotype");
    assert_eq!(header[2], "K00000");

    let rows: Vec<Vec<&str>> = lines.map(|l| l.split('\t').collect()).collect();
    assert_eq!(rows.len(), N_SAMPLES);
    assert_eq!(rows[0][0], "S00_crispatus");
    assert_eq!(rows[0][1], "1");
    assert_eq!(rows[2][0], "S02_iners");
    assert_eq!(rows[2][1], "0");
}

#[test]
fn test_default_perplexity_on_small_matrix() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("counts.tsv");
    write_counts(&input);
    let output = dir.path().join("default_tsne");

    // 42 training samples, well under the 91 a perplexity of 30 would need unclamped.
    let config = small_config(&input, &output).tsne(TsneConfig::default());
    assert_eq!(config.tsne.perplexity, 30.0);
    let report = run(&config).unwrap();

    assert_eq!(report.n_train, 42);
    assert_eq!(report.artifacts.len(), 4);
    for name in [TSNE_FIGURE, CONFUSION_FIGURE, IMPORTANCE_FIGURE] {
        assert!(output.join(name).exists(), "missing {}", name);
    }
}

#[test]
fn test_pca_before_tsne() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("counts.tsv");
    write_counts(&input);
    let output = dir.path().join("pca");

    let report = run(&small_config(&input, &output).pca_components(Some(5))).unwrap();
    assert!(output.join(TSNE_FIGURE).exists());
    assert_eq!(report.cluster_sizes.iter().sum::<usize>(), report.n_train);
    assert!(report.test_accuracy > 0.85);

    let too_many = small_config(&input, &dir.path().join("pca_bad")).pca_components(Some(100));
    assert!(run(&too_many).is_err());
}

#[test]
fn test_missing_input_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::new(dir.path().join("absent.tsv")).output_dir(dir.path());
    let err = run(&config).unwrap_err();
    assert!(format!("{:#}", err).contains("absent.tsv"));
}
