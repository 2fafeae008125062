use criterion::measurement::Measurement;
use criterion::{criterion_group, criterion_main, BenchmarkGroup, BenchmarkId, Criterion};
use lactotype::ensemble::{ClassWeight, ForestParams, RandomForestClassifier};
use ndarray::Array2;
use rand::distr::{Distribution, Uniform};
use rand::{rngs::StdRng, SeedableRng};
use std::time::Duration;

#[derive(Clone)]
pub struct ForestBenchConfig {
    seed: u64,
    matrix_sizes: Vec<(usize, usize)>,
    n_estimators: Vec<usize>,
    measurement_time: u64,
    sample_size: usize,
}

impl Default for ForestBenchConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            matrix_sizes: vec![(100, 50), (300, 200), (1000, 500)],
            n_estimators: vec![10, 100],
            measurement_time: 10,
            sample_size: 10,
        }
    }
}

/// Count-like matrix where the first tenth of the features is shifted for class 1.
fn create_test_data(rows: usize, cols: usize, seed: u64) -> (Array2<f64>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let count_dist = Uniform::try_from(0..50u32).unwrap();
    let labels: Vec<usize> = (0..rows).map(|i| usize::from(i % 3 == 0)).collect();
    let informative = (cols / 10).max(1);
    let x = Array2::from_shape_fn((rows, cols), |(i, j)| {
        let base = count_dist.sample(&mut rng) as f64;
        if j < informative && labels[i] == 1 {
            base + 40.0
        } else {
            base
        }
    });
    (x, labels)
}

fn configure_group<'a, M: Measurement>(
    c: &'a mut Criterion<M>,
    name: &str,
    config: &ForestBenchConfig,
) -> BenchmarkGroup<'a, M> {
    let mut group = c.benchmark_group(name);
    group.measurement_time(Duration::from_secs(config.measurement_time));
    group.sample_size(config.sample_size);
    group
}

pub fn bench_forest_fit(c: &mut Criterion) {
    let config = ForestBenchConfig::default();
    let mut group = configure_group(c, "Forest_Fit", &config);

    for &(rows, cols) in config.matrix_sizes.iter() {
        let seed = config.seed + (rows * cols) as u64;
        let (x, y) = create_test_data(rows, cols, seed);
        for &n_estimators in config.n_estimators.iter() {
            let params = ForestParams::default()
                .n_estimators(n_estimators)
                .max_depth(Some(8))
                .min_samples_split(20)
                .min_samples_leaf(20)
                .class_weight(ClassWeight::Balanced);
            group.bench_with_input(
                BenchmarkId::new(format!("trees_{}", n_estimators), format!("{}x{}", rows, cols)),
                &(rows, cols),
                |b, _| {
                    b.iter(|| RandomForestClassifier::fit(&params, x.view(), &y).unwrap());
                },
            );
        }
    }
    group.finish();
}

pub fn bench_forest_predict(c: &mut Criterion) {
    let config = ForestBenchConfig::default();
    let mut group = configure_group(c, "Forest_Predict", &config);

    for &(rows, cols) in config.matrix_sizes.iter() {
        let seed = config.seed + (rows * cols) as u64;
        let (x, y) = create_test_data(rows, cols, seed);
        let forest =
            RandomForestClassifier::fit(&ForestParams::default(), x.view(), &y).unwrap();
        group.bench_with_input(
            BenchmarkId::new("predict", format!("{}x{}", rows, cols)),
            &(rows, cols),
            |b, _| {
                b.iter(|| forest.predict(x.view()).unwrap());
            },
        );
        group.bench_with_input(
            BenchmarkId::new("importances", format!("{}x{}", rows, cols)),
            &(rows, cols),
            |b, _| {
                b.iter(|| forest.feature_importances());
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_forest_fit, bench_forest_predict);
criterion_main!(benches);
