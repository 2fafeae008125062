use criterion::measurement::Measurement;
use criterion::{criterion_group, criterion_main, BenchmarkGroup, BenchmarkId, Criterion};
use lactotype::clustering::{KMeans, KMeansConfig};
use ndarray::Array2;
use rand::distr::{Distribution, Uniform};
use rand::{rngs::StdRng, SeedableRng};
use std::time::Duration;

#[derive(Clone)]
pub struct KMeansBenchConfig {
    seed: u64,
    matrix_sizes: Vec<(usize, usize)>,
    cluster_counts: Vec<usize>,
    measurement_time: u64,
    sample_size: usize,
}

impl Default for KMeansBenchConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            matrix_sizes: vec![(100, 50), (1000, 200), (5000, 500)],
            cluster_counts: vec![2, 8],
            measurement_time: 10,
            sample_size: 10,
        }
    }
}

fn create_test_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let value_dist = Uniform::try_from(0.0..100.0).unwrap();
    Array2::from_shape_fn((rows, cols), |_| value_dist.sample(&mut rng))
}

fn configure_group<'a, M: Measurement>(
    c: &'a mut Criterion<M>,
    name: &str,
    config: &KMeansBenchConfig,
) -> BenchmarkGroup<'a, M> {
    let mut group = c.benchmark_group(name);
    group.measurement_time(Duration::from_secs(config.measurement_time));
    group.sample_size(config.sample_size);
    group
}

pub fn bench_kmeans_fit(c: &mut Criterion) {
    let config = KMeansBenchConfig::default();
    let mut group = configure_group(c, "KMeans_Fit", &config);

    for &(rows, cols) in config.matrix_sizes.iter() {
        let seed = config.seed + (rows * cols) as u64;
        let matrix = create_test_matrix(rows, cols, seed);
        for &k in config.cluster_counts.iter() {
            let kmeans = KMeans::new(KMeansConfig::default().k(k).seed(config.seed));
            group.bench_with_input(
                BenchmarkId::new(format!("k_{}", k), format!("{}x{}", rows, cols)),
                &(rows, cols),
                |b, _| {
                    b.iter(|| kmeans.fit(matrix.view()).unwrap());
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_kmeans_fit);
criterion_main!(benches);
