use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use kornia_sfm::{
    factorize, synthetic, AffineAmbiguityResolver, MeasurementMatrixBuilder, ResolverConfig,
};
use rand::{rngs::StdRng, SeedableRng};

/// Simulate noiseless orthographic views of a random point cloud.
fn generate_measurements(num_views: usize, num_points: usize) -> faer::Mat<f64> {
    let mut rng = StdRng::seed_from_u64(42);
    let object = synthetic::random_points(&mut rng, num_points);
    let mut builder = MeasurementMatrixBuilder::new();
    for _ in 0..num_views {
        let camera = synthetic::OrthographicCamera::random(&mut rng);
        let image = camera.project(&object, 0.0, &mut rng).unwrap();
        builder.add_observation(&image).unwrap();
    }
    builder.measurement_matrix().unwrap()
}

fn bench_factorize(c: &mut Criterion) {
    let mut group = c.benchmark_group("factorize");

    for (num_views, num_points) in [(16, 64), (64, 256), (128, 1024)] {
        let w = generate_measurements(num_views, num_points);
        let id = format!("{num_views}x{num_points}");
        group.bench_with_input(BenchmarkId::from_parameter(id), &w, |b, w| {
            b.iter(|| {
                let _ = std::hint::black_box(factorize(w.as_ref()));
            })
        });
    }
    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    for num_views in [16, 128] {
        let w = generate_measurements(num_views, 64);
        let factorization = factorize(w.as_ref()).unwrap();
        let resolver = AffineAmbiguityResolver::new(ResolverConfig::default()).unwrap();

        group.bench_with_input(
            BenchmarkId::from_parameter(num_views),
            &factorization,
            |b, factorization| {
                b.iter(|| {
                    let mut rng = StdRng::seed_from_u64(0);
                    let _ = std::hint::black_box(resolver.resolve(
                        factorization.motion.as_ref(),
                        &mut rng,
                        None,
                    ));
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_factorize, bench_resolve);
criterion_main!(benches);
