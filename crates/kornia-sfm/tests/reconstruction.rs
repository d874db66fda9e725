use std::io::Write;

use approx::assert_relative_eq;
use faer::Mat;
use glam::DMat3;
use kornia_sfm::affine::{apply_correction, view_blocks, view_residuals};
use kornia_sfm::io::ply::read_ply_points;
use kornia_sfm::synthetic::{self, OrthographicCamera};
use kornia_sfm::{
    factorize, reconstruction_error, AffineAmbiguityResolver, MeasurementMatrixBuilder,
    ResolverConfig, SfmError, TomasiKanade,
};
use rand::{rngs::StdRng, SeedableRng};

struct Scene {
    object: Vec<[f64; 3]>,
    cameras: Vec<OrthographicCamera>,
    builder: MeasurementMatrixBuilder,
}

fn simulate(object: Vec<[f64; 3]>, num_views: usize, noise_std: f64, seed: u64) -> Scene {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut builder = MeasurementMatrixBuilder::new();
    let mut cameras = Vec::with_capacity(num_views);
    for _ in 0..num_views {
        let camera = OrthographicCamera::random(&mut rng);
        let image = camera.project(&object, noise_std, &mut rng).unwrap();
        builder.add_observation(&image).unwrap();
        cameras.push(camera);
    }
    Scene {
        object,
        cameras,
        builder,
    }
}

fn max_abs_diff(a: &Mat<f64>, b: &Mat<f64>) -> f64 {
    assert_eq!((a.nrows(), a.ncols()), (b.nrows(), b.ncols()));
    let mut max = 0.0f64;
    for i in 0..a.nrows() {
        for j in 0..a.ncols() {
            max = max.max((a.read(i, j) - b.read(i, j)).abs());
        }
    }
    max
}

fn assert_orthonormal(motion: &Mat<f64>, tolerance: f64) {
    for (f, block) in view_blocks(motion.as_ref()).unwrap().iter().enumerate() {
        let (h0, g, h1) = view_residuals(block, &DMat3::IDENTITY);
        assert!(
            h0.abs() <= tolerance && g.abs() <= tolerance && h1.abs() <= tolerance,
            "view {f}: residuals ({h0:e}, {g:e}, {h1:e})"
        );
    }
}

#[test]
fn test_measurement_matrix_shape() {
    let scene = simulate(synthetic::tetrahedron(), 7, 0.0, 0);
    let w = scene.builder.measurement_matrix().unwrap();
    assert_eq!((w.nrows(), w.ncols()), (14, 4));

    // every row is centered
    for i in 0..w.nrows() {
        let mean = (0..w.ncols()).map(|j| w.read(i, j)).sum::<f64>() / w.ncols() as f64;
        assert!(mean.abs() < 1e-12);
    }

    let mut builder = scene.builder.clone();
    let result = builder.add_observation(&[[0.0, 0.0]; 5]);
    assert!(matches!(
        result,
        Err(SfmError::PointCountMismatch {
            expected: 4,
            actual: 5
        })
    ));
    assert_eq!(builder.num_views(), 7);
}

#[test]
fn test_factorization_round_trip_with_correction() {
    let mut rng = StdRng::seed_from_u64(5);
    let object = synthetic::random_points(&mut rng, 30);
    let scene = simulate(object, 8, 0.0, 5);
    let w = scene.builder.measurement_matrix().unwrap();

    let factorization = factorize(w.as_ref()).unwrap();
    let product = &factorization.motion * &factorization.shape;
    assert!(max_abs_diff(&product, &w) < 1e-6);

    let resolver = AffineAmbiguityResolver::new(ResolverConfig::default()).unwrap();
    let result = resolver
        .resolve(factorization.motion.as_ref(), &mut rng, None)
        .unwrap();
    let (motion, shape) = apply_correction(
        &result.correction,
        factorization.motion.as_ref(),
        factorization.shape.as_ref(),
    )
    .unwrap();

    // the correction and its inverse cancel out after the scale balancing
    let corrected = &motion * &shape;
    assert!(max_abs_diff(&corrected, &w) < 1e-6);
}

#[test]
fn test_online_gradient_descent_orthonormality() {
    let mut rng = StdRng::seed_from_u64(17);
    let object = synthetic::random_points(&mut rng, 20);
    let scene = simulate(object, 10, 0.0, 17);

    let mut sfm = TomasiKanade::new(ResolverConfig::online(2e-2, 5000)).unwrap();
    for camera in &scene.cameras {
        let image = camera.project(&scene.object, 0.0, &mut rng).unwrap();
        sfm.add_observation(&image).unwrap();
    }

    let reconstruction = sfm.run(&mut rng).unwrap();
    assert_orthonormal(&reconstruction.motion, 1e-3);
}

#[test]
fn test_momentum_orthonormality() {
    let mut rng = StdRng::seed_from_u64(23);
    let object = synthetic::random_points(&mut rng, 20);
    let scene = simulate(object, 10, 0.0, 23);
    let w = scene.builder.measurement_matrix().unwrap();
    let factorization = factorize(w.as_ref()).unwrap();

    let resolver =
        AffineAmbiguityResolver::new(ResolverConfig::momentum(1e-2, 0.9, 2, 3000)).unwrap();
    let result = resolver
        .resolve(factorization.motion.as_ref(), &mut rng, None)
        .unwrap();
    let (motion, _) = apply_correction(
        &result.correction,
        factorization.motion.as_ref(),
        factorization.shape.as_ref(),
    )
    .unwrap();

    assert_orthonormal(&motion, 1e-3);
}

#[test]
fn test_metric_motion_stays_put() {
    let scene = simulate(synthetic::tetrahedron(), 6, 0.0, 2);
    let rows = scene
        .cameras
        .iter()
        .flat_map(|c| c.motion_rows())
        .collect::<Vec<_>>();
    let motion = Mat::<f64>::from_fn(rows.len(), 3, |i, j| rows[i][j]);

    let mut rng = StdRng::seed_from_u64(2);
    let resolver = AffineAmbiguityResolver::new(ResolverConfig::default()).unwrap();
    let result = resolver.resolve(motion.as_ref(), &mut rng, None).unwrap();

    assert!(result.correction.abs_diff_eq(DMat3::IDENTITY, 1e-3));
    assert!(result.loss < 1e-10);
}

#[test]
fn test_tetrahedron_end_to_end() {
    let scene = simulate(synthetic::tetrahedron(), 6, 0.0, 1234);

    let mut sfm = TomasiKanade::new(ResolverConfig::momentum(1e-2, 0.9, 2, 3000)).unwrap();
    let mut rng = StdRng::seed_from_u64(1234);
    for camera in &scene.cameras {
        let image = camera.project(&scene.object, 0.0, &mut rng).unwrap();
        sfm.add_observation(&image).unwrap();
    }

    let (reconstruction, errors) = sfm.run_evaluated(&mut rng, &scene.object).unwrap();
    assert_eq!(errors.len(), 3000);

    let error = reconstruction_error(&reconstruction.points(), &scene.object).unwrap();
    assert!(error < 1e-2, "reconstruction error {error}");
    assert_relative_eq!(errors[errors.len() - 1], error, epsilon = 1e-9);
}

#[test]
fn test_noisy_views_reconstruct_approximately() {
    let mut rng = StdRng::seed_from_u64(99);
    let object = synthetic::normalize_object_size(&synthetic::random_points(&mut rng, 40));
    let scene = simulate(object, 32, 1e-3, 99);

    let mut sfm = TomasiKanade::new(ResolverConfig::momentum(1e-2, 0.9, 2, 500)).unwrap();
    for camera in &scene.cameras {
        let image = camera.project(&scene.object, 1e-3, &mut rng).unwrap();
        sfm.add_observation(&image).unwrap();
    }

    let reconstruction = sfm.run(&mut rng).unwrap();
    let error = reconstruction_error(&reconstruction.points(), &scene.object).unwrap();
    assert!(error < 1e-1, "reconstruction error {error}");
}

#[test]
fn test_large_learning_rate_diverges() {
    let scene = simulate(synthetic::tetrahedron(), 6, 0.0, 8);
    let w = scene.builder.measurement_matrix().unwrap();
    let factorization = factorize(w.as_ref()).unwrap();

    let resolver = AffineAmbiguityResolver::new(ResolverConfig::online(1e3, 50)).unwrap();
    let mut rng = StdRng::seed_from_u64(8);
    let result = resolver.resolve(factorization.motion.as_ref(), &mut rng, None);
    assert!(matches!(result, Err(SfmError::Divergence { .. })));
}

#[test]
fn test_invalid_configuration() {
    let config = ResolverConfig {
        batch_size: 0,
        ..Default::default()
    };
    assert!(matches!(
        TomasiKanade::new(config),
        Err(SfmError::Configuration(_))
    ));
}

#[test]
fn test_reconstruct_ply_object() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "ply")?;
    writeln!(file, "format ascii 1.0")?;
    writeln!(file, "element vertex 8")?;
    writeln!(file, "property float x")?;
    writeln!(file, "property float y")?;
    writeln!(file, "property float z")?;
    writeln!(file, "end_header")?;
    for x in [-1.0, 1.0] {
        for y in [-2.0, 2.0] {
            for z in [-0.5, 0.5] {
                writeln!(file, "{x} {y} {z}")?;
            }
        }
    }
    file.flush()?;

    let object = synthetic::normalize_object_size(&read_ply_points(file.path())?);
    assert_eq!(object.len(), 8);

    let scene = simulate(object, 8, 0.0, 31);
    let mut sfm = TomasiKanade::new(ResolverConfig::online(2e-2, 5000))?;
    let mut rng = StdRng::seed_from_u64(31);
    for camera in &scene.cameras {
        sfm.add_observation(&camera.project(&scene.object, 0.0, &mut rng)?)?;
    }

    let reconstruction = sfm.run(&mut rng)?;
    let error = reconstruction_error(&reconstruction.points(), &scene.object)?;
    assert!(error < 1e-2, "reconstruction error {error}");
    Ok(())
}
