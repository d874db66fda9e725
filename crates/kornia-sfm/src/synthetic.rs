//! Synthetic orthographic scenes for testing and benchmarking.

use glam::{DMat3, DQuat, DVec3};
use rand::Rng;

use crate::error::SfmError;

/// Sample a rotation matrix uniformly on SO(3).
///
/// Uses a random unit quaternion built from three uniform samples (Shoemake).
pub fn random_rotation<R: Rng + ?Sized>(rng: &mut R) -> DMat3 {
    let r1: f64 = rng.random();
    let r2: f64 = rng.random();
    let r3: f64 = rng.random();

    let two_pi = 2.0 * std::f64::consts::PI;
    let w = (1.0 - r1).sqrt() * (two_pi * r2).sin();
    let x = (1.0 - r1).sqrt() * (two_pi * r2).cos();
    let y = r1.sqrt() * (two_pi * r3).sin();
    let z = r1.sqrt() * (two_pi * r3).cos();

    DMat3::from_quat(DQuat::from_xyzw(x, y, z, w).normalize())
}

/// Sample a vector uniformly on the unit sphere.
pub fn random_unit_vector<R: Rng + ?Sized>(rng: &mut R) -> DVec3 {
    loop {
        let v = DVec3::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
        );
        let norm2 = v.length_squared();
        // rejection keeps the distribution uniform
        if norm2 > 1e-6 && norm2 <= 1.0 {
            return v / norm2.sqrt();
        }
    }
}

/// A camera with orthographic projection `[[1, 0, 0], [0, 1, 0]]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrthographicCamera {
    /// Rotation from the world to the camera frame.
    pub rotation: DMat3,
    /// Translation from the world to the camera frame.
    pub translation: DVec3,
}

impl Default for OrthographicCamera {
    fn default() -> Self {
        Self {
            rotation: DMat3::IDENTITY,
            translation: DVec3::ZERO,
        }
    }
}

impl OrthographicCamera {
    /// Create a camera from its pose.
    pub fn new(rotation: DMat3, translation: DVec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Create a camera with a random rotation and a random unit translation.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let rotation = random_rotation(rng);
        let translation = random_unit_vector(rng);
        Self::new(rotation, translation)
    }

    /// The two rows of the rotation seen by the image plane, i.e. the true motion block.
    pub fn motion_rows(&self) -> [DVec3; 2] {
        [self.rotation.row(0), self.rotation.row(1)]
    }

    /// Project world points onto the image plane, dropping the depth.
    ///
    /// # Arguments
    ///
    /// * `points` - The world points.
    /// * `noise_std` - Standard deviation of the Gaussian noise added to every image
    ///   coordinate. No noise is added when zero.
    /// * `rng` - Random generator for the noise.
    pub fn project<R: Rng + ?Sized>(
        &self,
        points: &[[f64; 3]],
        noise_std: f64,
        rng: &mut R,
    ) -> Result<Vec<[f64; 2]>, SfmError> {
        let image_points = points.iter().map(|p| {
            let pc = self.rotation * DVec3::from_array(*p) + self.translation;
            [pc.x, pc.y]
        });

        if !noise_std.is_finite() || noise_std < 0.0 {
            return Err(SfmError::Configuration(format!(
                "noise standard deviation must be non negative, got {noise_std}"
            )));
        }

        if noise_std == 0.0 {
            return Ok(image_points.collect());
        }

        Ok(image_points
            .map(|[u, v]| {
                let (du, dv) = gaussian_pair(rng);
                [u + du * noise_std, v + dv * noise_std]
            })
            .collect())
    }
}

// two independent standard normal samples (Box-Muller)
fn gaussian_pair<R: Rng + ?Sized>(rng: &mut R) -> (f64, f64) {
    // u1 in (0, 1] avoids ln(0)
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    let radius = (-2.0 * u1.ln()).sqrt();
    let theta = 2.0 * std::f64::consts::PI * u2;
    (radius * theta.cos(), radius * theta.sin())
}

/// Scale a point cloud so that the mean distance to the origin is one.
pub fn normalize_object_size(points: &[[f64; 3]]) -> Vec<[f64; 3]> {
    if points.is_empty() {
        return Vec::new();
    }
    let mean_norm = points
        .iter()
        .map(|p| DVec3::from_array(*p).length())
        .sum::<f64>()
        / points.len() as f64;
    if mean_norm == 0.0 {
        return points.to_vec();
    }
    points
        .iter()
        .map(|p| (DVec3::from_array(*p) / mean_norm).to_array())
        .collect()
}

/// Keep every `stride`-th point, starting with the first one.
pub fn subsample(points: &[[f64; 3]], stride: usize) -> Vec<[f64; 3]> {
    points.iter().step_by(stride.max(1)).copied().collect()
}

/// A regular tetrahedron centered at the origin.
pub fn tetrahedron() -> Vec<[f64; 3]> {
    vec![
        [1.0, 1.0, 1.0],
        [1.0, -1.0, -1.0],
        [-1.0, 1.0, -1.0],
        [-1.0, -1.0, 1.0],
    ]
}

/// Sample `num_points` points uniformly inside the axis aligned cube `[-1, 1]^3`.
pub fn random_points<R: Rng + ?Sized>(rng: &mut R, num_points: usize) -> Vec<[f64; 3]> {
    (0..num_points)
        .map(|_| {
            [
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            ]
        })
        .collect()
}
