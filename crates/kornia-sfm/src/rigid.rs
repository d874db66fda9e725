//! Least-squares similarity alignment between corresponding point sets.

use faer::{Mat, MatRef};
use glam::{DMat3, DVec3};

use crate::affine::{invert_correction, EpochObserver, EpochReport};
use crate::error::SfmError;

/// Scale, rotation and translation mapping a point `p` to `s * R * p + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    /// Scale factor.
    pub scale: f64,
    /// Rotation matrix with determinant +1.
    pub rotation: DMat3,
    /// Translation vector.
    pub translation: DVec3,
}

impl RigidTransform {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        rotation: DMat3::IDENTITY,
        translation: DVec3::ZERO,
    };

    /// Transform a single point.
    #[inline]
    pub fn transform_point(&self, point: &[f64; 3]) -> [f64; 3] {
        let q = self.rotation * DVec3::from_array(*point) * self.scale + self.translation;
        q.to_array()
    }

    /// Transform a set of points.
    pub fn transform_points(&self, points: &[[f64; 3]]) -> Vec<[f64; 3]> {
        points.iter().map(|p| self.transform_point(p)).collect()
    }
}

fn centroid(points: &[[f64; 3]]) -> DVec3 {
    points
        .iter()
        .fold(DVec3::ZERO, |acc, p| acc + DVec3::from_array(*p))
        / points.len() as f64
}

fn mat3_from_faer(m: MatRef<'_, f64>) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(m.read(0, 0), m.read(1, 0), m.read(2, 0)),
        DVec3::new(m.read(0, 1), m.read(1, 1), m.read(2, 1)),
        DVec3::new(m.read(0, 2), m.read(1, 2), m.read(2, 2)),
    )
}

/// Find the similarity transform that best maps `points_src` onto `points_dst`.
///
/// Minimizes `sum_i |s R p_i + t - q_i|^2` in closed form:
///
/// 1. Center both sets, `x_i = p_i - mean(p)` and `y_i = q_i - mean(q)`.
/// 2. Compute the cross-covariance `C = sum_i x_i y_i^T` and its SVD `C = U S V^T`.
/// 3. `R = V U^T`, negating the last column of `V` when `det(V U^T) < 0`.
/// 4. `s = sum_i y_i . (R x_i) / sum_i x_i . x_i`.
/// 5. `t = mean(q) - s R mean(p)`.
///
/// # Arguments
///
/// * `points_src` - The points to be transformed.
/// * `points_dst` - The reference points, in the same order.
///
/// # Errors
///
/// * [`SfmError::ShapeMismatch`] if the two sets have different lengths.
/// * [`SfmError::InsufficientData`] if the sets are empty or the source has no spread.
pub fn solve(points_src: &[[f64; 3]], points_dst: &[[f64; 3]]) -> Result<RigidTransform, SfmError> {
    if points_src.len() != points_dst.len() {
        return Err(SfmError::ShapeMismatch {
            left_name: "source points",
            left_len: points_src.len(),
            right_name: "destination points",
            right_len: points_dst.len(),
        });
    }
    if points_src.is_empty() {
        return Err(SfmError::InsufficientData(
            "rigid alignment requires at least one point".to_string(),
        ));
    }

    let src_centroid = centroid(points_src);
    let dst_centroid = centroid(points_dst);

    let centered = points_src
        .iter()
        .zip(points_dst.iter())
        .map(|(p, q)| {
            (
                DVec3::from_array(*p) - src_centroid,
                DVec3::from_array(*q) - dst_centroid,
            )
        })
        .collect::<Vec<_>>();

    // rounding left over by the centering, relative to the magnitude of the input
    let magnitude = points_src
        .iter()
        .map(|p| DVec3::from_array(*p).length_squared())
        .fold(0.0, f64::max);
    let tolerance = f64::EPSILON * f64::EPSILON * magnitude * points_src.len() as f64;

    let spread = centered.iter().map(|(x, _)| x.length_squared()).sum::<f64>();
    if !spread.is_finite() || spread <= tolerance {
        return Err(SfmError::InsufficientData(
            "source points are all coincident".to_string(),
        ));
    }

    // cross-covariance C = sum x y^T
    let h = centered.iter().fold(DMat3::ZERO, |acc, (x, y)| {
        acc + DMat3::from_cols(*x * y.x, *x * y.y, *x * y.z)
    });

    let h_mat = Mat::<f64>::from_fn(3, 3, |i, j| h.col(j)[i]);
    let svd = h_mat.svd();
    let u = mat3_from_faer(svd.u());
    let v = mat3_from_faer(svd.v());

    let mut rotation = v * u.transpose();

    // handle reflection case to ensure a proper rotation
    if rotation.determinant() < 0.0 {
        let v_corrected = DMat3::from_cols(v.x_axis, v.y_axis, -v.z_axis);
        rotation = v_corrected * u.transpose();
    }

    let numerator = centered
        .iter()
        .map(|(x, y)| y.dot(rotation * *x))
        .sum::<f64>();
    let scale = numerator / spread;

    let translation = dst_centroid - rotation * src_centroid * scale;

    Ok(RigidTransform {
        scale,
        rotation,
        translation,
    })
}

/// Sum of squared residuals after aligning `points_src` onto `points_dst`.
pub fn alignment_error(points_src: &[[f64; 3]], points_dst: &[[f64; 3]]) -> Result<f64, SfmError> {
    let transform = solve(points_src, points_dst)?;
    Ok(points_src
        .iter()
        .zip(points_dst.iter())
        .map(|(p, q)| {
            let p = DVec3::from_array(transform.transform_point(p));
            p.distance_squared(DVec3::from_array(*q))
        })
        .sum())
}

/// Reconstruction error of an estimated shape against a reference point cloud.
///
/// An orthographic reconstruction is only defined up to a depth reversal, which a
/// proper rotation cannot undo. The error is therefore the smaller alignment error
/// between the estimate and its point reflection.
pub fn reconstruction_error(
    estimated: &[[f64; 3]],
    reference: &[[f64; 3]],
) -> Result<f64, SfmError> {
    let direct = alignment_error(estimated, reference)?;
    let mirrored = estimated
        .iter()
        .map(|p| [-p[0], -p[1], -p[2]])
        .collect::<Vec<_>>();
    let reflected = alignment_error(&mirrored, reference)?;
    Ok(direct.min(reflected))
}

/// Tracks the reconstruction error of the corrected shape at every epoch.
pub struct ReconstructionErrorMonitor<'a> {
    shape: MatRef<'a, f64>,
    reference: &'a [[f64; 3]],
    errors: Vec<f64>,
}

impl<'a> ReconstructionErrorMonitor<'a> {
    /// Create a monitor for a raw shape matrix (3, N) and a reference cloud of N points.
    pub fn new(shape: MatRef<'a, f64>, reference: &'a [[f64; 3]]) -> Result<Self, SfmError> {
        if shape.nrows() != 3 || shape.ncols() != reference.len() {
            return Err(SfmError::ShapeMismatch {
                left_name: "shape points",
                left_len: shape.ncols(),
                right_name: "reference points",
                right_len: reference.len(),
            });
        }
        Ok(Self {
            shape,
            reference,
            errors: Vec::new(),
        })
    }

    /// Errors reported so far, one per epoch.
    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    /// Consume the monitor and return the per-epoch errors.
    pub fn into_errors(self) -> Vec<f64> {
        self.errors
    }
}

impl EpochObserver for ReconstructionErrorMonitor<'_> {
    /// Records the error of the current correction. A correction that cannot be
    /// evaluated is recorded as NaN and never stops the optimization.
    fn on_epoch(&mut self, report: &EpochReport<'_>) -> Result<(), SfmError> {
        let error = match self.evaluate(report.correction) {
            Ok(error) => {
                log::info!(
                    "epoch {}: loss {:e}, reconstruction error {:e}",
                    report.epoch,
                    report.loss,
                    error
                );
                error
            }
            Err(e) => {
                log::warn!("epoch {}: reconstruction error unavailable: {}", report.epoch, e);
                f64::NAN
            }
        };
        self.errors.push(error);
        Ok(())
    }
}

impl ReconstructionErrorMonitor<'_> {
    fn evaluate(&self, correction: &DMat3) -> Result<f64, SfmError> {
        let q_inv = invert_correction(correction)?;
        let points = (0..self.shape.ncols())
            .map(|j| {
                let x = DVec3::new(
                    self.shape.read(0, j),
                    self.shape.read(1, j),
                    self.shape.read(2, j),
                );
                (q_inv * x).to_array()
            })
            .collect::<Vec<_>>();

        reconstruction_error(&points, self.reference)
    }
}
