use faer::{Mat, MatRef};

use crate::error::SfmError;

/// Ratio between the third and the first singular value below which the
/// measurement matrix is considered rank deficient.
pub const RANK_TOLERANCE: f64 = 1e-10;

/// Raw output of the rank-3 factorization of a measurement matrix.
///
/// Both factors are only defined up to an invertible 3x3 transform, see
/// [`crate::affine::AffineAmbiguityResolver`].
#[derive(Debug, Clone)]
pub struct Factorization {
    /// Raw motion matrix with shape (2F, 3).
    pub motion: Mat<f64>,
    /// Raw shape matrix with shape (3, N), one column per point.
    pub shape: Mat<f64>,
    /// The three largest singular values of the measurement matrix.
    pub singular_values: [f64; 3],
    /// Mean row norm divided out of the motion matrix.
    pub scale: f64,
}

impl Factorization {
    /// Number of views encoded in the motion matrix.
    #[inline]
    pub fn num_views(&self) -> usize {
        self.motion.nrows() / 2
    }

    /// Number of reconstructed points.
    #[inline]
    pub fn num_points(&self) -> usize {
        self.shape.ncols()
    }
}

/// Factorize a measurement matrix into raw motion and shape matrices.
///
/// The measurement matrix `W` (2F x N) is decomposed as `W = U S V^T` and truncated
/// to its three largest singular values. The singular values are absorbed into the
/// motion factor, `M = U3 S3` and `X = V3^T`. Both factors are then balanced by the
/// mean row norm `k` of `M`, i.e. `M / k` and `X * k`, which keeps the motion rows
/// close to unit length for the metric upgrade.
///
/// # Arguments
///
/// * `w` - The measurement matrix with shape (2F, N), F >= 2 and N >= 3.
///
/// # Returns
///
/// The balanced factors whose product is the best rank-3 approximation of `w`.
///
/// # Errors
///
/// * [`SfmError::ShapeMismatch`] if the number of rows is odd.
/// * [`SfmError::SingularInput`] if there are too few views or points, or the rank is below 3.
pub fn factorize(w: MatRef<'_, f64>) -> Result<Factorization, SfmError> {
    let (rows, cols) = (w.nrows(), w.ncols());

    if rows % 2 != 0 {
        return Err(SfmError::ShapeMismatch {
            left_name: "measurement rows",
            left_len: rows,
            right_name: "twice the number of views",
            right_len: 2 * (rows / 2),
        });
    }

    if rows < 4 || cols < 3 {
        return Err(SfmError::SingularInput {
            rows,
            cols,
            reason: "at least 2 views and 3 points are required".to_string(),
        });
    }

    let svd = w.thin_svd();
    let (u, s, v) = (svd.u(), svd.s_diagonal(), svd.v());

    let singular_values = [s.read(0), s.read(1), s.read(2)];

    let tol = singular_values[0] * RANK_TOLERANCE;
    if !singular_values[0].is_finite() || singular_values[0] <= 0.0 || singular_values[2] <= tol {
        return Err(SfmError::SingularInput {
            rows,
            cols,
            reason: format!(
                "third singular value {:e} is below tolerance {:e}",
                singular_values[2], tol
            ),
        });
    }

    let mut motion = Mat::<f64>::from_fn(rows, 3, |i, j| u.read(i, j) * singular_values[j]);
    let mut shape = Mat::<f64>::from_fn(3, cols, |i, j| v.read(j, i));

    let scale = (0..rows)
        .map(|i| {
            (0..3)
                .map(|j| motion.read(i, j).powi(2))
                .sum::<f64>()
                .sqrt()
        })
        .sum::<f64>()
        / rows as f64;

    for i in 0..rows {
        for j in 0..3 {
            motion.write(i, j, motion.read(i, j) / scale);
        }
    }
    for i in 0..3 {
        for j in 0..cols {
            shape.write(i, j, shape.read(i, j) * scale);
        }
    }

    log::info!(
        "factorized {}x{} measurement matrix, singular values {:?}, scale {}",
        rows,
        cols,
        singular_values,
        scale
    );

    Ok(Factorization {
        motion,
        shape,
        singular_values,
        scale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // 3 views of 5 points, W = M_true * S_true with a generic M_true
    fn rank3_measurements() -> Mat<f64> {
        let m_true = [
            [0.9, 0.1, -0.4],
            [0.2, 1.1, 0.3],
            [-0.5, 0.7, 0.6],
            [1.3, -0.2, 0.1],
            [0.4, 0.4, -1.0],
            [-0.3, 0.8, 0.5],
        ];
        let s_true = [
            [1.0, -1.0, 0.5, 0.0, -0.5],
            [0.0, 1.0, -1.0, 0.5, -0.5],
            [0.5, 0.5, 0.0, -1.0, 0.0],
        ];
        Mat::<f64>::from_fn(6, 5, |i, j| {
            (0..3).map(|k| m_true[i][k] * s_true[k][j]).sum()
        })
    }

    #[test]
    fn test_factorization_reproduces_rank3_matrix() -> Result<(), SfmError> {
        let w = rank3_measurements();
        let fact = factorize(w.as_ref())?;

        assert_eq!(fact.motion.nrows(), 6);
        assert_eq!(fact.motion.ncols(), 3);
        assert_eq!(fact.shape.nrows(), 3);
        assert_eq!(fact.shape.ncols(), 5);
        assert_eq!(fact.num_views(), 3);
        assert_eq!(fact.num_points(), 5);

        for i in 0..6 {
            for j in 0..5 {
                let val = (0..3)
                    .map(|k| fact.motion.read(i, k) * fact.shape.read(k, j))
                    .sum::<f64>();
                assert_relative_eq!(val, w.read(i, j), epsilon = 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn test_factorization_balances_motion_rows() -> Result<(), SfmError> {
        let w = rank3_measurements();
        let fact = factorize(w.as_ref())?;

        let mean_norm = (0..6)
            .map(|i| {
                (0..3)
                    .map(|j| fact.motion.read(i, j).powi(2))
                    .sum::<f64>()
                    .sqrt()
            })
            .sum::<f64>()
            / 6.0;
        assert_relative_eq!(mean_norm, 1.0, epsilon = 1e-12);
        assert!(fact.scale > 0.0);
        assert!(fact.singular_values[0] >= fact.singular_values[1]);
        assert!(fact.singular_values[1] >= fact.singular_values[2]);
        Ok(())
    }

    #[test]
    fn test_factorization_rejects_rank_deficient_input() {
        // every column is a multiple of the same vector: rank 1
        let w = Mat::<f64>::from_fn(6, 4, |i, j| (i as f64 + 1.0) * (j as f64 - 1.5));
        assert!(matches!(
            factorize(w.as_ref()),
            Err(SfmError::SingularInput { .. })
        ));
    }

    #[test]
    fn test_factorization_rejects_small_input() {
        let one_view = Mat::<f64>::from_fn(2, 5, |i, j| (i + j) as f64);
        assert!(matches!(
            factorize(one_view.as_ref()),
            Err(SfmError::SingularInput { .. })
        ));

        let two_points = Mat::<f64>::from_fn(6, 2, |i, j| (i * j) as f64);
        assert!(matches!(
            factorize(two_points.as_ref()),
            Err(SfmError::SingularInput { .. })
        ));

        let zeros = Mat::<f64>::zeros(6, 5);
        assert!(matches!(
            factorize(zeros.as_ref()),
            Err(SfmError::SingularInput { .. })
        ));
    }

    #[test]
    fn test_factorization_rejects_odd_rows() {
        let w = Mat::<f64>::from_fn(5, 4, |i, j| ((i + 1) * (j + 2)) as f64);
        assert!(matches!(
            factorize(w.as_ref()),
            Err(SfmError::ShapeMismatch { .. })
        ));
    }
}
