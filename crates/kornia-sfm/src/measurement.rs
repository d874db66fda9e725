use faer::Mat;

use crate::error::SfmError;

/// Accumulates 2D observations, one per view, into a measurement matrix.
///
/// Every view must observe the same points in the same order. Each observation is
/// centered on ingestion and stored as a 2xN block where the first row holds the
/// x coordinates and the second row the y coordinates.
///
/// Example:
///
/// ```
/// use kornia_sfm::measurement::MeasurementMatrixBuilder;
///
/// let mut builder = MeasurementMatrixBuilder::new();
/// builder.add_observation(&[[0.0, 0.0], [2.0, 0.0], [1.0, 3.0]])?;
/// builder.add_observation(&[[1.0, 1.0], [1.0, 2.0], [4.0, 0.0]])?;
///
/// let w = builder.measurement_matrix()?;
/// assert_eq!((w.nrows(), w.ncols()), (4, 3));
/// # Ok::<(), kornia_sfm::SfmError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct MeasurementMatrixBuilder {
    // number of points fixed by the first observation
    num_points: Option<usize>,
    // centered 2xN blocks, one per view
    blocks: Vec<Mat<f64>>,
}

impl MeasurementMatrixBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of views added so far.
    #[inline]
    pub fn num_views(&self) -> usize {
        self.blocks.len()
    }

    /// Number of points per view, once the first observation has been added.
    #[inline]
    pub fn num_points(&self) -> Option<usize> {
        self.num_points
    }

    /// Add the image points observed from a single view.
    ///
    /// # Arguments
    ///
    /// * `points` - The 2D points of the view with shape (N, 2).
    ///
    /// # Errors
    ///
    /// * [`SfmError::InsufficientData`] if the first observation is empty.
    /// * [`SfmError::PointCountMismatch`] if N differs from the previous observations.
    pub fn add_observation(&mut self, points: &[[f64; 2]]) -> Result<(), SfmError> {
        let expected = match self.num_points {
            Some(n) => n,
            None => {
                if points.is_empty() {
                    return Err(SfmError::InsufficientData(
                        "observation must contain at least one point".to_string(),
                    ));
                }
                points.len()
            }
        };

        if points.len() != expected {
            return Err(SfmError::PointCountMismatch {
                expected,
                actual: points.len(),
            });
        }

        let n = points.len() as f64;
        let (sum_x, sum_y) = points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
        let mean = [sum_x / n, sum_y / n];

        let block = Mat::<f64>::from_fn(2, points.len(), |i, j| points[j][i] - mean[i]);

        self.num_points = Some(expected);
        self.blocks.push(block);

        Ok(())
    }

    /// Stack the centered observations into the measurement matrix W of shape (2F, N).
    ///
    /// Rows `2f` and `2f + 1` hold the centered x and y coordinates of view `f`.
    pub fn measurement_matrix(&self) -> Result<Mat<f64>, SfmError> {
        let num_points = match self.num_points {
            Some(n) if !self.blocks.is_empty() => n,
            _ => {
                return Err(SfmError::InsufficientData(
                    "no observation has been added".to_string(),
                ))
            }
        };

        Ok(Mat::<f64>::from_fn(
            2 * self.blocks.len(),
            num_points,
            |i, j| self.blocks[i / 2].read(i % 2, j),
        ))
    }
}
