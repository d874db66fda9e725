/// Error types for the factorization pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SfmError {
    /// An observation does not have the point count fixed by the first one.
    #[error("Observation has {actual} points, expected {expected}")]
    PointCountMismatch {
        /// Point count fixed by the first observation
        expected: usize,
        /// Point count of the rejected observation
        actual: usize,
    },

    /// Not enough data to perform the requested operation.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// The measurement matrix does not carry rank 3 information.
    #[error("Measurement matrix ({rows}x{cols}) has rank lower than 3: {reason}")]
    SingularInput {
        /// Number of rows of the measurement matrix
        rows: usize,
        /// Number of columns of the measurement matrix
        cols: usize,
        /// Why the input was rejected
        reason: String,
    },

    /// A non finite value showed up while optimizing the correction matrix.
    #[error("Optimization diverged at epoch {epoch}, try a smaller learning rate")]
    Divergence {
        /// Zero based epoch at which the divergence was detected
        epoch: usize,
    },

    /// Two inputs that must agree in size do not.
    #[error("Mismatched shapes: {left_name} ({left_len}) != {right_name} ({right_len})")]
    ShapeMismatch {
        /// Label for the left-hand input
        left_name: &'static str,
        /// Size of the left-hand input
        left_len: usize,
        /// Label for the right-hand input
        right_name: &'static str,
        /// Size of the right-hand input
        right_len: usize,
    },

    /// Invalid hyperparameters.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The correction matrix cannot be inverted.
    #[error("Correction matrix is singular (det = {0:e})")]
    SingularCorrection(f64),
}
