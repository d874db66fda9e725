//! Metric upgrade of a raw factorization under orthographic projection.
//!
//! The raw motion `M` and shape `X` satisfy `M X = (M Q)(Q^-1 X)` for any invertible
//! 3x3 `Q`. Under orthographic projection the two rows of each view block of the true
//! motion are orthonormal, so `Q` is found by minimizing, over all views,
//!
//! ```text
//! E_f(Q) = h0^2 + g^2 + h1^2
//! h0 = |m0 Q|^2 - 1,  h1 = |m1 Q|^2 - 1,  g = (m0 Q) . (m1 Q)
//! ```
//!
//! where `m0`, `m1` are the rows of the view block. The problem has no closed form in
//! general and is solved by first order iterations, see [`crate::optimizer`].

use faer::{Mat, MatRef};
use glam::{DMat3, DVec3};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::SfmError;
use crate::optimizer::{UpdateRule, UpdateRuleConfig};

/// The two motion rows of a single view.
pub type ViewBlock = [DVec3; 2];

/// Determinant magnitude below which the correction matrix is not inverted.
pub const SINGULAR_CORRECTION_EPS: f64 = 1e-12;

// loss above which a finished run is reported as poorly converged
const POOR_CONVERGENCE_LOSS: f64 = 1e-2;

/// Parameters of the correction matrix optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Number of passes over all the views.
    pub epochs: usize,
    /// Number of views whose gradients are averaged into a single update.
    pub batch_size: usize,
    /// Whether the view order is shuffled at the start of every epoch.
    pub shuffle: bool,
    /// The update rule and its hyperparameters.
    pub update_rule: UpdateRuleConfig,
    /// Optional early stop once the epoch loss falls below this value.
    pub loss_tolerance: Option<f64>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::momentum(4e-3, 0.9, 2, 200)
    }
}

impl ResolverConfig {
    /// Online plain gradient descent: one update per view, views in fixed order.
    pub fn online(learning_rate: f64, epochs: usize) -> Self {
        Self {
            epochs,
            batch_size: 1,
            shuffle: false,
            update_rule: UpdateRuleConfig::GradientDescent { learning_rate },
            loss_tolerance: None,
        }
    }

    /// Shuffled mini-batches with a momentum update.
    pub fn momentum(learning_rate: f64, momentum: f64, batch_size: usize, epochs: usize) -> Self {
        Self {
            epochs,
            batch_size,
            shuffle: true,
            update_rule: UpdateRuleConfig::Momentum {
                learning_rate,
                momentum,
            },
            loss_tolerance: None,
        }
    }

    /// Stop as soon as the epoch loss falls below `tolerance`.
    pub fn with_loss_tolerance(mut self, tolerance: f64) -> Self {
        self.loss_tolerance = Some(tolerance);
        self
    }

    /// Check the hyperparameters.
    pub fn validate(&self) -> Result<(), SfmError> {
        if self.epochs == 0 {
            return Err(SfmError::Configuration(
                "number of epochs must be positive".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(SfmError::Configuration(
                "batch size must be positive".to_string(),
            ));
        }
        if let Some(tolerance) = self.loss_tolerance {
            if !tolerance.is_finite() || tolerance <= 0.0 {
                return Err(SfmError::Configuration(format!(
                    "loss tolerance must be positive and finite, got {tolerance}"
                )));
            }
        }
        self.update_rule.validate()
    }
}

/// State reported at the end of every epoch.
#[derive(Debug, Clone, Copy)]
pub struct EpochReport<'a> {
    /// Zero based epoch index.
    pub epoch: usize,
    /// Mean per-view loss with the current correction.
    pub loss: f64,
    /// The current correction matrix.
    pub correction: &'a DMat3,
}

/// Receives the optimization progress once per epoch.
pub trait EpochObserver {
    /// Called after every epoch. Returning an error aborts the run.
    fn on_epoch(&mut self, report: &EpochReport<'_>) -> Result<(), SfmError>;
}

impl<F> EpochObserver for F
where
    F: FnMut(&EpochReport<'_>) -> Result<(), SfmError>,
{
    fn on_epoch(&mut self, report: &EpochReport<'_>) -> Result<(), SfmError> {
        self(report)
    }
}

/// Result of a correction matrix optimization.
#[derive(Debug, Clone)]
pub struct CorrectionResult {
    /// The final correction matrix.
    pub correction: DMat3,
    /// Mean per-view loss with the final correction.
    pub loss: f64,
    /// Number of epochs performed.
    pub num_epochs: usize,
}

/// Finds the correction matrix that upgrades a raw motion matrix to a metric one.
#[derive(Debug, Clone)]
pub struct AffineAmbiguityResolver {
    config: ResolverConfig,
}

impl Default for AffineAmbiguityResolver {
    fn default() -> Self {
        Self {
            config: ResolverConfig::default(),
        }
    }
}

impl AffineAmbiguityResolver {
    /// Create a resolver after validating its configuration.
    pub fn new(config: ResolverConfig) -> Result<Self, SfmError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The resolver configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Optimize the correction matrix with the configured update rule.
    ///
    /// # Arguments
    ///
    /// * `motion` - The raw motion matrix with shape (2F, 3).
    /// * `rng` - Random generator used to shuffle the views.
    /// * `observer` - Optional callback invoked after every epoch.
    pub fn resolve<R: Rng + ?Sized>(
        &self,
        motion: MatRef<'_, f64>,
        rng: &mut R,
        observer: Option<&mut dyn EpochObserver>,
    ) -> Result<CorrectionResult, SfmError> {
        let mut rule = self.config.update_rule.build();
        self.resolve_with_rule(motion, rule.as_mut(), rng, observer)
    }

    /// Optimize the correction matrix with a caller provided update rule.
    ///
    /// The learning rate settings of the configuration are ignored, the rest of the
    /// loop (epochs, batching, shuffling, early stop) follows the configuration.
    pub fn resolve_with_rule<R: Rng + ?Sized>(
        &self,
        motion: MatRef<'_, f64>,
        rule: &mut dyn UpdateRule,
        rng: &mut R,
        mut observer: Option<&mut dyn EpochObserver>,
    ) -> Result<CorrectionResult, SfmError> {
        let blocks = view_blocks(motion)?;
        if blocks.is_empty() {
            return Err(SfmError::InsufficientData(
                "motion matrix has no views".to_string(),
            ));
        }

        rule.reset();

        let mut q = DMat3::IDENTITY;
        let mut order = (0..blocks.len()).collect::<Vec<_>>();
        let mut loss = mean_loss(&blocks, &q);
        let mut num_epochs = 0;

        log::debug!("initial loss {:e} over {} views", loss, blocks.len());

        for epoch in 0..self.config.epochs {
            if self.config.shuffle {
                order.shuffle(rng);
            }

            for batch in order.chunks(self.config.batch_size) {
                let gradient = batch
                    .iter()
                    .fold(DMat3::ZERO, |acc, &i| acc + view_gradient(&blocks[i], &q))
                    * (1.0 / batch.len() as f64);

                if !gradient.is_finite() {
                    log::error!("non finite gradient at epoch {}", epoch);
                    return Err(SfmError::Divergence { epoch });
                }

                rule.step(&mut q, &gradient);

                if !q.is_finite() {
                    log::error!("non finite correction matrix at epoch {}", epoch);
                    return Err(SfmError::Divergence { epoch });
                }
            }

            loss = mean_loss(&blocks, &q);
            num_epochs = epoch + 1;

            if !loss.is_finite() {
                log::error!("non finite loss at epoch {}", epoch);
                return Err(SfmError::Divergence { epoch });
            }

            log::debug!("epoch {}: loss {:e}", epoch, loss);

            if let Some(observer) = observer.as_deref_mut() {
                observer.on_epoch(&EpochReport {
                    epoch,
                    loss,
                    correction: &q,
                })?;
            }

            if self.config.loss_tolerance.is_some_and(|tol| loss < tol) {
                log::debug!("loss below tolerance after {} epochs", num_epochs);
                break;
            }
        }

        if loss > POOR_CONVERGENCE_LOSS {
            log::warn!(
                "correction matrix is poorly converged: loss {:e} after {} epochs",
                loss,
                num_epochs
            );
        } else {
            log::info!(
                "correction matrix resolved: loss {:e} after {} epochs",
                loss,
                num_epochs
            );
        }

        Ok(CorrectionResult {
            correction: q,
            loss,
            num_epochs,
        })
    }
}

/// Split a motion matrix of shape (2F, 3) into its per-view blocks.
pub fn view_blocks(motion: MatRef<'_, f64>) -> Result<Vec<ViewBlock>, SfmError> {
    if motion.ncols() != 3 {
        return Err(SfmError::ShapeMismatch {
            left_name: "motion columns",
            left_len: motion.ncols(),
            right_name: "expected columns",
            right_len: 3,
        });
    }
    if motion.nrows() % 2 != 0 {
        return Err(SfmError::ShapeMismatch {
            left_name: "motion rows",
            left_len: motion.nrows(),
            right_name: "twice the number of views",
            right_len: 2 * (motion.nrows() / 2),
        });
    }

    let row = |i: usize| DVec3::new(motion.read(i, 0), motion.read(i, 1), motion.read(i, 2));

    Ok((0..motion.nrows() / 2)
        .map(|f| [row(2 * f), row(2 * f + 1)])
        .collect())
}

// row vector times matrix, i.e. (Q^T r)^T
#[inline]
fn row_times(row: DVec3, q: &DMat3) -> DVec3 {
    DVec3::new(row.dot(q.x_axis), row.dot(q.y_axis), row.dot(q.z_axis))
}

// a b^T
#[inline]
fn outer(a: DVec3, b: DVec3) -> DMat3 {
    DMat3::from_cols(a * b.x, a * b.y, a * b.z)
}

/// Orthonormality residuals `(h0, g, h1)` of a view block corrected by `q`.
pub fn view_residuals(block: &ViewBlock, q: &DMat3) -> (f64, f64, f64) {
    let v0 = row_times(block[0], q);
    let v1 = row_times(block[1], q);
    (v0.length_squared() - 1.0, v0.dot(v1), v1.length_squared() - 1.0)
}

/// Per-view loss `h0^2 + g^2 + h1^2`.
pub fn view_loss(block: &ViewBlock, q: &DMat3) -> f64 {
    let (h0, g, h1) = view_residuals(block, q);
    h0 * h0 + g * g + h1 * h1
}

/// Analytic gradient of half the per-view loss with respect to `q`.
pub fn view_gradient(block: &ViewBlock, q: &DMat3) -> DMat3 {
    let [m0, m1] = *block;
    let v0 = row_times(m0, q);
    let v1 = row_times(m1, q);

    let h0 = v0.length_squared() - 1.0;
    let h1 = v1.length_squared() - 1.0;
    let g = v0.dot(v1);

    let dh0 = outer(m0, v0) * 2.0;
    let dh1 = outer(m1, v1) * 2.0;
    let dg = outer(m0, v1) + outer(m1, v0);

    dh0 * h0 + dg * g + dh1 * h1
}

fn mean_loss(blocks: &[ViewBlock], q: &DMat3) -> f64 {
    blocks.iter().map(|b| view_loss(b, q)).sum::<f64>() / blocks.len() as f64
}

/// Mean per-view loss of a motion matrix corrected by `q`.
pub fn loss(motion: MatRef<'_, f64>, q: &DMat3) -> Result<f64, SfmError> {
    let blocks = view_blocks(motion)?;
    if blocks.is_empty() {
        return Err(SfmError::InsufficientData(
            "motion matrix has no views".to_string(),
        ));
    }
    Ok(mean_loss(&blocks, q))
}

/// Apply the correction: `M Q` and `Q^-1 X`.
///
/// # Arguments
///
/// * `q` - The correction matrix.
/// * `motion` - The raw motion matrix with shape (2F, 3).
/// * `shape` - The raw shape matrix with shape (3, N).
pub fn apply_correction(
    q: &DMat3,
    motion: MatRef<'_, f64>,
    shape: MatRef<'_, f64>,
) -> Result<(Mat<f64>, Mat<f64>), SfmError> {
    if motion.ncols() != 3 || shape.nrows() != 3 {
        return Err(SfmError::ShapeMismatch {
            left_name: "motion columns",
            left_len: motion.ncols(),
            right_name: "shape rows",
            right_len: shape.nrows(),
        });
    }

    let q_inv = invert_correction(q)?;

    let motion_rows = (0..motion.nrows())
        .map(|i| {
            row_times(
                DVec3::new(motion.read(i, 0), motion.read(i, 1), motion.read(i, 2)),
                q,
            )
        })
        .collect::<Vec<_>>();
    let shape_cols = (0..shape.ncols())
        .map(|j| q_inv * DVec3::new(shape.read(0, j), shape.read(1, j), shape.read(2, j)))
        .collect::<Vec<_>>();

    let corrected_motion = Mat::<f64>::from_fn(motion.nrows(), 3, |i, j| motion_rows[i][j]);
    let corrected_shape = Mat::<f64>::from_fn(3, shape.ncols(), |i, j| shape_cols[j][i]);

    Ok((corrected_motion, corrected_shape))
}

/// Invert a correction matrix, refusing singular ones.
pub fn invert_correction(q: &DMat3) -> Result<DMat3, SfmError> {
    let det = q.determinant();
    if !det.is_finite() || det.abs() < SINGULAR_CORRECTION_EPS {
        return Err(SfmError::SingularCorrection(det));
    }
    Ok(q.inverse())
}

/// Convert a shape matrix with shape (3, N) into a list of N points.
pub fn shape_points(shape: MatRef<'_, f64>) -> Vec<[f64; 3]> {
    (0..shape.ncols())
        .map(|j| [shape.read(0, j), shape.read(1, j), shape.read(2, j)])
        .collect()
}
