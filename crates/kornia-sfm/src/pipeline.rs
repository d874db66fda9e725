use faer::Mat;
use glam::DMat3;
use rand::Rng;

use crate::affine::{
    apply_correction, shape_points, AffineAmbiguityResolver, EpochObserver, ResolverConfig,
};
use crate::error::SfmError;
use crate::factorization::{factorize, Factorization};
use crate::measurement::MeasurementMatrixBuilder;
use crate::rigid::ReconstructionErrorMonitor;

/// The metric reconstruction produced by [`TomasiKanade::run`].
#[derive(Debug, Clone)]
pub struct Reconstruction {
    /// Corrected motion matrix with shape (2F, 3).
    pub motion: Mat<f64>,
    /// Corrected shape matrix with shape (3, N).
    pub shape: Mat<f64>,
    /// The correction matrix applied to the raw factorization.
    pub correction: DMat3,
    /// Final orthonormality loss.
    pub loss: f64,
    /// Number of epochs the resolver performed.
    pub num_epochs: usize,
}

impl Reconstruction {
    /// The reconstructed points as a list of N points.
    pub fn points(&self) -> Vec<[f64; 3]> {
        shape_points(self.shape.as_ref())
    }
}

/// Structure from motion by factorization under orthographic projection.
///
/// Collects one observation per view, then factorizes the measurement matrix and
/// upgrades the result to a metric reconstruction.
///
/// # Example
///
/// ```rust
/// use kornia_sfm::{synthetic, ResolverConfig, SfmError, TomasiKanade};
/// use rand::{rngs::StdRng, SeedableRng};
///
/// let mut rng = StdRng::seed_from_u64(0);
/// let object = synthetic::tetrahedron();
///
/// let mut sfm = TomasiKanade::new(ResolverConfig::default())?;
/// for _ in 0..4 {
///     let camera = synthetic::OrthographicCamera::random(&mut rng);
///     sfm.add_observation(&camera.project(&object, 0.0, &mut rng)?)?;
/// }
///
/// let reconstruction = sfm.run(&mut rng)?;
/// assert_eq!(reconstruction.points().len(), 4);
/// # Ok::<(), SfmError>(())
/// ```
#[derive(Debug, Clone)]
pub struct TomasiKanade {
    builder: MeasurementMatrixBuilder,
    resolver: AffineAmbiguityResolver,
}

impl Default for TomasiKanade {
    fn default() -> Self {
        Self {
            builder: MeasurementMatrixBuilder::new(),
            resolver: AffineAmbiguityResolver::default(),
        }
    }
}

impl TomasiKanade {
    /// Create a pipeline with the given resolver configuration.
    pub fn new(config: ResolverConfig) -> Result<Self, SfmError> {
        Ok(Self {
            builder: MeasurementMatrixBuilder::new(),
            resolver: AffineAmbiguityResolver::new(config)?,
        })
    }

    /// The resolver configuration.
    pub fn config(&self) -> &ResolverConfig {
        self.resolver.config()
    }

    /// Add the image points of one view, see [`MeasurementMatrixBuilder::add_observation`].
    pub fn add_observation(&mut self, points: &[[f64; 2]]) -> Result<(), SfmError> {
        self.builder.add_observation(points)
    }

    /// Number of views added so far.
    pub fn num_views(&self) -> usize {
        self.builder.num_views()
    }

    /// Number of points per view, once the first view is added.
    pub fn num_points(&self) -> Option<usize> {
        self.builder.num_points()
    }

    /// The measurement matrix with shape (2F, N).
    pub fn measurement_matrix(&self) -> Result<Mat<f64>, SfmError> {
        self.builder.measurement_matrix()
    }

    /// Reconstruct motion and shape from the views added so far.
    ///
    /// # Arguments
    ///
    /// * `rng` - Random generator used to shuffle the views during the optimization.
    pub fn run<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Reconstruction, SfmError> {
        self.reconstruct(rng, None)
    }

    /// Same as [`TomasiKanade::run`], reporting every epoch to `observer`.
    pub fn run_with_observer<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        observer: &mut dyn EpochObserver,
    ) -> Result<Reconstruction, SfmError> {
        self.reconstruct(rng, Some(observer))
    }

    /// Reconstruct and track the error against the ground truth at every epoch.
    ///
    /// # Arguments
    ///
    /// * `rng` - Random generator used to shuffle the views during the optimization.
    /// * `reference` - The ground truth points, in the order of the observations.
    ///
    /// # Returns
    ///
    /// The reconstruction and the reconstruction error after every epoch.
    pub fn run_evaluated<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        reference: &[[f64; 3]],
    ) -> Result<(Reconstruction, Vec<f64>), SfmError> {
        let factorization = self.factorization()?;

        let mut monitor =
            ReconstructionErrorMonitor::new(factorization.shape.as_ref(), reference)?;
        let reconstruction = self.upgrade(&factorization, rng, Some(&mut monitor))?;

        Ok((reconstruction, monitor.into_errors()))
    }

    fn factorization(&self) -> Result<Factorization, SfmError> {
        let w = self.builder.measurement_matrix()?;
        factorize(w.as_ref())
    }

    fn reconstruct<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        observer: Option<&mut dyn EpochObserver>,
    ) -> Result<Reconstruction, SfmError> {
        let factorization = self.factorization()?;
        self.upgrade(&factorization, rng, observer)
    }

    // resolve the correction matrix and apply it to the raw factors
    fn upgrade<R: Rng + ?Sized>(
        &self,
        factorization: &Factorization,
        rng: &mut R,
        observer: Option<&mut dyn EpochObserver>,
    ) -> Result<Reconstruction, SfmError> {
        let result = self
            .resolver
            .resolve(factorization.motion.as_ref(), rng, observer)?;

        let (motion, shape) = apply_correction(
            &result.correction,
            factorization.motion.as_ref(),
            factorization.shape.as_ref(),
        )?;

        Ok(Reconstruction {
            motion,
            shape,
            correction: result.correction,
            loss: result.loss,
            num_epochs: result.num_epochs,
        })
    }
}
