#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Kornia SfM (Structure from Motion)
//!
//! Recovers camera motion and 3D structure from 2D point tracks observed by
//! orthographic cameras, following the Tomasi-Kanade factorization method.
//!
//! ## Key Features
//!
//! - **Measurement Matrix**: Stacks centered observations of every view
//! - **Rank-3 Factorization**: SVD based split into raw motion and shape
//! - **Metric Upgrade**: Gradient based search for the correction matrix, with
//!   pluggable update rules (plain or momentum gradient descent)
//! - **Evaluation**: Similarity alignment against a reference point cloud
//!
//! ## Example
//!
//! ```rust
//! use kornia_sfm::{synthetic, ResolverConfig, TomasiKanade};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let mut rng = StdRng::seed_from_u64(1234);
//! let object = synthetic::tetrahedron();
//!
//! let mut sfm = TomasiKanade::new(ResolverConfig::online(2e-2, 500))?;
//! for _ in 0..6 {
//!     let camera = synthetic::OrthographicCamera::random(&mut rng);
//!     sfm.add_observation(&camera.project(&object, 0.0, &mut rng)?)?;
//! }
//!
//! let (reconstruction, errors) = sfm.run_evaluated(&mut rng, &object)?;
//! println!("loss: {:e}", reconstruction.loss);
//! println!("final error: {:?}", errors.last());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod affine;

/// Error types for the crate.
pub mod error;

/// Rank-3 factorization of the measurement matrix.
pub mod factorization;

/// Readers for reference point clouds.
pub mod io;

/// Accumulation of per-view observations into the measurement matrix.
pub mod measurement;

pub mod optimizer;

/// End-to-end reconstruction from observations.
pub mod pipeline;

pub mod rigid;

pub mod synthetic;

pub use affine::{
    AffineAmbiguityResolver, CorrectionResult, EpochObserver, EpochReport, ResolverConfig,
};
pub use error::SfmError;
pub use factorization::{factorize, Factorization};
pub use measurement::MeasurementMatrixBuilder;
pub use optimizer::{GradientDescent, MomentumGradientDescent, UpdateRule, UpdateRuleConfig};
pub use pipeline::{Reconstruction, TomasiKanade};
pub use rigid::{reconstruction_error, RigidTransform};
