//! # Envelope Detector Model Crate
//!
//! Frozen, inference-only envelope detector and gradient-based feature
//! importance for interpreting it.
//!
//! ## Features
//!
//! - **Envelope Detector**: spatial filter, batch norm, grouped temporal filter,
//!   demodulation or Hilbert amplitude, smoothing and downsampling
//! - **Regressor Heads**: linear and tanh MLP heads with closed-form input
//!   gradients of any order
//! - **Gradient Importance**: per-feature `Σ |∂y/∂z|` accumulated over batches
//! - **Interpretation**: patterns, spectra and importance in one call
//!
//! ## Example
//!
//! ```rust,no_run
//! use envelope_detector_nn::{EnvelopeDetector, EnvelopeDetectorConfig, GradientImportance, MlpRegressor};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let config = EnvelopeDetectorConfig::builder(30, 5).downsample_coef(10).build();
//! let detector = EnvelopeDetector::random(config, &mut rng)?;
//! let head = MlpRegressor::random(5, 16, 1, &mut rng)?;
//!
//! let x = ndarray::Array3::<f64>::zeros((10, 30, 300));
//! let report = GradientImportance::default().score(&detector, &head, [x.view()])?;
//! println!("most important feature: {}", report.order[0]);
//! # Ok::<(), envelope_detector_nn::NnError>(())
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod detector;
pub mod error;
pub mod importance;
pub mod interpret;
pub mod layers;
pub mod regressor;

// Re-exports for convenience
pub use config::{ActivationType, DownsampleMethod, EnvelopeDetectorConfig, EnvelopeDetectorConfigBuilder};
pub use detector::{DetectorWeights, EnvelopeDetector, FilterModel};
pub use error::{NnError, NnResult};
pub use importance::{GradientImportance, ImportanceReport, NeumaierSum};
pub use interpret::{interpret, Interpretation};
pub use layers::{BatchNormStats, Downsampler, SincResampler};
pub use regressor::{LinearRegressor, MlpRegressor, Regressor};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{ActivationType, DownsampleMethod, EnvelopeDetectorConfig};
    pub use crate::detector::{EnvelopeDetector, FilterModel};
    pub use crate::error::{NnError, NnResult};
    pub use crate::importance::{GradientImportance, ImportanceReport};
    pub use crate::regressor::{LinearRegressor, MlpRegressor, Regressor};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
