//! Envelope Detector Signal Analysis Library
//!
//! This crate interprets the linear front end of a trained envelope detector:
//! a spatial filter (feature, channel) followed by one temporal kernel per
//! feature. It provides covariance estimation, spatial activation patterns and
//! per-feature spectra.
//!
//! # Features
//!
//! - **Covariance**: single-pass, batched and streaming (Chan) estimators
//! - **Convolution**: same-length grouped cross-correlation with dilation
//! - **Spatial Patterns**: filtered covariance projected on each spatial filter row
//! - **Spectra**: kernel DFT magnitude, Welch PSD of unmixed sources, output spectra
//! - **Kernels**: sinc band-pass, Gabor and Morlet temporal kernels from band parameters
//!
//! # Example
//!
//! ```rust,no_run
//! use envelope_detector_signal::{AnalysisConfig, EnvelopeAnalysis};
//! use ndarray::{Array2, Array3};
//!
//! let config = AnalysisConfig::builder()
//!     .fs(1000.0)
//!     .nfreq(256)
//!     .nbatch(4)
//!     .build();
//! let analysis = EnvelopeAnalysis::new(config).unwrap();
//!
//! let x = Array3::<f64>::zeros((8, 16, 1000));
//! let spatial = Array2::<f64>::eye(16);
//! let temporal = Array3::<f64>::ones((16, 1, 7));
//! let patterns = analysis.patterns(x.view(), spatial.view(), temporal.view()).unwrap();
//! assert_eq!(patterns.dim(), (16, 16));
//! ```

pub mod analysis;
pub mod config;
pub mod conv;
pub mod covariance;
pub mod error;
pub mod filters;
pub mod kernels;
pub mod patterns;
pub mod spectrum;

// Re-export main types for convenience
pub use analysis::EnvelopeAnalysis;
pub use config::{AnalysisConfig, AnalysisConfigBuilder, Reduction};
pub use conv::{correlate_same, filter_channels, grouped_correlate_same, same_padding};
pub use covariance::{batched_covariance, covariance, CovarianceAccumulator};
pub use error::{AnalysisError, ConfigError, Result};
pub use filters::{unmix, FilterBank};
pub use kernels::{gabor_wavelet, kernel_times, morlet_wavelet, sinc_bandpass, Band, ComplexKernels};
pub use patterns::spatial_patterns;
pub use spectrum::{
    channel_spectrum, feature_spectra, filter_spectrum, frequency_bins, input_spectrum, welch_psd,
    FeatureSpectra, WelchConfig, WindowFunction,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::analysis::EnvelopeAnalysis;
    pub use crate::config::{AnalysisConfig, Reduction};
    pub use crate::covariance::{covariance, CovarianceAccumulator};
    pub use crate::filters::FilterBank;
    pub use crate::spectrum::FeatureSpectra;
    pub use crate::{AnalysisError, Result};
}
