//! Error types for the envelope detector analysis pipeline.
//!
//! ## Hierarchy
//!
//! ```text
//! AnalysisError (top-level)
//! ├── DegenerateInput   (too few samples for the requested statistic)
//! ├── ShapeMismatch     (filter / signal dimensions disagree)
//! ├── Configuration     (inconsistent bin counts or chunk sizes)
//! └── ConfigError       (invalid AnalysisConfig fields, file I/O)
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Convenient `Result` alias used throughout the analysis crate.
pub type Result<T> = std::result::Result<T, AnalysisError>;

// ---------------------------------------------------------------------------
// AnalysisError
// ---------------------------------------------------------------------------

/// Top-level error type for covariance, pattern and spectral analysis.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Not enough samples to estimate the requested statistic.
    #[error("Degenerate input: {samples} sample(s) is not enough for a covariance (unbiased = {unbiased})")]
    DegenerateInput {
        /// Number of samples along the reduced axis.
        samples: usize,
        /// Whether unbiased (`T - 1`) normalization was requested.
        unbiased: bool,
    },

    /// Filter, channel or feature dimensions are incompatible.
    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Which argument was being checked.
        context: &'static str,
        /// Expected shape (use `usize::MAX` for "any").
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// Parameters produce inconsistent array lengths between sub-computations.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An [`AnalysisConfig`](crate::config::AnalysisConfig) field is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl AnalysisError {
    /// Construct an [`AnalysisError::ShapeMismatch`].
    pub fn shape_mismatch(context: &'static str, expected: Vec<usize>, actual: &[usize]) -> Self {
        AnalysisError::ShapeMismatch {
            context,
            expected,
            actual: actual.to_vec(),
        }
    }

    /// Construct an [`AnalysisError::Configuration`].
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        AnalysisError::Configuration(msg.into())
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors produced when loading or validating an
/// [`AnalysisConfig`](crate::config::AnalysisConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// A configuration file could not be read.
    #[error("Cannot read config file `{path}`: {source}")]
    FileRead {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file contains malformed JSON.
    #[error("Cannot parse config file `{path}`: {source}")]
    Parse {
        /// Path that was being parsed.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A configuration file or its parent directory could not be written.
    #[error("Cannot write config file `{path}`: {source}")]
    FileWrite {
        /// Path that was being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be serialized to JSON.
    #[error("Cannot serialize config: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl ConfigError {
    /// Construct a [`ConfigError::InvalidValue`].
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}
