//! Error types for the model and importance crate.

use envelope_detector_signal::AnalysisError;
use thiserror::Error;

/// Result type alias for model and importance operations
pub type NnResult<T> = Result<T, NnError>;

/// Model, regressor and importance errors
#[derive(Error, Debug)]
pub enum NnError {
    /// Weight, signal or regressor dimensions disagree
    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Which tensor was being checked
        context: &'static str,
        /// Expected shape (`usize::MAX` marks a free axis)
        expected: Vec<usize>,
        /// Actual shape
        actual: Vec<usize>,
    },

    /// The requested derivative does not depend on the regressor input
    #[error("Order-{order} gradient is not differentiable: {reason}")]
    NonDifferentiablePath {
        /// Requested gradient order
        order: usize,
        /// Why the path is broken
        reason: String,
    },

    /// A model or scorer parameter is out of range
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidConfig {
        /// Name of the parameter
        field: &'static str,
        /// Human-readable reason
        reason: String,
    },

    /// A feature's accumulated importance is NaN or infinite
    #[error("Importance of feature {feature} is not finite")]
    NonFiniteScore {
        /// Index of the offending feature
        feature: usize,
    },

    /// No samples were provided to the importance scorer
    #[error("Empty dataset: at least one non-empty batch is required")]
    EmptyDataset,

    /// Error raised by a signal analysis
    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    /// Weight file could not be read or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Weight file is not valid JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NnError {
    /// Create a shape mismatch error
    pub fn shape_mismatch(context: &'static str, expected: Vec<usize>, actual: &[usize]) -> Self {
        NnError::ShapeMismatch {
            context,
            expected,
            actual: actual.to_vec(),
        }
    }

    /// Create a non-differentiable path error
    pub fn non_differentiable<S: Into<String>>(order: usize, reason: S) -> Self {
        NnError::NonDifferentiablePath {
            order,
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config<S: Into<String>>(field: &'static str, reason: S) -> Self {
        NnError::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}
