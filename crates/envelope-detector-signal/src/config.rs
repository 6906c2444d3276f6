//! Analysis configuration.
//!
//! [`AnalysisConfig`] collects the parameters shared by the pattern, spectrum
//! and importance computations. It is serializable via [`serde`] so a run can
//! be stored next to the weights it was computed from.
//!
//! # Example
//!
//! ```rust
//! use envelope_detector_signal::config::AnalysisConfig;
//!
//! let cfg = AnalysisConfig::builder()
//!     .fs(1000.0)
//!     .nfreq(300)
//!     .nbatch(4)
//!     .build();
//! cfg.validate().expect("config is valid");
//! assert_eq!(cfg.positive_freq(), 150);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// How the regressor output is reduced to a scalar before differentiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Sum over every output element.
    #[default]
    Sum,
    /// Mean over every output element of a batch.
    ///
    /// The scale depends on the batch size, so importance accumulated over
    /// sub-batches no longer matches a single large batch.
    Mean,
}

// ---------------------------------------------------------------------------
// AnalysisConfig
// ---------------------------------------------------------------------------

/// Parameters for the pattern, spectrum and importance analyses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Sampling rate of the input signal in Hz. Default: **1000.0**.
    pub fs: f64,

    /// DFT length used for the filter spectrum and the Welch segment length.
    ///
    /// Both spectral paths report `nfreq / 2` bins. Default: **256**.
    pub nfreq: usize,

    /// Number of sub-batches the signal is split into to bound memory.
    ///
    /// `1` processes everything at once. Default: **1**.
    pub nbatch: usize,

    /// Use `T - 1` normalization for covariances. Default: **true**.
    pub unbiased: bool,

    /// Gradient order for the importance scorer. Default: **1**.
    pub order: usize,

    /// Output reduction for the importance scorer. Default: **Sum**.
    pub reduction: Reduction,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fs: 1000.0,
            nfreq: 256,
            nbatch: 1,
            unbiased: true,
            order: 1,
            reduction: Reduction::Sum,
        }
    }
}

impl AnalysisConfig {
    /// Create a new config builder
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder::new()
    }

    /// Number of non-negative frequency bins reported by both spectral paths.
    pub fn positive_freq(&self) -> usize {
        self.nfreq / 2
    }

    /// Validate all fields and return the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fs.is_finite() && self.fs > 0.0) {
            return Err(ConfigError::invalid_value("fs", "must be finite and > 0.0"));
        }
        if self.nfreq < 2 {
            return Err(ConfigError::invalid_value(
                "nfreq",
                "must be >= 2 so at least one frequency bin exists",
            ));
        }
        if self.nbatch == 0 {
            return Err(ConfigError::invalid_value("nbatch", "must be > 0"));
        }
        if self.order == 0 {
            return Err(ConfigError::invalid_value("order", "must be >= 1"));
        }
        Ok(())
    }

    /// Load an [`AnalysisConfig`] from a JSON file at `path`.
    ///
    /// Missing fields fall back to their defaults. The loaded configuration is
    /// validated before it is returned.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: AnalysisConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write this configuration as pretty-printed JSON, creating parent
    /// directories if necessary.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::FileWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, json).map_err(|source| ConfigError::FileWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Builder for [`AnalysisConfig`]
#[derive(Debug, Default)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            config: AnalysisConfig::default(),
        }
    }

    /// Set sampling rate
    pub fn fs(mut self, fs: f64) -> Self {
        self.config.fs = fs;
        self
    }

    /// Set DFT length / Welch segment length
    pub fn nfreq(mut self, nfreq: usize) -> Self {
        self.config.nfreq = nfreq;
        self
    }

    /// Set number of sub-batches
    pub fn nbatch(mut self, nbatch: usize) -> Self {
        self.config.nbatch = nbatch;
        self
    }

    /// Set covariance normalization
    pub fn unbiased(mut self, unbiased: bool) -> Self {
        self.config.unbiased = unbiased;
        self
    }

    /// Set gradient order
    pub fn order(mut self, order: usize) -> Self {
        self.config.order = order;
        self
    }

    /// Set output reduction
    pub fn reduction(mut self, reduction: Reduction) -> Self {
        self.config.reduction = reduction;
        self
    }

    /// Build the configuration
    pub fn build(self) -> AnalysisConfig {
        self.config
    }
}
