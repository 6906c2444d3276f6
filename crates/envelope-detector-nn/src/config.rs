//! Envelope detector architecture configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{NnError, NnResult};

/// Pointwise nonlinearity applied after temporal filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationType {
    /// Absolute value (leaky ReLU with slope -1)
    #[default]
    Demodulation,
    /// Magnitude of the analytic signal
    HilbertAmplitude,
    /// No nonlinearity
    Identity,
}

/// How the envelope is brought down to the output rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownsampleMethod {
    /// Non-overlapping average pooling
    #[default]
    AvgPool,
    /// Hann-windowed sinc resampling
    Resample,
    /// Keep the input rate
    None,
}

fn default_true() -> bool {
    true
}

fn default_temporal_filter_size() -> usize {
    7
}

fn default_one() -> usize {
    1
}

fn default_fs_in() -> usize {
    1000
}

fn default_temporal_smoother_size() -> usize {
    3
}

fn default_batchnorm_eps() -> f64 {
    1e-5
}

/// Architecture of an [`EnvelopeDetector`](crate::detector::EnvelopeDetector).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeDetectorConfig {
    /// Number of input channels
    pub nchannels: usize,
    /// Number of features after spatial filtering
    pub nfeatures: usize,
    /// Whether the spatial filter has a bias
    #[serde(default = "default_true")]
    pub spatial_bias: bool,
    /// Whether the temporal filter layer exists
    #[serde(default = "default_true")]
    pub temporal_filter_enable: bool,
    /// Temporal kernel taps
    #[serde(default = "default_temporal_filter_size")]
    pub temporal_filter_size: usize,
    /// Spacing between temporal kernel taps
    #[serde(default = "default_one")]
    pub temporal_filter_dilation: usize,
    /// Ratio between input and output sampling rates
    #[serde(default = "default_one")]
    pub downsample_coef: usize,
    /// Nonlinearity
    #[serde(default)]
    pub activation: ActivationType,
    /// Downsampling method, only used when `downsample_coef > 1`
    #[serde(default)]
    pub downsample_method: DownsampleMethod,
    /// Input sampling rate in Hz
    #[serde(default = "default_fs_in")]
    pub fs_in: usize,
    /// Whether a grouped smoothing convolution follows the activation
    #[serde(default)]
    pub use_temporal_smoother: bool,
    /// Smoother kernel taps
    #[serde(default = "default_temporal_smoother_size")]
    pub temporal_smoother_size: usize,
    /// Batch norm variance epsilon
    #[serde(default = "default_batchnorm_eps")]
    pub batchnorm_eps: f64,
}

impl EnvelopeDetectorConfig {
    /// Configuration with default hyperparameters.
    pub fn new(nchannels: usize, nfeatures: usize) -> Self {
        Self {
            nchannels,
            nfeatures,
            spatial_bias: true,
            temporal_filter_enable: true,
            temporal_filter_size: default_temporal_filter_size(),
            temporal_filter_dilation: 1,
            downsample_coef: 1,
            activation: ActivationType::default(),
            downsample_method: DownsampleMethod::default(),
            fs_in: default_fs_in(),
            use_temporal_smoother: false,
            temporal_smoother_size: default_temporal_smoother_size(),
            batchnorm_eps: default_batchnorm_eps(),
        }
    }

    /// Create a new config builder
    pub fn builder(nchannels: usize, nfeatures: usize) -> EnvelopeDetectorConfigBuilder {
        EnvelopeDetectorConfigBuilder {
            config: Self::new(nchannels, nfeatures),
        }
    }

    /// Length of the exported (dilated) temporal kernel.
    pub fn dilated_kernel_len(&self) -> usize {
        if self.temporal_filter_enable {
            1 + (self.temporal_filter_size - 1) * self.temporal_filter_dilation
        } else {
            1
        }
    }

    /// Whether the downsampling stage changes the signal.
    pub fn downsamples(&self) -> bool {
        self.downsample_coef > 1 && self.downsample_method != DownsampleMethod::None
    }

    /// Sampling rate of the detector output.
    pub fn fs_out(&self) -> f64 {
        if self.downsamples() {
            self.fs_in as f64 / self.downsample_coef as f64
        } else {
            self.fs_in as f64
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> NnResult<()> {
        if self.nchannels == 0 {
            return Err(NnError::invalid_config("nchannels", "must be positive"));
        }
        if self.nfeatures == 0 {
            return Err(NnError::invalid_config("nfeatures", "must be positive"));
        }
        if self.temporal_filter_enable {
            if self.temporal_filter_size == 0 {
                return Err(NnError::invalid_config("temporal_filter_size", "must be positive"));
            }
            if self.temporal_filter_dilation == 0 {
                return Err(NnError::invalid_config("temporal_filter_dilation", "must be positive"));
            }
        }
        if self.downsample_coef == 0 {
            return Err(NnError::invalid_config("downsample_coef", "must be positive"));
        }
        if self.fs_in == 0 {
            return Err(NnError::invalid_config("fs_in", "must be positive"));
        }
        if self.downsample_coef > 1
            && self.downsample_method == DownsampleMethod::Resample
            && self.fs_in < self.downsample_coef
        {
            return Err(NnError::invalid_config(
                "downsample_coef",
                format!("resampling {} Hz by {} leaves no output rate", self.fs_in, self.downsample_coef),
            ));
        }
        if self.use_temporal_smoother && self.temporal_smoother_size == 0 {
            return Err(NnError::invalid_config("temporal_smoother_size", "must be positive"));
        }
        if !(self.batchnorm_eps.is_finite() && self.batchnorm_eps >= 0.0) {
            return Err(NnError::invalid_config("batchnorm_eps", "must be finite and >= 0"));
        }
        Ok(())
    }

    /// Load and validate a configuration from a JSON file.
    pub fn from_json(path: &Path) -> NnResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write this configuration as pretty-printed JSON.
    pub fn to_json(&self, path: &Path) -> NnResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Builder for [`EnvelopeDetectorConfig`]
#[derive(Debug, Clone)]
pub struct EnvelopeDetectorConfigBuilder {
    config: EnvelopeDetectorConfig,
}

impl EnvelopeDetectorConfigBuilder {
    /// Set spatial bias
    pub fn spatial_bias(mut self, enable: bool) -> Self {
        self.config.spatial_bias = enable;
        self
    }

    /// Enable or disable the temporal filter
    pub fn temporal_filter_enable(mut self, enable: bool) -> Self {
        self.config.temporal_filter_enable = enable;
        self
    }

    /// Set temporal kernel taps
    pub fn temporal_filter_size(mut self, size: usize) -> Self {
        self.config.temporal_filter_size = size;
        self
    }

    /// Set temporal kernel dilation
    pub fn temporal_filter_dilation(mut self, dilation: usize) -> Self {
        self.config.temporal_filter_dilation = dilation;
        self
    }

    /// Set downsampling ratio
    pub fn downsample_coef(mut self, coef: usize) -> Self {
        self.config.downsample_coef = coef;
        self
    }

    /// Set activation
    pub fn activation(mut self, activation: ActivationType) -> Self {
        self.config.activation = activation;
        self
    }

    /// Set downsampling method
    pub fn downsample_method(mut self, method: DownsampleMethod) -> Self {
        self.config.downsample_method = method;
        self
    }

    /// Set input sampling rate
    pub fn fs_in(mut self, fs_in: usize) -> Self {
        self.config.fs_in = fs_in;
        self
    }

    /// Enable the temporal smoother with the given kernel size
    pub fn temporal_smoother(mut self, size: usize) -> Self {
        self.config.use_temporal_smoother = true;
        self.config.temporal_smoother_size = size;
        self
    }

    /// Set batch norm epsilon
    pub fn batchnorm_eps(mut self, eps: f64) -> Self {
        self.config.batchnorm_eps = eps;
        self
    }

    /// Build the configuration
    pub fn build(self) -> EnvelopeDetectorConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_hyperparameters() {
        let cfg = EnvelopeDetectorConfig::new(30, 5);
        assert!(cfg.spatial_bias);
        assert!(cfg.temporal_filter_enable);
        assert_eq!(cfg.temporal_filter_size, 7);
        assert_eq!(cfg.downsample_coef, 1);
        assert_eq!(cfg.activation, ActivationType::Demodulation);
        assert_eq!(cfg.downsample_method, DownsampleMethod::AvgPool);
        assert_eq!(cfg.fs_in, 1000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn dilated_kernel_length() {
        let cfg = EnvelopeDetectorConfig::builder(4, 2)
            .temporal_filter_size(5)
            .temporal_filter_dilation(3)
            .build();
        assert_eq!(cfg.dilated_kernel_len(), 13);

        let disabled = EnvelopeDetectorConfig::builder(4, 2).temporal_filter_enable(false).build();
        assert_eq!(disabled.dilated_kernel_len(), 1);
    }

    #[test]
    fn output_rate() {
        let cfg = EnvelopeDetectorConfig::builder(4, 2).downsample_coef(10).build();
        assert_eq!(cfg.fs_out(), 100.0);
        let none = EnvelopeDetectorConfig::builder(4, 2)
            .downsample_coef(10)
            .downsample_method(DownsampleMethod::None)
            .build();
        assert_eq!(none.fs_out(), 1000.0);
    }

    #[test]
    fn validation_rejects_zero_sizes() {
        assert!(EnvelopeDetectorConfig::new(0, 2).validate().is_err());
        assert!(EnvelopeDetectorConfig::new(2, 0).validate().is_err());
        let cfg = EnvelopeDetectorConfig::builder(2, 2).temporal_filter_size(0).build();
        assert!(matches!(
            cfg.validate(),
            Err(NnError::InvalidConfig { field: "temporal_filter_size", .. })
        ));
    }

    #[test]
    fn json_fills_defaults() {
        let cfg: EnvelopeDetectorConfig =
            serde_json::from_str(r#"{"nchannels": 8, "nfeatures": 3, "activation": "hilbert_amplitude"}"#).unwrap();
        assert_eq!(cfg.temporal_filter_size, 7);
        assert_eq!(cfg.activation, ActivationType::HilbertAmplitude);
        assert_eq!(cfg, EnvelopeDetectorConfig::builder(8, 3).activation(ActivationType::HilbertAmplitude).build());
    }

    #[test]
    fn file_round_trip() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("detector.json");
        let cfg = EnvelopeDetectorConfig::builder(12, 4)
            .temporal_filter_dilation(2)
            .downsample_coef(5)
            .downsample_method(DownsampleMethod::Resample)
            .temporal_smoother(9)
            .batchnorm_eps(1e-3)
            .build();
        cfg.to_json(&path).unwrap();
        assert_eq!(EnvelopeDetectorConfig::from_json(&path).unwrap(), cfg);
    }

    #[test]
    fn file_errors_are_reported() {
        let tmp = tempdir().unwrap();
        assert!(matches!(
            EnvelopeDetectorConfig::from_json(&tmp.path().join("missing.json")),
            Err(NnError::Io(_))
        ));

        let malformed = tmp.path().join("malformed.json");
        std::fs::write(&malformed, "{\"nchannels\": ").unwrap();
        assert!(matches!(
            EnvelopeDetectorConfig::from_json(&malformed),
            Err(NnError::Serialization(_))
        ));

        let invalid = tmp.path().join("invalid.json");
        EnvelopeDetectorConfig::builder(4, 2).temporal_filter_size(0).build().to_json(&invalid).unwrap();
        assert!(matches!(
            EnvelopeDetectorConfig::from_json(&invalid),
            Err(NnError::InvalidConfig { field: "temporal_filter_size", .. })
        ));
    }
}
