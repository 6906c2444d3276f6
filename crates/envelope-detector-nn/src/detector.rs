//! Frozen envelope detector.
//!
//! The forward pass is
//!
//! ```text
//! spatial 1x1 conv (+bias) -> batch norm -> grouped temporal conv -> batch norm
//!     -> activation -> optional grouped smoother -> downsampler
//! ```
//!
//! with both batch norms in inference mode. Only the learned filters are
//! exposed for interpretation; nothing here is trainable.

use ndarray::{s, Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, instrument};

use envelope_detector_signal::conv::grouped_correlate_same;
use envelope_detector_signal::filters::unmix;

use crate::config::EnvelopeDetectorConfig;
use crate::error::{NnError, NnResult};
use crate::layers::{activate, BatchNormStats, Downsampler};

/// Read access to a trained spatial/temporal filter model.
pub trait FilterModel {
    /// Number of learned features.
    fn nfeatures(&self) -> usize;

    /// Number of input channels.
    fn nchannels(&self) -> usize;

    /// Spatial filter, (feature, channel).
    fn spatial_filter(&self) -> Array2<f64>;

    /// Temporal filter, (feature, 1, kernel_length).
    fn temporal_filter(&self) -> Array3<f64>;

    /// Map (batch, channel, time) to (batch, feature, downsampled_time).
    fn forward(&self, x: ArrayView3<f64>) -> NnResult<Array3<f64>>;
}

/// Learned parameters of an [`EnvelopeDetector`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorWeights {
    /// Spatial conv weight, (feature, channel)
    pub spatial_weight: Array2<f64>,
    /// Spatial conv bias, (feature)
    pub spatial_bias: Option<Array1<f64>>,
    /// Statistics of the batch norm after the spatial filter
    pub spatial_norm: BatchNormStats,
    /// Undilated temporal taps, (feature, temporal_filter_size)
    pub temporal_weight: Option<Array2<f64>>,
    /// Statistics of the batch norm after the temporal filter
    pub temporal_norm: Option<BatchNormStats>,
    /// Smoother taps, (feature, temporal_smoother_size)
    pub smoother_weight: Option<Array2<f64>>,
    /// Smoother bias, (feature)
    pub smoother_bias: Option<Array1<f64>>,
}

/// Uniform sample in `(-bound, bound)` with `bound = 1 / sqrt(fan_in)`.
fn fan_in_uniform<R: Rng + ?Sized>(rng: &mut R, shape: (usize, usize), fan_in: usize) -> Array2<f64> {
    let bound = 1.0 / (fan_in as f64).sqrt();
    Array2::from_shape_fn(shape, |_| rng.gen_range(-bound..bound))
}

fn check_matrix(context: &'static str, m: &Array2<f64>, expected: (usize, usize)) -> NnResult<()> {
    if m.dim() != expected {
        return Err(NnError::shape_mismatch(context, vec![expected.0, expected.1], m.shape()));
    }
    Ok(())
}

fn check_vector(context: &'static str, v: &Array1<f64>, expected: usize) -> NnResult<()> {
    if v.len() != expected {
        return Err(NnError::shape_mismatch(context, vec![expected], v.shape()));
    }
    Ok(())
}

/// Present iff `enabled`, with the given shape.
fn check_optional_matrix(
    context: &'static str,
    m: &Option<Array2<f64>>,
    enabled: bool,
    expected: (usize, usize),
) -> NnResult<()> {
    match (m, enabled) {
        (Some(m), true) => check_matrix(context, m, expected),
        (None, false) => Ok(()),
        (Some(m), false) => Err(NnError::shape_mismatch(context, vec![], m.shape())),
        (None, true) => Err(NnError::shape_mismatch(context, vec![expected.0, expected.1], &[])),
    }
}

fn check_optional_vector(context: &'static str, v: &Option<Array1<f64>>, enabled: bool, expected: usize) -> NnResult<()> {
    match (v, enabled) {
        (Some(v), true) => check_vector(context, v, expected),
        (None, false) => Ok(()),
        (Some(v), false) => Err(NnError::shape_mismatch(context, vec![], v.shape())),
        (None, true) => Err(NnError::shape_mismatch(context, vec![expected], &[])),
    }
}

impl DetectorWeights {
    /// Check every tensor against `config`.
    pub fn validate(&self, config: &EnvelopeDetectorConfig) -> NnResult<()> {
        let (f, c) = (config.nfeatures, config.nchannels);
        check_matrix("spatial weight", &self.spatial_weight, (f, c))?;
        check_optional_vector("spatial bias", &self.spatial_bias, config.spatial_bias, f)?;
        self.spatial_norm.check("spatial batch norm", f, config.batchnorm_eps)?;

        let temporal = config.temporal_filter_enable;
        check_optional_matrix(
            "temporal weight",
            &self.temporal_weight,
            temporal,
            (f, config.temporal_filter_size),
        )?;
        match (&self.temporal_norm, temporal) {
            (Some(stats), true) => stats.check("temporal batch norm", f, config.batchnorm_eps)?,
            (None, false) => {}
            (Some(stats), false) => return Err(NnError::shape_mismatch("temporal batch norm", vec![], &[stats.len()])),
            (None, true) => return Err(NnError::shape_mismatch("temporal batch norm", vec![f], &[])),
        }

        let smoother = config.use_temporal_smoother;
        check_optional_matrix(
            "smoother weight",
            &self.smoother_weight,
            smoother,
            (f, config.temporal_smoother_size),
        )?;
        check_optional_vector("smoother bias", &self.smoother_bias, smoother, f)?;
        Ok(())
    }

    /// Load weights from a JSON file.
    pub fn load(path: &Path) -> NnResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save weights as JSON.
    pub fn save(&self, path: &Path) -> NnResult<()> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }
}

/// Inference-only envelope detector.
#[derive(Debug, Clone)]
pub struct EnvelopeDetector {
    config: EnvelopeDetectorConfig,
    weights: DetectorWeights,
    downsampler: Downsampler,
}

impl EnvelopeDetector {
    /// Build a detector from trained weights.
    pub fn new(config: EnvelopeDetectorConfig, weights: DetectorWeights) -> NnResult<Self> {
        config.validate()?;
        weights.validate(&config)?;
        let downsampler = Downsampler::from_config(&config)?;
        Ok(Self {
            config,
            weights,
            downsampler,
        })
    }

    /// Randomly initialized detector.
    ///
    /// Convolution weights and biases are drawn from `U(-1/√fan_in, 1/√fan_in)`
    /// where `fan_in` is the number of inputs of one output (channels for the
    /// spatial filter, kernel taps for the grouped layers). Batch norm
    /// statistics start at mean 0, variance 1.
    pub fn random<R: Rng + ?Sized>(config: EnvelopeDetectorConfig, rng: &mut R) -> NnResult<Self> {
        config.validate()?;
        let (f, c) = (config.nfeatures, config.nchannels);

        let spatial_weight = fan_in_uniform(rng, (f, c), c);
        let spatial_bias = config
            .spatial_bias
            .then(|| fan_in_uniform(rng, (1, f), c).index_axis_move(Axis(0), 0));
        let (temporal_weight, temporal_norm) = if config.temporal_filter_enable {
            let k = config.temporal_filter_size;
            (Some(fan_in_uniform(rng, (f, k), k)), Some(BatchNormStats::identity(f)))
        } else {
            (None, None)
        };
        let (smoother_weight, smoother_bias) = if config.use_temporal_smoother {
            let k = config.temporal_smoother_size;
            let w = fan_in_uniform(rng, (f, k), k);
            let b = fan_in_uniform(rng, (1, f), k).index_axis_move(Axis(0), 0);
            (Some(w), Some(b))
        } else {
            (None, None)
        };

        let weights = DetectorWeights {
            spatial_weight,
            spatial_bias,
            spatial_norm: BatchNormStats::identity(f),
            temporal_weight,
            temporal_norm,
            smoother_weight,
            smoother_bias,
        };
        Self::new(config, weights)
    }

    /// Get the configuration
    pub fn config(&self) -> &EnvelopeDetectorConfig {
        &self.config
    }

    /// Get the weights
    pub fn weights(&self) -> &DetectorWeights {
        &self.weights
    }

    /// Output length for an input of `len` samples.
    pub fn output_len(&self, len: usize) -> usize {
        self.downsampler.output_len(len)
    }

    /// Temporal taps with `dilation - 1` zeros between them, (feature, L).
    fn dilated_kernels(&self) -> Array2<f64> {
        let f = self.config.nfeatures;
        match &self.weights.temporal_weight {
            Some(w) => {
                let d = self.config.temporal_filter_dilation;
                let mut dilated = Array2::zeros((f, self.config.dilated_kernel_len()));
                dilated.slice_mut(s![.., ..;d]).assign(w);
                dilated
            }
            None => Array2::ones((f, 1)),
        }
    }

    /// Forward pass for a single (channel, time) recording.
    pub fn forward_recording(&self, x: ArrayView2<f64>) -> NnResult<Array2<f64>> {
        let out = self.forward(x.insert_axis(Axis(0)))?;
        Ok(out.index_axis_move(Axis(0), 0))
    }
}

impl FilterModel for EnvelopeDetector {
    fn nfeatures(&self) -> usize {
        self.config.nfeatures
    }

    fn nchannels(&self) -> usize {
        self.config.nchannels
    }

    fn spatial_filter(&self) -> Array2<f64> {
        self.weights.spatial_weight.clone()
    }

    fn temporal_filter(&self) -> Array3<f64> {
        self.dilated_kernels().insert_axis(Axis(1))
    }

    #[instrument(skip_all, fields(shape = ?x.shape()))]
    fn forward(&self, x: ArrayView3<f64>) -> NnResult<Array3<f64>> {
        let (_, nchannels, _) = x.dim();
        if nchannels != self.config.nchannels {
            return Err(NnError::shape_mismatch(
                "detector input",
                vec![usize::MAX, self.config.nchannels, usize::MAX],
                x.shape(),
            ));
        }
        let eps = self.config.batchnorm_eps;

        let mut y = unmix(self.weights.spatial_weight.view(), x)?;
        if let Some(bias) = &self.weights.spatial_bias {
            for mut sample in y.outer_iter_mut() {
                for (mut lane, &b) in sample.outer_iter_mut().zip(bias.iter()) {
                    lane += b;
                }
            }
        }
        self.weights.spatial_norm.apply(&mut y, eps);

        if let (Some(w), Some(norm)) = (&self.weights.temporal_weight, &self.weights.temporal_norm) {
            y = grouped_correlate_same(y.view(), w.view(), self.config.temporal_filter_dilation, None)?;
            norm.apply(&mut y, eps);
        }

        y = activate(self.config.activation, y);

        if let Some(w) = &self.weights.smoother_weight {
            let bias = self.weights.smoother_bias.as_ref().map(|b| b.view());
            y = grouped_correlate_same(y.view(), w.view(), 1, bias)?;
        }

        let out = self.downsampler.apply(y)?;
        debug!(out_shape = ?out.shape(), "detector forward done");
        Ok(out)
    }
}
