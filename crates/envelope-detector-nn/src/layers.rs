//! Inference-mode building blocks of the envelope detector.
//!
//! Every layer maps a (batch, feature, time) array to another one and treats
//! batch elements independently, so splitting a dataset into sub-batches
//! never changes the output.

use ndarray::{Array1, Array2, Array3, ArrayView1, Axis, Zip};
use num_complex::Complex64;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::config::{ActivationType, DownsampleMethod, EnvelopeDetectorConfig};
use crate::error::{NnError, NnResult};

// ---------------------------------------------------------------------------
// Batch normalization
// ---------------------------------------------------------------------------

/// Frozen running statistics of a non-affine batch norm layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchNormStats {
    /// Per-feature running mean
    pub running_mean: Array1<f64>,
    /// Per-feature running variance
    pub running_var: Array1<f64>,
}

impl BatchNormStats {
    /// Statistics of a freshly initialized layer (mean 0, variance 1).
    pub fn identity(nfeatures: usize) -> Self {
        Self {
            running_mean: Array1::zeros(nfeatures),
            running_var: Array1::ones(nfeatures),
        }
    }

    /// Number of normalized features.
    pub fn len(&self) -> usize {
        self.running_mean.len()
    }

    /// True when the layer normalizes no features.
    pub fn is_empty(&self) -> bool {
        self.running_mean.is_empty()
    }

    /// Check the layer size and that every `running_var + eps` is a finite,
    /// positive divisor.
    pub(crate) fn check(&self, context: &'static str, nfeatures: usize, eps: f64) -> NnResult<()> {
        if self.running_mean.len() != nfeatures || self.running_var.len() != nfeatures {
            return Err(NnError::shape_mismatch(
                context,
                vec![nfeatures],
                &[self.running_mean.len().max(self.running_var.len())],
            ));
        }
        if self.running_var.iter().any(|&v| !(v >= 0.0)) {
            return Err(NnError::invalid_config(context, "running variance must be non-negative"));
        }
        if self.running_mean.iter().any(|m| !m.is_finite()) {
            return Err(NnError::invalid_config(context, "running mean must be finite"));
        }
        if let Some(v) = self.running_var.iter().find(|&&v| !((v + eps).is_finite() && v + eps > 0.0)) {
            return Err(NnError::invalid_config(
                context,
                format!("running variance {v} plus eps {eps} is not a positive finite divisor"),
            ));
        }
        Ok(())
    }

    /// `(x - running_mean) / sqrt(running_var + eps)` over the feature axis.
    pub fn apply(&self, x: &mut Array3<f64>, eps: f64) {
        for mut sample in x.outer_iter_mut() {
            for ((mut lane, &mean), &var) in sample
                .outer_iter_mut()
                .zip(self.running_mean.iter())
                .zip(self.running_var.iter())
            {
                let inv_std = 1.0 / (var + eps).sqrt();
                lane.mapv_inplace(|v| (v - mean) * inv_std);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Activation
// ---------------------------------------------------------------------------

/// Magnitude of the analytic signal of one series.
///
/// The spectrum is multiplied by the Hilbert step (1 at DC and, for even
/// lengths, at Nyquist; 2 on positive frequencies; 0 on negative ones) and
/// transformed back.
pub fn hilbert_amplitude(x: ArrayView1<f64>) -> Array1<f64> {
    let n = x.len();
    if n == 0 {
        return Array1::zeros(0);
    }
    let mut planner = FftPlanner::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut buffer: Vec<Complex64> = x.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    forward.process(&mut buffer);
    for (k, c) in buffer.iter_mut().enumerate() {
        let h = if k == 0 || (n % 2 == 0 && k == n / 2) {
            1.0
        } else if k < (n + 1) / 2 {
            2.0
        } else {
            0.0
        };
        *c *= h;
    }
    inverse.process(&mut buffer);

    // rustfft leaves the inverse unnormalized.
    let scale = 1.0 / n as f64;
    Array1::from_iter(buffer.iter().map(|c| c.norm() * scale))
}

/// Apply `kind` to every element (or, for the Hilbert amplitude, every lane).
pub fn activate(kind: ActivationType, mut x: Array3<f64>) -> Array3<f64> {
    match kind {
        ActivationType::Demodulation => {
            x.mapv_inplace(f64::abs);
            x
        }
        ActivationType::HilbertAmplitude => {
            Zip::from(x.lanes_mut(Axis(2))).for_each(|mut lane| {
                let amplitude = hilbert_amplitude(lane.view());
                lane.assign(&amplitude);
            });
            x
        }
        ActivationType::Identity => x,
    }
}

// ---------------------------------------------------------------------------
// Downsampling
// ---------------------------------------------------------------------------

const LOWPASS_FILTER_WIDTH: f64 = 6.0;
const ROLLOFF: f64 = 0.99;

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Polyphase windowed-sinc resampler between two integer rates.
///
/// The kernel bank holds one phase per output sample of a period; each phase
/// is a sinc low-pass at `rolloff · min(orig, new)` tapered by a squared
/// cosine (Hann) window spanning `LOWPASS_FILTER_WIDTH` zero crossings.
#[derive(Debug, Clone)]
pub struct SincResampler {
    orig: usize,
    new: usize,
    width: usize,
    kernels: Array2<f64>,
}

impl SincResampler {
    /// Resampler from `orig_freq` to `new_freq` Hz.
    pub fn new(orig_freq: usize, new_freq: usize) -> NnResult<Self> {
        if orig_freq == 0 || new_freq == 0 {
            return Err(NnError::invalid_config("fs_in", "resampling rates must be positive"));
        }
        let g = gcd(orig_freq, new_freq);
        let (orig, new) = (orig_freq / g, new_freq / g);

        let base = orig.min(new) as f64 * ROLLOFF;
        let width = (LOWPASS_FILTER_WIDTH * orig as f64 / base).ceil() as usize;
        let taps = 2 * width + orig;
        let scale = base / orig as f64;

        let kernels = Array2::from_shape_fn((new, taps), |(phase, l)| {
            let idx = (l as f64 - width as f64) / orig as f64;
            let t = ((idx - phase as f64 / new as f64) * base).clamp(-LOWPASS_FILTER_WIDTH, LOWPASS_FILTER_WIDTH);
            let window = (t * PI / LOWPASS_FILTER_WIDTH / 2.0).cos().powi(2);
            let arg = t * PI;
            let sinc = if arg == 0.0 { 1.0 } else { arg.sin() / arg };
            sinc * window * scale
        });

        Ok(Self {
            orig,
            new,
            width,
            kernels,
        })
    }

    /// Output length for an input of `len` samples, `ceil(new · len / orig)`.
    pub fn output_len(&self, len: usize) -> usize {
        (self.new * len + self.orig - 1) / self.orig
    }

    /// Resample one series.
    pub fn resample(&self, x: ArrayView1<f64>) -> Array1<f64> {
        let n = x.len();
        let taps = self.kernels.ncols();
        let mut padded = vec![0.0; n + 2 * self.width + self.orig];
        for (p, &v) in padded[self.width..self.width + n].iter_mut().zip(x.iter()) {
            *p = v;
        }

        let target = self.output_len(n);
        let mut out = Array1::zeros(target);
        for (i, o) in out.iter_mut().enumerate() {
            let (frame, phase) = (i / self.new, i % self.new);
            let start = frame * self.orig;
            let window = &padded[start..start + taps];
            *o = self
                .kernels
                .row(phase)
                .iter()
                .zip(window)
                .map(|(k, v)| k * v)
                .sum();
        }
        out
    }
}

/// Final rate-reduction stage.
#[derive(Debug, Clone)]
pub enum Downsampler {
    /// Pass-through
    Identity,
    /// Non-overlapping mean over `coef` samples, trailing remainder dropped
    AvgPool {
        /// Kernel size and stride
        coef: usize,
    },
    /// Windowed-sinc resampling
    Resample(SincResampler),
}

impl Downsampler {
    /// Build the stage described by `config`.
    pub fn from_config(config: &EnvelopeDetectorConfig) -> NnResult<Self> {
        if config.downsample_coef <= 1 {
            return Ok(Downsampler::Identity);
        }
        Ok(match config.downsample_method {
            DownsampleMethod::AvgPool => Downsampler::AvgPool {
                coef: config.downsample_coef,
            },
            DownsampleMethod::Resample => {
                Downsampler::Resample(SincResampler::new(config.fs_in, config.fs_in / config.downsample_coef)?)
            }
            DownsampleMethod::None => Downsampler::Identity,
        })
    }

    /// Output length for an input of `len` samples.
    pub fn output_len(&self, len: usize) -> usize {
        match self {
            Downsampler::Identity => len,
            Downsampler::AvgPool { coef } => len / coef,
            Downsampler::Resample(r) => r.output_len(len),
        }
    }

    /// Apply the stage along the time axis.
    pub fn apply(&self, x: Array3<f64>) -> NnResult<Array3<f64>> {
        let (nbatch, nfeatures, ntimes) = x.dim();
        match self {
            Downsampler::Identity => Ok(x),
            Downsampler::AvgPool { coef } => {
                if ntimes < *coef {
                    return Err(NnError::shape_mismatch(
                        "average pooling input",
                        vec![usize::MAX, nfeatures, *coef],
                        x.shape(),
                    ));
                }
                let out_len = ntimes / coef;
                let mut out = Array3::zeros((nbatch, nfeatures, out_len));
                Zip::from(out.lanes_mut(Axis(2)))
                    .and(x.lanes(Axis(2)))
                    .for_each(|mut o, lane| {
                        for (j, v) in o.iter_mut().enumerate() {
                            *v = lane.slice(ndarray::s![j * coef..(j + 1) * coef]).sum() / *coef as f64;
                        }
                    });
                Ok(out)
            }
            Downsampler::Resample(r) => {
                let mut out = Array3::zeros((nbatch, nfeatures, r.output_len(ntimes)));
                Zip::from(out.lanes_mut(Axis(2)))
                    .and(x.lanes(Axis(2)))
                    .for_each(|mut o, lane| o.assign(&r.resample(lane)));
                Ok(out)
            }
        }
    }
}
