//! Parametric temporal kernels.
//!
//! Instead of free taps, a feature's temporal kernel can be generated from a
//! centre frequency `f` and a bandwidth given relative to it, so the absolute
//! bandwidth is `bw = bandwidth · f`. Kernels are sampled on the grid
//!
//! ```text
//! t_j = (j - ⌈K/2⌉ + 1) / fs        j = 0..K
//! ```
//!
//! which is centred on sample `(K - 1) / 2` for odd `K` and therefore lines
//! up with the "same" convolution in [`crate::conv`]. Every generator returns
//! a (feature, 1, K) array that can be handed to [`crate::FilterBank`].
//!
//! | Kernel | Shape |
//! |--------|-------|
//! | [`sinc_bandpass`] | Hamming-windowed difference of two low-pass sincs |
//! | [`gabor_wavelet`] | cosine under a Gaussian whose spectrum has FWHM `bw` |
//! | [`morlet_wavelet`] | complex exponential under the same Gaussian |
//!
//! A band-pass kernel followed by the analytic-signal magnitude gives the
//! classic band-power envelope; the Morlet pair yields that envelope directly
//! through [`ComplexKernels::magnitude`].

use ndarray::{Array1, Array3, ArrayView3, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::f64::consts::{LN_2, PI};
use tracing::{debug, instrument};

use crate::conv::grouped_correlate_same;
use crate::error::{AnalysisError, Result};
use crate::spectrum::{make_window, WindowFunction};

/// Centre frequency and relative bandwidth of one feature's kernel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    /// Centre frequency in Hz
    pub freq: f64,
    /// Bandwidth as a fraction of `freq`, in (0, 2]
    pub bandwidth: f64,
}

impl Band {
    /// Band centred on `freq` Hz, `bandwidth · freq` Hz wide.
    pub fn new(freq: f64, bandwidth: f64) -> Self {
        Self { freq, bandwidth }
    }

    /// Absolute bandwidth in Hz.
    pub fn width(&self) -> f64 {
        self.bandwidth * self.freq
    }

    /// Lower and upper edges in Hz.
    pub fn edges(&self) -> (f64, f64) {
        let half = self.width() / 2.0;
        (self.freq - half, self.freq + half)
    }

    fn check(&self, fs: f64) -> Result<()> {
        let nyquist = fs / 2.0;
        if !(self.freq.is_finite() && self.freq > 0.0 && self.freq < nyquist) {
            return Err(AnalysisError::configuration(format!(
                "band frequency {} Hz must lie in (0, {nyquist}) Hz",
                self.freq
            )));
        }
        if !(self.bandwidth > 0.0 && self.bandwidth <= 2.0) {
            return Err(AnalysisError::configuration(format!(
                "relative bandwidth {} must lie in (0, 2]",
                self.bandwidth
            )));
        }
        Ok(())
    }

    /// Variance of the Gaussian envelope whose spectrum has FWHM `width()`.
    fn gaussian_variance(&self) -> f64 {
        2.0 * LN_2 / (self.width() * PI).powi(2)
    }
}

/// Sample times of a `kernel_len`-tap kernel at `fs` Hz.
pub fn kernel_times(kernel_len: usize, fs: f64) -> Array1<f64> {
    let first = 1 - ((kernel_len + 1) / 2) as isize;
    Array1::from_iter((0..kernel_len as isize).map(|j| (first + j) as f64 / fs))
}

fn check_grid(kernel_len: usize, fs: f64, bands: &[Band]) -> Result<()> {
    if kernel_len == 0 {
        return Err(AnalysisError::configuration("kernel length must be >= 1"));
    }
    if !(fs.is_finite() && fs > 0.0) {
        return Err(AnalysisError::configuration(format!("sampling rate must be positive, got {fs}")));
    }
    bands.iter().try_for_each(|b| b.check(fs))
}

/// Normalized sinc, `sin(πx) / (πx)`.
fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        let px = PI * x;
        px.sin() / px
    }
}

/// Fill a (feature, 1, K) array row by row from `row(band, t)`.
fn build<F>(bands: &[Band], times: &Array1<f64>, row: F) -> Array3<f64>
where
    F: Fn(&Band, f64) -> f64,
{
    let mut out = Array3::zeros((bands.len(), 1, times.len()));
    for (band, mut lane) in bands.iter().zip(out.outer_iter_mut()) {
        Zip::from(lane.row_mut(0)).and(times).for_each(|w, &t| *w = row(band, t));
    }
    out
}

/// Windowed-sinc band-pass kernels with unit pass-band gain.
///
/// ```text
/// h(t) = w_hamming · 2 (f_hi sinc(2 f_hi t) - f_lo sinc(2 f_lo t)) / fs
/// ```
///
/// The window is the periodic [`WindowFunction::Hamming`].
#[instrument(skip(bands), fields(nbands = bands.len()))]
pub fn sinc_bandpass(bands: &[Band], kernel_len: usize, fs: f64) -> Result<Array3<f64>> {
    check_grid(kernel_len, fs, bands)?;
    let times = kernel_times(kernel_len, fs);
    let window = Array1::from(make_window(WindowFunction::Hamming, kernel_len));
    let mut kernels = build(bands, &times, |band, t| {
        let (lo, hi) = band.edges();
        2.0 * (hi * sinc(2.0 * hi * t) - lo * sinc(2.0 * lo * t)) / fs
    });
    for mut row in kernels.lanes_mut(Axis(2)) {
        row *= &window;
    }
    debug!("sinc band-pass kernels generated");
    Ok(kernels)
}

/// Real Gaussian-windowed cosine kernels.
///
/// ```text
/// h(t) = (2πσ²)^(-1/2) / (fs / 2) · cos(2π f t) · exp(-t² / 2σ²)
/// σ²   = 2 ln 2 / (π bw)²
/// ```
///
/// The gain at `f` is close to one once the kernel spans the envelope.
#[instrument(skip(bands), fields(nbands = bands.len()))]
pub fn gabor_wavelet(bands: &[Band], kernel_len: usize, fs: f64) -> Result<Array3<f64>> {
    check_grid(kernel_len, fs, bands)?;
    let times = kernel_times(kernel_len, fs);
    Ok(build(bands, &times, |band, t| {
        let var = band.gaussian_variance();
        gaussian_scale(var, fs) * (2.0 * PI * band.freq * t).cos() * (-t * t / (2.0 * var)).exp()
    }))
}

fn gaussian_scale(var: f64, fs: f64) -> f64 {
    (2.0 * PI * var).sqrt().recip() / (fs / 2.0)
}

/// Real and imaginary taps of complex Morlet kernels, each (feature, 1, K).
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexKernels {
    /// In-phase taps
    pub real: Array3<f64>,
    /// Quadrature taps
    pub imag: Array3<f64>,
}

impl ComplexKernels {
    /// Number of kernels.
    pub fn nfeatures(&self) -> usize {
        self.real.len_of(Axis(0))
    }

    /// Filter each feature of `x` (batch, feature, time) with its own
    /// complex kernel and return the magnitude of the result.
    pub fn magnitude(&self, x: ArrayView3<f64>) -> Result<Array3<f64>> {
        let re = grouped_correlate_same(x, self.real.index_axis(Axis(1), 0), 1, None)?;
        let im = grouped_correlate_same(x, self.imag.index_axis(Axis(1), 0), 1, None)?;
        Ok(Zip::from(&re).and(&im).map_collect(|&a, &b| a.hypot(b)))
    }

    /// Filter each feature of `x` with the in-phase taps only.
    pub fn filtered(&self, x: ArrayView3<f64>) -> Result<Array3<f64>> {
        grouped_correlate_same(x, self.real.index_axis(Axis(1), 0), 1, None)
    }
}

/// Complex Morlet kernels with the admissibility correction.
///
/// ```text
/// h(t) = (2πσ²)^(-1/2) / (fs / 2) · (e^{i2π f t} - e^{-(2π f)² / 2}) · exp(-t² / 2σ²)
/// ```
#[instrument(skip(bands), fields(nbands = bands.len()))]
pub fn morlet_wavelet(bands: &[Band], kernel_len: usize, fs: f64) -> Result<ComplexKernels> {
    check_grid(kernel_len, fs, bands)?;
    let times = kernel_times(kernel_len, fs);
    let envelope = |band: &Band, t: f64| {
        let var = band.gaussian_variance();
        gaussian_scale(var, fs) * (-t * t / (2.0 * var)).exp()
    };
    let real = build(bands, &times, |band, t| {
        let omega = 2.0 * PI * band.freq;
        envelope(band, t) * ((omega * t).cos() - (-0.5 * omega * omega).exp())
    });
    let imag = build(bands, &times, |band, t| envelope(band, t) * (2.0 * PI * band.freq * t).sin());
    Ok(ComplexKernels { real, imag })
}
