//! Spectral estimation for learned temporal filters.
//!
//! Three spectra describe each feature of a trained envelope detector:
//!
//! - **filter**: magnitude of the DFT of the feature's temporal kernel,
//! - **input**: Welch power spectral density of the spatially unmixed signal,
//! - **output**: power spectrum after temporal filtering, `|H|² · S_in`.
//!
//! Their intermediate `|H| · S_in` is reported as the temporal pattern
//! spectrum. The chain up to the nonlinearity is linear and time invariant per
//! feature, which is what makes the product form valid.
//!
//! Both the DFT path and the Welch path report exactly `nfreq / 2` bins: the
//! DFT keeps bins strictly below half the transform length, and the Welch
//! estimate (with `nfreq / 2 + 1` one-sided bins) drops its final bin.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayView3, Axis};
use num_complex::Complex64;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, instrument};

use crate::error::{AnalysisError, Result};
use crate::filters::{unmix, FilterBank};

/// Window function types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowFunction {
    /// Rectangular (no windowing)
    Rectangular,
    /// Periodic Hann window, the usual choice for Welch averaging
    #[default]
    Hann,
    /// Periodic Hamming window
    Hamming,
}

/// Generate a periodic (DFT-even) window.
pub(crate) fn make_window(kind: WindowFunction, size: usize) -> Vec<f64> {
    let n = size as f64;
    match kind {
        WindowFunction::Rectangular => vec![1.0; size],
        WindowFunction::Hann => (0..size)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n).cos())
            .collect(),
        WindowFunction::Hamming => (0..size)
            .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / n).cos())
            .collect(),
    }
}

/// Configuration for Welch power spectral density estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelchConfig {
    /// Samples per segment. Segments do not overlap.
    pub nperseg: usize,
    /// Window applied to each segment.
    pub window: WindowFunction,
    /// Subtract the segment mean before windowing.
    pub detrend: bool,
}

impl WelchConfig {
    /// Hann-windowed, mean-detrended segments of `nperseg` samples.
    pub fn new(nperseg: usize) -> Self {
        Self {
            nperseg,
            window: WindowFunction::Hann,
            detrend: true,
        }
    }
}

/// Per-feature spectra of a trained filter bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSpectra {
    /// Frequency of each bin in Hz, `k · fs / nfreq`.
    pub freqs: Array1<f64>,
    /// Temporal filter magnitude response, (feature, bin).
    pub filter: Array2<f64>,
    /// PSD of the spatially unmixed input, (feature, bin).
    pub input: Array2<f64>,
    /// `filter · input`, (feature, bin).
    pub temporal_patterns: Array2<f64>,
    /// `temporal_patterns · filter = filter² · input`, (feature, bin).
    pub output: Array2<f64>,
}

impl FeatureSpectra {
    /// Number of frequency bins.
    pub fn nbins(&self) -> usize {
        self.freqs.len()
    }

    /// Index of the strongest output bin per feature.
    pub fn peak_bins(&self) -> Vec<usize> {
        self.output
            .outer_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                    .0
            })
            .collect()
    }
}

/// Frequencies `k · fs / nfreq` for `k in 0..nfreq / 2`.
pub fn frequency_bins(fs: f64, nfreq: usize) -> Array1<f64> {
    Array1::from_iter((0..nfreq / 2).map(|k| k as f64 * fs / nfreq as f64))
}

fn check_fs(fs: f64) -> Result<()> {
    if !(fs.is_finite() && fs > 0.0) {
        return Err(AnalysisError::configuration(format!("sampling rate must be positive, got {fs}")));
    }
    Ok(())
}

/// Magnitude response of each kernel on an `nfreq`-point DFT grid.
///
/// `kernels` is (feature, kernel_length). Returns the frequencies and a
/// (feature, nfreq / 2) magnitude matrix.
///
/// # Errors
///
/// [`AnalysisError::Configuration`] when `nfreq < 2` or a kernel is longer
/// than `nfreq` (it would be truncated by the transform).
pub fn filter_spectrum(kernels: ArrayView2<f64>, fs: f64, nfreq: usize) -> Result<(Array1<f64>, Array2<f64>)> {
    check_fs(fs)?;
    if nfreq < 2 {
        return Err(AnalysisError::configuration(format!("nfreq must be >= 2, got {nfreq}")));
    }
    let (nfeatures, klen) = kernels.dim();
    if klen > nfreq {
        return Err(AnalysisError::configuration(format!(
            "temporal kernel length {klen} exceeds nfreq {nfreq}"
        )));
    }

    let nbins = nfreq / 2;
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(nfreq);

    let mut magnitude = Array2::zeros((nfeatures, nbins));
    let mut buffer = vec![Complex64::new(0.0, 0.0); nfreq];
    for (kernel, mut row) in kernels.outer_iter().zip(magnitude.outer_iter_mut()) {
        buffer.fill(Complex64::new(0.0, 0.0));
        for (b, &w) in buffer.iter_mut().zip(kernel.iter()) {
            *b = Complex64::new(w, 0.0);
        }
        fft.process(&mut buffer);
        for (m, c) in row.iter_mut().zip(buffer.iter()) {
            *m = c.norm();
        }
    }

    Ok((frequency_bins(fs, nfreq), magnitude))
}

/// Welch power spectral density of each row of `series` (series, time).
///
/// Non-overlapping segments are detrended, windowed and transformed; the
/// one-sided density `|X|² / (fs · Σw²)` is doubled everywhere except DC and
/// (for even segment lengths) the Nyquist bin, then averaged over segments.
/// Trailing samples that do not fill a segment are ignored. Returns
/// `nperseg / 2 + 1` frequencies and a (series, nperseg / 2 + 1) matrix.
pub fn welch_psd(series: ArrayView2<f64>, fs: f64, config: &WelchConfig) -> Result<(Array1<f64>, Array2<f64>)> {
    check_fs(fs)?;
    let nperseg = config.nperseg;
    if nperseg < 2 {
        return Err(AnalysisError::configuration(format!("nperseg must be >= 2, got {nperseg}")));
    }
    let (nseries, ntimes) = series.dim();
    let nsegments = ntimes / nperseg;
    if nsegments == 0 {
        return Err(AnalysisError::configuration(format!(
            "signal length {ntimes} is shorter than one segment of {nperseg} samples"
        )));
    }

    let window = make_window(config.window, nperseg);
    let scale = 1.0 / (fs * window.iter().map(|w| w * w).sum::<f64>());
    let nbins = nperseg / 2 + 1;
    let nyquist_bin = (nperseg % 2 == 0).then_some(nperseg / 2);

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(nperseg);

    let mut psd = Array2::zeros((nseries, nbins));
    let mut buffer = vec![Complex64::new(0.0, 0.0); nperseg];
    for (row, mut out) in series.outer_iter().zip(psd.outer_iter_mut()) {
        for seg in 0..nsegments {
            let segment = row.slice(ndarray::s![seg * nperseg..(seg + 1) * nperseg]);
            let offset = if config.detrend {
                segment.mean().unwrap_or(0.0)
            } else {
                0.0
            };
            for ((b, &s), &w) in buffer.iter_mut().zip(segment.iter()).zip(window.iter()) {
                *b = Complex64::new((s - offset) * w, 0.0);
            }
            fft.process(&mut buffer);
            for (k, o) in out.iter_mut().enumerate() {
                let onesided = if k == 0 || Some(k) == nyquist_bin { 1.0 } else { 2.0 };
                *o += buffer[k].norm_sqr() * scale * onesided;
            }
        }
        out /= nsegments as f64;
    }

    let freqs = Array1::from_iter((0..nbins).map(|k| k as f64 * fs / nperseg as f64));
    Ok((freqs, psd))
}

/// Average Welch PSD of (batch, series, time) data, one row per series,
/// truncated to `nfreq / 2` bins.
fn batch_averaged_psd(x: ArrayView3<f64>, fs: f64, nfreq: usize) -> Result<Array2<f64>> {
    let (_, nseries, _) = x.dim();
    let config = WelchConfig::new(nfreq);
    let nbins = nfreq / 2;
    let mut out = Array2::zeros((nseries, nbins));
    for (s, mut row) in out.outer_iter_mut().enumerate() {
        let (_, psd) = welch_psd(x.index_axis(Axis(1), s), fs, &config)?;
        let mean = psd
            .mean_axis(Axis(0))
            .ok_or_else(|| AnalysisError::configuration("cannot average an empty batch"))?;
        if mean.len() != nbins + 1 {
            return Err(AnalysisError::configuration(format!(
                "Welch estimate has {} bins, expected {}",
                mean.len(),
                nbins + 1
            )));
        }
        row.assign(&mean.slice(ndarray::s![..nbins]));
    }
    Ok(out)
}

/// PSD of the spatially unmixed signal, (feature, nfreq / 2).
///
/// Each (batch, feature) series gets its own Welch estimate with
/// `nperseg = nfreq`; estimates are averaged over the batch and the final
/// bin is dropped to line up with [`filter_spectrum`].
pub fn input_spectrum(
    x: ArrayView3<f64>,
    spatial: ArrayView2<f64>,
    fs: f64,
    nfreq: usize,
) -> Result<(Array1<f64>, Array2<f64>)> {
    let unmixed = unmix(spatial, x)?;
    let psd = batch_averaged_psd(unmixed.view(), fs, nfreq)?;
    Ok((frequency_bins(fs, nfreq), psd))
}

/// PSD of every raw channel, (channel, nfreq / 2), on the same grid as
/// [`input_spectrum`].
pub fn channel_spectrum(x: ArrayView3<f64>, fs: f64, nfreq: usize) -> Result<(Array1<f64>, Array2<f64>)> {
    let psd = batch_averaged_psd(x, fs, nfreq)?;
    Ok((frequency_bins(fs, nfreq), psd))
}

/// Filter, input, temporal-pattern and output spectra of every feature.
///
/// # Errors
///
/// [`AnalysisError::Configuration`] when the two spectral paths disagree on
/// the bin count, the kernel is longer than `nfreq`, or the signal is shorter
/// than `nfreq`; [`AnalysisError::ShapeMismatch`] on a channel mismatch.
#[instrument(skip_all, fields(shape = ?x.shape(), fs = fs, nfreq = nfreq))]
pub fn feature_spectra(x: ArrayView3<f64>, bank: &FilterBank<'_>, fs: f64, nfreq: usize) -> Result<FeatureSpectra> {
    let (freqs, filter) = filter_spectrum(bank.kernels(), fs, nfreq)?;
    let (_, input) = input_spectrum(x, bank.spatial(), fs, nfreq)?;
    if filter.dim() != input.dim() {
        return Err(AnalysisError::configuration(format!(
            "filter spectrum is {:?} but input spectrum is {:?}",
            filter.dim(),
            input.dim()
        )));
    }

    let temporal_patterns = &filter * &input;
    let output = &temporal_patterns * &filter;
    debug!(nbins = freqs.len(), "feature spectra computed");

    Ok(FeatureSpectra {
        freqs,
        filter,
        input,
        temporal_patterns,
        output,
    })
}

/// Total power of a one-sided PSD (rectangle rule).
pub fn band_power(psd: ArrayView1<f64>, df: f64) -> f64 {
    psd.sum() * df
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, Array3};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    #[test]
    fn frequency_grid() {
        let f = frequency_bins(100.0, 10);
        assert_eq!(f.len(), 5);
        assert_abs_diff_eq!(f[1], 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(f[4], 40.0, epsilon = 1e-12);
        assert_eq!(frequency_bins(100.0, 11).len(), 5);
    }

    #[test]
    fn delta_kernel_has_flat_response() {
        let kernels = Array2::from_shape_vec((1, 3), vec![0.0, 1.0, 0.0]).unwrap();
        let (_, mag) = filter_spectrum(kernels.view(), 100.0, 16).unwrap();
        assert_eq!(mag.dim(), (1, 8));
        for &m in mag.iter() {
            assert_abs_diff_eq!(m, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn moving_average_response_at_dc() {
        let kernels = Array2::from_elem((1, 4), 0.25);
        let (_, mag) = filter_spectrum(kernels.view(), 100.0, 32).unwrap();
        assert_abs_diff_eq!(mag[[0, 0]], 1.0, epsilon = 1e-12);
        // First zero of a 4-tap average on a 32-point grid is at bin 8.
        assert_abs_diff_eq!(mag[[0, 8]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn kernel_longer_than_nfreq_is_rejected() {
        let kernels = Array2::<f64>::ones((1, 20));
        assert!(matches!(
            filter_spectrum(kernels.view(), 100.0, 16),
            Err(AnalysisError::Configuration(_))
        ));
    }

    #[test]
    fn welch_peak_at_tone() {
        let fs = 128.0;
        let tone = 16.0;
        let series = Array2::from_shape_fn((1, 1024), |(_, t)| (2.0 * PI * tone * t as f64 / fs).sin());
        let (freqs, psd) = welch_psd(series.view(), fs, &WelchConfig::new(128)).unwrap();
        assert_eq!(psd.dim(), (1, 65));
        let peak = psd
            .row(0)
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_abs_diff_eq!(freqs[peak], tone, epsilon = 1e-9);
    }

    #[test]
    fn welch_white_noise_integrates_to_variance() {
        let mut rng = StdRng::seed_from_u64(5);
        let fs = 200.0;
        let series = Array2::from_shape_fn((1, 200 * 64), |_| rng.sample::<f64, _>(StandardNormal));
        let (freqs, psd) = welch_psd(series.view(), fs, &WelchConfig::new(200)).unwrap();
        let df = freqs[1] - freqs[0];
        let power = band_power(psd.row(0), df);
        assert!((power - 1.0).abs() < 0.1, "power {power}");
    }

    #[test]
    fn welch_odd_segment_has_no_nyquist_bin() {
        let series = Array2::from_shape_fn((2, 99), |(s, t)| ((s + 1) * t) as f64 * 0.1);
        let (freqs, psd) = welch_psd(series.view(), 10.0, &WelchConfig::new(33)).unwrap();
        assert_eq!(freqs.len(), 17);
        assert_eq!(psd.dim(), (2, 17));
    }

    #[test]
    fn welch_short_signal_is_configuration_error() {
        let series = Array2::<f64>::zeros((1, 10));
        assert!(welch_psd(series.view(), 10.0, &WelchConfig::new(16)).is_err());
    }

    #[test]
    fn detrend_removes_offset() {
        let series = Array2::from_elem((1, 64), 3.0);
        let (_, psd) = welch_psd(series.view(), 10.0, &WelchConfig::new(32)).unwrap();
        assert!(psd.iter().all(|&v| v.abs() < 1e-20));
    }

    fn random_bank(nfeatures: usize, nchannels: usize, klen: usize) -> (Array2<f64>, Array3<f64>) {
        let spatial = Array2::from_shape_fn((nfeatures, nchannels), |(f, c)| ((f * 3 + c) as f64 * 0.9).sin());
        let temporal = Array3::from_shape_fn((nfeatures, 1, klen), |(f, _, k)| ((f + 2 * k) as f64 * 0.4).cos());
        (spatial, temporal)
    }

    #[test]
    fn odd_and_even_nfreq_give_matching_bins() {
        let mut rng = StdRng::seed_from_u64(17);
        let x = Array3::from_shape_fn((3, 4, 120), |_| rng.sample::<f64, _>(StandardNormal));
        let (spatial, temporal) = random_bank(2, 4, 7);
        let bank = FilterBank::new(spatial.view(), temporal.view()).unwrap();

        for nfreq in [31, 32, 59, 60] {
            let spectra = feature_spectra(x.view(), &bank, 100.0, nfreq).unwrap();
            assert_eq!(spectra.nbins(), nfreq / 2);
            assert_eq!(spectra.filter.dim(), (2, nfreq / 2));
            assert_eq!(spectra.input.dim(), (2, nfreq / 2));
            assert_eq!(spectra.output.dim(), (2, nfreq / 2));
        }
    }

    #[test]
    fn output_is_exactly_patterns_times_filter() {
        let mut rng = StdRng::seed_from_u64(23);
        let x = Array3::from_shape_fn((2, 3, 200), |_| rng.sample::<f64, _>(StandardNormal));
        let (spatial, temporal) = random_bank(3, 3, 9);
        let bank = FilterBank::new(spatial.view(), temporal.view()).unwrap();

        let spectra = feature_spectra(x.view(), &bank, 250.0, 50).unwrap();
        let expected = &spectra.temporal_patterns * &spectra.filter;
        assert_eq!(spectra.output, expected);
        assert_eq!(spectra.peak_bins().len(), 3);
    }

    #[test]
    fn signal_shorter_than_nfreq_is_rejected() {
        let x = Array3::<f64>::zeros((1, 2, 20));
        let (spatial, temporal) = random_bank(1, 2, 3);
        let bank = FilterBank::new(spatial.view(), temporal.view()).unwrap();
        assert!(matches!(
            feature_spectra(x.view(), &bank, 100.0, 32),
            Err(AnalysisError::Configuration(_))
        ));
    }

    #[test]
    fn channel_spectrum_shape() {
        let x = Array3::from_shape_fn((2, 5, 64), |(b, c, t)| ((b + c + t) as f64).sin());
        let (freqs, psd) = channel_spectrum(x.view(), 64.0, 32).unwrap();
        assert_eq!(freqs.len(), 16);
        assert_eq!(psd.dim(), (5, 16));
    }
}
