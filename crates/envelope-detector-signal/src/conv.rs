//! "Same"-length 1-D convolution.
//!
//! All routines compute a cross-correlation (the kernel is not flipped),
//! which is what learned convolution layers apply:
//!
//! ```text
//! out[t] = Σ_j w[j] · x[t - left + j·dilation]      (zero outside 0..T)
//! ```
//!
//! The total padding is `dilation · (L - 1)`; `left = total / 2` and the right
//! side receives the remainder, so an even-length kernel puts its extra
//! padding after the signal. Output length always equals input length.

use ndarray::{Array1, Array3, ArrayView1, ArrayView2, ArrayView3, ArrayViewMut1, Axis, Zip};

use crate::error::{AnalysisError, Result};

/// Left and right padding of a "same" convolution.
pub fn same_padding(kernel_len: usize, dilation: usize) -> (usize, usize) {
    let total = dilation * kernel_len.saturating_sub(1);
    let left = total / 2;
    (left, total - left)
}

fn check_kernel(kernel_len: usize, dilation: usize) -> Result<()> {
    if kernel_len == 0 {
        return Err(AnalysisError::configuration("convolution kernel is empty"));
    }
    if dilation == 0 {
        return Err(AnalysisError::configuration("convolution dilation must be >= 1"));
    }
    Ok(())
}

fn correlate_slice(x: &[f64], kernel: &[f64], dilation: usize, out: &mut [f64]) {
    let n = x.len();
    let (left, _) = same_padding(kernel.len(), dilation);
    for (t, o) in out.iter_mut().enumerate() {
        let mut acc = 0.0;
        for (j, &w) in kernel.iter().enumerate() {
            let pos = t + j * dilation;
            if pos < left {
                continue;
            }
            let idx = pos - left;
            if idx >= n {
                break;
            }
            acc += w * x[idx];
        }
        *o = acc;
    }
}

fn correlate_lane(x: ArrayView1<f64>, kernel: &[f64], dilation: usize, mut out: ArrayViewMut1<f64>) {
    let owned_x;
    let xs = match x.as_slice() {
        Some(s) => s,
        None => {
            owned_x = x.to_vec();
            &owned_x
        }
    };
    match out.as_slice_mut() {
        Some(os) => correlate_slice(xs, kernel, dilation, os),
        None => {
            let mut buf = vec![0.0; xs.len()];
            correlate_slice(xs, kernel, dilation, &mut buf);
            for (o, v) in out.iter_mut().zip(buf) {
                *o = v;
            }
        }
    }
}

/// Same-length cross-correlation of one series with one kernel.
pub fn correlate_same(x: ArrayView1<f64>, kernel: ArrayView1<f64>, dilation: usize) -> Result<Array1<f64>> {
    check_kernel(kernel.len(), dilation)?;
    let kernel = kernel.to_vec();
    let mut out = Array1::zeros(x.len());
    correlate_lane(x, &kernel, dilation, out.view_mut());
    Ok(out)
}

/// Filter every (batch, channel) series of `x` with the same kernel.
///
/// This is the channel-broadcast form used to temporally filter a raw
/// multichannel signal with one feature's kernel.
pub fn filter_channels(x: ArrayView3<f64>, kernel: ArrayView1<f64>) -> Result<Array3<f64>> {
    check_kernel(kernel.len(), 1)?;
    let kernel = kernel.to_vec();
    let mut out = Array3::zeros(x.raw_dim());
    Zip::from(out.lanes_mut(Axis(2)))
        .and(x.lanes(Axis(2)))
        .for_each(|o, i| correlate_lane(i, &kernel, 1, o));
    Ok(out)
}

/// Grouped (depthwise) convolution: group `g` of `x` (batch, group, time)
/// is filtered with row `g` of `kernels` (group, kernel_len), plus an
/// optional per-group bias.
pub fn grouped_correlate_same(
    x: ArrayView3<f64>,
    kernels: ArrayView2<f64>,
    dilation: usize,
    bias: Option<ArrayView1<f64>>,
) -> Result<Array3<f64>> {
    let (_, ngroups, _) = x.dim();
    if kernels.nrows() != ngroups {
        return Err(AnalysisError::shape_mismatch(
            "grouped kernels",
            vec![ngroups, kernels.ncols()],
            kernels.shape(),
        ));
    }
    if let Some(b) = &bias {
        if b.len() != ngroups {
            return Err(AnalysisError::shape_mismatch("grouped bias", vec![ngroups], b.shape()));
        }
    }
    check_kernel(kernels.ncols(), dilation)?;

    let kernels: Vec<Vec<f64>> = kernels.outer_iter().map(|k| k.to_vec()).collect();
    let mut out = Array3::zeros(x.raw_dim());
    for (sample, mut out_sample) in x.outer_iter().zip(out.outer_iter_mut()) {
        for (g, (series, out_series)) in sample.outer_iter().zip(out_sample.outer_iter_mut()).enumerate() {
            correlate_lane(series, &kernels[g], dilation, out_series);
        }
        if let Some(b) = &bias {
            for (mut series, &bg) in out_sample.outer_iter_mut().zip(b.iter()) {
                series += bg;
            }
        }
    }
    Ok(out)
}
