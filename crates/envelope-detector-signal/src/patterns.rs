//! Spatial pattern construction.
//!
//! A spatial filter row tells how channels are *combined* into a feature; the
//! matching spatial pattern tells how that feature is *expressed* across the
//! channels. For feature `f` the pattern is the covariance of the signal after
//! it has gone through the feature's temporal kernel, projected on the
//! spatial filter row:
//!
//! ```text
//! pattern_f = Cov(h_f ⋆ x) · w_f
//! ```
//!
//! The covariance pools every batch element and time step into one
//! (channel, channel) matrix per feature. With `nbatch > 1` the batch axis is
//! processed in chunks and the covariance accumulated with
//! [`CovarianceAccumulator`], so the filtered copy of the whole signal is
//! never held in memory at once. A single recording is split along time
//! instead; each segment is filtered together with the neighbouring samples
//! the kernel reaches into, so the chunked result matches the single pass.

use ndarray::{s, Array2, Array3, ArrayView1, ArrayView3, Axis};
use tracing::{debug, instrument};

use crate::conv::{filter_channels, same_padding};
use crate::covariance::{covariance, CovarianceAccumulator};
use crate::error::{AnalysisError, Result};
use crate::filters::FilterBank;

/// Flatten (batch, channel, time) into (channel, batch·time).
fn pool_batches(x: Array3<f64>) -> Result<Array2<f64>> {
    let (nbatch, nchannels, ntimes) = x.dim();
    let permuted = x.permuted_axes([1, 0, 2]);
    let contiguous = permuted.as_standard_layout().into_owned();
    contiguous
        .into_shape((nchannels, nbatch * ntimes))
        .map_err(|e| AnalysisError::configuration(format!("cannot pool batches: {e}")))
}

/// Number of batch elements per chunk when the batch axis is split `nbatch` ways.
pub fn chunk_len(batch: usize, nbatch: usize) -> usize {
    let nbatch = nbatch.clamp(1, batch.max(1));
    (batch + nbatch - 1) / nbatch
}

/// Unbiased covariance of `x` filtered with `kernel`, pooled over batch and time.
fn filtered_covariance(x: ArrayView3<f64>, kernel: ArrayView1<f64>, nbatch: usize) -> Result<Array2<f64>> {
    let (batch, nchannels, ntimes) = x.dim();
    if nbatch <= 1 || batch == 0 || (batch == 1 && ntimes <= 1) {
        let pooled = pool_batches(filter_channels(x, kernel)?)?;
        return covariance(pooled.view(), true, None);
    }
    if batch == 1 {
        return time_chunked_covariance(x, kernel, nbatch);
    }

    let mut acc = CovarianceAccumulator::new(nchannels);
    for chunk in x.axis_chunks_iter(Axis(0), chunk_len(batch, nbatch)) {
        let pooled = pool_batches(filter_channels(chunk, kernel)?)?;
        acc.update(pooled.view())?;
    }
    acc.finish(true)
}

/// Covariance of one filtered recording accumulated over `nbatch` time segments.
fn time_chunked_covariance(x: ArrayView3<f64>, kernel: ArrayView1<f64>, nbatch: usize) -> Result<Array2<f64>> {
    let (_, nchannels, ntimes) = x.dim();
    let (left, right) = same_padding(kernel.len(), 1);
    let seg_len = chunk_len(ntimes, nbatch);

    let mut acc = CovarianceAccumulator::new(nchannels);
    let mut start = 0;
    while start < ntimes {
        let stop = (start + seg_len).min(ntimes);
        let lo = start.saturating_sub(left);
        let hi = (stop + right).min(ntimes);
        let filtered = filter_channels(x.slice(s![.., .., lo..hi]), kernel)?;
        let own = filtered.slice(s![.., .., start - lo..stop - lo]).to_owned();
        acc.update(pool_batches(own)?.view())?;
        start = stop;
    }
    debug!(segments = (ntimes + seg_len - 1) / seg_len, "time-chunked covariance");
    acc.finish(true)
}

/// Spatial activation patterns, one row per feature.
///
/// `x` is (batch, channel, time); a single (channel, time) recording can be
/// passed as `x.insert_axis(Axis(0))`. Returns a (feature, channel) matrix.
///
/// # Errors
///
/// - [`AnalysisError::ShapeMismatch`] when the signal's channel count differs
///   from the spatial filter's.
/// - [`AnalysisError::Configuration`] when `nbatch == 0`.
/// - [`AnalysisError::DegenerateInput`] when fewer than two samples are pooled.
#[instrument(skip_all, fields(shape = ?x.shape(), nbatch = nbatch))]
pub fn spatial_patterns(x: ArrayView3<f64>, bank: &FilterBank<'_>, nbatch: usize) -> Result<Array2<f64>> {
    bank.check_signal(&x)?;
    if nbatch == 0 {
        return Err(AnalysisError::configuration("nbatch must be >= 1"));
    }

    let mut patterns = Array2::zeros((bank.nfeatures(), bank.nchannels()));
    for (f, mut row) in patterns.outer_iter_mut().enumerate() {
        let cov = filtered_covariance(x, bank.kernel(f), nbatch)?;
        row.assign(&cov.dot(&bank.spatial_row(f)));
        debug!(feature = f, "spatial pattern computed");
    }
    Ok(patterns)
}
