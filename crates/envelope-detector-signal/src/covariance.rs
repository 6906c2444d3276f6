//! Signal covariance estimation.
//!
//! Computes the empirical channel covariance of a multichannel signal laid
//! out as (channel, time), either in a single pass or incrementally with a
//! [`CovarianceAccumulator`] that merges per-chunk statistics with Chan's
//! parallel update. The streaming form lets callers bound peak memory without
//! changing the result beyond floating-point rounding.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use tracing::trace;

use crate::error::{AnalysisError, Result};

/// Normalization denominator for `samples` observations.
fn denominator(samples: usize, unbiased: bool) -> Result<f64> {
    let ddof = usize::from(unbiased);
    if samples <= ddof || samples == 0 {
        return Err(AnalysisError::DegenerateInput { samples, unbiased });
    }
    Ok((samples - ddof) as f64)
}

/// Covariance of a (channel, time) signal.
///
/// The signal is centered along time with its own mean, or with `mean` when
/// one is supplied (length = channel count), and normalized by `T - 1` when
/// `unbiased` is set, `T` otherwise.
///
/// # Errors
///
/// - [`AnalysisError::DegenerateInput`] when `T == 0`, or `T == 1` with `unbiased`.
/// - [`AnalysisError::ShapeMismatch`] when `mean` has the wrong length.
pub fn covariance(
    x: ArrayView2<f64>,
    unbiased: bool,
    mean: Option<ArrayView1<f64>>,
) -> Result<Array2<f64>> {
    let (nchannels, ntimes) = x.dim();
    let denom = denominator(ntimes, unbiased)?;

    let centered = match mean {
        Some(m) => {
            if m.len() != nchannels {
                return Err(AnalysisError::shape_mismatch("mean", vec![nchannels], m.shape()));
            }
            &x - &m.insert_axis(Axis(1))
        }
        None => {
            let m = x
                .mean_axis(Axis(1))
                .ok_or(AnalysisError::DegenerateInput { samples: ntimes, unbiased })?;
            &x - &m.insert_axis(Axis(1))
        }
    };

    Ok(centered.dot(&centered.t()) / denom)
}

/// Covariance of every element of a (batch, channel, time) signal.
///
/// Batch elements are processed independently and never pooled; the result
/// has shape (batch, channel, channel). An external `mean` must have shape
/// (batch, channel).
pub fn batched_covariance(
    x: ArrayView3<f64>,
    unbiased: bool,
    mean: Option<ArrayView2<f64>>,
) -> Result<Array3<f64>> {
    let (nbatch, nchannels, _) = x.dim();
    if let Some(m) = &mean {
        if m.dim() != (nbatch, nchannels) {
            return Err(AnalysisError::shape_mismatch(
                "mean",
                vec![nbatch, nchannels],
                m.shape(),
            ));
        }
    }

    let mut out = Array3::zeros((nbatch, nchannels, nchannels));
    for (b, (sample, mut slot)) in x
        .axis_iter(Axis(0))
        .zip(out.axis_iter_mut(Axis(0)))
        .enumerate()
    {
        let sample_mean = mean.as_ref().map(|m| m.row(b));
        slot.assign(&covariance(sample, unbiased, sample_mean)?);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Streaming accumulator
// ---------------------------------------------------------------------------

/// Running (count, mean, M2) statistics for chunked covariance estimation.
///
/// `M2` is the sum of outer products of mean-centered samples. Chunks are
/// merged with Chan's parallel combination
/// `M2 = M2_a + M2_b + δδᵀ · n_a·n_b / n`, which keeps the biased partial
/// moments of each chunk and rescales the mean correction by chunk sizes.
#[derive(Debug, Clone)]
pub struct CovarianceAccumulator {
    count: usize,
    mean: Array1<f64>,
    m2: Array2<f64>,
}

impl CovarianceAccumulator {
    /// Empty accumulator for `nchannels` channels.
    pub fn new(nchannels: usize) -> Self {
        Self {
            count: 0,
            mean: Array1::zeros(nchannels),
            m2: Array2::zeros((nchannels, nchannels)),
        }
    }

    /// Number of channels.
    pub fn nchannels(&self) -> usize {
        self.mean.len()
    }

    /// Number of samples folded in so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Running mean per channel.
    pub fn mean(&self) -> ArrayView1<'_, f64> {
        self.mean.view()
    }

    /// Fold a (channel, time) chunk into the running statistics.
    ///
    /// Empty chunks are ignored.
    pub fn update(&mut self, chunk: ArrayView2<f64>) -> Result<()> {
        let (nchannels, n) = chunk.dim();
        if nchannels != self.nchannels() {
            return Err(AnalysisError::shape_mismatch(
                "covariance chunk",
                vec![self.nchannels(), usize::MAX],
                chunk.shape(),
            ));
        }
        let Some(chunk_mean) = chunk.mean_axis(Axis(1)) else {
            return Ok(());
        };
        let centered = &chunk - &chunk_mean.view().insert_axis(Axis(1));
        let chunk_m2 = centered.dot(&centered.t());
        trace!(samples = n, total = self.count + n, "covariance chunk folded");
        self.combine(n, chunk_mean, chunk_m2);
        Ok(())
    }

    /// Merge another accumulator into this one.
    pub fn merge(&mut self, other: &CovarianceAccumulator) -> Result<()> {
        if other.nchannels() != self.nchannels() {
            return Err(AnalysisError::shape_mismatch(
                "covariance accumulator",
                vec![self.nchannels()],
                &[other.nchannels()],
            ));
        }
        if other.count > 0 {
            self.combine(other.count, other.mean.clone(), other.m2.clone());
        }
        Ok(())
    }

    fn combine(&mut self, n_b: usize, mean_b: Array1<f64>, m2_b: Array2<f64>) {
        if self.count == 0 {
            self.count = n_b;
            self.mean = mean_b;
            self.m2 = m2_b;
            return;
        }
        let n_a = self.count as f64;
        let n_bf = n_b as f64;
        let n = n_a + n_bf;

        let delta = &mean_b - &self.mean;
        let outer = delta
            .view()
            .insert_axis(Axis(1))
            .dot(&delta.view().insert_axis(Axis(0)));

        self.mean = &self.mean + &(&delta * (n_bf / n));
        self.m2 = &self.m2 + &m2_b + &(outer * (n_a * n_bf / n));
        self.count += n_b;
    }

    /// Final covariance, normalized by `count - 1` (unbiased) or `count`.
    pub fn finish(&self, unbiased: bool) -> Result<Array2<f64>> {
        let denom = denominator(self.count, unbiased)?;
        Ok(&self.m2 / denom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, s, Array2};
    use proptest::prelude::*;

    #[test]
    fn known_two_channel_covariance() {
        let x = array![[1.0, 2.0, 3.0, 4.0], [2.0, 4.0, 6.0, 8.0]];
        let cov = covariance(x.view(), true, None).unwrap();
        // var([1,2,3,4]) = 5/3 with ddof = 1
        assert_abs_diff_eq!(cov[[0, 0]], 5.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[0, 1]], 10.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[1, 0]], 10.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[1, 1]], 20.0 / 3.0, epsilon = 1e-12);

        let biased = covariance(x.view(), false, None).unwrap();
        assert_abs_diff_eq!(biased[[0, 0]], 5.0 / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn single_sample_unbiased_is_degenerate() {
        let x = array![[1.0], [2.0]];
        assert!(matches!(
            covariance(x.view(), true, None),
            Err(AnalysisError::DegenerateInput { samples: 1, unbiased: true })
        ));
    }

    #[test]
    fn single_sample_biased_is_zero() {
        let x = array![[1.0], [2.0]];
        let cov = covariance(x.view(), false, None).unwrap();
        assert!(cov.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn empty_signal_is_degenerate() {
        let x = Array2::<f64>::zeros((3, 0));
        assert!(covariance(x.view(), false, None).is_err());
        assert!(covariance(x.view(), true, None).is_err());
    }

    #[test]
    fn external_mean_is_used_for_centering() {
        let x = array![[1.0, 3.0], [0.0, 0.0]];
        let zero = array![0.0, 0.0];
        let cov = covariance(x.view(), false, Some(zero.view())).unwrap();
        // Second moment about zero: (1 + 9) / 2
        assert_abs_diff_eq!(cov[[0, 0]], 5.0, epsilon = 1e-12);
        let own = covariance(x.view(), false, None).unwrap();
        assert_abs_diff_eq!(own[[0, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn external_mean_wrong_length() {
        let x = array![[1.0, 3.0], [0.0, 0.0]];
        let m = array![0.0];
        assert!(matches!(
            covariance(x.view(), false, Some(m.view())),
            Err(AnalysisError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn batched_elements_are_not_pooled() {
        let mut x = ndarray::Array3::<f64>::zeros((2, 1, 4));
        x.slice_mut(s![0, 0, ..]).assign(&array![1.0, -1.0, 1.0, -1.0]);
        x.slice_mut(s![1, 0, ..]).assign(&array![10.0, 10.0, 10.0, 10.0]);

        let cov = batched_covariance(x.view(), false, None).unwrap();
        assert_eq!(cov.dim(), (2, 1, 1));
        assert_abs_diff_eq!(cov[[0, 0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[1, 0, 0]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn accumulator_merge_is_order_independent() {
        let x = Array2::from_shape_fn((3, 40), |(c, t)| ((c * 7 + t * 3) as f64 * 0.37).sin());
        let mut a = CovarianceAccumulator::new(3);
        a.update(x.slice(s![.., ..15])).unwrap();
        let mut b = CovarianceAccumulator::new(3);
        b.update(x.slice(s![.., 15..])).unwrap();

        let mut ab = a.clone();
        ab.merge(&b).unwrap();
        let mut ba = b.clone();
        ba.merge(&a).unwrap();

        let lhs = ab.finish(true).unwrap();
        let rhs = ba.finish(true).unwrap();
        for (l, r) in lhs.iter().zip(rhs.iter()) {
            assert_abs_diff_eq!(*l, *r, epsilon = 1e-12);
        }
        assert_eq!(ab.count(), 40);
    }

    #[test]
    fn accumulator_rejects_wrong_channel_count() {
        let mut acc = CovarianceAccumulator::new(3);
        let x = Array2::<f64>::zeros((2, 5));
        assert!(acc.update(x.view()).is_err());
    }

    #[test]
    fn empty_accumulator_is_degenerate() {
        let acc = CovarianceAccumulator::new(2);
        assert!(acc.finish(false).is_err());
    }

    proptest! {
        #[test]
        fn prop_chunked_matches_single_pass(
            values in proptest::collection::vec(-10.0f64..10.0, 3 * 60),
            split_a in 1usize..30,
            split_b in 30usize..59,
            unbiased in any::<bool>(),
        ) {
            let x = Array2::from_shape_vec((3, 60), values).unwrap();
            let full = covariance(x.view(), unbiased, None).unwrap();

            let mut acc = CovarianceAccumulator::new(3);
            acc.update(x.slice(s![.., ..split_a])).unwrap();
            acc.update(x.slice(s![.., split_a..split_b])).unwrap();
            acc.update(x.slice(s![.., split_b..])).unwrap();
            let chunked = acc.finish(unbiased).unwrap();

            let scale = full.iter().fold(0.0f64, |m, v| m.max(v.abs())).max(1e-12);
            for (f, c) in full.iter().zip(chunked.iter()) {
                prop_assert!((f - c).abs() <= 1e-3 * scale, "full={f} chunked={c}");
            }
        }
    }
}
