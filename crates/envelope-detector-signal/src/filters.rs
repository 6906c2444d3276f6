//! Read-only view over a trained model's spatial and temporal filters.

use ndarray::{s, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};

use crate::error::{AnalysisError, Result};

/// Spatial filter (feature, channel) paired with a temporal filter
/// (feature, 1, kernel_length), validated once on construction.
#[derive(Debug, Clone, Copy)]
pub struct FilterBank<'a> {
    spatial: ArrayView2<'a, f64>,
    temporal: ArrayView3<'a, f64>,
}

impl<'a> FilterBank<'a> {
    /// Pair the two filters.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::ShapeMismatch`] when the temporal filter's middle axis
    /// is not 1, when the feature counts differ, or when any axis is empty.
    pub fn new(spatial: ArrayView2<'a, f64>, temporal: ArrayView3<'a, f64>) -> Result<Self> {
        let (nfeatures, nchannels) = spatial.dim();
        if nfeatures == 0 || nchannels == 0 {
            return Err(AnalysisError::shape_mismatch(
                "spatial filter",
                vec![usize::MAX, usize::MAX],
                spatial.shape(),
            ));
        }
        let (tf, depth, klen) = temporal.dim();
        if tf != nfeatures || depth != 1 || klen == 0 {
            return Err(AnalysisError::shape_mismatch(
                "temporal filter",
                vec![nfeatures, 1, klen.max(1)],
                temporal.shape(),
            ));
        }
        Ok(Self { spatial, temporal })
    }

    /// Number of learned features.
    pub fn nfeatures(&self) -> usize {
        self.spatial.nrows()
    }

    /// Number of input channels.
    pub fn nchannels(&self) -> usize {
        self.spatial.ncols()
    }

    /// Temporal kernel length.
    pub fn kernel_len(&self) -> usize {
        self.temporal.len_of(Axis(2))
    }

    /// The (feature, channel) spatial filter.
    pub fn spatial(&self) -> ArrayView2<'a, f64> {
        self.spatial
    }

    /// Row `f` of the spatial filter.
    pub fn spatial_row(&self, f: usize) -> ArrayView1<'a, f64> {
        self.spatial.index_axis_move(Axis(0), f)
    }

    /// The kernels as a (feature, kernel_length) matrix.
    pub fn kernels(&self) -> ArrayView2<'a, f64> {
        self.temporal.index_axis_move(Axis(1), 0)
    }

    /// Kernel of feature `f`.
    pub fn kernel(&self, f: usize) -> ArrayView1<'a, f64> {
        self.temporal.slice_move(s![f, 0, ..])
    }

    /// Check that `x` is (batch, channel, time) with the filter's channel count.
    pub fn check_signal(&self, x: &ArrayView3<f64>) -> Result<()> {
        let (_, nchannels, _) = x.dim();
        if nchannels != self.nchannels() {
            return Err(AnalysisError::shape_mismatch(
                "signal",
                vec![usize::MAX, self.nchannels(), usize::MAX],
                x.shape(),
            ));
        }
        Ok(())
    }

    /// Apply the spatial filter: (batch, channel, time) → (batch, feature, time).
    pub fn unmix(&self, x: ArrayView3<f64>) -> Result<Array3<f64>> {
        unmix(self.spatial, x)
    }
}

/// Project every batch element of `x` (batch, channel, time) through a
/// (feature, channel) spatial filter.
pub fn unmix(spatial: ArrayView2<f64>, x: ArrayView3<f64>) -> Result<Array3<f64>> {
    let (nbatch, nchannels, ntimes) = x.dim();
    if nchannels != spatial.ncols() {
        return Err(AnalysisError::shape_mismatch(
            "signal",
            vec![usize::MAX, spatial.ncols(), usize::MAX],
            x.shape(),
        ));
    }
    let mut out = Array3::zeros((nbatch, spatial.nrows(), ntimes));
    for (sample, mut slot) in x.outer_iter().zip(out.outer_iter_mut()) {
        slot.assign(&spatial.dot(&sample));
    }
    Ok(out)
}
