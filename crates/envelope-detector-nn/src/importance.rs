//! Gradient-based feature importance.
//!
//! For every batch the detector output `z` is fed to the regressor head and
//! the (possibly higher-order) input gradient is taken. The importance of
//! feature `f` is `Σ |g[b, f, t]|` over all batches, batch elements and time
//! steps, accumulated with Neumaier compensated summation so that splitting
//! the dataset differently changes the result only by rounding.

use ndarray::{Array1, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, info, instrument, warn};

use envelope_detector_signal::{AnalysisConfig, Reduction};

use crate::detector::FilterModel;
use crate::error::{NnError, NnResult};
use crate::regressor::Regressor;

/// Running sum with Neumaier's error compensation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeumaierSum {
    sum: f64,
    compensation: f64,
}

impl NeumaierSum {
    /// Add one term.
    pub fn add(&mut self, value: f64) {
        let t = self.sum + value;
        if self.sum.abs() >= value.abs() {
            self.compensation += (self.sum - t) + value;
        } else {
            self.compensation += (value - t) + self.sum;
        }
        self.sum = t;
    }

    /// Compensated total.
    pub fn value(&self) -> f64 {
        self.sum + self.compensation
    }
}

/// Feature importance accumulated over a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportanceReport {
    /// Non-negative score per feature
    pub scores: Array1<f64>,
    /// Feature indices by decreasing score, ties broken by index
    pub order: Vec<usize>,
    /// Number of non-empty batches processed
    pub batches: usize,
    /// Number of batch elements processed
    pub samples: usize,
}

impl ImportanceReport {
    fn new(scores: Array1<f64>, batches: usize, samples: usize) -> Self {
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });
        Self {
            scores,
            order,
            batches,
            samples,
        }
    }

    /// Scores divided by their total (all zeros when the total is zero).
    pub fn normalized(&self) -> Array1<f64> {
        let total = self.scores.sum();
        if total > 0.0 {
            &self.scores / total
        } else {
            Array1::zeros(self.scores.len())
        }
    }

    /// Indices of the `k` most important features.
    pub fn top(&self, k: usize) -> &[usize] {
        &self.order[..k.min(self.order.len())]
    }
}

/// Scores features by the magnitude of the regressor's input gradient.
#[derive(Debug, Clone, Copy)]
pub struct GradientImportance {
    order: usize,
    reduction: Reduction,
}

impl Default for GradientImportance {
    fn default() -> Self {
        Self {
            order: 1,
            reduction: Reduction::Sum,
        }
    }
}

impl GradientImportance {
    /// Scorer for gradients of `order` under `reduction`.
    pub fn new(order: usize, reduction: Reduction) -> NnResult<Self> {
        if order == 0 {
            return Err(NnError::invalid_config("order", "gradient order must be >= 1"));
        }
        Ok(Self { order, reduction })
    }

    /// Scorer using `config.order` and `config.reduction`.
    pub fn from_config(config: &AnalysisConfig) -> NnResult<Self> {
        Self::new(config.order, config.reduction)
    }

    /// Order of the input derivative being scored.
    pub fn order(&self) -> usize {
        self.order
    }

    /// How the head output is reduced before differentiating.
    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    /// Accumulate importance over `batches`, each (batch, channel, time).
    ///
    /// Batches are processed in order; empty ones are skipped.
    ///
    /// # Errors
    ///
    /// - [`NnError::ShapeMismatch`] when the model and head disagree on the
    ///   feature count, or a batch has the wrong channel count.
    /// - [`NnError::NonDifferentiablePath`] when the head has no gradient of
    ///   the requested order.
    /// - [`NnError::EmptyDataset`] when no batch contains a sample.
    /// - [`NnError::NonFiniteScore`] when a feature's total is NaN or infinite.
    #[instrument(skip_all, fields(order = self.order, reduction = ?self.reduction))]
    pub fn score<'a, M, R, I>(&self, model: &M, regressor: &R, batches: I) -> NnResult<ImportanceReport>
    where
        M: FilterModel + ?Sized,
        R: Regressor + ?Sized,
        I: IntoIterator<Item = ArrayView3<'a, f64>>,
    {
        let nfeatures = model.nfeatures();
        if regressor.input_dim() != nfeatures {
            return Err(NnError::shape_mismatch(
                "regressor input",
                vec![nfeatures],
                &[regressor.input_dim()],
            ));
        }

        let mut sums = vec![NeumaierSum::default(); nfeatures];
        let mut nbatches = 0;
        let mut samples = 0;
        for x in batches {
            let batch = x.len_of(Axis(0));
            if batch == 0 {
                continue;
            }
            let z = model.forward(x)?;
            let grad = regressor.input_gradient(z.view(), self.order, self.reduction)?;
            for (f, acc) in sums.iter_mut().enumerate() {
                for &g in grad.index_axis(Axis(1), f).iter() {
                    acc.add(g.abs());
                }
            }
            nbatches += 1;
            samples += batch;
            debug!(batch = nbatches, samples, "importance batch accumulated");
        }

        if samples == 0 {
            return Err(NnError::EmptyDataset);
        }
        if self.reduction == Reduction::Mean && nbatches > 1 {
            warn!(batches = nbatches, "mean reduction scales each batch separately; scores depend on the split");
        }

        let scores = Array1::from_iter(sums.iter().map(NeumaierSum::value));
        if let Some(feature) = scores.iter().position(|s| !s.is_finite()) {
            return Err(NnError::NonFiniteScore { feature });
        }
        let report = ImportanceReport::new(scores, nbatches, samples);
        info!(batches = nbatches, samples, top = ?report.order.first(), "importance scored");
        Ok(report)
    }

    /// Split `x` along the batch axis into chunks of at most `chunk` elements
    /// and score them.
    pub fn score_chunked<M, R>(&self, model: &M, regressor: &R, x: ArrayView3<f64>, chunk: usize) -> NnResult<ImportanceReport>
    where
        M: FilterModel + ?Sized,
        R: Regressor + ?Sized,
    {
        if chunk == 0 {
            return Err(NnError::invalid_config("chunk", "must be >= 1"));
        }
        self.score(model, regressor, x.axis_chunks_iter(Axis(0), chunk))
    }
}
