//! One-call interpretation of a trained model.
//!
//! Runs the three analyses side by side on the same signal. They share only
//! their inputs; the patterns and spectra read the model's filters, the
//! importance scorer runs the model forward.

use ndarray::{Array2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use envelope_detector_signal::patterns::chunk_len;
use envelope_detector_signal::{feature_spectra, spatial_patterns, AnalysisConfig, FeatureSpectra, FilterBank};

use crate::detector::FilterModel;
use crate::error::NnResult;
use crate::importance::{GradientImportance, ImportanceReport};
use crate::regressor::Regressor;

/// Patterns, spectra and importance of every feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interpretation {
    /// Spatial activation patterns, (feature, channel)
    pub patterns: Array2<f64>,
    /// Filter, input, temporal-pattern and output spectra
    pub spectra: FeatureSpectra,
    /// Gradient importance
    pub importance: ImportanceReport,
}

/// Interpret `model` and `regressor` on `x` (batch, channel, time).
///
/// `config.nbatch` bounds the number of batch elements processed at once by
/// both the pattern and the importance computations.
#[instrument(skip_all, fields(shape = ?x.shape(), nbatch = config.nbatch))]
pub fn interpret<M, R>(model: &M, regressor: &R, x: ArrayView3<f64>, config: &AnalysisConfig) -> NnResult<Interpretation>
where
    M: FilterModel + ?Sized,
    R: Regressor + ?Sized,
{
    config.validate().map_err(envelope_detector_signal::AnalysisError::from)?;

    let spatial = model.spatial_filter();
    let temporal = model.temporal_filter();
    let bank = FilterBank::new(spatial.view(), temporal.view())?;

    let patterns = spatial_patterns(x, &bank, config.nbatch)?;
    let spectra = feature_spectra(x, &bank, config.fs, config.nfreq)?;

    let chunk = chunk_len(x.len_of(Axis(0)), config.nbatch).max(1);
    let importance = GradientImportance::from_config(config)?.score_chunked(model, regressor, x, chunk)?;

    info!(nfeatures = bank.nfeatures(), top = ?importance.order.first(), "interpretation complete");
    Ok(Interpretation {
        patterns,
        spectra,
        importance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvelopeDetectorConfig;
    use crate::detector::EnvelopeDetector;
    use crate::error::NnError;
    use crate::regressor::LinearRegressor;
    use ndarray::Array3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn shapes_follow_model_and_config() {
        let config = EnvelopeDetectorConfig::builder(5, 2).temporal_filter_size(5).downsample_coef(4).build();
        let mut rng = StdRng::seed_from_u64(4);
        let det = EnvelopeDetector::random(config, &mut rng).unwrap();
        let reg = LinearRegressor::random(2, 1, &mut rng).unwrap();
        let x = Array3::from_shape_fn((6, 5, 64), |(b, c, t)| ((b + 2 * c + 3 * t) as f64 * 0.19).cos());

        let analysis = AnalysisConfig::builder().fs(1000.0).nfreq(32).nbatch(3).build();
        let out = interpret(&det, &reg, x.view(), &analysis).unwrap();
        assert_eq!(out.patterns.dim(), (2, 5));
        assert_eq!(out.spectra.nbins(), 16);
        assert_eq!(out.importance.scores.len(), 2);
        assert_eq!(out.importance.batches, 3);
    }

    #[test]
    fn invalid_config_is_reported() {
        let det = EnvelopeDetector::random(EnvelopeDetectorConfig::new(2, 1), &mut StdRng::seed_from_u64(0)).unwrap();
        let reg = LinearRegressor::random(1, 1, &mut StdRng::seed_from_u64(1)).unwrap();
        let x = Array3::<f64>::zeros((1, 2, 64));
        let bad = AnalysisConfig::builder().nbatch(0).build();
        assert!(matches!(interpret(&det, &reg, x.view(), &bad), Err(NnError::Analysis(_))));
    }
}
