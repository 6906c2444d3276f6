//! Configuration-driven entry point for the signal-side analyses.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use tracing::info;

use crate::config::AnalysisConfig;
use crate::covariance::{batched_covariance, covariance};
use crate::error::Result;
use crate::filters::FilterBank;
use crate::patterns::spatial_patterns;
use crate::spectrum::{feature_spectra, FeatureSpectra};

/// Runs covariance, pattern and spectrum analyses with one validated
/// [`AnalysisConfig`].
#[derive(Debug, Clone)]
pub struct EnvelopeAnalysis {
    config: AnalysisConfig,
}

impl EnvelopeAnalysis {
    /// Validate `config` and wrap it.
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The validated configuration.
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Covariance of a single (channel, time) recording.
    pub fn covariance(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        covariance(x, self.config.unbiased, None)
    }

    /// Per-element covariance of a (batch, channel, time) signal.
    pub fn batched_covariance(&self, x: ArrayView3<f64>) -> Result<Array3<f64>> {
        batched_covariance(x, self.config.unbiased, None)
    }

    /// Spatial patterns of every feature, chunked over `config.nbatch`.
    pub fn patterns<'a>(
        &self,
        x: ArrayView3<f64>,
        spatial: ArrayView2<'a, f64>,
        temporal: ArrayView3<'a, f64>,
    ) -> Result<Array2<f64>> {
        let bank = FilterBank::new(spatial, temporal)?;
        info!(nfeatures = bank.nfeatures(), nchannels = bank.nchannels(), "computing spatial patterns");
        spatial_patterns(x, &bank, self.config.nbatch)
    }

    /// Patterns of a single (channel, time) recording.
    pub fn recording_patterns<'a>(
        &self,
        x: ArrayView2<f64>,
        spatial: ArrayView2<'a, f64>,
        temporal: ArrayView3<'a, f64>,
    ) -> Result<Array2<f64>> {
        self.patterns(x.insert_axis(Axis(0)), spatial, temporal)
    }

    /// Filter, input, temporal-pattern and output spectra of every feature.
    pub fn spectra<'a>(
        &self,
        x: ArrayView3<f64>,
        spatial: ArrayView2<'a, f64>,
        temporal: ArrayView3<'a, f64>,
    ) -> Result<FeatureSpectra> {
        let bank = FilterBank::new(spatial, temporal)?;
        info!(fs = self.config.fs, nfreq = self.config.nfreq, "computing feature spectra");
        feature_spectra(x, &bank, self.config.fs, self.config.nfreq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;
    use ndarray::{Array2, Array3};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    #[test]
    fn rejects_invalid_config() {
        let cfg = AnalysisConfig::builder().nfreq(1).build();
        assert!(matches!(EnvelopeAnalysis::new(cfg), Err(AnalysisError::InvalidConfig(_))));
    }

    #[test]
    fn recording_matches_batch_of_one() {
        let mut rng = StdRng::seed_from_u64(2);
        let x = Array2::from_shape_fn((3, 80), |_| rng.sample::<f64, _>(StandardNormal));
        let spatial = Array2::from_shape_fn((2, 3), |(f, c)| (f + c) as f64 - 1.0);
        let temporal = Array3::from_elem((2, 1, 3), 1.0 / 3.0);
        let analysis = EnvelopeAnalysis::new(AnalysisConfig::builder().nfreq(32).build()).unwrap();

        let a = analysis.recording_patterns(x.view(), spatial.view(), temporal.view()).unwrap();
        let b = analysis
            .patterns(x.view().insert_axis(Axis(0)), spatial.view(), temporal.view())
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn uses_configured_bias() {
        let x = Array2::from_shape_vec((1, 2), vec![0.0, 2.0]).unwrap();
        let unbiased = EnvelopeAnalysis::new(AnalysisConfig::default()).unwrap();
        let biased = EnvelopeAnalysis::new(AnalysisConfig::builder().unbiased(false).build()).unwrap();
        assert_eq!(unbiased.covariance(x.view()).unwrap()[[0, 0]], 2.0);
        assert_eq!(biased.covariance(x.view()).unwrap()[[0, 0]], 1.0);
    }

    fn owned_bank() -> (Array2<f64>, Array3<f64>) {
        (Array2::<f64>::eye(2), Array3::from_elem((2, 1, 3), 1.0 / 3.0))
    }

    #[test]
    fn accepts_views_from_separate_owners() {
        let x = Array3::from_shape_fn((2, 2, 60), |(b, c, t)| ((b + 2 * c + t) as f64 * 0.2).cos());
        let analysis = EnvelopeAnalysis::new(AnalysisConfig::builder().fs(50.0).nfreq(16).build()).unwrap();
        let spatial = Array2::<f64>::eye(2);
        let patterns = {
            let (_, temporal) = owned_bank();
            analysis.patterns(x.view(), spatial.view(), temporal.view()).unwrap()
        };
        let spectra = {
            let temporal = owned_bank().1;
            analysis.spectra(x.view(), spatial.view(), temporal.view()).unwrap()
        };
        let single = {
            let temporal = owned_bank().1;
            analysis
                .recording_patterns(x.index_axis(Axis(0), 0), spatial.view(), temporal.view())
                .unwrap()
        };
        assert_eq!(patterns.dim(), (2, 2));
        assert_eq!(single.dim(), (2, 2));
        assert_eq!(spectra.nbins(), 8);
    }

    #[test]
    fn spectra_follow_nfreq() {
        let x = Array3::from_shape_fn((2, 2, 100), |(b, c, t)| ((b + c * 3 + t) as f64 * 0.3).sin());
        let spatial = Array2::<f64>::eye(2);
        let temporal = Array3::from_elem((2, 1, 5), 0.2);
        let analysis = EnvelopeAnalysis::new(AnalysisConfig::builder().fs(100.0).nfreq(40).build()).unwrap();
        let spectra = analysis.spectra(x.view(), spatial.view(), temporal.view()).unwrap();
        assert_eq!(spectra.nbins(), 20);
    }
}
