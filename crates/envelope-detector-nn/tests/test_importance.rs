//! Integration tests for [`envelope_detector_nn::importance`].
//!
//! Inputs are drawn from a seeded `StdRng`, so every run sees the same data.

use approx::assert_relative_eq;
use ndarray::{s, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use envelope_detector_nn::{
    ActivationType, DownsampleMethod, EnvelopeDetector, EnvelopeDetectorConfig, FilterModel, GradientImportance,
    LinearRegressor, MlpRegressor, NnError, Regressor,
};
use envelope_detector_signal::Reduction;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn normal(shape: (usize, usize, usize), seed: u64) -> Array3<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array3::from_shape_fn(shape, |_| rng.sample(StandardNormal))
}

fn detector(config: EnvelopeDetectorConfig, seed: u64) -> EnvelopeDetector {
    EnvelopeDetector::random(config, &mut StdRng::seed_from_u64(seed)).unwrap()
}

fn assert_scores_close(a: &ndarray::Array1<f64>, b: &ndarray::Array1<f64>) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b.iter()) {
        assert_relative_eq!(*x, *y, max_relative = 1e-4);
    }
}

// ---------------------------------------------------------------------------
// Batch invariance
// ---------------------------------------------------------------------------

/// Three batches of ten score the same as one batch of thirty.
#[test]
fn ten_ten_ten_equals_thirty() {
    let config = EnvelopeDetectorConfig::builder(8, 4).temporal_filter_size(9).downsample_coef(5).build();
    let det = detector(config, 1);
    let head = MlpRegressor::random(4, 12, 2, &mut StdRng::seed_from_u64(2)).unwrap();
    let x = normal((30, 8, 200), 3);

    let scorer = GradientImportance::default();
    let whole = scorer.score(&det, &head, [x.view()]).unwrap();
    let split = scorer
        .score(
            &det,
            &head,
            [x.slice(s![0..10, .., ..]), x.slice(s![10..20, .., ..]), x.slice(s![20..30, .., ..])],
        )
        .unwrap();

    assert_scores_close(&whole.scores, &split.scores);
    assert_eq!(whole.order, split.order);
    assert_eq!(whole.samples, 30);
    assert_eq!(split.samples, 30);
    assert_eq!(split.batches, 3);
}

/// Invariance also holds for every activation and downsampling method.
#[test]
fn invariance_across_architectures() {
    let cases = [
        (ActivationType::Demodulation, DownsampleMethod::AvgPool),
        (ActivationType::HilbertAmplitude, DownsampleMethod::Resample),
        (ActivationType::Identity, DownsampleMethod::None),
    ];
    let x = normal((12, 6, 120), 4);
    for (i, (activation, method)) in cases.into_iter().enumerate() {
        let config = EnvelopeDetectorConfig::builder(6, 3)
            .activation(activation)
            .downsample_method(method)
            .downsample_coef(4)
            .temporal_smoother(3)
            .build();
        let det = detector(config, 10 + i as u64);
        let head = MlpRegressor::random(3, 7, 1, &mut StdRng::seed_from_u64(20 + i as u64)).unwrap();

        let scorer = GradientImportance::new(1, Reduction::Sum).unwrap();
        let whole = scorer.score(&det, &head, [x.view()]).unwrap();
        let chunked = scorer.score_chunked(&det, &head, x.view(), 5).unwrap();
        assert_scores_close(&whole.scores, &chunked.scores);
        assert_eq!(chunked.batches, 3);
    }
}

/// Higher-order gradients keep the invariance.
#[test]
fn second_order_is_batch_invariant() {
    let det = detector(EnvelopeDetectorConfig::builder(5, 3).downsample_coef(2).build(), 5);
    let head = MlpRegressor::random(3, 6, 2, &mut StdRng::seed_from_u64(6)).unwrap();
    let x = normal((9, 5, 80), 7);

    let scorer = GradientImportance::new(2, Reduction::Sum).unwrap();
    let whole = scorer.score(&det, &head, [x.view()]).unwrap();
    let chunked = scorer.score_chunked(&det, &head, x.view(), 2).unwrap();
    assert_scores_close(&whole.scores, &chunked.scores);
}

/// Mean reduction rescales every batch by its own size, so the totals differ
/// from the sum reduction by a known factor.
#[test]
fn mean_reduction_scales_each_batch() {
    let det = detector(EnvelopeDetectorConfig::new(4, 2), 8);
    let head = LinearRegressor::random(2, 3, &mut StdRng::seed_from_u64(9)).unwrap();
    let x = normal((4, 4, 50), 10);

    let sum = GradientImportance::new(1, Reduction::Sum).unwrap().score(&det, &head, [x.view()]).unwrap();
    let mean = GradientImportance::new(1, Reduction::Mean).unwrap().score(&det, &head, [x.view()]).unwrap();
    let outputs = (4 * head.output_dim() * 50) as f64;
    for (s, m) in sum.scores.iter().zip(mean.scores.iter()) {
        assert_relative_eq!(*m, s / outputs, max_relative = 1e-12);
    }
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// A head that only reads one feature makes that feature the most important.
#[test]
fn dominant_feature_ranks_first() {
    let det = detector(EnvelopeDetectorConfig::new(6, 4), 11);
    assert_eq!(det.nfeatures(), 4);
    let mut weight = ndarray::Array2::from_elem((1, 4), 0.01);
    weight[[0, 2]] = 5.0;
    let head = LinearRegressor::new(weight, ndarray::Array1::zeros(1)).unwrap();
    let x = normal((5, 6, 64), 12);

    let report = GradientImportance::default().score(&det, &head, [x.view()]).unwrap();
    assert_eq!(report.order[0], 2);
    assert!(report.scores.iter().all(|&s| s >= 0.0));
}

/// Running the same scoring twice gives the same ranking.
#[test]
fn ranking_is_stable_across_passes() {
    let det = detector(EnvelopeDetectorConfig::builder(8, 5).downsample_coef(4).build(), 13);
    let head = MlpRegressor::random(5, 10, 1, &mut StdRng::seed_from_u64(14)).unwrap();
    let x = normal((16, 8, 128), 15);

    let scorer = GradientImportance::default();
    let first = scorer.score_chunked(&det, &head, x.view(), 4).unwrap();
    let second = scorer.score_chunked(&det, &head, x.view(), 4).unwrap();
    assert_eq!(first, second);
}

// ---------------------------------------------------------------------------
// Failure modes
// ---------------------------------------------------------------------------

#[test]
fn wrong_channel_count_fails_in_forward() {
    let det = detector(EnvelopeDetectorConfig::new(4, 2), 16);
    let head = LinearRegressor::random(2, 1, &mut StdRng::seed_from_u64(17)).unwrap();
    let x = normal((2, 3, 32), 18);
    assert!(matches!(
        GradientImportance::default().score(&det, &head, [x.view()]),
        Err(NnError::ShapeMismatch { context: "detector input", .. })
    ));
}

#[test]
fn empty_batches_are_skipped_but_not_counted() {
    let det = detector(EnvelopeDetectorConfig::new(4, 2), 19);
    let head = LinearRegressor::random(2, 1, &mut StdRng::seed_from_u64(20)).unwrap();
    let x = normal((3, 4, 32), 21);
    let empty = Array3::<f64>::zeros((0, 4, 32));

    let report = GradientImportance::default()
        .score(&det, &head, [empty.view(), x.view(), empty.view()])
        .unwrap();
    assert_eq!(report.batches, 1);
    assert_eq!(report.samples, 3);
}
