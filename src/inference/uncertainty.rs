//! Monte-Carlo dropout uncertainty
//!
//! A single image is scored K times with dropout active. The K probability
//! vectors of each head are averaged, and the normalized predictive entropy
//! of each average is the per-task uncertainty.

use burn::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::multitask::{ForwardMode, MultiTaskClassifier};
use crate::utils::error::{data_error, DiagnosisError, Result};

/// Floor applied to probabilities before taking the log
pub const PROBABILITY_FLOOR: f64 = 1e-8;

/// Averaged prediction with uncertainty scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Mean disease distribution over the passes
    pub disease_probs: Vec<f32>,
    /// Mean severity distribution over the passes
    pub severity_probs: Vec<f32>,
    pub disease_index: usize,
    pub severity_index: usize,
    /// Largest averaged disease probability
    pub confidence: f32,
    pub disease_uncertainty: f32,
    pub severity_uncertainty: f32,
    /// Mean of the two per-task uncertainties
    pub uncertainty: f32,
    /// Number of stochastic passes
    pub samples: usize,
}

/// Index of the largest value (first on ties)
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best_i, best_v), (i, &v)| {
            if v > best_v {
                (i, v)
            } else {
                (best_i, best_v)
            }
        })
        .0
}

/// Entropy of `probs` divided by `ln(C)`, in [0, 1]
pub fn normalized_entropy(probs: &[f32]) -> f32 {
    let classes = probs.len();
    if classes <= 1 {
        return 0.0;
    }
    let entropy: f64 = probs
        .iter()
        .map(|&p| {
            let p = p as f64;
            -p * p.max(PROBABILITY_FLOOR).ln()
        })
        .sum();
    ((entropy / (classes as f64).ln()) as f32).clamp(0.0, 1.0)
}

fn mean_distribution(samples: &[Vec<f32>], head: &str) -> Result<Vec<f32>> {
    let width = samples.first().map(Vec::len).unwrap_or(0);
    if width == 0 {
        return Err(DiagnosisError::Shape(format!("{} head produced no classes", head)));
    }
    if samples.iter().any(|s| s.len() != width) {
        return Err(DiagnosisError::Shape(format!(
            "{} samples have inconsistent class counts",
            head
        )));
    }

    let mut mean = vec![0.0f32; width];
    for sample in samples {
        for (m, &p) in mean.iter_mut().zip(sample) {
            *m += p;
        }
    }
    let k = samples.len() as f32;
    mean.iter_mut().for_each(|m| *m /= k);
    Ok(mean)
}

/// Combine K per-pass distributions of each head into one result
pub fn aggregate(disease_samples: &[Vec<f32>], severity_samples: &[Vec<f32>]) -> Result<PredictionResult> {
    if disease_samples.is_empty() || disease_samples.len() != severity_samples.len() {
        return Err(DiagnosisError::Config(format!(
            "need the same non-zero number of passes per head, got {} and {}",
            disease_samples.len(),
            severity_samples.len()
        )));
    }

    let disease_probs = mean_distribution(disease_samples, "disease")?;
    let severity_probs = mean_distribution(severity_samples, "severity")?;

    let disease_index = argmax(&disease_probs);
    let severity_index = argmax(&severity_probs);
    let disease_uncertainty = normalized_entropy(&disease_probs);
    let severity_uncertainty = normalized_entropy(&severity_probs);

    Ok(PredictionResult {
        confidence: disease_probs[disease_index],
        disease_index,
        severity_index,
        disease_uncertainty,
        severity_uncertainty,
        uncertainty: (disease_uncertainty + severity_uncertainty) / 2.0,
        samples: disease_samples.len(),
        disease_probs,
        severity_probs,
    })
}

/// MC-dropout estimate for a `[1, 3, H, W]` batch
pub fn estimate<B: Backend>(
    model: &MultiTaskClassifier<B>,
    batch: Tensor<B, 4>,
    samples: usize,
) -> Result<PredictionResult> {
    let [batch_size, _, _, _] = batch.dims();
    if batch_size != 1 {
        return Err(DiagnosisError::Shape(format!(
            "uncertainty estimation expects a single image, got a batch of {}",
            batch_size
        )));
    }
    if samples == 0 {
        return Err(DiagnosisError::Config(
            "at least one Monte-Carlo sample is required".to_string(),
        ));
    }

    // dropout sits after the backbone, so the features are shared by every pass
    let features = model.forward_features(batch);

    let mut disease_samples = Vec::with_capacity(samples);
    let mut severity_samples = Vec::with_capacity(samples);
    for _ in 0..samples {
        let output = model
            .forward_heads(features.clone(), ForwardMode::Stochastic)
            .into_probabilities();
        disease_samples.push(output.disease.into_data().to_vec::<f32>().map_err(data_error)?);
        severity_samples.push(output.severity.into_data().to_vec::<f32>().map_err(data_error)?);
    }

    let result = aggregate(&disease_samples, &severity_samples)?;
    debug!(
        "MC estimate over {} passes: disease {} ({:.3}), uncertainty {:.3}",
        samples, result.disease_index, result.confidence, result.uncertainty
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::multitask::MultiTaskClassifierConfig;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    #[test]
    fn test_entropy_bounds() {
        assert!((normalized_entropy(&[0.25; 4]) - 1.0).abs() < 1e-6);
        assert!((normalized_entropy(&[0.2; 5]) - 1.0).abs() < 1e-6);
        assert_eq!(normalized_entropy(&[1.0, 0.0, 0.0, 0.0]), 0.0);
        assert_eq!(normalized_entropy(&[1.0]), 0.0);
    }

    #[test]
    fn test_zero_probability_is_finite() {
        let h = normalized_entropy(&[0.5, 0.5, 0.0]);
        assert!(h.is_finite());
        assert!((h - 2.0f32.ln() / 3.0f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_aggregate_reference_distributions() {
        let result = aggregate(&[vec![0.7, 0.1, 0.1, 0.1]], &[vec![0.1, 0.6, 0.2, 0.1]]).unwrap();

        assert_eq!(result.disease_index, 0);
        assert_eq!(result.severity_index, 1);
        assert!((result.confidence - 0.7).abs() < 1e-6);
        assert!(result.uncertainty > 0.0 && result.uncertainty < 1.0);
        assert!(
            (result.uncertainty - (result.disease_uncertainty + result.severity_uncertainty) / 2.0).abs()
                < 1e-6
        );
    }

    #[test]
    fn test_aggregate_averages_passes() {
        let result = aggregate(
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
            &[vec![1.0, 0.0, 0.0, 0.0], vec![1.0, 0.0, 0.0, 0.0]],
        )
        .unwrap();

        assert_eq!(result.disease_probs, vec![0.5, 0.5]);
        assert!((result.disease_uncertainty - 1.0).abs() < 1e-6);
        assert_eq!(result.severity_uncertainty, 0.0);
        assert_eq!(result.samples, 2);
    }

    #[test]
    fn test_aggregate_rejects_mismatched_passes() {
        assert!(matches!(aggregate(&[], &[]), Err(DiagnosisError::Config(_))));
        assert!(matches!(
            aggregate(&[vec![0.5, 0.5], vec![1.0]], &[vec![1.0], vec![1.0]]),
            Err(DiagnosisError::Shape(_))
        ));
    }

    fn model(dropout: f64) -> MultiTaskClassifier<TestBackend> {
        MultiTaskClassifierConfig::new(3)
            .with_input_size(16)
            .with_base_filters(2)
            .with_dropout_rate(dropout)
            .init(&Default::default())
            .unwrap()
    }

    #[test]
    fn test_single_pass_without_dropout_is_deterministic() {
        let device = Default::default();
        let model = model(0.0);
        let input = Tensor::<TestBackend, 4>::random([1, 3, 16, 16], Distribution::Default, &device);

        let first = estimate(&model, input.clone(), 1).unwrap();
        let second = estimate(&model, input, 1).unwrap();
        assert_eq!(first, second);
        assert!(first.disease_uncertainty >= 0.0 && first.disease_uncertainty <= 1.0);
    }

    #[test]
    fn test_rejects_batches_and_zero_samples() {
        let device = Default::default();
        let model = model(0.3);

        let batch = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 16], &device);
        assert!(matches!(estimate(&model, batch, 4), Err(DiagnosisError::Shape(_))));

        let single = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);
        assert!(matches!(estimate(&model, single, 0), Err(DiagnosisError::Config(_))));
    }

    #[test]
    fn test_mc_estimate_probabilities_sum_to_one() {
        let device = Default::default();
        let model = model(0.5);
        let input = Tensor::<TestBackend, 4>::random([1, 3, 16, 16], Distribution::Default, &device);

        let result = estimate(&model, input, 8).unwrap();
        let total: f32 = result.disease_probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-4);
        assert_eq!(result.severity_probs.len(), 4);
        assert!(result.uncertainty >= 0.0 && result.uncertainty <= 1.0);
    }
}
