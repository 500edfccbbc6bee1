//! Inverse-frequency class weights for the disease head
//!
//! `weight(c) = total / (num_classes * count(c))`. A vocabulary class with no
//! training samples is treated as having a count of one.

use crate::dataset::manifest::EncodedSample;
use crate::dataset::vocabulary::LabelVocabulary;

/// Weights indexed by disease class
pub fn compute_class_weights(samples: &[EncodedSample], vocabulary: &LabelVocabulary) -> Vec<f32> {
    let labels: Vec<usize> = samples.iter().map(|s| s.disease).collect();
    class_weights_from_labels(&labels, vocabulary.len())
}

/// Same as [`compute_class_weights`] for raw label indices
pub fn class_weights_from_labels(labels: &[usize], num_classes: usize) -> Vec<f32> {
    let mut counts = vec![0usize; num_classes];
    for &label in labels {
        if label < num_classes {
            counts[label] += 1;
        }
    }

    let total = labels.len() as f64;
    counts
        .iter()
        .map(|&count| (total / (num_classes as f64 * count.max(1) as f64)) as f32)
        .collect()
}
