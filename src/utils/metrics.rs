//! Metrics Module for Model Evaluation
//!
//! Evaluation metrics for the two prediction heads:
//! - Accuracy from a confusion matrix
//! - Per-class precision, recall and F1, macro-averaged
//! - Quadratic-weighted Cohen's kappa for the ordinal severity head

use serde::{Deserialize, Serialize};

/// Confusion Matrix for multi-class classification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Number of classes
    pub num_classes: usize,

    /// Row = actual, column = predicted, row-major
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    /// Create a new empty confusion matrix
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Create confusion matrix from predictions and ground truth
    pub fn from_predictions(predictions: &[usize], ground_truth: &[usize], num_classes: usize) -> Self {
        let mut cm = Self::new(num_classes);
        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }
        cm
    }

    /// Add a single prediction; out-of-range indices are ignored
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    /// Get the count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Diagonal sum
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Actual class counts
    pub fn row_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|row| (0..self.num_classes).map(|col| self.get(row, col)).sum())
            .collect()
    }

    /// Predicted class counts
    pub fn col_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|col| (0..self.num_classes).map(|row| self.get(row, col)).sum())
            .collect()
    }

    /// Macro-averaged F1 over every class that occurs in the ground truth
    /// or in the predictions.
    pub fn macro_f1(&self) -> f64 {
        let rows = self.row_sums();
        let cols = self.col_sums();

        let present: Vec<ClassMetrics> = (0..self.num_classes)
            .filter(|&c| rows[c] > 0 || cols[c] > 0)
            .map(|c| ClassMetrics::from_confusion_matrix(self, c))
            .collect();

        if present.is_empty() {
            return 0.0;
        }
        present.iter().map(|m| m.f1).sum::<f64>() / present.len() as f64
    }

    /// Cohen's kappa with quadratic disagreement weights `(i - j)^2`.
    ///
    /// When the expected weighted disagreement is zero (a single class in
    /// both truth and predictions) the agreement is perfect and 1.0 is returned.
    pub fn quadratic_weighted_kappa(&self) -> f64 {
        let n = self.total();
        if n == 0 {
            return 0.0;
        }

        let rows = self.row_sums();
        let cols = self.col_sums();

        let mut observed = 0.0f64;
        let mut expected = 0.0f64;
        for i in 0..self.num_classes {
            for j in 0..self.num_classes {
                let weight = (i as f64 - j as f64).powi(2);
                observed += weight * self.get(i, j) as f64;
                expected += weight * (rows[i] * cols[j]) as f64 / n as f64;
            }
        }

        if expected == 0.0 {
            return if observed == 0.0 { 1.0 } else { 0.0 };
        }
        1.0 - observed / expected
    }
}

/// Per-class metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_idx: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    /// Precision = TP / (TP + FP)
    pub precision: f64,
    /// Recall = TP / (TP + FN)
    pub recall: f64,
    pub f1: f64,
    /// Number of actual samples of this class
    pub support: usize,
}

impl ClassMetrics {
    /// Calculate metrics for a class from confusion matrix
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let true_positives = cm.get(class_idx, class_idx);

        let false_positives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(i, class_idx))
            .sum();

        let false_negatives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(class_idx, i))
            .sum();

        let precision = ratio(true_positives, true_positives + false_positives);
        let recall = ratio(true_positives, true_positives + false_negatives);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            true_positives,
            false_positives,
            false_negatives,
            precision,
            recall,
            f1,
            support: true_positives + false_negatives,
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den > 0 {
        num as f64 / den as f64
    } else {
        0.0
    }
}

/// Headline metrics for one head of the multi-task model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeadMetrics {
    pub accuracy: f64,
    pub macro_f1: f64,
    pub confusion_matrix: ConfusionMatrix,
}

impl HeadMetrics {
    pub fn from_predictions(predictions: &[usize], ground_truth: &[usize], num_classes: usize) -> Self {
        let confusion_matrix = ConfusionMatrix::from_predictions(predictions, ground_truth, num_classes);
        Self {
            accuracy: confusion_matrix.accuracy(),
            macro_f1: confusion_matrix.macro_f1(),
            confusion_matrix,
        }
    }
}

/// Running mean of per-batch values
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value observed over `weight` samples
    pub fn add_weighted(&mut self, value: f64, weight: usize) {
        self.sum += value * weight as f64;
        self.count += weight;
    }

    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}
