//! Human-facing diagnosis report
//!
//! Turns a [`PredictionResult`] into labels, a field recommendation and the
//! crop-focused view of the disease probabilities.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dataset::vocabulary::LabelVocabulary;
use crate::inference::uncertainty::{argmax, PredictionResult};
use crate::UNCERTAINTY_ALERT;

/// Number of alternatives listed in a report
pub const TOP_ALTERNATIVES: usize = 3;

/// Separator between crop and disease in PlantVillage-style labels
const CROP_SEPARATOR: &str = "___";

/// Ordinal severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    Healthy,
    Mild,
    Moderate,
    Severe,
}

impl SeverityLevel {
    pub const ALL: [SeverityLevel; 4] = [
        SeverityLevel::Healthy,
        SeverityLevel::Mild,
        SeverityLevel::Moderate,
        SeverityLevel::Severe,
    ];

    /// Indices above 3 clip to `Severe`
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index.min(Self::ALL.len() - 1)]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            SeverityLevel::Healthy => "0 - Healthy",
            SeverityLevel::Mild => "1 - Mild",
            SeverityLevel::Moderate => "2 - Moderate",
            SeverityLevel::Severe => "3 - Severe",
        }
    }

    fn advice(self) -> &'static str {
        match self {
            SeverityLevel::Healthy => "Leaf looks healthy. Continue routine scouting.",
            SeverityLevel::Mild => "Remove the affected leaves and monitor for spread.",
            SeverityLevel::Moderate => "Apply targeted treatment and increase scouting frequency.",
            SeverityLevel::Severe => {
                "Isolate the crop section, apply fungicide, and consult an expert."
            }
        }
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Field recommendation, with a warning appended above the uncertainty alert
pub fn recommendation(severity: SeverityLevel, uncertainty: f32) -> String {
    let mut text = severity.advice().to_string();
    if uncertainty > UNCERTAINTY_ALERT {
        text.push_str(" Uncertainty is high, consider retaking the photo or getting expert advice.");
    }
    text
}

/// Disease prediction after crop-focus masking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusedPrediction {
    pub class_index: usize,
    /// Whether the allowed-class mask decided the prediction
    pub focused: bool,
    /// Candidate pool sorted by probability, descending
    pub ranked: Vec<(usize, f32)>,
}

impl FocusedPrediction {
    pub fn alternatives(&self) -> &[(usize, f32)] {
        &self.ranked[..self.ranked.len().min(TOP_ALTERNATIVES)]
    }
}

/// Restrict the disease argmax to `allowed` classes.
///
/// Falls back to the unmasked argmax when the allowed classes carry no
/// probability mass (or none is valid).
pub fn focus_prediction(probs: &[f32], allowed: Option<&[usize]>) -> FocusedPrediction {
    let allowed: Vec<usize> = allowed
        .map(|ids| ids.iter().copied().filter(|&i| i < probs.len()).collect())
        .unwrap_or_default();
    let mass: f32 = allowed.iter().map(|&i| probs[i]).sum();
    let focused = mass > 0.0;

    let mut pool: Vec<usize> = if focused {
        allowed
    } else {
        (0..probs.len()).collect()
    };
    let class_index = if focused {
        pool.iter()
            .copied()
            .fold(pool[0], |best, i| if probs[i] > probs[best] { i } else { best })
    } else {
        argmax(probs)
    };
    if pool.is_empty() {
        pool.push(class_index);
    }

    let mut ranked: Vec<(usize, f32)> = pool
        .into_iter()
        .filter_map(|i| probs.get(i).map(|&p| (i, p)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    FocusedPrediction {
        class_index,
        focused,
        ranked,
    }
}

/// Crop part of a label such as `Tomato___Early_blight`
pub fn crop_of(label: &str) -> &str {
    label.split(CROP_SEPARATOR).next().unwrap_or(label)
}

/// Distinct crops of a vocabulary, sorted
pub fn crop_names(vocabulary: &LabelVocabulary) -> Vec<String> {
    let mut crops: Vec<String> = vocabulary.labels().iter().map(|l| crop_of(l).to_string()).collect();
    crops.sort();
    crops.dedup();
    crops
}

/// Class indices belonging to `crop` (case-insensitive)
pub fn crop_class_ids(vocabulary: &LabelVocabulary, crop: &str) -> Vec<usize> {
    vocabulary
        .labels()
        .iter()
        .enumerate()
        .filter(|(_, label)| crop_of(label).eq_ignore_ascii_case(crop))
        .map(|(i, _)| i)
        .collect()
}

/// A labelled probability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelledProbability {
    pub label: String,
    pub probability: f32,
}

/// Complete diagnosis of one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub disease_index: usize,
    pub disease: String,
    pub severity: SeverityLevel,
    pub confidence: f32,
    pub uncertainty: f32,
    pub disease_uncertainty: f32,
    pub severity_uncertainty: f32,
    pub crop_focus: Option<String>,
    pub alternatives: Vec<LabelledProbability>,
    pub recommendation: String,
}

impl Diagnosis {
    /// Build a report, optionally focusing on the classes of one crop
    pub fn new(prediction: &PredictionResult, vocabulary: &LabelVocabulary, crop_focus: Option<&str>) -> Self {
        let allowed = crop_focus.map(|crop| crop_class_ids(vocabulary, crop));
        let focused = focus_prediction(&prediction.disease_probs, allowed.as_deref());
        let label = |i: usize| vocabulary.decode(i).unwrap_or("unknown").to_string();

        let severity = SeverityLevel::from_index(prediction.severity_index);
        Self {
            disease_index: focused.class_index,
            disease: label(focused.class_index),
            severity,
            confidence: prediction.confidence,
            uncertainty: prediction.uncertainty,
            disease_uncertainty: prediction.disease_uncertainty,
            severity_uncertainty: prediction.severity_uncertainty,
            crop_focus: crop_focus.map(str::to_string),
            alternatives: focused
                .alternatives()
                .iter()
                .map(|&(i, probability)| LabelledProbability {
                    label: label(i),
                    probability,
                })
                .collect(),
            recommendation: recommendation(severity, prediction.uncertainty),
        }
    }

    pub fn is_uncertain(&self) -> bool {
        self.uncertainty > UNCERTAINTY_ALERT
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(crop) = &self.crop_focus {
            writeln!(f, "Crop focus: {}", crop)?;
        }
        writeln!(f, "Disease: {}", self.disease)?;
        writeln!(f, "Severity: {}", self.severity)?;
        writeln!(f, "Confidence: {:.1}%", self.confidence * 100.0)?;
        write!(f, "Uncertainty: {:.2}", self.uncertainty)
    }
}
