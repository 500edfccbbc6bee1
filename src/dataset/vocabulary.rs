//! Disease label vocabulary
//!
//! An ordered, bijective mapping between disease names and dense class
//! indices. It is built once from the training manifest (names sorted
//! lexically), persisted next to the model, and reused unchanged for
//! validation and inference.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{DiagnosisError, Result};

/// On-disk layout of the vocabulary artifact
#[derive(Debug, Serialize, Deserialize)]
struct VocabularyFile {
    index_to_disease: Vec<String>,
    disease_to_index: BTreeMap<String, usize>,
}

/// Immutable disease-name <-> index mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelVocabulary {
    labels: Vec<String>,
    index: BTreeMap<String, usize>,
}

impl LabelVocabulary {
    /// Build the vocabulary from raw labels (duplicates allowed, order irrelevant)
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let unique: std::collections::BTreeSet<String> =
            labels.into_iter().map(Into::into).collect();
        let labels: Vec<String> = unique.into_iter().collect();
        let index = labels
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { labels, index }
    }

    /// Index of a disease name; names outside the vocabulary are an error
    pub fn encode(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| DiagnosisError::UnknownLabel(name.to_string()))
    }

    /// Disease name for an index
    pub fn decode(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Names in index order
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Save as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = VocabularyFile {
            index_to_disease: self.labels.clone(),
            disease_to_index: self.index.clone(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// Load from JSON, checking the two directions agree and indices are dense
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DiagnosisError::PathNotFound(path.to_path_buf()));
        }
        let file: VocabularyFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;

        if file.index_to_disease.len() != file.disease_to_index.len() {
            return Err(DiagnosisError::Config(format!(
                "vocabulary {:?} has {} names but {} indices",
                path,
                file.index_to_disease.len(),
                file.disease_to_index.len()
            )));
        }
        for (i, name) in file.index_to_disease.iter().enumerate() {
            if file.disease_to_index.get(name) != Some(&i) {
                return Err(DiagnosisError::Config(format!(
                    "vocabulary {:?} is inconsistent at index {} ('{}')",
                    path, i, name
                )));
            }
        }

        Ok(Self {
            labels: file.index_to_disease,
            index: file.disease_to_index,
        })
    }
}
