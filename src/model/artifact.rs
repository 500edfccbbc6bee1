//! Persisted model artifact
//!
//! A model directory holds everything needed to rebuild the classifier
//! without re-declaring its architecture:
//!
//! - `model.mpk`: weights (Burn `CompactRecorder`)
//! - `model_config.json`: [`MultiTaskClassifierConfig`]
//! - `labels.json`: the training [`LabelVocabulary`]

use std::path::{Path, PathBuf};

use burn::config::Config;
use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;
use tracing::info;

use crate::dataset::vocabulary::LabelVocabulary;
use crate::model::multitask::{MultiTaskClassifier, MultiTaskClassifierConfig};
use crate::utils::error::{DiagnosisError, Result};

/// Weights file stem; the recorder appends `.mpk`
pub const WEIGHTS_STEM: &str = "model";
pub const CONFIG_FILE: &str = "model_config.json";
pub const LABELS_FILE: &str = "labels.json";

/// A loaded model with its architecture and vocabulary
#[derive(Debug)]
pub struct ModelArtifact<B: Backend> {
    pub model: MultiTaskClassifier<B>,
    pub config: MultiTaskClassifierConfig,
    pub vocabulary: LabelVocabulary,
}

impl<B: Backend> ModelArtifact<B> {
    /// Weights path as written to disk
    pub fn weights_path(dir: &Path) -> PathBuf {
        dir.join(format!("{}.mpk", WEIGHTS_STEM))
    }

    /// Write weights, architecture and vocabulary into `dir`
    pub fn save(
        dir: &Path,
        model: &MultiTaskClassifier<B>,
        config: &MultiTaskClassifierConfig,
        vocabulary: &LabelVocabulary,
    ) -> Result<()> {
        if config.num_diseases != vocabulary.len() {
            return Err(DiagnosisError::Config(format!(
                "model has {} disease classes but the vocabulary has {}",
                config.num_diseases,
                vocabulary.len()
            )));
        }
        std::fs::create_dir_all(dir)?;

        model
            .clone()
            .save_file(dir.join(WEIGHTS_STEM), &CompactRecorder::new())
            .map_err(|e| DiagnosisError::Model(format!("failed to save weights: {:?}", e)))?;
        config.save(dir.join(CONFIG_FILE))?;
        vocabulary.save(&dir.join(LABELS_FILE))?;

        info!("Saved model artifact to {:?}", dir);
        Ok(())
    }

    /// Rebuild the model from a directory written by [`ModelArtifact::save`]
    pub fn load(dir: &Path, device: &B::Device) -> Result<Self> {
        let weights = Self::weights_path(dir);
        if !weights.exists() {
            return Err(DiagnosisError::PathNotFound(weights));
        }
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(DiagnosisError::PathNotFound(config_path));
        }

        let config = MultiTaskClassifierConfig::load(&config_path)
            .map_err(|e| DiagnosisError::Config(format!("{:?}: {}", config_path, e)))?;
        let vocabulary = LabelVocabulary::load(&dir.join(LABELS_FILE))?;
        if config.num_diseases != vocabulary.len() {
            return Err(DiagnosisError::Config(format!(
                "artifact {:?} has {} disease outputs but {} labels",
                dir,
                config.num_diseases,
                vocabulary.len()
            )));
        }

        let model = config
            .init::<B>(device)?
            .load_file(dir.join(WEIGHTS_STEM), &CompactRecorder::new(), device)
            .map_err(|e| DiagnosisError::Model(format!("failed to load weights: {:?}", e)))?;

        info!(
            "Loaded model from {:?} ({} disease classes)",
            dir, config.num_diseases
        );
        Ok(Self {
            model,
            config,
            vocabulary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, Tensor};
    use tempfile::TempDir;

    type TestBackend = NdArray;

    #[test]
    fn test_save_load_restores_predictions() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = MultiTaskClassifierConfig::new(2)
            .with_input_size(16)
            .with_base_filters(2);
        let vocabulary = LabelVocabulary::from_labels(["healthy", "rust"]);
        let model = config.init::<TestBackend>(&device).unwrap();

        ModelArtifact::save(dir.path(), &model, &config, &vocabulary).unwrap();
        assert!(ModelArtifact::<TestBackend>::weights_path(dir.path()).exists());

        let loaded = ModelArtifact::<TestBackend>::load(dir.path(), &device).unwrap();
        assert_eq!(loaded.config, config);
        assert_eq!(loaded.vocabulary, vocabulary);

        let input = Tensor::<TestBackend, 4>::random([1, 3, 16, 16], Distribution::Default, &device);
        let before: Vec<f32> = model.predict(input.clone()).disease.into_data().to_vec().unwrap();
        let after: Vec<f32> = loaded.model.predict(input).disease.into_data().to_vec().unwrap();
        // weights are stored at half precision
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-2);
        }
    }

    #[test]
    fn test_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let err = ModelArtifact::<TestBackend>::load(dir.path(), &Default::default()).unwrap_err();
        assert!(matches!(err, DiagnosisError::PathNotFound(_)));
    }

    #[test]
    fn test_vocabulary_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = MultiTaskClassifierConfig::new(3).with_input_size(16).with_base_filters(2);
        let model = config.init::<TestBackend>(&device).unwrap();
        let vocabulary = LabelVocabulary::from_labels(["a", "b"]);

        assert!(matches!(
            ModelArtifact::save(dir.path(), &model, &config, &vocabulary),
            Err(DiagnosisError::Config(_))
        ));
    }
}
