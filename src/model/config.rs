//! Training Configuration Module
//!
//! Hyperparameters for the multi-task training run, loadable from and
//! savable to JSON. Defaults reproduce the reference training recipe.
//! The model architecture itself lives in
//! [`MultiTaskClassifierConfig`](crate::model::multitask::MultiTaskClassifierConfig).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::AugmentationPolicy;
use crate::model::multitask::MultiTaskClassifierConfig;
use crate::utils::error::{DiagnosisError, Result};
use crate::IMAGE_SIZE;

/// Relative weights of the two head losses
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
    pub disease: f64,
    pub severity: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            disease: 1.0,
            severity: 0.5,
        }
    }
}

/// Reduce-on-plateau settings (monitored metric is maximised)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlateauConfig {
    /// Multiplicative decay
    pub factor: f64,
    /// Epochs without improvement before decaying
    pub patience: usize,
    /// Floor for the learning rate
    pub min_lr: f64,
    /// Smallest change counted as an improvement
    pub min_delta: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            factor: 0.3,
            patience: 4,
            min_lr: 1e-6,
            min_delta: 1e-4,
        }
    }
}

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Square input size in pixels
    pub image_size: usize,

    /// Batch size for training and validation
    pub batch_size: usize,

    /// Initial learning rate
    pub learning_rate: f64,

    /// Maximum number of epochs
    pub epochs: usize,

    /// Epochs without validation disease-accuracy improvement before stopping
    pub early_stopping_patience: usize,

    /// Learning-rate decay on plateau
    pub plateau: PlateauConfig,

    /// Disease / severity loss weights
    pub loss_weights: LossWeights,

    /// Dropout after global pooling
    pub dropout_rate: f64,

    /// Update backbone weights (false trains the heads only)
    pub train_backbone: bool,

    /// Base filter count of the backbone
    pub base_filters: usize,

    /// Padding used by the pad-then-crop step of heavy augmentation
    pub heavy_aug_crop_pad: u32,

    /// Training-split augmentation
    pub augmentation: AugmentationPolicy,

    /// Reshuffle the training split every epoch
    pub shuffle: bool,

    /// Seed for shuffling and augmentation (weight init is not seeded)
    pub seed: u64,

    /// Adam weight decay (None to disable)
    pub weight_decay: Option<f64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            image_size: IMAGE_SIZE,
            batch_size: 32,
            learning_rate: 1e-4,
            epochs: 60,
            early_stopping_patience: 8,
            plateau: PlateauConfig::default(),
            loss_weights: LossWeights::default(),
            dropout_rate: 0.4,
            train_backbone: true,
            base_filters: 32,
            heavy_aug_crop_pad: 32,
            augmentation: AugmentationPolicy::Heavy,
            shuffle: true,
            seed: 42,
            weight_decay: None,
        }
    }
}

impl TrainingConfig {
    /// Tiny network and few epochs for smoke runs
    pub fn quick() -> Self {
        Self {
            image_size: 64,
            batch_size: 8,
            learning_rate: 1e-3,
            epochs: 3,
            early_stopping_patience: 2,
            base_filters: 8,
            heavy_aug_crop_pad: 8,
            augmentation: AugmentationPolicy::Standard,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(DiagnosisError::Config(msg));

        if self.image_size == 0 || self.image_size % 16 != 0 {
            return fail(format!("image_size {} must be a positive multiple of 16", self.image_size));
        }
        if self.batch_size == 0 {
            return fail("batch_size must be greater than 0".to_string());
        }
        if self.epochs == 0 {
            return fail("epochs must be greater than 0".to_string());
        }
        if !(self.learning_rate > 0.0) {
            return fail(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return fail(format!("dropout_rate must be in [0, 1), got {}", self.dropout_rate));
        }
        if !(self.plateau.factor > 0.0 && self.plateau.factor < 1.0) {
            return fail(format!("plateau factor must be in (0, 1), got {}", self.plateau.factor));
        }
        if self.plateau.min_lr < 0.0 || self.plateau.min_delta < 0.0 {
            return fail("plateau min_lr and min_delta must be non-negative".to_string());
        }
        if self.loss_weights.disease < 0.0 || self.loss_weights.severity < 0.0 {
            return fail("loss weights must be non-negative".to_string());
        }
        if self.base_filters == 0 {
            return fail("base_filters must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Architecture for a vocabulary of `num_diseases` classes
    pub fn model_config(&self, num_diseases: usize) -> MultiTaskClassifierConfig {
        MultiTaskClassifierConfig::new(num_diseases)
            .with_input_size(self.image_size)
            .with_base_filters(self.base_filters)
            .with_dropout_rate(self.dropout_rate)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load configuration from a JSON file; missing fields take defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DiagnosisError::PathNotFound(path.to_path_buf()));
        }
        let config: Self = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }
}
