//! Model module for the multi-task leaf classifier
//!
//! This module provides:
//! - The shared-backbone classifier with disease and severity heads
//! - Training hyperparameters
//! - Saving and loading of the complete model artifact

pub mod artifact;
pub mod config;
pub mod multitask;

pub use artifact::ModelArtifact;
pub use config::{LossWeights, PlateauConfig, TrainingConfig};
pub use multitask::{
    ForwardMode, MultiTaskClassifier, MultiTaskClassifierConfig, MultiTaskLogits,
    MultiTaskOutput, LAYER_NAMES,
};
