//! Training module for joint disease/severity classification
//!
//! This module provides:
//! - Joint weighted loss and the main training loop with Burn
//! - Inverse-frequency disease class weights
//! - Reduce-on-plateau learning-rate scheduling
//! - Per-epoch history written as CSV
//!
//! ## Training Recipe
//!
//! 1. Compute class weights from the training split
//! 2. Train both heads with Adam on the weighted joint loss
//! 3. Checkpoint whenever validation disease accuracy improves
//! 4. Decay the learning rate on plateau, stop early after `patience` stalls
//! 5. Return the best-observed weights

pub mod class_weights;
pub mod history;
pub mod run;
pub mod scheduler;
pub mod trainer;

pub use class_weights::{class_weights_from_labels, compute_class_weights};
pub use history::{EpochRecord, SplitMetrics, TrainingHistory};
pub use run::{default_paths, prepare_data, run_training, PreparedData, RunPaths};
pub use scheduler::ReduceLrOnPlateau;
pub use trainer::{
    adam_optimizer, evaluate, joint_loss, save_history, CheckpointTarget, EarlyStopping,
    Evaluation, LossParts, Trainer, TrainingOutcome,
};

pub use crate::model::config::TrainingConfig;

/// File name of the per-epoch history inside the output directory
pub const HISTORY_FILE: &str = "training_history.csv";
