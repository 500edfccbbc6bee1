//! # Leaf Diagnosis
//!
//! A Rust library for plant leaf disease and severity diagnosis using the Burn framework.
//!
//! ## Features
//!
//! - **Multi-task model**: one shared backbone with a disease head and a 4-level severity head
//! - **Joint training** with class-weighted loss, checkpoint-on-improve, early stopping
//!   and reduce-on-plateau learning-rate decay
//! - **Monte-Carlo dropout** predictions with normalized-entropy uncertainty
//! - **Grad-CAM** heatmaps with JET overlays
//!
//! ## Modules
//!
//! - `dataset`: Manifests, label vocabulary, augmentation, batching and splitting
//! - `model`: Multi-task classifier, training config and the persisted artifact
//! - `training`: Loss, training loop, scheduler, class weights and history
//! - `inference`: Preprocessing, uncertainty, saliency, reports and the model handle
//! - `utils`: Errors, logging and metrics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use leaf_diagnosis::inference::{load_image, ModelHandle};
//!
//! let handle = ModelHandle::load_global("output/model".as_ref())?;
//! let image = load_image("leaf.jpg".as_ref())?;
//! let (prediction, diagnosis) = handle.diagnose(&image, 8, Some("Tomato"))?;
//! println!("{}\n{}", diagnosis, diagnosis.recommendation);
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::{DataPipeline, EncodedSample, LabelVocabulary, Manifest, ManifestSplit, SplitConfig};
pub use inference::{Diagnosis, Heatmap, ModelHandle, PredictionResult, SeverityLevel};
pub use model::{ModelArtifact, MultiTaskClassifier, MultiTaskClassifierConfig, TrainingConfig};
pub use training::{Trainer, TrainingHistory, TrainingOutcome};
pub use utils::error::{DiagnosisError, Result};
pub use utils::metrics::{ConfusionMatrix, HeadMetrics};

/// Default square input size in pixels
pub const IMAGE_SIZE: usize = 256;

/// Number of ordinal severity levels (healthy, mild, moderate, severe)
pub const SEVERITY_CLASSES: usize = 4;

/// Overall uncertainty above which reports warn the user
pub const UNCERTAINTY_ALERT: f32 = 0.25;

/// Default number of Monte-Carlo dropout passes
pub const DEFAULT_MC_SAMPLES: usize = 8;

/// Default Grad-CAM layer
pub const DEFAULT_TARGET_LAYER: &str = "top_conv";

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
