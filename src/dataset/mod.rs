//! Dataset module for leaf image manifests
//!
//! This module provides functionality for:
//! - Reading CSV manifests and resolving image paths
//! - Building and persisting the disease label vocabulary
//! - Seeded, declarative data augmentation
//! - Burn batching and the epoch-level data pipeline
//! - Stratified train/validation splitting of annotation files

pub mod augmentation;
pub mod burn_dataset;
pub mod manifest;
pub mod split;
pub mod vocabulary;

pub use augmentation::{AugmentStep, AugmentationPolicy, Augmenter, EightBitStep};
pub use burn_dataset::{DataPipeline, LeafDataset, LeafItem, MultiTaskBatch, MultiTaskBatcher};
pub use manifest::{encode_manifest, EncodedSample, Manifest, ManifestRow};
pub use split::{ManifestSplit, SplitConfig, SplitStats};
pub use vocabulary::LabelVocabulary;
