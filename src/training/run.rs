//! End-to-end training run
//!
//! Reads the train/validation manifests, builds the vocabulary and data
//! pipelines, trains, and leaves the artifact, config and history in the
//! output directory.

use std::path::{Path, PathBuf};

use burn::tensor::backend::AutodiffBackend;
use colored::Colorize;
use tracing::info;

use crate::dataset::augmentation::Augmenter;
use crate::dataset::burn_dataset::DataPipeline;
use crate::dataset::manifest::{encode_manifest, Manifest};
use crate::dataset::vocabulary::LabelVocabulary;
use crate::model::config::TrainingConfig;
use crate::training::class_weights::compute_class_weights;
use crate::training::trainer::{adam_optimizer, save_history, CheckpointTarget, Trainer, TrainingOutcome};
use crate::utils::error::Result;

/// File name of the training config saved next to the artifact
pub const TRAINING_CONFIG_FILE: &str = "training_config.json";

/// Input and output locations of a run
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub train_manifest: PathBuf,
    pub val_manifest: PathBuf,
    /// Base for relative paths in the training manifest
    pub train_images: PathBuf,
    /// Base for relative paths in the validation manifest
    pub val_images: PathBuf,
    pub output_dir: PathBuf,
}

/// Pipelines and statistics ready for training
#[derive(Debug)]
pub struct PreparedData {
    pub train: DataPipeline,
    pub val: DataPipeline,
    pub vocabulary: LabelVocabulary,
    pub class_weights: Vec<f32>,
}

/// Encode both manifests against the training vocabulary and build pipelines
pub fn prepare_data(paths: &RunPaths, config: &TrainingConfig) -> Result<PreparedData> {
    let train_manifest = Manifest::from_csv(&paths.train_manifest)?;
    let (train_samples, vocabulary) = encode_manifest(&train_manifest, &paths.train_images, None)?;

    // validation labels must already exist in the training vocabulary
    let val_manifest = Manifest::from_csv(&paths.val_manifest)?;
    let (val_samples, _) = encode_manifest(&val_manifest, &paths.val_images, Some(&vocabulary))?;

    let class_weights = compute_class_weights(&train_samples, &vocabulary);
    let image_size = config.image_size as u32;

    let train = DataPipeline::new(train_samples, image_size, config.batch_size)?
        .with_shuffle(config.shuffle, config.seed)
        .with_augmenter(Augmenter::from_policy(config.augmentation, config.heavy_aug_crop_pad));
    let val = DataPipeline::new(val_samples, image_size, config.batch_size)?;

    Ok(PreparedData {
        train,
        val,
        vocabulary,
        class_weights,
    })
}

fn print_class_weights(vocabulary: &LabelVocabulary, weights: &[f32]) {
    println!("{}", "Disease Class Weights:".cyan().bold());
    for (label, weight) in vocabulary.labels().iter().zip(weights) {
        println!("  {:<40} {:.3}", label, weight);
    }
    println!();
}

/// Train a model from manifests and write every artifact to `paths.output_dir`
pub fn run_training<B: AutodiffBackend>(
    paths: &RunPaths,
    config: &TrainingConfig,
    device: B::Device,
) -> Result<TrainingOutcome<B>> {
    config.validate()?;
    println!("{}", "Loading Manifests...".cyan());
    let data = prepare_data(paths, config)?;

    println!();
    println!("{}", "Dataset:".cyan().bold());
    println!("  Training samples:   {}", data.train.len());
    println!("  Validation samples: {}", data.val.len());
    println!("  Disease classes:    {}", data.vocabulary.len());
    println!();
    print_class_weights(&data.vocabulary, &data.class_weights);

    let model_config = config.model_config(data.vocabulary.len());
    let model = model_config.init::<B>(&device)?;

    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Epochs:         {}", config.epochs);
    println!("  Batch size:     {}", config.batch_size);
    println!("  Learning rate:  {}", config.learning_rate);
    println!("  Image size:     {}", config.image_size);
    println!("  Augmentation:   {:?}", config.augmentation);
    println!("  Train backbone: {}", config.train_backbone);
    println!("  Device:         {:?}", device);
    println!();

    std::fs::create_dir_all(&paths.output_dir)?;
    config.save(&paths.output_dir.join(TRAINING_CONFIG_FILE))?;

    println!("{}", "Starting Training...".green().bold());
    let trainer = Trainer::new(
        model,
        adam_optimizer::<B>(config),
        config.clone(),
        data.class_weights,
        device,
    )?
    .with_checkpoint(CheckpointTarget {
        dir: paths.output_dir.clone(),
        model_config,
        vocabulary: data.vocabulary,
    });

    let outcome = trainer.fit(&data.train, &data.val)?;
    let history_path = save_history(&outcome.history, &paths.output_dir)?;
    info!("Wrote training history to {:?}", history_path);

    println!();
    println!("{}", "Training Complete!".green().bold());
    println!(
        "  Best validation disease accuracy: {:.2}% (epoch {})",
        outcome.best_val_disease_accuracy * 100.0,
        outcome.best_epoch
    );
    if outcome.stopped_early {
        println!("  Stopped early after {} epochs", outcome.history.len());
    }
    println!("  Model saved to: {:?}", paths.output_dir);
    Ok(outcome)
}

/// Default run layout rooted at a data directory
pub fn default_paths(data_dir: &Path, output_dir: &Path) -> RunPaths {
    RunPaths {
        train_manifest: data_dir.join("train.csv"),
        val_manifest: data_dir.join("val.csv"),
        train_images: data_dir.to_path_buf(),
        val_images: data_dir.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::augmentation::AugmentationPolicy;
    use crate::model::artifact::ModelArtifact;
    use crate::utils::error::DiagnosisError;
    use burn::backend::{Autodiff, NdArray};
    use image::{Rgb, RgbImage};
    use std::io::Write;
    use tempfile::TempDir;

    type TestAutodiffBackend = Autodiff<NdArray>;

    fn write_manifest(dir: &Path, name: &str, rows: &[(&str, &str, &str)]) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "filename,disease_id,severity_level").unwrap();
        for (file_name, disease, severity) in rows {
            writeln!(file, "{},{},{}", file_name, disease, severity).unwrap();
            RgbImage::from_pixel(20, 20, Rgb([90, 140, 60]))
                .save(dir.join(file_name))
                .unwrap();
        }
        path
    }

    fn tiny_config() -> TrainingConfig {
        TrainingConfig {
            image_size: 16,
            batch_size: 2,
            epochs: 2,
            base_filters: 2,
            augmentation: AugmentationPolicy::Standard,
            ..Default::default()
        }
    }

    #[test]
    fn test_run_writes_all_artifacts() {
        let dir = TempDir::new().unwrap();
        write_manifest(
            dir.path(),
            "train.csv",
            &[("a.png", "rust", "1"), ("b.png", "blight", "2"), ("c.png", "rust", "0")],
        );
        write_manifest(dir.path(), "val.csv", &[("d.png", "blight", "3"), ("e.png", "rust", "1")]);
        let out = dir.path().join("out");
        let paths = default_paths(dir.path(), &out);

        let outcome = run_training::<TestAutodiffBackend>(&paths, &tiny_config(), Default::default()).unwrap();
        assert_eq!(outcome.history.len(), 2);
        assert!(out.join(TRAINING_CONFIG_FILE).exists());
        assert!(out.join(crate::training::HISTORY_FILE).exists());

        let artifact = ModelArtifact::<NdArray>::load(&out, &Default::default()).unwrap();
        assert_eq!(artifact.vocabulary.labels(), &["blight".to_string(), "rust".to_string()]);
    }

    #[test]
    fn test_unknown_validation_label_is_fatal() {
        let dir = TempDir::new().unwrap();
        write_manifest(dir.path(), "train.csv", &[("a.png", "rust", "1")]);
        write_manifest(dir.path(), "val.csv", &[("b.png", "mildew", "1")]);
        let paths = default_paths(dir.path(), &dir.path().join("out"));

        let err = prepare_data(&paths, &tiny_config()).unwrap_err();
        assert!(matches!(err, DiagnosisError::UnknownLabel(_)));
    }
}
