//! Leaf Diagnosis CLI
//!
//! Entry point for splitting annotations, training the multi-task model,
//! evaluating it, and diagnosing leaf photos with uncertainty and Grad-CAM.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;
use walkdir::WalkDir;

use leaf_diagnosis::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use leaf_diagnosis::dataset::augmentation::AugmentationPolicy;
use leaf_diagnosis::dataset::{encode_manifest, DataPipeline, Manifest, ManifestSplit, SplitConfig};
use leaf_diagnosis::inference::{
    crop_names, load_image, overlay, Diagnosis, ModelHandle, DEFAULT_OVERLAY_ALPHA,
};
use leaf_diagnosis::model::{LossWeights, ModelArtifact, TrainingConfig};
use leaf_diagnosis::training::{evaluate, run_training, Evaluation, RunPaths};
use leaf_diagnosis::utils::logging::{init_logging, LogConfig};
use leaf_diagnosis::utils::{format_duration, format_probability_bar};
use leaf_diagnosis::{DEFAULT_MC_SAMPLES, DEFAULT_TARGET_LAYER};

/// Plant leaf disease and severity diagnosis
///
/// Trains a shared-backbone model with disease and severity heads and serves
/// predictions with Monte-Carlo dropout uncertainty and Grad-CAM heatmaps.
#[derive(Parser, Debug)]
#[command(name = "leaf_diagnosis")]
#[command(version)]
#[command(about = "Multi-task leaf disease and severity diagnosis with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum AugmentationArg {
    None,
    Standard,
    Heavy,
    Rich,
}

impl From<AugmentationArg> for AugmentationPolicy {
    fn from(arg: AugmentationArg) -> Self {
        match arg {
            AugmentationArg::None => AugmentationPolicy::None,
            AugmentationArg::Standard => AugmentationPolicy::Standard,
            AugmentationArg::Heavy => AugmentationPolicy::Heavy,
            AugmentationArg::Rich => AugmentationPolicy::Rich,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Split an annotation CSV into stratified train/val manifests
    Split {
        /// Annotation CSV with filename, disease_id and severity_level columns
        #[arg(short, long)]
        annotations: PathBuf,

        /// Directory holding the images referenced by the annotations
        #[arg(short, long)]
        image_dir: PathBuf,

        /// Output directory for train.csv and val.csv
        #[arg(short, long, default_value = "data")]
        output_dir: PathBuf,

        /// Fraction of each stratum sent to validation
        #[arg(long, default_value = "0.2")]
        val_ratio: f64,

        /// Random seed for reproducibility
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Train the multi-task model
    Train {
        /// Directory with train.csv and val.csv
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,

        /// Training manifest (defaults to <data-dir>/train.csv)
        #[arg(long)]
        train_manifest: Option<PathBuf>,

        /// Validation manifest (defaults to <data-dir>/val.csv)
        #[arg(long)]
        val_manifest: Option<PathBuf>,

        /// Base directory for relative image paths (defaults to <data-dir>)
        #[arg(long)]
        image_dir: Option<PathBuf>,

        /// Output directory for the model artifact and history
        #[arg(short, long, default_value = "output/model")]
        output_dir: PathBuf,

        /// JSON training config; flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size for training
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Learning rate
        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// Training-split augmentation
        #[arg(long, value_enum)]
        augmentation: Option<AugmentationArg>,

        /// Train the heads only
        #[arg(long, default_value = "false")]
        freeze_backbone: bool,

        /// Random seed for shuffling and augmentation
        #[arg(long)]
        seed: Option<u64>,

        /// Quick test mode - tiny network, few epochs
        #[arg(long, default_value = "false")]
        quick: bool,
    },

    /// Evaluate a trained model on a manifest
    Evaluate {
        /// Model artifact directory
        #[arg(short, long, default_value = "output/model")]
        model: PathBuf,

        /// Manifest to evaluate
        #[arg(long)]
        manifest: PathBuf,

        /// Base directory for relative image paths (defaults to the manifest's directory)
        #[arg(long)]
        image_dir: Option<PathBuf>,

        /// Batch size
        #[arg(short, long, default_value = "32")]
        batch_size: usize,

        /// Write the metrics as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Diagnose a leaf photo or a directory of photos
    Diagnose {
        /// Model artifact directory
        #[arg(short, long, default_value = "output/model")]
        model: PathBuf,

        /// Image file or directory
        #[arg(short, long)]
        input: PathBuf,

        /// Monte-Carlo dropout passes
        #[arg(short, long, default_value_t = DEFAULT_MC_SAMPLES)]
        samples: usize,

        /// Restrict the disease prediction to one crop
        #[arg(long)]
        crop: Option<String>,

        /// Write the diagnoses as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render a Grad-CAM overlay for one image
    Saliency {
        /// Model artifact directory
        #[arg(short, long, default_value = "output/model")]
        model: PathBuf,

        /// Image file
        #[arg(short, long)]
        input: PathBuf,

        /// Disease class index (defaults to the predicted class)
        #[arg(long)]
        class: Option<usize>,

        /// Backbone layer to explain
        #[arg(long, default_value = DEFAULT_TARGET_LAYER)]
        layer: String,

        /// Heatmap share of each overlay pixel
        #[arg(long, default_value_t = DEFAULT_OVERLAY_ALPHA)]
        alpha: f32,

        /// Output PNG path
        #[arg(short, long, default_value = "gradcam.png")]
        output: PathBuf,
    },

    /// Show or export the disease vocabulary of a manifest or model
    Vocab {
        /// Manifest CSV to build the vocabulary from
        #[arg(long, conflicts_with = "model")]
        manifest: Option<PathBuf>,

        /// Model artifact directory to read the vocabulary from
        #[arg(long)]
        model: Option<PathBuf>,

        /// Write the vocabulary as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Split {
            annotations,
            image_dir,
            output_dir,
            val_ratio,
            seed,
        } => cmd_split(&annotations, &image_dir, &output_dir, val_ratio, seed)?,

        Commands::Train {
            data_dir,
            train_manifest,
            val_manifest,
            image_dir,
            output_dir,
            config,
            epochs,
            batch_size,
            learning_rate,
            augmentation,
            freeze_backbone,
            seed,
            quick,
        } => {
            let mut training_config = match (&config, quick) {
                (Some(path), _) => TrainingConfig::load(path)?,
                (None, true) => TrainingConfig::quick(),
                (None, false) => TrainingConfig::default(),
            };
            if quick {
                println!("{}", "Quick test mode: tiny network, few epochs".yellow().bold());
            }
            if let Some(epochs) = epochs {
                training_config.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                training_config.batch_size = batch_size;
            }
            if let Some(learning_rate) = learning_rate {
                training_config.learning_rate = learning_rate;
            }
            if let Some(augmentation) = augmentation {
                training_config.augmentation = augmentation.into();
            }
            if let Some(seed) = seed {
                training_config.seed = seed;
            }
            if freeze_backbone {
                training_config.train_backbone = false;
            }

            let image_dir = image_dir.unwrap_or_else(|| data_dir.clone());
            let paths = RunPaths {
                train_manifest: train_manifest.unwrap_or_else(|| data_dir.join("train.csv")),
                val_manifest: val_manifest.unwrap_or_else(|| data_dir.join("val.csv")),
                train_images: image_dir.clone(),
                val_images: image_dir,
                output_dir,
            };
            cmd_train(&paths, &training_config)?;
        }

        Commands::Evaluate {
            model,
            manifest,
            image_dir,
            batch_size,
            output,
        } => cmd_evaluate(&model, &manifest, image_dir.as_deref(), batch_size, output.as_deref())?,

        Commands::Diagnose {
            model,
            input,
            samples,
            crop,
            output,
        } => cmd_diagnose(&model, &input, samples, crop.as_deref(), output.as_deref())?,

        Commands::Saliency {
            model,
            input,
            class,
            layer,
            alpha,
            output,
        } => cmd_saliency(&model, &input, class, &layer, alpha, &output)?,

        Commands::Vocab {
            manifest,
            model,
            output,
        } => cmd_vocab(manifest.as_deref(), model.as_deref(), output.as_deref())?,
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ==============================================================
   Leaf Diagnosis
   Disease + severity classification with Burn + Rust
 ==============================================================
  "#
        .green()
    );
}

fn progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

fn cmd_split(annotations: &Path, image_dir: &Path, output_dir: &Path, val_ratio: f64, seed: u64) -> Result<()> {
    info!("Splitting annotations: {:?}", annotations);
    let config = SplitConfig::new(val_ratio, seed)?;
    let split = ManifestSplit::from_csv(annotations, &config)?;
    let stats = split.stats();
    let (train_path, val_path) = split.save(output_dir, image_dir)?;

    println!("{}", "Stratified Split:".cyan().bold());
    println!("  Strata:             {}", stats.strata);
    println!("  Training samples:   {}", stats.train);
    println!("  Validation samples: {}", stats.val);
    println!();
    println!("  Train manifest: {:?}", train_path);
    println!("  Val manifest:   {:?}", val_path);
    Ok(())
}

fn cmd_train(paths: &RunPaths, config: &TrainingConfig) -> Result<()> {
    println!("{}", "Initializing Training...".green().bold());
    println!("  Backend: {}", backend_name());
    println!();

    let start = Instant::now();
    run_training::<TrainingBackend>(paths, config, default_device())?;
    println!("  Total time: {}", format_duration(start.elapsed().as_secs_f64()));
    println!();

    println!("{}", "Next steps:".cyan().bold());
    println!(
        "  leaf_diagnosis evaluate --model {:?} --manifest {:?}",
        paths.output_dir, paths.val_manifest
    );
    println!(
        "  leaf_diagnosis diagnose --model {:?} --input <leaf.jpg>",
        paths.output_dir
    );
    Ok(())
}

fn cmd_evaluate(
    model_dir: &Path,
    manifest_path: &Path,
    image_dir: Option<&Path>,
    batch_size: usize,
    output: Option<&Path>,
) -> Result<()> {
    let device = default_device();
    let artifact = ModelArtifact::<DefaultBackend>::load(model_dir, &device)?;

    let image_dir = image_dir
        .map(Path::to_path_buf)
        .or_else(|| manifest_path.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    let manifest = Manifest::from_csv(manifest_path)?;
    let (samples, _) = encode_manifest(&manifest, &image_dir, Some(&artifact.vocabulary))?;
    let pipeline = DataPipeline::new(samples, artifact.config.input_size as u32, batch_size)?;

    println!("{}", "Evaluating...".cyan());
    let spinner = ProgressBar::new_spinner();
    spinner.set_message(format!("{} samples", pipeline.len()));
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));
    let evaluation = evaluate(&artifact.model, &pipeline, LossWeights::default(), &device)?;
    spinner.finish_and_clear();

    println!("{}", "Evaluation Results:".cyan().bold());
    println!("  Samples:            {}", evaluation.samples);
    println!("  Loss:               {:.4}", evaluation.metrics.loss);
    println!("  Disease accuracy:   {:.2}%", evaluation.disease.accuracy * 100.0);
    println!("  Disease macro F1:   {:.4}", evaluation.disease.macro_f1);
    println!("  Severity accuracy:  {:.2}%", evaluation.severity.accuracy * 100.0);
    println!("  Severity macro F1:  {:.4}", evaluation.severity.macro_f1);
    println!("  Severity kappa:     {:.4}", evaluation.severity_kappa);

    if let Some(path) = output {
        let report = EvaluationReport {
            model: model_dir,
            manifest: manifest_path,
            evaluated_at: Local::now().to_rfc3339(),
            evaluation: &evaluation,
        };
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing {:?}", path))?;
        println!();
        println!("  Metrics saved to: {:?}", path);
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct DiagnosisRecord {
    path: PathBuf,
    diagnosed_at: String,
    diagnosis: Diagnosis,
}

#[derive(Debug, Serialize)]
struct EvaluationReport<'a> {
    model: &'a Path,
    manifest: &'a Path,
    evaluated_at: String,
    evaluation: &'a Evaluation,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

fn collect_images(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        bail!("input not found: {:?}", input);
    }
    let mut images: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .filter(|path| path.is_file() && is_image(path))
        .collect();
    images.sort();
    Ok(images)
}

fn print_diagnosis(path: &Path, diagnosis: &Diagnosis) {
    println!("{} {:?}", "Image:".cyan().bold(), path);
    let headline = format!("  Disease: {}", diagnosis.disease);
    if diagnosis.is_uncertain() {
        println!("{}", headline.yellow().bold());
    } else {
        println!("{}", headline.green().bold());
    }
    println!("  Severity: {}", diagnosis.severity);
    println!("  Confidence: {:.1}%", diagnosis.confidence * 100.0);
    println!("  Uncertainty: {:.2}", diagnosis.uncertainty);
    for alternative in &diagnosis.alternatives {
        println!(
            "    {:<32} {}",
            alternative.label,
            format_probability_bar(alternative.probability, 20)
        );
    }
    println!("  {}", diagnosis.recommendation);
    println!();
}

fn cmd_diagnose(
    model_dir: &Path,
    input: &Path,
    samples: usize,
    crop: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let handle = ModelHandle::load_global(model_dir)?;
    if let Some(crop) = crop {
        let crops = crop_names(handle.vocabulary());
        if !crops.iter().any(|c| c.eq_ignore_ascii_case(crop)) {
            println!(
                "{} crop '{}' not in vocabulary (known: {}), using all classes",
                "Warning:".yellow(),
                crop,
                crops.join(", ")
            );
        }
    }

    let images = collect_images(input)?;
    let pb = (images.len() > 1).then(|| progress_bar(images.len()));
    let mut records = Vec::with_capacity(images.len());
    for path in images {
        let image = load_image(&path)?;
        let (_, diagnosis) = handle.diagnose(&image, samples, crop)?;
        match &pb {
            Some(pb) => pb.inc(1),
            None => print_diagnosis(&path, &diagnosis),
        }
        records.push(DiagnosisRecord {
            path,
            diagnosed_at: Local::now().to_rfc3339(),
            diagnosis,
        });
    }
    if let Some(pb) = pb {
        pb.finish_and_clear();
        for record in &records {
            print_diagnosis(&record.path, &record.diagnosis);
        }
    }

    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&records)?)
            .with_context(|| format!("writing {:?}", path))?;
        println!("  Diagnoses saved to: {:?}", path);
    }
    Ok(())
}

fn cmd_saliency(
    model_dir: &Path,
    input: &Path,
    class: Option<usize>,
    layer: &str,
    alpha: f32,
    output: &Path,
) -> Result<()> {
    let handle = ModelHandle::load_global(model_dir)?;
    let image = load_image(input)?;

    let (class_index, heatmap) = handle.saliency_for(&image, class, layer)?;
    let label = handle.vocabulary().decode(class_index).unwrap_or("unknown");
    info!("Grad-CAM for class {} ({}) at layer {}", class_index, label, layer);

    let blended = overlay(&image.to_rgb8(), &heatmap, alpha)?;
    blended
        .save(output)
        .with_context(|| format!("saving overlay to {:?}", output))?;

    println!("{}", "Grad-CAM:".cyan().bold());
    println!("  Class:   {} ({})", class_index, label);
    println!("  Layer:   {}", layer);
    println!("  Overlay: {:?}", output);
    Ok(())
}

fn cmd_vocab(manifest: Option<&Path>, model: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let vocabulary = match (manifest, model) {
        (Some(path), _) => Manifest::from_csv(path)?.vocabulary(),
        (None, Some(dir)) => {
            ModelArtifact::<DefaultBackend>::load(dir, &default_device())?.vocabulary
        }
        (None, None) => bail!("pass --manifest or --model"),
    };

    println!("{}", "Disease Vocabulary:".cyan().bold());
    for (index, label) in vocabulary.labels().iter().enumerate() {
        println!("  {:>3}  {}", index, label);
    }

    if let Some(path) = output {
        vocabulary.save(path)?;
        println!();
        println!("  Vocabulary saved to: {:?}", path);
    }
    Ok(())
}
