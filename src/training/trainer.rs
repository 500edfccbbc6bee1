//! Multi-Task Training Pipeline
//!
//! This module implements the joint disease/severity training loop using the
//! Burn framework, including:
//! - Joint cross-entropy loss with disease class weights
//! - Adam optimisation with reduce-on-plateau learning-rate decay
//! - Validation on the inner (non-autodiff) backend
//! - Checkpointing whenever validation disease accuracy improves
//! - Early stopping, always returning the best-observed weights
//!
//! Checkpointing, early stopping and the scheduler all monitor the same
//! metric: validation disease accuracy.

use std::path::{Path, PathBuf};

use burn::{
    module::AutodiffModule,
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{activation::log_softmax, backend::AutodiffBackend, ElementConversion},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::burn_dataset::{DataPipeline, MultiTaskBatch, MultiTaskBatcher};
use crate::dataset::vocabulary::LabelVocabulary;
use crate::model::artifact::ModelArtifact;
use crate::model::config::{LossWeights, TrainingConfig};
use crate::model::multitask::{
    ForwardMode, MultiTaskClassifier, MultiTaskClassifierConfig, MultiTaskLogits,
};
use crate::training::history::{EpochRecord, SplitMetrics, TrainingHistory};
use crate::training::scheduler::ReduceLrOnPlateau;
use crate::utils::error::{data_error, DiagnosisError, Result};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{HeadMetrics, RunningAverage};
use crate::SEVERITY_CLASSES;

/// The three scalar losses of one batch
#[derive(Debug, Clone)]
pub struct LossParts<B: Backend> {
    /// `w_d * disease + w_s * severity`
    pub total: Tensor<B, 1>,
    pub disease: Tensor<B, 1>,
    pub severity: Tensor<B, 1>,
}

/// Per-sample soft cross-entropy `-sum(target * log_softmax(logits))`, shape [B]
fn soft_cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let [batch_size, _] = logits.dims();
    (targets * log_softmax(logits, 1))
        .sum_dim(1)
        .neg()
        .reshape([batch_size])
}

/// Joint loss: `w_d * mean(cw[y] * CE_disease) + w_s * mean(CE_severity)`
pub fn joint_loss<B: Backend>(
    logits: &MultiTaskLogits<B>,
    batch: &MultiTaskBatch<B>,
    class_weights: Tensor<B, 1>,
    weights: LossWeights,
) -> LossParts<B> {
    let [batch_size, num_diseases] = logits.disease.dims();

    let sample_weights = (batch.disease_targets.clone() * class_weights.reshape([1, num_diseases]))
        .sum_dim(1)
        .reshape([batch_size]);
    let disease = (soft_cross_entropy(logits.disease.clone(), batch.disease_targets.clone())
        * sample_weights)
        .mean();
    let severity =
        soft_cross_entropy(logits.severity.clone(), batch.severity_targets.clone()).mean();

    let total = disease.clone().mul_scalar(weights.disease) + severity.clone().mul_scalar(weights.severity);
    LossParts {
        total,
        disease,
        severity,
    }
}

/// Number of rows whose argmax matches the label
fn count_correct<B: Backend>(logits: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = logits.dims();
    let correct: i64 = logits
        .argmax(1)
        .reshape([batch_size])
        .equal(labels)
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct.max(0) as usize
}

fn int_vec<B: Backend>(tensor: Tensor<B, 1, Int>) -> Result<Vec<usize>> {
    let values: Vec<i64> = tensor.into_data().convert::<i64>().to_vec().map_err(data_error)?;
    Ok(values.into_iter().map(|v| v.max(0) as usize).collect())
}

/// Accumulates per-batch losses and accuracies over an epoch
#[derive(Debug, Default)]
struct EpochAccumulator {
    loss: RunningAverage,
    disease_loss: RunningAverage,
    severity_loss: RunningAverage,
    disease_correct: usize,
    severity_correct: usize,
    samples: usize,
}

impl EpochAccumulator {
    fn add<B: Backend>(&mut self, parts: &LossParts<B>, logits: &MultiTaskLogits<B>, batch: &MultiTaskBatch<B>) {
        let n = batch.disease_labels.dims()[0];
        let scalar = |t: &Tensor<B, 1>| -> f64 { t.clone().into_scalar().elem() };

        self.loss.add_weighted(scalar(&parts.total), n);
        self.disease_loss.add_weighted(scalar(&parts.disease), n);
        self.severity_loss.add_weighted(scalar(&parts.severity), n);
        self.disease_correct += count_correct(logits.disease.clone(), batch.disease_labels.clone());
        self.severity_correct += count_correct(logits.severity.clone(), batch.severity_labels.clone());
        self.samples += n;
    }

    fn finish(&self) -> SplitMetrics {
        let ratio = |c: usize| if self.samples > 0 { c as f64 / self.samples as f64 } else { 0.0 };
        SplitMetrics {
            loss: self.loss.average(),
            disease_loss: self.disease_loss.average(),
            severity_loss: self.severity_loss.average(),
            disease_accuracy: ratio(self.disease_correct),
            severity_accuracy: ratio(self.severity_correct),
        }
    }
}

/// Full evaluation of a split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub metrics: SplitMetrics,
    pub disease: HeadMetrics,
    pub severity: HeadMetrics,
    /// Quadratic-weighted Cohen's kappa of the severity head
    pub severity_kappa: f64,
    pub samples: usize,
}

/// Deterministic pass over a split. Class weights are not applied, so the
/// reported loss is the plain joint cross-entropy.
pub fn evaluate<B: Backend>(
    model: &MultiTaskClassifier<B>,
    pipeline: &DataPipeline,
    loss_weights: LossWeights,
    device: &B::Device,
) -> Result<Evaluation> {
    let num_diseases = model.num_diseases();
    let batcher = MultiTaskBatcher::new(pipeline.image_size() as usize, num_diseases);
    let unit_weights = Tensor::<B, 1>::ones([num_diseases], device);

    let mut acc = EpochAccumulator::default();
    let (mut disease_pred, mut disease_true) = (Vec::new(), Vec::new());
    let (mut severity_pred, mut severity_true) = (Vec::new(), Vec::new());

    for items in pipeline.epoch(0) {
        let batch: MultiTaskBatch<B> = batcher.try_batch(items?, device)?;
        let logits = model.forward_logits(batch.images.clone(), ForwardMode::Deterministic);
        let parts = joint_loss(&logits, &batch, unit_weights.clone(), loss_weights);
        acc.add(&parts, &logits, &batch);

        let n = batch.disease_labels.dims()[0];
        disease_pred.extend(int_vec(logits.disease.argmax(1).reshape([n]))?);
        severity_pred.extend(int_vec(logits.severity.argmax(1).reshape([n]))?);
        disease_true.extend(int_vec(batch.disease_labels)?);
        severity_true.extend(int_vec(batch.severity_labels)?);
    }

    let severity = HeadMetrics::from_predictions(&severity_pred, &severity_true, SEVERITY_CLASSES);
    Ok(Evaluation {
        metrics: acc.finish(),
        disease: HeadMetrics::from_predictions(&disease_pred, &disease_true, num_diseases),
        severity_kappa: severity.confusion_matrix.quadratic_weighted_kappa(),
        severity,
        samples: acc.samples,
    })
}

/// Tracks the best monitored value and epochs without improvement
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: Option<f64>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: None,
            wait: 0,
        }
    }

    /// Record a metric. Returns true when it strictly beats the best so far
    /// (the first observation always does).
    pub fn observe(&mut self, metric: f64) -> bool {
        let improved = match self.best {
            None => !metric.is_nan(),
            Some(best) => metric > best,
        };
        if improved {
            self.best = Some(metric);
            self.wait = 0;
        } else {
            self.wait += 1;
        }
        improved
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn epochs_without_improvement(&self) -> usize {
        self.wait
    }

    pub fn should_stop(&self) -> bool {
        self.wait >= self.patience
    }
}

/// Where and what to checkpoint
#[derive(Debug, Clone)]
pub struct CheckpointTarget {
    pub dir: PathBuf,
    pub model_config: MultiTaskClassifierConfig,
    pub vocabulary: LabelVocabulary,
}

/// Result of a training run
#[derive(Debug)]
pub struct TrainingOutcome<B: Backend> {
    /// Best-observed weights
    pub model: MultiTaskClassifier<B>,
    pub history: TrainingHistory,
    /// 1-based epoch of the best weights
    pub best_epoch: usize,
    pub best_val_disease_accuracy: f64,
    pub stopped_early: bool,
}

/// Adam configured from the training config
pub fn adam_optimizer<B: AutodiffBackend>(
    config: &TrainingConfig,
) -> impl Optimizer<MultiTaskClassifier<B>, B> {
    AdamConfig::new()
        .with_weight_decay(config.weight_decay.map(|wd| WeightDecayConfig::new(wd as f32)))
        .init()
}

/// Joint trainer for the multi-task classifier
pub struct Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<MultiTaskClassifier<B>, B>,
{
    model: MultiTaskClassifier<B>,
    optimizer: O,
    config: TrainingConfig,
    class_weights: Vec<f32>,
    scheduler: ReduceLrOnPlateau,
    checkpoint: Option<CheckpointTarget>,
    device: B::Device,
}

impl<B, O> Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<MultiTaskClassifier<B>, B>,
{
    pub fn new(
        model: MultiTaskClassifier<B>,
        optimizer: O,
        config: TrainingConfig,
        class_weights: Vec<f32>,
        device: B::Device,
    ) -> Result<Self> {
        config.validate()?;
        if class_weights.len() != model.num_diseases() {
            return Err(DiagnosisError::Training(format!(
                "{} class weights for {} disease classes",
                class_weights.len(),
                model.num_diseases()
            )));
        }
        let scheduler = ReduceLrOnPlateau::new(config.learning_rate, config.plateau);
        Ok(Self {
            model,
            optimizer,
            config,
            class_weights,
            scheduler,
            checkpoint: None,
            device,
        })
    }

    /// Persist the artifact into `target.dir` on every improvement
    pub fn with_checkpoint(mut self, target: CheckpointTarget) -> Self {
        self.checkpoint = Some(target);
        self
    }

    pub fn model(&self) -> &MultiTaskClassifier<B> {
        &self.model
    }

    pub fn learning_rate(&self) -> f64 {
        self.scheduler.lr()
    }

    /// One optimisation pass over the training split at the current learning rate
    pub fn train_epoch(&mut self, pipeline: &DataPipeline, epoch: usize) -> Result<SplitMetrics> {
        let lr = self.scheduler.lr();
        self.train_epoch_at(pipeline, epoch, lr)
    }

    fn train_epoch_at(&mut self, pipeline: &DataPipeline, epoch: usize, lr: f64) -> Result<SplitMetrics> {
        let batcher = MultiTaskBatcher::new(pipeline.image_size() as usize, self.model.num_diseases());
        let class_weights = Tensor::<B, 1>::from_floats(
            TensorData::new(self.class_weights.clone(), [self.class_weights.len()]),
            &self.device,
        );
        let num_batches = pipeline.num_batches();
        let mut acc = EpochAccumulator::default();

        for (batch_idx, items) in pipeline.epoch(epoch).enumerate() {
            let batch: MultiTaskBatch<B> = batcher.try_batch(items?, &self.device)?;

            let features = self.model.forward_features(batch.images.clone());
            let features = if self.config.train_backbone {
                features
            } else {
                features.detach()
            };
            let logits = self.model.forward_heads(features, ForwardMode::Stochastic);
            let parts = joint_loss(&logits, &batch, class_weights.clone(), self.config.loss_weights);
            acc.add(&parts, &logits, &batch);

            let grads = parts.total.backward();
            let grads = GradientsParams::from_grads(grads, &self.model);
            self.model = self.optimizer.step(lr, self.model.clone(), grads);

            if (batch_idx + 1) % 10 == 0 || batch_idx + 1 == num_batches {
                debug!(
                    "  Batch {}/{}: loss = {:.4}, disease acc = {:.2}%",
                    batch_idx + 1,
                    num_batches,
                    acc.loss.average(),
                    100.0 * acc.finish().disease_accuracy
                );
            }
        }

        Ok(acc.finish())
    }

    /// Train until the epoch budget or early stopping, returning the best weights
    pub fn fit(mut self, train: &DataPipeline, val: &DataPipeline) -> Result<TrainingOutcome<B>> {
        if train.is_empty() || val.is_empty() {
            return Err(DiagnosisError::Training(
                "training and validation splits must be non-empty".to_string(),
            ));
        }

        let mut logger = TrainingLogger::new(self.config.epochs);
        let mut stopping = EarlyStopping::new(self.config.early_stopping_patience);
        let mut history = TrainingHistory::default();
        let mut best: Option<(usize, MultiTaskClassifier<B>)> = None;
        let mut stopped_early = false;

        info!(
            "Training on {} samples, validating on {} ({} epochs max)",
            train.len(),
            val.len(),
            self.config.epochs
        );

        for epoch in 0..self.config.epochs {
            logger.start_epoch(epoch);
            let lr = self.scheduler.lr();

            let train_metrics = self.train_epoch_at(train, epoch, lr)?;
            let evaluation = evaluate(&self.model.valid(), val, self.config.loss_weights, &self.device)?;
            let val_metrics = evaluation.metrics;
            history.push(EpochRecord::new(epoch + 1, train_metrics, val_metrics, lr));
            logger.end_epoch(train_metrics.loss, val_metrics.disease_accuracy, lr);

            let previous = stopping.best();
            if stopping.observe(val_metrics.disease_accuracy) {
                if let Some(target) = &self.checkpoint {
                    ModelArtifact::save(
                        &target.dir,
                        &self.model.valid(),
                        &target.model_config,
                        &target.vocabulary,
                    )?;
                }
                logger.log_new_best(previous, val_metrics.disease_accuracy);
                best = Some((epoch + 1, self.model.clone()));
            } else {
                debug!(
                    "No improvement for {} epochs (best: {:.2}%)",
                    stopping.epochs_without_improvement(),
                    stopping.best().unwrap_or(0.0) * 100.0
                );
            }

            if let Some(new_lr) = self.scheduler.step(val_metrics.disease_accuracy) {
                logger.log_lr_reduced(lr, new_lr);
            }

            if stopping.should_stop() {
                logger.log_early_stop(self.config.early_stopping_patience);
                stopped_early = true;
                break;
            }
        }

        let best_val_disease_accuracy = stopping.best().unwrap_or(0.0);
        logger.log_complete(history.len(), best_val_disease_accuracy);

        let (best_epoch, model) = best.unwrap_or((history.len(), self.model));
        Ok(TrainingOutcome {
            model,
            history,
            best_epoch,
            best_val_disease_accuracy,
            stopped_early,
        })
    }
}

/// Write the history CSV next to the checkpoint
pub fn save_history(history: &TrainingHistory, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(super::HISTORY_FILE);
    history.save_csv(&path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::manifest::EncodedSample;
    use crate::model::config::PlateauConfig;
    use burn::backend::{Autodiff, NdArray};
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<NdArray>;

    fn batch_with_targets(
        disease: Vec<f32>,
        severity: Vec<f32>,
        rows: usize,
        num_diseases: usize,
    ) -> MultiTaskBatch<TestBackend> {
        let device = Default::default();
        MultiTaskBatch {
            images: Tensor::zeros([rows, 3, 16, 16], &device),
            disease_targets: Tensor::from_floats(TensorData::new(disease, [rows, num_diseases]), &device),
            severity_targets: Tensor::from_floats(
                TensorData::new(severity, [rows, SEVERITY_CLASSES]),
                &device,
            ),
            disease_labels: Tensor::zeros([rows], &device),
            severity_labels: Tensor::zeros([rows], &device),
        }
    }

    #[test]
    fn test_joint_loss_with_uniform_logits() {
        let device = Default::default();
        let batch = batch_with_targets(vec![1.0, 0.0], vec![0.0, 1.0, 0.0, 0.0], 1, 2);
        let logits = MultiTaskLogits {
            disease: Tensor::<TestBackend, 2>::zeros([1, 2], &device),
            severity: Tensor::<TestBackend, 2>::zeros([1, 4], &device),
        };

        let parts = joint_loss(&logits, &batch, Tensor::ones([2], &device), LossWeights::default());
        let total: f32 = parts.total.into_scalar().elem();
        let expected = 2.0f32.ln() + 0.5 * 4.0f32.ln();
        assert!((total - expected).abs() < 1e-5);
    }

    #[test]
    fn test_class_weights_scale_disease_loss_only() {
        let device = Default::default();
        let batch = batch_with_targets(
            vec![1.0, 0.0, 0.0, 1.0],
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
            2,
            2,
        );
        let logits = MultiTaskLogits {
            disease: Tensor::<TestBackend, 2>::zeros([2, 2], &device),
            severity: Tensor::<TestBackend, 2>::zeros([2, 4], &device),
        };
        let weights = Tensor::from_floats([0.5, 1.5], &device);

        let parts = joint_loss(&logits, &batch, weights, LossWeights::default());
        let disease: f32 = parts.disease.into_scalar().elem();
        let severity: f32 = parts.severity.into_scalar().elem();
        // mean(0.5 * ln2, 1.5 * ln2) = ln2
        assert!((disease - 2.0f32.ln()).abs() < 1e-5);
        assert!((severity - 4.0f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_early_stopping_counts_stalled_epochs() {
        let mut stopping = EarlyStopping::new(2);
        assert!(stopping.observe(0.0));
        assert!(!stopping.observe(0.0));
        assert!(stopping.observe(0.4));
        assert!(!stopping.observe(0.4));
        assert!(!stopping.should_stop());
        assert!(!stopping.observe(0.3));
        assert!(stopping.should_stop());
        assert_eq!(stopping.best(), Some(0.4));
    }

    fn write_split(dir: &Path, count: usize) -> Vec<EncodedSample> {
        std::fs::create_dir_all(dir).unwrap();
        (0..count)
            .map(|i| {
                let disease = i % 2;
                let path = dir.join(format!("{}.png", i));
                let colour = if disease == 0 { [200, 30, 30] } else { [30, 200, 30] };
                RgbImage::from_pixel(16, 16, Rgb(colour)).save(&path).unwrap();
                EncodedSample {
                    path,
                    disease,
                    severity: i % 4,
                }
            })
            .collect()
    }

    fn tiny_config() -> TrainingConfig {
        TrainingConfig {
            image_size: 16,
            batch_size: 4,
            learning_rate: 1e-3,
            epochs: 3,
            early_stopping_patience: 5,
            base_filters: 2,
            augmentation: crate::dataset::augmentation::AugmentationPolicy::None,
            ..Default::default()
        }
    }

    #[test]
    fn test_fit_records_history_and_checkpoints() {
        let dir = TempDir::new().unwrap();
        let train = DataPipeline::new(write_split(&dir.path().join("train"), 8), 16, 4)
            .unwrap()
            .with_shuffle(true, 1);
        let val = DataPipeline::new(write_split(&dir.path().join("val"), 4), 16, 4).unwrap();

        let config = tiny_config();
        let model_config = config.model_config(2);
        let device = Default::default();
        let model = model_config.init::<TestAutodiffBackend>(&device).unwrap();
        let vocabulary = LabelVocabulary::from_labels(["a", "b"]);
        let checkpoint_dir = dir.path().join("model");

        let trainer = Trainer::new(
            model,
            adam_optimizer::<TestAutodiffBackend>(&config),
            config.clone(),
            vec![1.0, 1.0],
            device,
        )
        .unwrap()
        .with_checkpoint(CheckpointTarget {
            dir: checkpoint_dir.clone(),
            model_config,
            vocabulary,
        });

        let outcome = trainer.fit(&train, &val).unwrap();
        assert_eq!(outcome.history.len(), 3);
        assert!(outcome.best_epoch >= 1 && outcome.best_epoch <= 3);
        assert_eq!(
            outcome.history.best().map(|r| r.val_disease_accuracy),
            Some(outcome.best_val_disease_accuracy)
        );
        assert!(ModelArtifact::<TestBackend>::weights_path(&checkpoint_dir).exists());

        let history_path = save_history(&outcome.history, &checkpoint_dir).unwrap();
        assert!(history_path.exists());
    }

    fn deterministic_config(epochs: usize) -> TrainingConfig {
        TrainingConfig {
            epochs,
            learning_rate: 0.05,
            dropout_rate: 0.0,
            shuffle: false,
            early_stopping_patience: 10,
            plateau: PlateauConfig {
                factor: 0.5,
                patience: 1,
                min_lr: 1e-6,
                min_delta: 1e-4,
            },
            ..tiny_config()
        }
    }

    /// Training split plus a validation split whose two samples share one
    /// image but carry opposite labels, so validation accuracy stays at 0.5
    fn deterministic_splits(dir: &Path) -> (DataPipeline, DataPipeline) {
        let train = DataPipeline::new(write_split(&dir.join("train"), 8), 16, 4).unwrap();
        let image = dir.join("same.png");
        RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 16) as u8, (y * 16) as u8, 80]))
            .save(&image)
            .unwrap();
        let val_samples = (0..2)
            .map(|disease| EncodedSample {
                path: image.clone(),
                disease,
                severity: 0,
            })
            .collect();
        let val = DataPipeline::new(val_samples, 16, 2).unwrap();
        (train, val)
    }

    fn fixed_input() -> Tensor<TestBackend, 4> {
        let values: Vec<f32> = (0..3 * 16 * 16).map(|i| (i % 17) as f32 / 17.0).collect();
        Tensor::from_floats(TensorData::new(values, [1, 3, 16, 16]), &Default::default())
    }

    fn logits_of(model: &MultiTaskClassifier<TestAutodiffBackend>) -> Vec<f32> {
        let logits = model.valid().forward_logits(fixed_input(), ForwardMode::Deterministic);
        let mut values: Vec<f32> = logits.disease.into_data().to_vec().unwrap();
        values.extend(logits.severity.into_data().to_vec::<f32>().unwrap());
        values
    }

    fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
    }

    fn fit_from(
        model: MultiTaskClassifier<TestAutodiffBackend>,
        config: &TrainingConfig,
        checkpoint_dir: &Path,
        train: &DataPipeline,
        val: &DataPipeline,
    ) -> TrainingOutcome<TestAutodiffBackend> {
        Trainer::new(
            model,
            adam_optimizer::<TestAutodiffBackend>(config),
            config.clone(),
            vec![1.0, 1.0],
            Default::default(),
        )
        .unwrap()
        .with_checkpoint(CheckpointTarget {
            dir: checkpoint_dir.to_path_buf(),
            model_config: config.model_config(2),
            vocabulary: LabelVocabulary::from_labels(["a", "b"]),
        })
        .fit(train, val)
        .unwrap()
    }

    #[test]
    fn test_fit_returns_best_epoch_weights_and_keeps_its_checkpoint() {
        let dir = TempDir::new().unwrap();
        let (train, val) = deterministic_splits(dir.path());
        let config = deterministic_config(3);
        let device = Default::default();
        let initial = config.model_config(2).init::<TestAutodiffBackend>(&device).unwrap();

        let one_epoch = fit_from(
            initial.clone(),
            &TrainingConfig {
                epochs: 1,
                ..config.clone()
            },
            &dir.path().join("one"),
            &train,
            &val,
        );
        let three_epochs = fit_from(initial.clone(), &config, &dir.path().join("three"), &train, &val);

        assert_eq!(three_epochs.history.len(), 3);
        assert!(three_epochs.history.records.iter().all(|r| r.val_disease_accuracy == 0.5));
        assert_eq!(three_epochs.best_epoch, 1);
        assert!(max_abs_diff(&logits_of(&three_epochs.model), &logits_of(&one_epoch.model)) < 1e-5);

        // the same three epochs without restoring end somewhere else
        let mut trainer = Trainer::new(
            initial,
            adam_optimizer::<TestAutodiffBackend>(&config),
            config.clone(),
            vec![1.0, 1.0],
            device,
        )
        .unwrap();
        for epoch in 0..3 {
            trainer.train_epoch(&train, epoch).unwrap();
        }
        assert!(max_abs_diff(&logits_of(trainer.model()), &logits_of(&one_epoch.model)) > 1e-4);

        // epochs 2 and 3 did not improve, so the epoch-1 checkpoint survives
        let weights = |name: &str| {
            std::fs::read(ModelArtifact::<TestBackend>::weights_path(&dir.path().join(name))).unwrap()
        };
        assert_eq!(weights("one"), weights("three"));
    }

    #[test]
    fn test_frozen_backbone_only_updates_heads() {
        let dir = TempDir::new().unwrap();
        let (train, _) = deterministic_splits(dir.path());
        let config = TrainingConfig {
            train_backbone: false,
            ..deterministic_config(1)
        };
        let device = Default::default();
        let model = config.model_config(2).init::<TestAutodiffBackend>(&device).unwrap();
        let features_before: Vec<f32> =
            model.valid().forward_features(fixed_input()).into_data().to_vec().unwrap();
        let logits_before = logits_of(&model);

        let mut trainer = Trainer::new(
            model,
            adam_optimizer::<TestAutodiffBackend>(&config),
            config,
            vec![1.0, 1.0],
            device,
        )
        .unwrap();
        trainer.train_epoch(&train, 0).unwrap();

        let features_after: Vec<f32> =
            trainer.model().valid().forward_features(fixed_input()).into_data().to_vec().unwrap();
        assert_eq!(features_before, features_after);
        assert!(max_abs_diff(&logits_before, &logits_of(trainer.model())) > 1e-4);
    }

    #[test]
    fn test_plateau_reduction_reaches_later_epochs() {
        let dir = TempDir::new().unwrap();
        let (train, val) = deterministic_splits(dir.path());
        let config = deterministic_config(4);
        let model = config.model_config(2).init::<TestAutodiffBackend>(&Default::default()).unwrap();

        let outcome = fit_from(model, &config, &dir.path().join("model"), &train, &val);
        let rates: Vec<f64> = outcome.history.records.iter().map(|r| r.learning_rate).collect();
        // epoch 1 sets the best, every later epoch stalls and halves the rate
        assert_eq!(rates.len(), 4);
        assert!((rates[0] - 0.05).abs() < 1e-12);
        assert!((rates[1] - 0.05).abs() < 1e-12);
        assert!((rates[2] - 0.025).abs() < 1e-12);
        assert!((rates[3] - 0.0125).abs() < 1e-12);
        assert!(!outcome.stopped_early);
    }

    #[test]
    fn test_class_weight_length_mismatch() {
        let config = tiny_config();
        let device = Default::default();
        let model = config.model_config(3).init::<TestAutodiffBackend>(&device).unwrap();
        let result = Trainer::new(
            model,
            adam_optimizer::<TestAutodiffBackend>(&config),
            config,
            vec![1.0],
            device,
        );
        assert!(matches!(result, Err(DiagnosisError::Training(_))));
    }
}
