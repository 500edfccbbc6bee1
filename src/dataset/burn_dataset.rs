//! Burn Dataset Integration for Leaf Diagnosis
//!
//! This module implements Burn's Dataset trait and Batcher for the
//! multi-task (disease + severity) training data, plus the epoch-level
//! [`DataPipeline`] that shuffles, decodes and augments samples.
//!
//! Decoding happens per batch in parallel with rayon. A sample that fails to
//! decode aborts the batch with an error; samples are never skipped.

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

use crate::dataset::augmentation::Augmenter;
use crate::dataset::manifest::EncodedSample;
use crate::inference::preprocess::{image_to_chw, load_normalized};
use crate::utils::error::{DiagnosisError, Result, ResultExt};
use crate::SEVERITY_CLASSES;

/// A decoded sample ready for batching
#[derive(Clone, Debug)]
pub struct LeafItem {
    /// Image data as flattened CHW float array [3 * H * W], values in [0, 1]
    pub image: Vec<f32>,
    pub disease: usize,
    pub severity: usize,
    /// Image path (for debugging/logging)
    pub path: String,
}

/// Encoded samples in manifest order
#[derive(Debug, Clone, Default)]
pub struct LeafDataset {
    samples: Vec<EncodedSample>,
}

impl LeafDataset {
    pub fn new(samples: Vec<EncodedSample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[EncodedSample] {
        &self.samples
    }

    /// Samples per disease class
    pub fn disease_distribution(&self, num_diseases: usize) -> Vec<usize> {
        let mut counts = vec![0usize; num_diseases];
        for sample in &self.samples {
            if sample.disease < num_diseases {
                counts[sample.disease] += 1;
            }
        }
        counts
    }
}

impl Dataset<EncodedSample> for LeafDataset {
    fn get(&self, index: usize) -> Option<EncodedSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of leaf images with both label sets
#[derive(Clone, Debug)]
pub struct MultiTaskBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// One-hot disease labels [batch_size, num_diseases]
    pub disease_targets: Tensor<B, 2>,
    /// One-hot severity labels [batch_size, 4]
    pub severity_targets: Tensor<B, 2>,
    /// Disease indices [batch_size]
    pub disease_labels: Tensor<B, 1, Int>,
    /// Severity indices [batch_size]
    pub severity_labels: Tensor<B, 1, Int>,
}

/// Batcher producing [`MultiTaskBatch`]es
#[derive(Clone, Debug)]
pub struct MultiTaskBatcher {
    image_size: usize,
    num_diseases: usize,
}

impl MultiTaskBatcher {
    pub fn new(image_size: usize, num_diseases: usize) -> Self {
        Self {
            image_size,
            num_diseases,
        }
    }
}

/// One-hot encode `labels` into a flat `[labels.len(), width]` buffer
pub fn one_hot(labels: &[usize], width: usize) -> Result<Vec<f32>> {
    if let Some((row, &label)) = labels.iter().enumerate().find(|&(_, &label)| label >= width) {
        return Err(DiagnosisError::InvalidInput(format!(
            "label {} in row {} is out of range for {} classes",
            label, row, width
        )));
    }
    Ok(encode_rows(labels, width))
}

// rows with an out-of-range label stay all-zero
fn encode_rows(labels: &[usize], width: usize) -> Vec<f32> {
    let mut data = vec![0.0f32; labels.len() * width];
    for (row, &label) in labels.iter().enumerate() {
        debug_assert!(label < width, "label {} out of range for {} classes", label, width);
        if label < width {
            data[row * width + label] = 1.0;
        }
    }
    data
}

impl MultiTaskBatcher {
    /// Build a batch, rejecting items whose labels fall outside either head
    pub fn try_batch<B: Backend>(&self, items: Vec<LeafItem>, device: &B::Device) -> Result<MultiTaskBatch<B>> {
        let diseases: Vec<usize> = items.iter().map(|item| item.disease).collect();
        let severities: Vec<usize> = items.iter().map(|item| item.severity).collect();
        let disease_targets = one_hot(&diseases, self.num_diseases)?;
        let severity_targets = one_hot(&severities, SEVERITY_CLASSES)?;
        Ok(self.assemble(&items, disease_targets, severity_targets, device))
    }

    fn assemble<B: Backend>(
        &self,
        items: &[LeafItem],
        disease_targets: Vec<f32>,
        severity_targets: Vec<f32>,
        device: &B::Device,
    ) -> MultiTaskBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );

        let disease_targets = Tensor::<B, 2>::from_floats(
            TensorData::new(disease_targets, [batch_size, self.num_diseases]),
            device,
        );
        let severity_targets = Tensor::<B, 2>::from_floats(
            TensorData::new(severity_targets, [batch_size, SEVERITY_CLASSES]),
            device,
        );

        let diseases: Vec<i64> = items.iter().map(|item| item.disease as i64).collect();
        let severities: Vec<i64> = items.iter().map(|item| item.severity as i64).collect();
        let disease_labels = Tensor::<B, 1, Int>::from_data(TensorData::new(diseases, [batch_size]), device);
        let severity_labels =
            Tensor::<B, 1, Int>::from_data(TensorData::new(severities, [batch_size]), device);

        MultiTaskBatch {
            images,
            disease_targets,
            severity_targets,
            disease_labels,
            severity_labels,
        }
    }
}

impl<B: Backend> Batcher<B, LeafItem, MultiTaskBatch<B>> for MultiTaskBatcher {
    fn batch(&self, items: Vec<LeafItem>, device: &B::Device) -> MultiTaskBatch<B> {
        let diseases: Vec<usize> = items.iter().map(|item| item.disease).collect();
        let severities: Vec<usize> = items.iter().map(|item| item.severity).collect();
        let disease_targets = encode_rows(&diseases, self.num_diseases);
        let severity_targets = encode_rows(&severities, SEVERITY_CLASSES);
        self.assemble(&items, disease_targets, severity_targets, device)
    }
}

/// Derive the augmentation rng for one sample so results do not depend on
/// which worker thread decodes it
pub fn sample_rng(seed: u64, epoch: usize, index: usize) -> ChaCha8Rng {
    let mut x = seed
        ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (index as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
    // splitmix64 finaliser
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    ChaCha8Rng::seed_from_u64(x ^ (x >> 31))
}

/// Epoch-level loader: ordering, decoding, augmentation and batching
#[derive(Debug, Clone)]
pub struct DataPipeline {
    dataset: LeafDataset,
    image_size: u32,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
    augmenter: Option<Augmenter>,
}

impl DataPipeline {
    /// Unshuffled, unaugmented pipeline (validation/evaluation)
    pub fn new(samples: Vec<EncodedSample>, image_size: u32, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(DiagnosisError::Config("batch size must be positive".to_string()));
        }
        if image_size == 0 {
            return Err(DiagnosisError::Config("image size must be positive".to_string()));
        }
        Ok(Self {
            dataset: LeafDataset::new(samples),
            image_size,
            batch_size,
            shuffle: false,
            seed: 0,
            augmenter: None,
        })
    }

    /// Reshuffle the whole split every epoch
    pub fn with_shuffle(mut self, shuffle: bool, seed: u64) -> Self {
        self.shuffle = shuffle;
        self.seed = seed;
        self
    }

    pub fn with_augmenter(mut self, augmenter: Option<Augmenter>) -> Self {
        self.augmenter = augmenter;
        self
    }

    pub fn dataset(&self) -> &LeafDataset {
        &self.dataset
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Number of batches per epoch, counting the final partial batch
    pub fn num_batches(&self) -> usize {
        self.len().div_ceil(self.batch_size)
    }

    /// Sample order for an epoch: manifest order, or a fresh permutation
    pub fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        if self.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        order
    }

    /// Decode (and augment) one sample
    pub fn load_item(&self, index: usize, epoch: usize) -> Result<LeafItem> {
        let sample = self
            .dataset
            .get(index)
            .with_context(|| format!("sample index {} out of range ({} samples)", index, self.len()))?;

        let mut image = load_normalized(&sample.path, self.image_size)?;
        if let Some(augmenter) = &self.augmenter {
            let mut rng = sample_rng(self.seed, epoch, index);
            image = augmenter.augment(image, &mut rng);
        }

        Ok(LeafItem {
            image: image_to_chw(&image),
            disease: sample.disease,
            severity: sample.severity,
            path: sample.path.to_string_lossy().to_string(),
        })
    }

    /// Iterate the batches of one epoch
    pub fn epoch(&self, epoch: usize) -> EpochBatches<'_> {
        let order = self.epoch_order(epoch);
        debug!(
            "Epoch {}: {} samples in {} batches (shuffle: {})",
            epoch,
            order.len(),
            self.num_batches(),
            self.shuffle
        );
        EpochBatches {
            pipeline: self,
            order,
            epoch,
            cursor: 0,
        }
    }
}

/// Batches of decoded items for one epoch
pub struct EpochBatches<'a> {
    pipeline: &'a DataPipeline,
    order: Vec<usize>,
    epoch: usize,
    cursor: usize,
}

impl Iterator for EpochBatches<'_> {
    type Item = Result<Vec<LeafItem>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.pipeline.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        self.cursor = end;

        let epoch = self.epoch;
        Some(
            indices
                .par_iter()
                .map(|&index| self.pipeline.load_item(index, epoch))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn write_samples(dir: &TempDir, count: usize) -> Vec<EncodedSample> {
        (0..count)
            .map(|i| {
                let path = dir.path().join(format!("leaf_{}.png", i));
                RgbImage::from_pixel(10, 10, Rgb([(i * 20) as u8, 0, 0]))
                    .save(&path)
                    .unwrap();
                EncodedSample {
                    path,
                    disease: i % 2,
                    severity: i % 4,
                }
            })
            .collect()
    }

    #[test]
    fn test_one_hot_has_single_one_per_row() {
        let data = one_hot(&[0, 3, 2], SEVERITY_CLASSES).unwrap();
        for row in data.chunks(SEVERITY_CLASSES) {
            assert_eq!(row.iter().filter(|&&v| v == 1.0).count(), 1);
            assert_eq!(row.iter().sum::<f32>(), 1.0);
        }
        assert_eq!(data[SEVERITY_CLASSES + 3], 1.0);
    }

    #[test]
    fn test_one_hot_rejects_out_of_range_label() {
        let err = one_hot(&[0, 9], SEVERITY_CLASSES).unwrap_err();
        assert!(matches!(err, DiagnosisError::InvalidInput(_)));
        assert!(err.to_string().contains("label 9 in row 1"));
    }

    #[test]
    fn test_try_batch_rejects_unknown_disease_index() {
        let device = Default::default();
        let items = vec![LeafItem {
            image: vec![0.5; 3 * 4 * 4],
            disease: 3,
            severity: 1,
            path: "bad.png".to_string(),
        }];
        let result: Result<MultiTaskBatch<TestBackend>> = MultiTaskBatcher::new(4, 3).try_batch(items, &device);
        assert!(matches!(result, Err(DiagnosisError::InvalidInput(_))));
    }

    #[test]
    fn test_batcher_shapes_and_alignment() {
        let items: Vec<LeafItem> = (0..3)
            .map(|i| LeafItem {
                image: vec![i as f32; 3 * 4 * 4],
                disease: i,
                severity: 3 - i,
                path: format!("{}.png", i),
            })
            .collect();

        let device = Default::default();
        let batch: MultiTaskBatch<TestBackend> = MultiTaskBatcher::new(4, 3).batch(items, &device);

        assert_eq!(batch.images.dims(), [3, 3, 4, 4]);
        assert_eq!(batch.disease_targets.dims(), [3, 3]);
        assert_eq!(batch.severity_targets.dims(), [3, SEVERITY_CLASSES]);

        let sev: Vec<f32> = batch.severity_targets.into_data().to_vec().unwrap();
        assert_eq!(&sev[0..4], &[0.0, 0.0, 0.0, 1.0]);
        let labels: Vec<i64> = batch.disease_labels.into_data().to_vec().unwrap();
        assert_eq!(labels, vec![0, 1, 2]);
        let pixels: Vec<f32> = batch.images.into_data().to_vec().unwrap();
        assert_eq!(pixels[48], 1.0);
    }

    #[test]
    fn test_pipeline_keeps_partial_batch_and_order() {
        let dir = TempDir::new().unwrap();
        let pipeline = DataPipeline::new(write_samples(&dir, 5), 8, 2).unwrap();

        assert_eq!(pipeline.num_batches(), 3);
        let batches: Vec<Vec<LeafItem>> = pipeline.epoch(0).map(|b| b.unwrap()).collect();
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
        assert!(batches[0][0].path.ends_with("leaf_0.png"));
        assert!(batches[2][0].path.ends_with("leaf_4.png"));
        assert_eq!(batches[0][0].image.len(), 3 * 8 * 8);
    }

    #[test]
    fn test_shuffle_is_seeded_and_varies_by_epoch() {
        let dir = TempDir::new().unwrap();
        let samples = write_samples(&dir, 20);
        let a = DataPipeline::new(samples.clone(), 8, 4).unwrap().with_shuffle(true, 42);
        let b = DataPipeline::new(samples, 8, 4).unwrap().with_shuffle(true, 42);

        assert_eq!(a.epoch_order(0), b.epoch_order(0));
        assert_ne!(a.epoch_order(0), a.epoch_order(1));

        let mut sorted = a.epoch_order(3);
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_augmented_items_are_reproducible() {
        let dir = TempDir::new().unwrap();
        let pipeline = DataPipeline::new(write_samples(&dir, 3), 8, 3)
            .unwrap()
            .with_shuffle(true, 7)
            .with_augmenter(Some(Augmenter::heavy(4)));

        let first = pipeline.load_item(1, 2).unwrap();
        let second = pipeline.load_item(1, 2).unwrap();
        assert_eq!(first.image, second.image);
        assert!(first.image.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_decode_failure_aborts_batch() {
        let dir = TempDir::new().unwrap();
        let mut samples = write_samples(&dir, 2);
        samples.push(EncodedSample {
            path: dir.path().join("missing.png"),
            disease: 0,
            severity: 0,
        });

        let pipeline = DataPipeline::new(samples, 8, 4).unwrap();
        let result = pipeline.epoch(0).next().unwrap();
        assert!(matches!(result, Err(DiagnosisError::ImageLoad(_, _))));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(matches!(
            DataPipeline::new(Vec::new(), 8, 0),
            Err(DiagnosisError::Config(_))
        ));
    }

    #[test]
    fn test_disease_distribution() {
        let dir = TempDir::new().unwrap();
        let pipeline = DataPipeline::new(write_samples(&dir, 5), 8, 2).unwrap();
        assert_eq!(pipeline.dataset().disease_distribution(2), vec![3, 2]);
    }
}
