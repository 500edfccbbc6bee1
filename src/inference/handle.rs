//! Process-wide model handle
//!
//! The model and its vocabulary are loaded once and shared by every request.
//! Each request works on its own clone of the weights, so dropout masks and
//! gradient tapes never cross requests.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use burn::module::AutodiffModule;
use burn::tensor::{backend::AutodiffBackend, Tensor};
use image::{DynamicImage, RgbImage};
use tracing::info;

use crate::backend::{default_device, TrainingBackend};
use crate::dataset::vocabulary::LabelVocabulary;
use crate::inference::preprocess::preprocess_tensor;
use crate::inference::report::Diagnosis;
use crate::inference::saliency::{generate_grad_cam, Heatmap};
use crate::inference::uncertainty::{argmax, estimate, PredictionResult};
use crate::model::artifact::ModelArtifact;
use crate::model::multitask::{MultiTaskClassifier, MultiTaskClassifierConfig};
use crate::utils::error::{data_error, DiagnosisError, Result};

static GLOBAL: OnceLock<ModelHandle<TrainingBackend>> = OnceLock::new();

/// Loaded model, architecture and vocabulary
#[derive(Debug)]
pub struct ModelHandle<B: AutodiffBackend> {
    dir: PathBuf,
    model: Mutex<MultiTaskClassifier<B>>,
    config: MultiTaskClassifierConfig,
    vocabulary: LabelVocabulary,
    device: B::Device,
}

impl<B: AutodiffBackend> ModelHandle<B> {
    /// Load an artifact directory
    pub fn load(dir: &Path, device: B::Device) -> Result<Self> {
        let artifact = ModelArtifact::<B>::load(dir, &device)?;
        Ok(Self {
            dir: dir.canonicalize()?,
            model: Mutex::new(artifact.model),
            config: artifact.config,
            vocabulary: artifact.vocabulary,
            device,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &MultiTaskClassifierConfig {
        &self.config
    }

    pub fn vocabulary(&self) -> &LabelVocabulary {
        &self.vocabulary
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Square input size the model was built for
    pub fn image_size(&self) -> u32 {
        self.config.input_size as u32
    }

    /// A private copy of the weights for one request
    pub fn model(&self) -> Result<MultiTaskClassifier<B>> {
        self.model
            .lock()
            .map(|model| model.clone())
            .map_err(|_| DiagnosisError::Model("model lock poisoned".to_string()))
    }

    /// Original image plus a normalised `[1, 3, S, S]` batch
    pub fn preprocess(&self, image: &DynamicImage) -> (RgbImage, Tensor<B, 4>) {
        preprocess_tensor::<B>(image, self.image_size(), &self.device)
    }

    /// MC-dropout prediction on the inner backend
    pub fn estimate(&self, image: &DynamicImage, samples: usize) -> Result<PredictionResult> {
        let model = self.model()?.valid();
        let (_, batch) = preprocess_tensor::<B::InnerBackend>(image, self.image_size(), &self.device);
        estimate(&model, batch, samples)
    }

    /// Disease argmax of a single pass with dropout disabled
    pub fn predicted_class(&self, image: &DynamicImage) -> Result<usize> {
        let model = self.model()?.valid();
        let (_, batch) = preprocess_tensor::<B::InnerBackend>(image, self.image_size(), &self.device);
        let probs: Vec<f32> = model
            .predict(batch)
            .disease
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(data_error)?;
        Ok(argmax(&probs))
    }

    /// Grad-CAM for `class_index` at `layer`
    pub fn saliency(&self, image: &DynamicImage, class_index: usize, layer: &str) -> Result<Heatmap> {
        let (_, batch) = self.preprocess(image);
        generate_grad_cam(&self.model()?, batch, class_index, layer)
    }

    /// Grad-CAM for `class_index`, or for [`ModelHandle::predicted_class`] when none is given
    pub fn saliency_for(
        &self,
        image: &DynamicImage,
        class_index: Option<usize>,
        layer: &str,
    ) -> Result<(usize, Heatmap)> {
        let class_index = match class_index {
            Some(index) => index,
            None => self.predicted_class(image)?,
        };
        Ok((class_index, self.saliency(image, class_index, layer)?))
    }

    /// Prediction plus report, optionally focused on one crop
    pub fn diagnose(
        &self,
        image: &DynamicImage,
        samples: usize,
        crop_focus: Option<&str>,
    ) -> Result<(PredictionResult, Diagnosis)> {
        let prediction = self.estimate(image, samples)?;
        let diagnosis = Diagnosis::new(&prediction, &self.vocabulary, crop_focus);
        Ok((prediction, diagnosis))
    }
}

impl ModelHandle<TrainingBackend> {
    /// Load the process-wide handle once; later calls return the same handle.
    ///
    /// Asking for a different directory after initialisation is an error.
    pub fn load_global(dir: &Path) -> Result<&'static ModelHandle<TrainingBackend>> {
        if let Some(handle) = GLOBAL.get() {
            return Self::check_same_dir(handle, dir);
        }

        let handle = ModelHandle::load(dir, default_device())?;
        if GLOBAL.set(handle).is_ok() {
            info!("Model handle initialised from {:?}", dir);
        }
        match GLOBAL.get() {
            Some(handle) => Self::check_same_dir(handle, dir),
            None => Err(DiagnosisError::Model("model handle failed to initialise".to_string())),
        }
    }

    /// The handle if [`ModelHandle::load_global`] has succeeded
    pub fn global() -> Option<&'static ModelHandle<TrainingBackend>> {
        GLOBAL.get()
    }

    fn check_same_dir(
        handle: &'static ModelHandle<TrainingBackend>,
        dir: &Path,
    ) -> Result<&'static ModelHandle<TrainingBackend>> {
        let requested = dir.canonicalize()?;
        if requested == handle.dir {
            Ok(handle)
        } else {
            Err(DiagnosisError::Config(format!(
                "model already loaded from {:?}, cannot switch to {:?}",
                handle.dir, requested
            )))
        }
    }
}
