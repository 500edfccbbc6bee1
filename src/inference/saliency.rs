//! Grad-CAM saliency maps
//!
//! The backbone output at a named layer is detached and re-entered as a
//! gradient leaf, the rest of the network runs deterministically, and the
//! gradient of the chosen disease logit with respect to that leaf weights the
//! feature channels. The resulting map is rectified and scaled by its own
//! maximum.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use image::{imageops, imageops::FilterType, ImageBuffer, Luma, Rgb, RgbImage};
use tracing::debug;

use crate::model::multitask::{ForwardMode, MultiTaskClassifier};
use crate::utils::error::{data_error, DiagnosisError, Result};

/// Heatmap share of an overlay pixel
pub const DEFAULT_OVERLAY_ALPHA: f32 = 0.4;

/// Row-major map of values in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct Heatmap {
    pub width: u32,
    pub height: u32,
    pub values: Vec<f32>,
}

impl Heatmap {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        if values.len() != (width as usize) * (height as usize) {
            return Err(DiagnosisError::Shape(format!(
                "{} values for a {}x{} heatmap",
                values.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[(y * self.width + x) as usize]
    }

    pub fn max(&self) -> f32 {
        self.values.iter().copied().fold(0.0, f32::max)
    }

    /// Bilinear resize to `width` x `height`
    pub fn upsample(&self, width: u32, height: u32) -> Result<Heatmap> {
        if width == self.width && height == self.height {
            return Ok(self.clone());
        }
        let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_raw(self.width, self.height, self.values.clone()).ok_or_else(|| {
                DiagnosisError::Shape(format!("cannot view {}x{} heatmap as an image", self.width, self.height))
            })?;
        let resized = imageops::resize(&buffer, width, height, FilterType::Triangle);
        let values = resized.into_raw().into_iter().map(|v| v.clamp(0.0, 1.0)).collect();
        Heatmap::new(width, height, values)
    }

    /// JET-coloured rendering
    pub fn to_color_image(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| jet_colormap(heat_level(self.get(x, y))))
    }
}

/// 8-bit level of a [0, 1] heat value
fn heat_level(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0) as u8
}

/// JET colormap: blue through cyan, yellow to red
pub fn jet_colormap(level: u8) -> Rgb<u8> {
    let v = level as f32 / 255.0;
    let channel = |offset: f32| -> u8 {
        let c = (1.5 - (4.0 * v - offset).abs()).clamp(0.0, 1.0);
        (c * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Alpha-blend the colour-mapped heatmap over `original`.
/// The heatmap is upsampled to the image size first.
pub fn overlay(original: &RgbImage, heatmap: &Heatmap, alpha: f32) -> Result<RgbImage> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(DiagnosisError::InvalidInput(format!(
            "overlay alpha must be in [0, 1], got {}",
            alpha
        )));
    }
    let (width, height) = original.dimensions();
    let heat = heatmap.upsample(width, height)?.to_color_image();

    let mut out = original.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let Rgb(h) = *heat.get_pixel(x, y);
        for (c, value) in pixel.0.iter_mut().enumerate() {
            *value = (alpha * h[c] as f32 + (1.0 - alpha) * *value as f32).round() as u8;
        }
    }
    Ok(out)
}

/// Channel-weighted, rectified, max-normalised activation map.
///
/// `features` and `gradients` are `[1, C, H, W]`; each channel's weight is
/// the spatial mean of its gradient. An all-zero map stays all zero.
pub fn class_activation_map<B: Backend>(features: Tensor<B, 4>, gradients: Tensor<B, 4>) -> Result<Heatmap> {
    let dims = features.dims();
    if dims != gradients.dims() || dims[0] != 1 {
        return Err(DiagnosisError::Shape(format!(
            "features {:?} and gradients {:?} must share a [1, C, H, W] shape",
            dims,
            gradients.dims()
        )));
    }
    let [_, _, height, width] = dims;

    let weights = gradients.mean_dim(3).mean_dim(2);
    let cam = (features * weights)
        .sum_dim(1)
        .clamp_min(0.0)
        .reshape([height * width]);
    let mut values: Vec<f32> = cam.into_data().convert::<f32>().to_vec().map_err(data_error)?;

    let max = values.iter().copied().fold(0.0f32, f32::max);
    if max > 0.0 {
        values.iter_mut().for_each(|v| *v /= max);
    }
    Heatmap::new(width as u32, height as u32, values)
}

/// Grad-CAM of disease class `class_index` at backbone layer `layer`
pub fn generate_grad_cam<B: AutodiffBackend>(
    model: &MultiTaskClassifier<B>,
    batch: Tensor<B, 4>,
    class_index: usize,
    layer: &str,
) -> Result<Heatmap> {
    let [batch_size, _, _, _] = batch.dims();
    if batch_size != 1 {
        return Err(DiagnosisError::Shape(format!(
            "saliency expects a single image, got a batch of {}",
            batch_size
        )));
    }
    if class_index >= model.num_diseases() {
        return Err(DiagnosisError::InvalidInput(format!(
            "class index {} out of range for {} disease classes",
            class_index,
            model.num_diseases()
        )));
    }
    MultiTaskClassifier::<B>::layer_index(layer)?;

    let tap = model.forward_until(batch, layer)?.detach().require_grad();
    let features = model.forward_from(tap.clone(), layer)?;
    let logits = model.forward_heads(features, ForwardMode::Deterministic).disease;
    let score = logits.slice([0..1, class_index..class_index + 1]).sum();

    let grads = score.backward();
    let gradients = tap
        .grad(&grads)
        .ok_or_else(|| DiagnosisError::Model(format!("no gradient reached layer '{}'", layer)))?;

    let heatmap = class_activation_map(tap.inner(), gradients)?;
    debug!(
        "Grad-CAM for class {} at '{}': {}x{} map, peak {:.3}",
        class_index,
        layer,
        heatmap.width,
        heatmap.height,
        heatmap.max()
    );
    Ok(heatmap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::multitask::MultiTaskClassifierConfig;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<NdArray>;

    fn tensor(values: Vec<f32>, shape: [usize; 4]) -> Tensor<TestBackend, 4> {
        Tensor::from_floats(TensorData::new(values, shape), &Default::default())
    }

    #[test]
    fn test_activation_map_weights_channels() {
        // channel 0 gradient mean 1, channel 1 gradient mean -1
        let features = tensor(vec![1.0, 2.0, 3.0, 4.0, 4.0, 3.0, 2.0, 1.0], [1, 2, 2, 2]);
        let gradients = tensor(vec![1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0, -1.0], [1, 2, 2, 2]);

        let heatmap = class_activation_map(features, gradients).unwrap();
        // raw map [-3, -1, 1, 3] -> relu [0, 0, 1, 3] -> / 3
        let expected = [0.0, 0.0, 1.0 / 3.0, 1.0];
        for (v, e) in heatmap.values.iter().zip(expected.iter()) {
            assert!((v - e).abs() < 1e-6);
        }
    }

    #[test]
    fn test_non_positive_map_stays_zero() {
        let features = tensor(vec![1.0; 4], [1, 1, 2, 2]);
        let gradients = tensor(vec![-1.0; 4], [1, 1, 2, 2]);

        let heatmap = class_activation_map(features, gradients).unwrap();
        assert!(heatmap.values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_upsample_keeps_range() {
        let heatmap = Heatmap::new(2, 2, vec![0.0, 1.0, 0.5, 0.25]).unwrap();
        let up = heatmap.upsample(16, 12).unwrap();
        assert_eq!((up.width, up.height), (16, 12));
        assert_eq!(up.values.len(), 16 * 12);
        assert!(up.values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet_colormap(0), Rgb([0, 0, 128]));
        assert_eq!(jet_colormap(255), Rgb([128, 0, 0]));
    }

    #[test]
    fn test_overlay_alpha_extremes() {
        let original = RgbImage::from_fn(8, 8, |x, y| Rgb([(x * 30) as u8, (y * 30) as u8, 77]));
        let heatmap = Heatmap::new(8, 8, (0..64).map(|i| i as f32 / 63.0).collect()).unwrap();

        assert_eq!(overlay(&original, &heatmap, 0.0).unwrap(), original);
        assert_eq!(overlay(&original, &heatmap, 1.0).unwrap(), heatmap.to_color_image());
        assert!(overlay(&original, &heatmap, 1.5).is_err());
    }

    fn grad_cam_model() -> MultiTaskClassifier<TestAutodiffBackend> {
        MultiTaskClassifierConfig::new(3)
            .with_input_size(32)
            .with_base_filters(2)
            .init(&Default::default())
            .unwrap()
    }

    #[test]
    fn test_grad_cam_in_unit_range() {
        let device = Default::default();
        let model = grad_cam_model();
        let input =
            Tensor::<TestAutodiffBackend, 4>::random([1, 3, 32, 32], Distribution::Default, &device);

        let heatmap = generate_grad_cam(&model, input.clone(), 1, "top_conv").unwrap();
        assert_eq!((heatmap.width, heatmap.height), (2, 2));
        assert!(heatmap.values.iter().all(|v| (0.0..=1.0).contains(v)));

        let early = generate_grad_cam(&model, input, 0, "block2").unwrap();
        assert_eq!((early.width, early.height), (8, 8));
    }

    #[test]
    fn test_grad_cam_validates_inputs() {
        let device = Default::default();
        let model = grad_cam_model();

        let batch = Tensor::<TestAutodiffBackend, 4>::zeros([2, 3, 32, 32], &device);
        assert!(matches!(
            generate_grad_cam(&model, batch, 0, "top_conv"),
            Err(DiagnosisError::Shape(_))
        ));

        let single = Tensor::<TestAutodiffBackend, 4>::zeros([1, 3, 32, 32], &device);
        assert!(matches!(
            generate_grad_cam(&model, single.clone(), 3, "top_conv"),
            Err(DiagnosisError::InvalidInput(_))
        ));
        assert!(matches!(
            generate_grad_cam(&model, single, 0, "fc"),
            Err(DiagnosisError::InvalidInput(_))
        ));
    }
}
