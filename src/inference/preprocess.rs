//! Image preprocessing
//!
//! This module owns pixel normalisation for the whole crate. The model always
//! expects inputs already rescaled to `[0, 1]`; nothing downstream rescales
//! again. The training loader and the inference entry points both go through
//! [`normalize_pixel`].

use std::path::Path;

use burn::prelude::*;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Rgb, RgbImage};

use crate::dataset::augmentation::FloatImage;
use crate::utils::error::{DiagnosisError, Result};

/// Rescale one 8-bit channel value into `[0, 1]`
#[inline]
pub fn normalize_pixel(value: u8) -> f32 {
    value as f32 / 255.0
}

/// Load and decode an image; any failure names the offending path
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .map_err(|e| DiagnosisError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| DiagnosisError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| DiagnosisError::ImageLoad(path.to_path_buf(), e.to_string()))
}

/// Convert an 8-bit RGB image to normalised floats
pub fn to_normalized(rgb: &RgbImage) -> FloatImage {
    let (width, height) = rgb.dimensions();
    FloatImage::from_fn(width, height, |x, y| {
        let p = rgb.get_pixel(x, y);
        Rgb([normalize_pixel(p[0]), normalize_pixel(p[1]), normalize_pixel(p[2])])
    })
}

/// Decode to RGB, rescale to `[0, 1]`, then resize to a `size x size` square
pub fn normalize_and_resize(image: &DynamicImage, size: u32) -> FloatImage {
    let normalized = to_normalized(&image.to_rgb8());
    if normalized.dimensions() == (size, size) {
        normalized
    } else {
        imageops::resize(&normalized, size, size, FilterType::Triangle)
    }
}

/// Load an image from disk straight into the model's input domain
pub fn load_normalized(path: &Path, size: u32) -> Result<FloatImage> {
    Ok(normalize_and_resize(&load_image(path)?, size))
}

/// Flatten an RGB float image into CHW order
pub fn image_to_chw(image: &FloatImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let num_pixels = (width * height) as usize;
    let mut chw = vec![0.0f32; 3 * num_pixels];

    for (i, pixel) in image.pixels().enumerate() {
        chw[i] = pixel[0];
        chw[num_pixels + i] = pixel[1];
        chw[2 * num_pixels + i] = pixel[2];
    }
    chw
}

/// Prepare an uploaded image: returns the original RGB image (for overlays)
/// and the normalised CHW data for the model
pub fn preprocess(image: &DynamicImage, size: u32) -> (RgbImage, Vec<f32>) {
    let original = image.to_rgb8();
    let chw = image_to_chw(&normalize_and_resize(image, size));
    (original, chw)
}

/// Build a single-image batch `[1, 3, size, size]`
pub fn preprocess_tensor<B: Backend>(
    image: &DynamicImage,
    size: u32,
    device: &B::Device,
) -> (RgbImage, Tensor<B, 4>) {
    let (original, chw) = preprocess(image, size);
    let s = size as usize;
    let tensor = Tensor::<B, 4>::from_floats(TensorData::new(chw, [1, 3, s, s]), device);
    (original, tensor)
}
