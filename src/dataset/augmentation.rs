//! Data Augmentation for Leaf Images
//!
//! Augmentation is an ordered, declarative list of steps. Each step is a pure
//! function of (image, rng): replaying a pipeline with the same seed yields
//! the same image, which is what the tests rely on.
//!
//! Two backends exist:
//! - **Float** steps work on `[0, 1]` RGB images and end with an explicit clip.
//!   The `standard` and `heavy` presets use this backend.
//! - **Eight-bit** steps quantise the image to `u8`, apply a richer set of
//!   photometric and geometric jitter, then convert back to `[0, 1]` floats.
//!
//! All geometric warps use bilinear sampling with mirrored borders.

use image::imageops::{self, FilterType};
use image::{Rgb, Rgb32FImage, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// RGB image with `f32` channels in `[0, 1]`
pub type FloatImage = Rgb32FImage;

/// Which augmentation pipeline the training split uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AugmentationPolicy {
    /// No augmentation
    None,
    /// Flips plus mild brightness/contrast jitter
    Standard,
    /// Pad-then-crop plus aggressive field-style geometric/photometric jitter
    Heavy,
    /// Eight-bit backend with resized crops, shift-scale-rotate, HSV and blur
    Rich,
}

/// One float-domain transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AugmentStep {
    /// Centre-pad by `pad` pixels in total per axis, then crop a random window
    /// of the original size
    PadCrop { pad: u32 },
    FlipHorizontal { prob: f32 },
    FlipVertical { prob: f32 },
    /// Rotate by a uniform angle in `±max_turn` full turns
    Rotate { max_turn: f32 },
    /// Scale by a uniform factor in `1 ± factor`
    Zoom { factor: f32 },
    /// Shift by a uniform offset in `±fraction` of each side
    Translate { fraction: f32 },
    /// Add a uniform offset in `±max_delta` to every channel
    Brightness { max_delta: f32 },
    /// Scale each channel around its own mean by a factor in `[lower, upper]`
    Contrast { lower: f32, upper: f32 },
    /// Scale HSV saturation by a factor in `[lower, upper]`
    Saturation { lower: f32, upper: f32 },
    /// Rotate hue by a uniform offset in `±max_delta` (fraction of the circle)
    Hue { max_delta: f32 },
    /// Clamp every channel into `[0, 1]`
    Clip,
}

/// One eight-bit transform; probabilities are per step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EightBitStep {
    /// Crop a random area fraction in `[min_scale, max_scale]` with aspect
    /// ratio in `[3/4, 4/3]` and resize back to the input size
    RandomResizedCrop { min_scale: f32, max_scale: f32 },
    FlipHorizontal { prob: f32 },
    FlipVertical { prob: f32 },
    ShiftScaleRotate {
        shift: f32,
        scale: f32,
        rotate_degrees: f32,
        prob: f32,
    },
    /// `alpha * x + beta * 255` with `alpha = 1 ± contrast`, `beta = ±brightness`
    BrightnessContrast {
        brightness: f32,
        contrast: f32,
        prob: f32,
    },
    /// Shifts on the 8-bit HSV scales (hue over 180, saturation and value over 255)
    HueSaturationValue {
        hue: f32,
        saturation: f32,
        value: f32,
        prob: f32,
    },
    /// Gaussian blur with an odd kernel in `[min_kernel, max_kernel]`
    GaussianBlur {
        min_kernel: u32,
        max_kernel: u32,
        prob: f32,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Pipeline {
    Float(Vec<AugmentStep>),
    EightBit(Vec<EightBitStep>),
}

/// An ordered augmentation pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct Augmenter {
    pipeline: Pipeline,
}

impl Augmenter {
    /// Build a float-domain pipeline from explicit steps
    pub fn from_steps(steps: Vec<AugmentStep>) -> Self {
        Self {
            pipeline: Pipeline::Float(steps),
        }
    }

    /// Build an eight-bit pipeline from explicit steps
    pub fn from_eight_bit_steps(steps: Vec<EightBitStep>) -> Self {
        Self {
            pipeline: Pipeline::EightBit(steps),
        }
    }

    /// Build the pipeline for a policy; `None` yields no augmenter
    pub fn from_policy(policy: AugmentationPolicy, crop_pad: u32) -> Option<Self> {
        match policy {
            AugmentationPolicy::None => None,
            AugmentationPolicy::Standard => Some(Self::standard()),
            AugmentationPolicy::Heavy => Some(Self::heavy(crop_pad)),
            AugmentationPolicy::Rich => Some(Self::rich()),
        }
    }

    /// Flips with mild brightness and contrast jitter
    pub fn standard() -> Self {
        Self::from_steps(vec![
            AugmentStep::FlipHorizontal { prob: 0.5 },
            AugmentStep::FlipVertical { prob: 0.5 },
            AugmentStep::Brightness { max_delta: 0.1 },
            AugmentStep::Contrast {
                lower: 0.9,
                upper: 1.1,
            },
            AugmentStep::Clip,
        ])
    }

    /// Aggressive field-style augmentation preceded by pad-then-crop
    pub fn heavy(crop_pad: u32) -> Self {
        Self::from_steps(vec![
            AugmentStep::PadCrop { pad: crop_pad },
            AugmentStep::FlipHorizontal { prob: 0.5 },
            AugmentStep::FlipVertical { prob: 0.5 },
            AugmentStep::Rotate { max_turn: 0.2 },
            AugmentStep::Zoom { factor: 0.15 },
            AugmentStep::Translate { fraction: 0.1 },
            AugmentStep::Contrast {
                lower: 0.75,
                upper: 1.25,
            },
            AugmentStep::Brightness { max_delta: 0.2 },
            AugmentStep::Saturation {
                lower: 0.8,
                upper: 1.2,
            },
            AugmentStep::Hue { max_delta: 0.05 },
            AugmentStep::Contrast {
                lower: 0.8,
                upper: 1.2,
            },
            AugmentStep::Clip,
        ])
    }

    /// Eight-bit pipeline with richer jitter
    pub fn rich() -> Self {
        Self::from_eight_bit_steps(vec![
            EightBitStep::RandomResizedCrop {
                min_scale: 0.85,
                max_scale: 1.0,
            },
            EightBitStep::FlipHorizontal { prob: 0.5 },
            EightBitStep::FlipVertical { prob: 0.2 },
            EightBitStep::ShiftScaleRotate {
                shift: 0.1,
                scale: 0.1,
                rotate_degrees: 20.0,
                prob: 0.7,
            },
            EightBitStep::BrightnessContrast {
                brightness: 0.2,
                contrast: 0.2,
                prob: 0.5,
            },
            EightBitStep::HueSaturationValue {
                hue: 20.0,
                saturation: 30.0,
                value: 20.0,
                prob: 0.3,
            },
            EightBitStep::GaussianBlur {
                min_kernel: 3,
                max_kernel: 5,
                prob: 0.2,
            },
        ])
    }

    /// Number of steps in the pipeline
    pub fn len(&self) -> usize {
        match &self.pipeline {
            Pipeline::Float(steps) => steps.len(),
            Pipeline::EightBit(steps) => steps.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply every step in order. Output size equals input size.
    pub fn augment(&self, img: FloatImage, rng: &mut ChaCha8Rng) -> FloatImage {
        match &self.pipeline {
            Pipeline::Float(steps) => steps.iter().fold(img, |img, step| step.apply(img, rng)),
            Pipeline::EightBit(steps) => {
                let quantised = to_u8(&img);
                let out = steps.iter().fold(quantised, |img, step| step.apply(img, rng));
                to_f32(&out)
            }
        }
    }
}

impl AugmentStep {
    pub fn apply(&self, img: FloatImage, rng: &mut ChaCha8Rng) -> FloatImage {
        match *self {
            AugmentStep::PadCrop { pad } => {
                let ox = rng.gen_range(0..=pad);
                let oy = rng.gen_range(0..=pad);
                pad_crop(&img, pad, ox, oy)
            }
            AugmentStep::FlipHorizontal { prob } => {
                if rng.gen::<f32>() < prob {
                    imageops::flip_horizontal(&img)
                } else {
                    img
                }
            }
            AugmentStep::FlipVertical { prob } => {
                if rng.gen::<f32>() < prob {
                    imageops::flip_vertical(&img)
                } else {
                    img
                }
            }
            AugmentStep::Rotate { max_turn } => {
                let angle = rng.gen_range(-max_turn..=max_turn) * std::f32::consts::TAU;
                warp(&img, Affine::rotation(angle))
            }
            AugmentStep::Zoom { factor } => {
                let zoom = 1.0 + rng.gen_range(-factor..=factor);
                warp(&img, Affine::scale(zoom))
            }
            AugmentStep::Translate { fraction } => {
                let (w, h) = img.dimensions();
                let dx = rng.gen_range(-fraction..=fraction) * w as f32;
                let dy = rng.gen_range(-fraction..=fraction) * h as f32;
                warp(&img, Affine::translation(dx, dy))
            }
            AugmentStep::Brightness { max_delta } => {
                let delta = rng.gen_range(-max_delta..=max_delta);
                map_channels(img, |v| v + delta)
            }
            AugmentStep::Contrast { lower, upper } => {
                let factor = rng.gen_range(lower..=upper);
                adjust_contrast(img, factor)
            }
            AugmentStep::Saturation { lower, upper } => {
                let factor = rng.gen_range(lower..=upper);
                map_hsv(img, |h, s, v| (h, (s * factor).clamp(0.0, 1.0), v))
            }
            AugmentStep::Hue { max_delta } => {
                let delta = rng.gen_range(-max_delta..=max_delta);
                map_hsv(img, |h, s, v| ((h + delta).rem_euclid(1.0), s, v))
            }
            AugmentStep::Clip => map_channels(img, |v| v.clamp(0.0, 1.0)),
        }
    }
}

impl EightBitStep {
    pub fn apply(&self, img: RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        match *self {
            EightBitStep::RandomResizedCrop {
                min_scale,
                max_scale,
            } => random_resized_crop(&img, min_scale, max_scale, rng),
            EightBitStep::FlipHorizontal { prob } => {
                if rng.gen::<f32>() < prob {
                    imageops::flip_horizontal(&img)
                } else {
                    img
                }
            }
            EightBitStep::FlipVertical { prob } => {
                if rng.gen::<f32>() < prob {
                    imageops::flip_vertical(&img)
                } else {
                    img
                }
            }
            EightBitStep::ShiftScaleRotate {
                shift,
                scale,
                rotate_degrees,
                prob,
            } => {
                if rng.gen::<f32>() >= prob {
                    return img;
                }
                let (w, h) = img.dimensions();
                let angle = rng.gen_range(-rotate_degrees..=rotate_degrees).to_radians();
                let zoom = 1.0 + rng.gen_range(-scale..=scale);
                let dx = rng.gen_range(-shift..=shift) * w as f32;
                let dy = rng.gen_range(-shift..=shift) * h as f32;
                let transform = Affine::rotation(angle)
                    .then(Affine::scale(zoom))
                    .then(Affine::translation(dx, dy));
                to_u8(&warp(&to_f32(&img), transform))
            }
            EightBitStep::BrightnessContrast {
                brightness,
                contrast,
                prob,
            } => {
                if rng.gen::<f32>() >= prob {
                    return img;
                }
                let alpha = 1.0 + rng.gen_range(-contrast..=contrast);
                let beta = rng.gen_range(-brightness..=brightness) * 255.0;
                map_u8(img, |v| alpha * v + beta)
            }
            EightBitStep::HueSaturationValue {
                hue,
                saturation,
                value,
                prob,
            } => {
                if rng.gen::<f32>() >= prob {
                    return img;
                }
                let dh = rng.gen_range(-hue..=hue) / 180.0;
                let ds = rng.gen_range(-saturation..=saturation) / 255.0;
                let dv = rng.gen_range(-value..=value) / 255.0;
                let shifted = map_hsv(to_f32(&img), |h, s, v| {
                    (
                        (h + dh).rem_euclid(1.0),
                        (s + ds).clamp(0.0, 1.0),
                        (v + dv).clamp(0.0, 1.0),
                    )
                });
                to_u8(&shifted)
            }
            EightBitStep::GaussianBlur {
                min_kernel,
                max_kernel,
                prob,
            } => {
                if rng.gen::<f32>() >= prob {
                    return img;
                }
                let choices: Vec<u32> = (min_kernel..=max_kernel).filter(|k| k % 2 == 1).collect();
                if choices.is_empty() {
                    return img;
                }
                let kernel = choices[rng.gen_range(0..choices.len())];
                gaussian_blur(&img, kernel)
            }
        }
    }
}

/// Clip into `[0, 1]`, scale to 255 and truncate
pub fn to_u8(img: &FloatImage) -> RgbImage {
    let (w, h) = img.dimensions();
    RgbImage::from_fn(w, h, |x, y| {
        let p = img.get_pixel(x, y);
        Rgb([
            (p[0].clamp(0.0, 1.0) * 255.0) as u8,
            (p[1].clamp(0.0, 1.0) * 255.0) as u8,
            (p[2].clamp(0.0, 1.0) * 255.0) as u8,
        ])
    })
}

/// Divide by 255
pub fn to_f32(img: &RgbImage) -> FloatImage {
    let (w, h) = img.dimensions();
    FloatImage::from_fn(w, h, |x, y| {
        let p = img.get_pixel(x, y);
        Rgb([
            p[0] as f32 / 255.0,
            p[1] as f32 / 255.0,
            p[2] as f32 / 255.0,
        ])
    })
}

fn map_channels(mut img: FloatImage, f: impl Fn(f32) -> f32) -> FloatImage {
    for v in img.iter_mut() {
        *v = f(*v);
    }
    img
}

fn map_u8(mut img: RgbImage, f: impl Fn(f32) -> f32) -> RgbImage {
    for v in img.iter_mut() {
        *v = f(*v as f32).round().clamp(0.0, 255.0) as u8;
    }
    img
}

/// Per-channel contrast around the channel mean
fn adjust_contrast(mut img: FloatImage, factor: f32) -> FloatImage {
    let count = (img.width() * img.height()).max(1) as f32;
    let mut mean = [0.0f32; 3];
    for p in img.pixels() {
        for c in 0..3 {
            mean[c] += p[c];
        }
    }
    for m in mean.iter_mut() {
        *m /= count;
    }

    for p in img.pixels_mut() {
        for c in 0..3 {
            p[c] = mean[c] + factor * (p[c] - mean[c]);
        }
    }
    img
}

fn map_hsv(mut img: FloatImage, f: impl Fn(f32, f32, f32) -> (f32, f32, f32)) -> FloatImage {
    for p in img.pixels_mut() {
        let (h, s, v) = rgb_to_hsv(p[0], p[1], p[2]);
        let (h, s, v) = f(h, s, v);
        let (r, g, b) = hsv_to_rgb(h, s, v);
        *p = Rgb([r, g, b]);
    }
    img
}

/// RGB in `[0, 1]` to HSV with hue as a fraction of the circle
pub fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta <= f32::EPSILON {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };
    let saturation = if max > 0.0 { delta / max } else { 0.0 };
    (hue, saturation, max)
}

pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let h6 = h.rem_euclid(1.0) * 6.0;
    let sector = h6.floor();
    let frac = h6 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * frac);
    let t = v * (1.0 - s * (1.0 - frac));
    match sector as u32 % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

/// Zero-pad to `size + pad` (centred) and crop `size` at offset `(ox, oy)`
fn pad_crop(img: &FloatImage, pad: u32, ox: u32, oy: u32) -> FloatImage {
    let (w, h) = img.dimensions();
    let before = (pad / 2) as i64;
    FloatImage::from_fn(w, h, |x, y| {
        let sx = x as i64 + ox as i64 - before;
        let sy = y as i64 + oy as i64 - before;
        if sx >= 0 && sy >= 0 && sx < w as i64 && sy < h as i64 {
            *img.get_pixel(sx as u32, sy as u32)
        } else {
            Rgb([0.0, 0.0, 0.0])
        }
    })
}

fn random_resized_crop(img: &RgbImage, min_scale: f32, max_scale: f32, rng: &mut ChaCha8Rng) -> RgbImage {
    let (w, h) = img.dimensions();
    let area = (w * h) as f32;
    let (log_lo, log_hi) = ((3.0f32 / 4.0).ln(), (4.0f32 / 3.0).ln());

    for _ in 0..10 {
        let target = area * rng.gen_range(min_scale..=max_scale);
        let ratio = rng.gen_range(log_lo..=log_hi).exp();
        let cw = (target * ratio).sqrt().round() as u32;
        let ch = (target / ratio).sqrt().round() as u32;
        if cw > 0 && ch > 0 && cw <= w && ch <= h {
            let x = rng.gen_range(0..=w - cw);
            let y = rng.gen_range(0..=h - ch);
            let crop = imageops::crop_imm(img, x, y, cw, ch).to_image();
            return imageops::resize(&crop, w, h, FilterType::Triangle);
        }
    }
    img.clone()
}

/// Separable Gaussian blur with OpenCV's default sigma for the kernel size
fn gaussian_blur(img: &RgbImage, kernel_size: u32) -> RgbImage {
    let half = (kernel_size / 2) as i64;
    let sigma = 0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let weights: Vec<f32> = (-half..=half)
        .map(|i| (-(i * i) as f32 / (2.0 * sigma * sigma)).exp())
        .collect();
    let norm: f32 = weights.iter().sum();

    let (w, h) = img.dimensions();
    let pass = |src: &RgbImage, horizontal: bool| {
        RgbImage::from_fn(w, h, |x, y| {
            let mut acc = [0.0f32; 3];
            for (k, weight) in weights.iter().enumerate() {
                let offset = k as i64 - half;
                let (sx, sy) = if horizontal {
                    (mirror(x as i64 + offset, w), y)
                } else {
                    (x, mirror(y as i64 + offset, h))
                };
                let p = src.get_pixel(sx, sy);
                for c in 0..3 {
                    acc[c] += weight * p[c] as f32;
                }
            }
            Rgb(acc.map(|v| (v / norm).round().clamp(0.0, 255.0) as u8))
        })
    };
    pass(&pass(img, true), false)
}

/// Mirror an out-of-range index back into `[0, len)`
fn mirror(i: i64, len: u32) -> u32 {
    let len = len.max(1) as i64;
    let period = 2 * len;
    let m = i.rem_euclid(period);
    (if m < len { m } else { period - 1 - m }) as u32
}

/// 2x2 linear map plus translation, expressed as the forward transform
/// around the image centre
#[derive(Debug, Clone, Copy)]
struct Affine {
    m: [[f32; 2]; 2],
    t: [f32; 2],
}

impl Affine {
    fn rotation(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        Self {
            m: [[c, -s], [s, c]],
            t: [0.0, 0.0],
        }
    }

    fn scale(factor: f32) -> Self {
        Self {
            m: [[factor, 0.0], [0.0, factor]],
            t: [0.0, 0.0],
        }
    }

    fn translation(dx: f32, dy: f32) -> Self {
        Self {
            m: [[1.0, 0.0], [0.0, 1.0]],
            t: [dx, dy],
        }
    }

    /// `self` followed by `next`
    fn then(self, next: Affine) -> Affine {
        let a = next.m;
        let b = self.m;
        let m = [
            [
                a[0][0] * b[0][0] + a[0][1] * b[1][0],
                a[0][0] * b[0][1] + a[0][1] * b[1][1],
            ],
            [
                a[1][0] * b[0][0] + a[1][1] * b[1][0],
                a[1][0] * b[0][1] + a[1][1] * b[1][1],
            ],
        ];
        let t = [
            a[0][0] * self.t[0] + a[0][1] * self.t[1] + next.t[0],
            a[1][0] * self.t[0] + a[1][1] * self.t[1] + next.t[1],
        ];
        Affine { m, t }
    }

    /// Map an output point back to its source point
    fn invert_point(&self, x: f32, y: f32) -> (f32, f32) {
        let [[a, b], [c, d]] = self.m;
        let det = a * d - b * c;
        if det.abs() < 1e-12 {
            return (x, y);
        }
        let (px, py) = (x - self.t[0], y - self.t[1]);
        ((d * px - b * py) / det, (-c * px + a * py) / det)
    }
}

/// Apply an affine transform about the image centre with mirrored borders
fn warp(img: &FloatImage, transform: Affine) -> FloatImage {
    let (w, h) = img.dimensions();
    let cx = (w as f32 - 1.0) / 2.0;
    let cy = (h as f32 - 1.0) / 2.0;

    FloatImage::from_fn(w, h, |x, y| {
        let (sx, sy) = transform.invert_point(x as f32 - cx, y as f32 - cy);
        bilinear_sample(img, sx + cx, sy + cy)
    })
}

fn bilinear_sample(img: &FloatImage, x: f32, y: f32) -> Rgb<f32> {
    let (w, h) = img.dimensions();
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let xa = mirror(x0 as i64, w);
    let xb = mirror(x0 as i64 + 1, w);
    let ya = mirror(y0 as i64, h);
    let yb = mirror(y0 as i64 + 1, h);

    let p00 = img.get_pixel(xa, ya);
    let p10 = img.get_pixel(xb, ya);
    let p01 = img.get_pixel(xa, yb);
    let p11 = img.get_pixel(xb, yb);

    let mut out = [0.0f32; 3];
    for c in 0..3 {
        out[c] = p00[c] * (1.0 - fx) * (1.0 - fy)
            + p10[c] * fx * (1.0 - fy)
            + p01[c] * (1.0 - fx) * fy
            + p11[c] * fx * fy;
    }
    Rgb(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn create_test_image(size: u32) -> FloatImage {
        FloatImage::from_fn(size, size, |x, y| {
            Rgb([x as f32 / size as f32, y as f32 / size as f32, 0.5])
        })
    }

    fn in_unit_range(img: &FloatImage) -> bool {
        img.iter().all(|v| (0.0..=1.0).contains(v))
    }

    #[test]
    fn test_presets_are_ordered_lists() {
        assert_eq!(Augmenter::standard().len(), 5);
        assert_eq!(Augmenter::heavy(32).len(), 12);
        assert_eq!(Augmenter::rich().len(), 7);
        assert!(Augmenter::from_policy(AugmentationPolicy::None, 32).is_none());
    }

    #[test]
    fn test_heavy_output_in_range_and_same_size() {
        let aug = Augmenter::heavy(8);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..5 {
            let out = aug.augment(create_test_image(32), &mut rng);
            assert_eq!(out.dimensions(), (32, 32));
            assert!(in_unit_range(&out));
        }
    }

    #[test]
    fn test_rich_output_in_range_and_same_size() {
        let aug = Augmenter::rich();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..5 {
            let out = aug.augment(create_test_image(24), &mut rng);
            assert_eq!(out.dimensions(), (24, 24));
            assert!(in_unit_range(&out));
        }
    }

    #[test]
    fn test_same_seed_replays_identically() {
        for aug in [Augmenter::standard(), Augmenter::heavy(16), Augmenter::rich()] {
            let a = aug.augment(create_test_image(32), &mut ChaCha8Rng::seed_from_u64(42));
            let b = aug.augment(create_test_image(32), &mut ChaCha8Rng::seed_from_u64(42));
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_flip_probability_extremes() {
        let img = create_test_image(8);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let never = AugmentStep::FlipHorizontal { prob: 0.0 }.apply(img.clone(), &mut rng);
        assert_eq!(never, img);

        let always = AugmentStep::FlipHorizontal { prob: 1.0 }.apply(img.clone(), &mut rng);
        assert_eq!(always.get_pixel(0, 3), img.get_pixel(7, 3));
    }

    #[test]
    fn test_brightness_then_clip_stays_in_range() {
        let white = FloatImage::from_pixel(4, 4, Rgb([1.0, 1.0, 1.0]));
        let aug = Augmenter::from_steps(vec![AugmentStep::Brightness { max_delta: 0.5 }, AugmentStep::Clip]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(in_unit_range(&aug.augment(white, &mut rng)));
    }

    #[test]
    fn test_contrast_preserves_channel_mean() {
        let img = create_test_image(16);
        let out = adjust_contrast(img.clone(), 1.2);
        let mean = |im: &FloatImage| im.pixels().map(|p| p[0]).sum::<f32>() / 256.0;
        assert!((mean(&img) - mean(&out)).abs() < 1e-4);
    }

    #[test]
    fn test_hsv_roundtrip() {
        for &(r, g, b) in &[(0.2, 0.4, 0.6), (0.9, 0.1, 0.1), (0.5, 0.5, 0.5), (0.0, 1.0, 0.3)] {
            let (h, s, v) = rgb_to_hsv(r, g, b);
            let (r2, g2, b2) = hsv_to_rgb(h, s, v);
            assert!((r - r2).abs() < 1e-5 && (g - g2).abs() < 1e-5 && (b - b2).abs() < 1e-5);
        }
    }

    #[test]
    fn test_identity_warp_is_noop() {
        let img = create_test_image(8);
        let out = warp(&img, Affine::scale(1.0));
        for (a, b) in img.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_pad_crop_centre_offset_is_identity() {
        let img = create_test_image(8);
        assert_eq!(pad_crop(&img, 4, 2, 2), img);
        // shifted window exposes zero padding on the leading edge
        let shifted = pad_crop(&img, 4, 0, 2);
        assert_eq!(*shifted.get_pixel(0, 0), Rgb([0.0, 0.0, 0.0]));
    }

    #[test]
    fn test_mirror_indices() {
        assert_eq!(mirror(-1, 5), 0);
        assert_eq!(mirror(5, 5), 4);
        assert_eq!(mirror(3, 5), 3);
    }

    #[test]
    fn test_u8_conversion_truncates() {
        let img = FloatImage::from_pixel(1, 1, Rgb([0.2, 1.5, -0.1]));
        assert_eq!(*to_u8(&img).get_pixel(0, 0), Rgb([51, 255, 0]));
    }
}
