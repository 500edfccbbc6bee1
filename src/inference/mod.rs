//! Inference module for diagnosis, uncertainty and saliency
//!
//! This module provides:
//! - The single preprocessing path (decode, normalise, resize)
//! - Monte-Carlo dropout predictions with normalized-entropy uncertainty
//! - Grad-CAM heatmaps and colour overlays
//! - A process-wide model handle for interactive callers
//! - Report helpers: severity labels, recommendations, crop focus

pub mod handle;
pub mod preprocess;
pub mod report;
pub mod saliency;
pub mod uncertainty;

pub use handle::ModelHandle;
pub use preprocess::{load_image, normalize_pixel, preprocess, preprocess_tensor};
pub use report::{
    crop_class_ids, crop_names, focus_prediction, recommendation, Diagnosis, FocusedPrediction,
    SeverityLevel,
};
pub use saliency::{
    class_activation_map, generate_grad_cam, jet_colormap, overlay, Heatmap, DEFAULT_OVERLAY_ALPHA,
};
pub use uncertainty::{aggregate, estimate, normalized_entropy, PredictionResult};
