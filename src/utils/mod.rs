//! Utilities module for errors, logging, metrics, and formatting helpers

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{DiagnosisError, Result, ResultExt};
pub use logging::{init_logging, LogConfig, LogLevel};
pub use metrics::{ConfusionMatrix, HeadMetrics};

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}

/// Render a probability as a fixed-width text bar
pub fn format_probability_bar(probability: f32, width: usize) -> String {
    let filled = (probability.clamp(0.0, 1.0) * width as f32).round() as usize;
    let empty = width.saturating_sub(filled);

    format!(
        "[{}{}] {:5.1}%",
        "█".repeat(filled),
        "░".repeat(empty),
        probability * 100.0
    )
}
