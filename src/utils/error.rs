//! Error Handling Module
//!
//! Defines the error type shared by every stage of the diagnosis pipeline.
//! Uses thiserror for ergonomic error definitions.
//!
//! Every variant is fatal: the library never swallows one of these to
//! produce a degraded result.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for leaf diagnosis operations
#[derive(Error, Debug)]
pub enum DiagnosisError {
    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Malformed manifest (missing columns, bad severity values)
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Disease label absent from the training vocabulary
    #[error("Unknown disease label '{0}' (not in the training vocabulary)")]
    UnknownLabel(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tensor shape or rank violates a function contract
    #[error("Shape error: {0}")]
    Shape(String),

    /// Error with model operations
    #[error("Model error: {0}")]
    Model(String),

    /// Error with training
    #[error("Training error: {0}")]
    Training(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for DiagnosisError {
    fn from(err: serde_json::Error) -> Self {
        DiagnosisError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for DiagnosisError {
    fn from(err: csv::Error) -> Self {
        DiagnosisError::Manifest(err.to_string())
    }
}

impl From<image::ImageError> for DiagnosisError {
    fn from(err: image::ImageError) -> Self {
        DiagnosisError::InvalidInput(format!("image: {}", err))
    }
}

/// Convenience Result type for leaf diagnosis operations
pub type Result<T> = std::result::Result<T, DiagnosisError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| DiagnosisError::InvalidInput(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| DiagnosisError::InvalidInput(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| DiagnosisError::InvalidInput(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| DiagnosisError::InvalidInput(f()))
    }
}

/// Map a Burn `TensorData` conversion failure into a model error
pub(crate) fn data_error<E: std::fmt::Debug>(err: E) -> DiagnosisError {
    DiagnosisError::Model(format!("tensor data conversion failed: {:?}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiagnosisError::Manifest("missing column".to_string());
        assert_eq!(format!("{}", err), "Manifest error: missing column");
    }

    #[test]
    fn test_image_load_error() {
        let path = PathBuf::from("/leaves/tomato_01.jpg");
        let err = DiagnosisError::ImageLoad(path, "truncated file".to_string());
        assert!(format!("{}", err).contains("tomato_01.jpg"));
    }

    #[test]
    fn test_unknown_label_names_the_label() {
        let err = DiagnosisError::UnknownLabel("rust".to_string());
        assert!(err.to_string().contains("'rust'"));
    }

    #[test]
    fn test_json_error_conversion() {
        let parsed: std::result::Result<Vec<String>, _> = serde_json::from_str("{not json");
        let err: DiagnosisError = parsed.unwrap_err().into();
        assert!(matches!(err, DiagnosisError::Serialization(_)));
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));

        let err = result.context("Failed to read manifest").unwrap_err();
        assert!(matches!(err, DiagnosisError::InvalidInput(_)));
        assert!(err.to_string().contains("Failed to read manifest: file not found"));
    }

    #[test]
    fn test_option_context() {
        let opt: Option<i32> = None;
        let err = opt.with_context(|| "no class 7".to_string()).unwrap_err();
        assert!(err.to_string().contains("no class 7"));
        assert_eq!(Some(3).context("unused").unwrap(), 3);
    }
}
