//! Error Handling Module
//!
//! Defines the error type shared by every stage of the training and inference
//! pipeline. Uses thiserror for ergonomic error definitions.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Main error type for image classifier operations
#[derive(Error, Debug)]
pub enum ClassifierError {
    /// IO error (missing folders, unreadable files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IO error tied to a specific path
    #[error("IO error at '{path}': {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// A single sample could not be decoded
    #[error("Data error in sample '{identifier}': {reason}")]
    Data { identifier: String, reason: String },

    /// Configuration error (bad ratios, too few classes, unknown columns)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A cached model exists but could not be decoded
    #[error("Corrupt model cache at '{path}': {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    /// Error with model construction or weights
    #[error("Model error: {0}")]
    Model(String),

    /// Error while fitting a stage
    #[error("Training error: {0}")]
    Training(String),

    /// Error while applying a trained model
    #[error("Inference error: {0}")]
    Inference(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ClassifierError {
    /// Build a data error for the given sample identifier
    pub fn data(identifier: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Data {
            identifier: identifier.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for ClassifierError {
    fn from(err: serde_json::Error) -> Self {
        ClassifierError::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for ClassifierError {
    fn from(err: image::ImageError) -> Self {
        ClassifierError::Model(format!("image processing failed: {}", err))
    }
}

/// Convenience Result type for image classifier operations
pub type Result<T> = std::result::Result<T, ClassifierError>;

/// Extension trait for attaching the offending path to IO errors
pub trait ResultExt<T> {
    /// Tag an IO error with the path that produced it
    fn with_path(self, path: &Path) -> Result<T>;
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_path(self, path: &Path) -> Result<T> {
        self.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ClassifierError::PathNotFound(path.to_path_buf())
            } else {
                ClassifierError::IoAt {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClassifierError::Config("validation ratio must lie in (0, 1)".to_string());
        assert_eq!(
            format!("{}", err),
            "Configuration error: validation ratio must lie in (0, 1)"
        );
    }

    #[test]
    fn test_data_error_names_sample() {
        let err = ClassifierError::data("fish/carp/01.png", "unexpected end of file");
        let message = format!("{}", err);
        assert!(message.contains("fish/carp/01.png"));
        assert!(message.contains("unexpected end of file"));
    }

    #[test]
    fn test_with_path_maps_not_found() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let err = result.with_path(Path::new("/assets/missing")).unwrap_err();
        assert!(matches!(err, ClassifierError::PathNotFound(p) if p == Path::new("/assets/missing")));
    }

    #[test]
    fn test_with_path_keeps_other_io_errors() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let err = result.with_path(Path::new("/assets/locked")).unwrap_err();
        assert!(matches!(err, ClassifierError::IoAt { .. }));
    }
}
