//! Error types for ID photo operations

use thiserror::Error;

/// Result type alias for ID photo operations
pub type Result<T> = std::result::Result<T, IdPhotoError>;

/// Error types for ID photo operations
///
/// Only a subset of these ever abort a request. Face detection failures,
/// crops that do not fit and compositing failures are absorbed by the
/// compositor and reported through [`crate::compositor::CompositionStatus`].
#[derive(Error, Debug)]
pub enum IdPhotoError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Rejected upload: unsupported type, oversized or undecodable
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Cutout handed to the compositor has no alpha channel
    #[error("Cutout has no alpha channel (color type: {0})")]
    MissingAlpha(String),

    /// Background removal failed; there is no fallback cutout
    #[error("Segmentation error: {0}")]
    Segmentation(String),

    /// Face detector failed technically (as opposed to finding no face)
    #[error("Face detection error: {0}")]
    FaceDetection(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Model download failures
    #[error("Download error: {0}")]
    Download(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IdPhotoError {
    /// Create a new invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new segmentation error
    pub fn segmentation<S: Into<String>>(msg: S) -> Self {
        Self::Segmentation(msg.into())
    }

    /// Create a new face detection error
    pub fn face_detection<S: Into<String>>(msg: S) -> Self {
        Self::FaceDetection(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a download error with the underlying cause attached
    pub fn download_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::Download(format!("{}: {}", context.into(), error))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Create processing error with stage context
    pub fn processing_stage_error(stage: &str, details: &str, input_info: Option<&str>) -> Self {
        let input_context = match input_info {
            Some(info) => format!(" (input: {})", info),
            None => String::new(),
        };

        Self::Internal(format!(
            "Processing failed at stage '{}'{}: {}",
            stage, input_context, details
        ))
    }

    /// Whether the error came from the caller's input rather than the system
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_) | Self::MissingAlpha(_) | Self::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_creation() {
        let err = IdPhotoError::invalid_config("test config error");
        assert!(matches!(err, IdPhotoError::InvalidConfig(_)));

        let err = IdPhotoError::invalid_input("image/gif");
        assert!(matches!(err, IdPhotoError::InvalidInput(_)));
        assert!(err.is_input_error());

        let err = IdPhotoError::segmentation("model exploded");
        assert!(!err.is_input_error());
    }

    #[test]
    fn test_error_display() {
        let err = IdPhotoError::invalid_config("Invalid model path");
        assert_eq!(err.to_string(), "Invalid configuration: Invalid model path");

        let err = IdPhotoError::MissingAlpha("Rgb8".to_string());
        assert_eq!(
            err.to_string(),
            "Cutout has no alpha channel (color type: Rgb8)"
        );
    }

    #[test]
    fn test_enhanced_error_context() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = IdPhotoError::file_io_error(
            "write id photo",
            Path::new("/srv/static/results/idphoto_a.png"),
            &io_error,
        );
        let error_string = err.to_string();
        assert!(error_string.contains("write id photo"));
        assert!(error_string.contains("idphoto_a.png"));

        let err = IdPhotoError::config_value_error("border width", 0, "1-200", Some(2));
        let error_string = err.to_string();
        assert!(error_string.contains("border width"));
        assert!(error_string.contains("1-200"));
        assert!(error_string.contains("Recommended: 2"));

        let err = IdPhotoError::processing_stage_error("compose", "crop failed", Some("10x10"));
        let error_string = err.to_string();
        assert!(error_string.contains("compose"));
        assert!(error_string.contains("10x10"));

        let err = IdPhotoError::download_error("GET model.onnx", "HTTP 404");
        assert_eq!(err.to_string(), "Download error: GET model.onnx: HTTP 404");
    }
}
