//! Backend implementations for segmentation and face detection
//!
//! - ONNX Runtime segmentation backend (GPU acceleration)
//! - Tract segmentation backend (pure Rust)
//! - Deterministic mock segmentation backend for tests and offline runs
//! - `SeetaFace` frontal face detector via `rustface`

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

#[cfg(feature = "rustface")]
pub mod rustface;

pub mod mock;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;

#[cfg(feature = "rustface")]
pub use self::rustface::RustfaceDetector;

pub use self::mock::MockBackend;

use crate::config::{BackendKind, SegmentationConfig};
use crate::error::{IdPhotoError, Result};
use crate::segmentation::SegmentationBackend;
use std::path::Path;

/// Segmentation backends compiled into this build
#[must_use]
pub fn available_backends() -> Vec<BackendKind> {
    let mut backends = Vec::new();
    #[cfg(feature = "onnx")]
    backends.push(BackendKind::Onnx);
    #[cfg(feature = "tract")]
    backends.push(BackendKind::Tract);
    backends.push(BackendKind::Mock);
    backends
}

/// Build the segmentation backend selected by `config`
///
/// The backend is created uninitialized; the model file is only read when the
/// backend is first initialized.
///
/// # Errors
/// - The selected backend was not compiled into this build
#[allow(unused_variables)]
pub fn create_backend(
    config: &SegmentationConfig,
    model_path: &Path,
) -> Result<Box<dyn SegmentationBackend>> {
    log::debug!(
        "Creating {} segmentation backend for {}",
        config.backend,
        model_path.display()
    );
    match config.backend {
        #[cfg(feature = "onnx")]
        BackendKind::Onnx => Ok(Box::new(OnnxBackend::from_config(model_path, config))),
        #[cfg(feature = "tract")]
        BackendKind::Tract => Ok(Box::new(TractBackend::new(model_path))),
        BackendKind::Mock => Ok(Box::new(MockBackend::new())),
        #[allow(unreachable_patterns)]
        other => Err(IdPhotoError::invalid_config(format!(
            "Backend '{other}' is not available in this build (enable the '{other}' feature)"
        ))),
    }
}
