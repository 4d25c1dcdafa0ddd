//! SeetaFace frontal face detector backed by the `rustface` crate

use crate::error::{IdPhotoError, Result};
use crate::face::{FaceBox, FaceDetector};
use image::GrayImage;
use std::path::Path;

/// Frontal face detector using a SeetaFace model file
///
/// The model is parsed once; a fresh detector is built from a clone of it
/// for each call because detection needs exclusive access.
pub struct RustfaceDetector {
    model: rustface::Model,
    min_face_size: u32,
    score_thresh: f64,
}

impl RustfaceDetector {
    /// Load a model such as `seeta_fd_frontal_v1.0.bin`
    ///
    /// # Errors
    /// - The file is missing or unreadable
    /// - The file is not a SeetaFace model
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            IdPhotoError::face_detection(format!(
                "Failed to read face model '{}': {e}",
                path.display()
            ))
        })?;
        log::debug!("Loaded face model {} ({} bytes)", path.display(), bytes.len());
        Self::from_bytes(&bytes)
    }

    /// Parse a model from memory
    ///
    /// # Errors
    /// - The bytes are not a SeetaFace model
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let model = rustface::read_model(std::io::Cursor::new(bytes))
            .map_err(|e| IdPhotoError::face_detection(format!("Invalid face model: {e}")))?;
        Ok(Self {
            model,
            min_face_size: 20,
            score_thresh: 2.0,
        })
    }

    /// Smallest face side in pixels the detector will report
    #[must_use]
    pub fn with_min_face_size(mut self, min_face_size: u32) -> Self {
        self.min_face_size = min_face_size.max(20);
        self
    }

    #[must_use]
    pub fn with_score_thresh(mut self, score_thresh: f64) -> Self {
        self.score_thresh = score_thresh;
        self
    }
}

impl FaceDetector for RustfaceDetector {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceBox>> {
        let (width, height) = gray.dimensions();
        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(self.min_face_size);
        detector.set_score_thresh(self.score_thresh);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        let faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), width, height));
        log::trace!("rustface returned {} candidates", faces.len());

        Ok(faces
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                // Boxes can start slightly outside the frame
                let left = i64::from(bbox.x()).max(0);
                let top = i64::from(bbox.y()).max(0);
                let right = (i64::from(bbox.x()) + i64::from(bbox.width())).min(i64::from(width));
                let bottom =
                    (i64::from(bbox.y()) + i64::from(bbox.height())).min(i64::from(height));
                (right > left && bottom > top).then(|| {
                    FaceBox::new(
                        left as u32,
                        top as u32,
                        (right - left) as u32,
                        (bottom - top) as u32,
                    )
                })
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "rustface"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_face_detection_error() {
        let err = RustfaceDetector::from_file("/nonexistent/seeta_fd_frontal_v1.0.bin")
            .err()
            .unwrap();
        assert!(matches!(err, IdPhotoError::FaceDetection(_)));
    }

    #[test]
    fn test_corrupt_model_is_face_detection_error() {
        let err = RustfaceDetector::from_bytes(&[0u8; 3]).err().unwrap();
        assert!(matches!(err, IdPhotoError::FaceDetection(_)));
    }
}
