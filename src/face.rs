//! Face location on cutouts
//!
//! A [`FaceDetector`] is a black box that returns every frontal face it sees
//! in a grayscale buffer. [`FaceLocator`] narrows that list to the single box
//! the compositor anchors on.

use crate::error::{IdPhotoError, Result};
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument};

/// Bounding box of a detected face in source pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Clip to an image of `image_width` x `image_height`
    ///
    /// Returns `None` when nothing of the box remains.
    #[must_use]
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<Self> {
        if self.x >= image_width || self.y >= image_height {
            return None;
        }
        let width = self.width.min(image_width - self.x);
        let height = self.height.min(image_height - self.y);
        (width > 0 && height > 0).then_some(Self::new(self.x, self.y, width, height))
    }
}

/// Pluggable frontal face detection backend
///
/// An empty list means no face. `Err` is reserved for technical failures
/// such as a missing or corrupt model.
pub trait FaceDetector: Send + Sync {
    /// Detect faces in a grayscale image
    ///
    /// # Errors
    /// - The detector cannot run
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceBox>>;

    /// Name used in logs
    fn name(&self) -> &'static str {
        "face-detector"
    }
}

impl<T: FaceDetector + ?Sized> FaceDetector for Arc<T> {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceBox>> {
        (**self).detect(gray)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<T: FaceDetector + ?Sized> FaceDetector for Box<T> {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceBox>> {
        (**self).detect(gray)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Largest box by area; on ties the earliest box wins
#[must_use]
pub fn largest_face(faces: &[FaceBox]) -> Option<FaceBox> {
    let mut best: Option<FaceBox> = None;
    for face in faces {
        match best {
            Some(current) if face.area() <= current.area() => {},
            _ => best = Some(*face),
        }
    }
    best
}

/// Wraps a detector and applies the largest-face policy
pub struct FaceLocator {
    detector: Box<dyn FaceDetector>,
}

impl FaceLocator {
    pub fn new<D: FaceDetector + 'static>(detector: D) -> Self {
        Self {
            detector: Box::new(detector),
        }
    }

    /// Locator that never finds a face
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(StaticFaceDetector::empty())
    }

    #[must_use]
    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Every box the detector returns, clipped to the image, in detector order
    ///
    /// # Errors
    /// - Detector failure
    pub fn detect_all(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let gray = image.to_luma8();
        let (width, height) = gray.dimensions();
        let faces = self.detector.detect(&gray)?;
        Ok(faces
            .iter()
            .filter_map(|face| face.clamp_to(width, height))
            .collect())
    }

    /// The largest face, or `None` when no face was found
    ///
    /// # Errors
    /// - Detector failure, distinct from `Ok(None)`
    #[instrument(skip(self, image), fields(detector = self.detector.name(), width = image.width(), height = image.height()))]
    pub fn locate(&self, image: &DynamicImage) -> Result<Option<FaceBox>> {
        let faces = self.detect_all(image)?;
        let chosen = largest_face(&faces);
        debug!(candidates = faces.len(), chosen = ?chosen, "Face detection finished");
        Ok(chosen)
    }
}

impl std::fmt::Debug for FaceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceLocator")
            .field("detector", &self.detector.name())
            .finish()
    }
}

/// Detector returning a fixed list of boxes and recording each call
#[derive(Debug, Clone, Default)]
pub struct StaticFaceDetector {
    faces: Vec<FaceBox>,
    calls: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl StaticFaceDetector {
    #[must_use]
    pub fn new(faces: Vec<FaceBox>) -> Self {
        Self {
            faces,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn single(face: FaceBox) -> Self {
        Self::new(vec![face])
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Dimensions of every image passed to `detect`
    #[must_use]
    pub fn calls(&self) -> Vec<(u32, u32)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl FaceDetector for StaticFaceDetector {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceBox>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(gray.dimensions());
        }
        Ok(self.faces.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Detector that always fails, as a detector with a broken model would
#[derive(Debug, Clone)]
pub struct FailingFaceDetector {
    message: String,
}

impl FailingFaceDetector {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for FailingFaceDetector {
    fn default() -> Self {
        Self::new("face model unavailable")
    }
}

impl FaceDetector for FailingFaceDetector {
    fn detect(&self, _gray: &GrayImage) -> Result<Vec<FaceBox>> {
        Err(IdPhotoError::face_detection(self.message.clone()))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::new_rgb8(width, height)
    }

    #[test]
    fn test_no_faces_is_none_not_error() {
        let locator = FaceLocator::new(StaticFaceDetector::empty());
        assert_eq!(locator.locate(&image(50, 50)).unwrap(), None);
    }

    #[test]
    fn test_largest_face_wins() {
        let faces = vec![
            FaceBox::new(0, 0, 10, 10),
            FaceBox::new(20, 20, 30, 30),
            FaceBox::new(5, 5, 20, 20),
        ];
        let locator = FaceLocator::new(StaticFaceDetector::new(faces));
        assert_eq!(
            locator.locate(&image(100, 100)).unwrap(),
            Some(FaceBox::new(20, 20, 30, 30))
        );
    }

    #[test]
    fn test_ties_resolve_to_first_box() {
        let faces = [
            FaceBox::new(1, 1, 10, 20),
            FaceBox::new(40, 40, 20, 10),
            FaceBox::new(60, 60, 10, 20),
        ];
        assert_eq!(largest_face(&faces), Some(FaceBox::new(1, 1, 10, 20)));
        assert_eq!(largest_face(&[]), None);
    }

    #[test]
    fn test_detector_failure_is_distinct_error() {
        let locator = FaceLocator::new(FailingFaceDetector::default());
        let err = locator.locate(&image(10, 10)).unwrap_err();
        assert!(matches!(err, IdPhotoError::FaceDetection(_)));
    }

    #[test]
    fn test_detector_sees_grayscale_of_full_image() {
        let detector = StaticFaceDetector::empty();
        let locator = FaceLocator::new(detector.clone());
        locator
            .locate(&DynamicImage::new_rgba8(64, 48))
            .unwrap();
        assert_eq!(detector.calls(), vec![(64, 48)]);
    }

    #[test]
    fn test_boxes_are_clipped_to_image() {
        let faces = vec![FaceBox::new(90, 90, 50, 50), FaceBox::new(200, 0, 5, 5)];
        let locator = FaceLocator::new(StaticFaceDetector::new(faces));
        let all = locator.detect_all(&image(100, 100)).unwrap();
        assert_eq!(all, vec![FaceBox::new(90, 90, 10, 10)]);
    }
}
