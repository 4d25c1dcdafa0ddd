//! Canvas compositor
//!
//! Places a background-removed cutout on a fixed-size, opaque canvas. When a
//! face is found the cutout is scaled so the face has a fixed share of the
//! canvas height and cropped around it. Without a face the cutout is scaled to
//! cover the canvas and cropped centred (wide sources) or near the top (tall
//! sources). [`Compositor::compose`] never fails: unexpected errors produce a
//! blank canvas tagged [`CompositionStatus::Degraded`].

pub mod framing;
pub mod geometry;

pub use framing::{CustomFraming, FramingStrategy, StandardFraming};
pub use geometry::{
    face_anchored_placement, fill_crop, fits_intermediate_budget, round_px, source_window,
    CropRect, FacePlacement, FillAxis, FillCrop, SourceWindow, MAX_INTERMEDIATE_PIXELS,
};

use crate::color::Color;
use crate::error::{IdPhotoError, Result};
use crate::face::{FaceBox, FaceLocator};
use crate::sizes::PixelDimensions;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage, RgbaImage};
use instant::Instant;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, span, warn, Level};

/// Why the compositor used the centred crop instead of a face
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum NoFaceReason {
    /// The detector ran and found nothing
    NoFaceDetected,
    /// The detector failed; treated as no face
    DetectorFailed(String),
}

/// How a canvas was produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompositionStatus {
    /// Scaled and cropped around the detected face
    FaceAnchored { face: FaceBox },
    /// No usable face; aspect-preserving cover crop
    Centered { reason: NoFaceReason },
    /// A face was found but the scaled cutout was smaller than the canvas,
    /// so the whole cutout was stretched to the canvas size
    Stretched { face: FaceBox },
    /// Compositing failed; the canvas is blank background
    Degraded { reason: String },
}

impl CompositionStatus {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    /// Short label for logs and file metadata
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::FaceAnchored { .. } => "face_anchored",
            Self::Centered { .. } => "centered",
            Self::Stretched { .. } => "stretched",
            Self::Degraded { .. } => "degraded",
        }
    }

    /// Human-readable warning for statuses callers should surface
    #[must_use]
    pub fn warning(&self) -> Option<String> {
        match self {
            Self::FaceAnchored { .. } => None,
            Self::Centered {
                reason: NoFaceReason::NoFaceDetected,
            } => Some("No face detected; photo was centred without face alignment".to_string()),
            Self::Centered {
                reason: NoFaceReason::DetectorFailed(e),
            } => Some(format!("Face detection failed ({e}); photo was centred")),
            Self::Stretched { .. } => Some(
                "Photo was too small to crop around the face and was stretched to size".to_string(),
            ),
            Self::Degraded { reason } => {
                Some(format!("Compositing failed ({reason}); returned a blank canvas"))
            },
        }
    }
}

/// Finished canvas plus how it was made
#[derive(Debug, Clone)]
pub struct Composition {
    pub canvas: RgbImage,
    pub status: CompositionStatus,
    pub elapsed_ms: u64,
}

impl Composition {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.status.is_degraded()
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    #[must_use]
    pub fn into_dynamic(self) -> DynamicImage {
        DynamicImage::ImageRgb8(self.canvas)
    }
}

/// Face-aware compositor, generic over the framing policy
pub struct Compositor<F: FramingStrategy = StandardFraming> {
    locator: FaceLocator,
    framing: F,
    filter: FilterType,
}

impl Compositor<StandardFraming> {
    pub fn new(locator: FaceLocator) -> Self {
        Self::with_framing(locator, StandardFraming)
    }
}

impl<F: FramingStrategy> Compositor<F> {
    pub fn with_framing(locator: FaceLocator, framing: F) -> Self {
        Self {
            locator,
            framing,
            filter: FilterType::Lanczos3,
        }
    }

    /// Resampling filter for every resize (Lanczos3 by default)
    #[must_use]
    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn framing(&self) -> &F {
        &self.framing
    }

    #[must_use]
    pub fn locator(&self) -> &FaceLocator {
        &self.locator
    }

    /// Compose, degrading to a blank `bg` canvas on any failure
    #[instrument(skip_all, fields(target = %target, bg = %bg))]
    pub fn compose(&self, cutout: &DynamicImage, target: PixelDimensions, bg: Color) -> Composition {
        let start = Instant::now();
        match self.try_compose(cutout, target, bg) {
            Ok(composition) => composition,
            Err(e) => {
                warn!(error = %e, "Compositing failed, returning blank canvas");
                Composition {
                    canvas: blank_canvas(target, bg),
                    status: CompositionStatus::Degraded {
                        reason: e.to_string(),
                    },
                    elapsed_ms: start.elapsed().as_millis() as u64,
                }
            },
        }
    }

    /// Compose, returning errors instead of degrading
    ///
    /// Face detector failures are still absorbed and reported as
    /// [`NoFaceReason::DetectorFailed`].
    ///
    /// # Errors
    /// - The cutout has no alpha channel
    /// - Geometry or resampling failures
    pub fn try_compose(
        &self,
        cutout: &DynamicImage,
        target: PixelDimensions,
        bg: Color,
    ) -> Result<Composition> {
        let start = Instant::now();

        if !cutout.color().has_alpha() {
            return Err(IdPhotoError::MissingAlpha(format!("{:?}", cutout.color())));
        }
        let rgba = cutout.to_rgba8();
        if rgba.width() == 0 || rgba.height() == 0 {
            return Err(IdPhotoError::invalid_input("Cutout is empty"));
        }

        let detection = {
            let _span = span!(Level::DEBUG, "face_detection").entered();
            let rgb = DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(rgba.clone()).to_rgb8());
            self.locator
                .detect_all(&rgb)
                .map(|faces| self.framing.select_face(&faces))
        };

        let (canvas, status) = match detection {
            Ok(Some(face)) => {
                let _span = span!(Level::DEBUG, "face_anchored", ?face).entered();
                self.face_anchored(&rgba, &face, target, bg)?
            },
            Ok(None) => {
                let _span = span!(Level::DEBUG, "centered").entered();
                let canvas = self.centered(&rgba, target, bg)?;
                (
                    canvas,
                    CompositionStatus::Centered {
                        reason: NoFaceReason::NoFaceDetected,
                    },
                )
            },
            Err(e) => {
                warn!(error = %e, "Face detection failed, composing without a face");
                let _span = span!(Level::DEBUG, "centered").entered();
                let canvas = self.centered(&rgba, target, bg)?;
                (
                    canvas,
                    CompositionStatus::Centered {
                        reason: NoFaceReason::DetectorFailed(e.to_string()),
                    },
                )
            },
        };

        debug!(status = status.label(), "Composition finished");
        Ok(Composition {
            canvas,
            status,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn face_anchored(
        &self,
        rgba: &RgbaImage,
        face: &FaceBox,
        target: PixelDimensions,
        bg: Color,
    ) -> Result<(RgbImage, CompositionStatus)> {
        let placement = face_anchored_placement(
            rgba.dimensions(),
            face,
            target,
            self.framing.face_ratio(),
            self.framing.top_margin_ratio(),
        )?;
        debug!(
            scale = placement.scale,
            resized = ?placement.resized,
            crop = ?placement.crop,
            "Face placement computed"
        );

        match placement.crop {
            Some(crop) => {
                let window = self.resize_and_crop(rgba, placement.resized, crop)?;
                Ok((
                    paste_on_background(&window, target, bg),
                    CompositionStatus::FaceAnchored { face: *face },
                ))
            },
            None => {
                debug!("Scaled cutout smaller than canvas, stretching");
                let stretched =
                    imageops::resize(rgba, target.width_px, target.height_px, self.filter);
                Ok((
                    paste_on_background(&stretched, target, bg),
                    CompositionStatus::Stretched { face: *face },
                ))
            },
        }
    }

    fn centered(&self, rgba: &RgbaImage, target: PixelDimensions, bg: Color) -> Result<RgbImage> {
        let plan = fill_crop(
            rgba.dimensions(),
            target,
            self.framing.fallback_vertical_bias_divisor(),
        )?;
        debug!(axis = ?plan.axis, resized = ?plan.resized, crop = ?plan.crop, "Fill crop computed");
        let window = self.resize_and_crop(rgba, plan.resized, plan.crop)?;
        Ok(paste_on_background(&window, target, bg))
    }

    /// `crop` of `rgba` resized to `resized`
    ///
    /// Plans over [`MAX_INTERMEDIATE_PIXELS`] resample only the source
    /// region that survives the crop.
    fn resize_and_crop(&self, rgba: &RgbaImage, resized: (u32, u32), crop: CropRect) -> Result<RgbaImage> {
        if fits_intermediate_budget(resized) {
            let full = imageops::resize(rgba, resized.0, resized.1, self.filter);
            return crop_window(&full, crop);
        }
        let window = source_window(rgba.dimensions(), resized, crop)?;
        debug!(?resized, ?window, "Resampling source window only");
        let region = imageops::crop_imm(
            rgba,
            window.region.x,
            window.region.y,
            window.region.width,
            window.region.height,
        )
        .to_image();
        let scaled = imageops::resize(&region, window.scaled.0, window.scaled.1, self.filter);
        crop_window(&scaled, window.crop)
    }
}

impl<F: FramingStrategy + std::fmt::Debug> std::fmt::Debug for Compositor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("locator", &self.locator)
            .field("framing", &self.framing)
            .finish_non_exhaustive()
    }
}

/// Opaque canvas filled with `bg`
#[must_use]
pub fn blank_canvas(target: PixelDimensions, bg: Color) -> RgbImage {
    RgbImage::from_pixel(target.width_px, target.height_px, bg.to_rgb())
}

fn crop_window(image: &RgbaImage, crop: CropRect) -> Result<RgbaImage> {
    if !crop.fits_within(image.width(), image.height()) {
        return Err(IdPhotoError::processing_stage_error(
            "crop",
            &format!("{crop:?} outside image"),
            Some(&format!("{}x{}", image.width(), image.height())),
        ));
    }
    Ok(imageops::crop_imm(image, crop.x, crop.y, crop.width, crop.height).to_image())
}

/// Alpha-blend `layer` at the origin of a `bg` canvas and drop the alpha channel
fn paste_on_background(layer: &RgbaImage, target: PixelDimensions, bg: Color) -> RgbImage {
    let mut canvas = RgbaImage::from_pixel(target.width_px, target.height_px, bg.to_rgba());
    imageops::overlay(&mut canvas, layer, 0, 0);
    DynamicImage::ImageRgba8(canvas).to_rgb8()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::{FailingFaceDetector, StaticFaceDetector};
    use image::{Rgb, Rgba};

    fn dims(width: u32, height: u32) -> PixelDimensions {
        PixelDimensions::new(width, height).unwrap()
    }

    /// Opaque red subject on a transparent background
    fn subject(width: u32, height: u32) -> DynamicImage {
        let mut img = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
        for y in height / 4..height {
            for x in width / 4..width * 3 / 4 {
                img.put_pixel(x, y, Rgba([200, 30, 30, 255]));
            }
        }
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn test_face_path_produces_target_size() {
        let compositor = Compositor::new(FaceLocator::new(StaticFaceDetector::single(
            FaceBox::new(100, 60, 80, 100),
        )));
        let out = compositor.compose(&subject(300, 400), dims(120, 160), Color::WHITE);
        assert_eq!(out.dimensions(), (120, 160));
        assert!(matches!(out.status, CompositionStatus::FaceAnchored { .. }));
    }

    #[test]
    fn test_transparent_areas_show_background() {
        let compositor = Compositor::new(FaceLocator::disabled());
        let bg = Color::new(10, 20, 240);
        let out = compositor.compose(&subject(100, 100), dims(100, 100), bg);
        assert_eq!(*out.canvas.get_pixel(0, 0), Rgb([10, 20, 240]));
        assert_eq!(*out.canvas.get_pixel(50, 90), Rgb([200, 30, 30]));
    }

    #[test]
    fn test_no_face_is_centered() {
        let compositor = Compositor::new(FaceLocator::disabled());
        let out = compositor.compose(&subject(200, 500), dims(100, 150), Color::WHITE);
        assert_eq!(
            out.status,
            CompositionStatus::Centered {
                reason: NoFaceReason::NoFaceDetected
            }
        );
        assert!(out.status.warning().is_some());
    }

    #[test]
    fn test_detector_failure_degrades_to_centered() {
        let compositor = Compositor::new(FaceLocator::new(FailingFaceDetector::default()));
        let out = compositor.compose(&subject(200, 200), dims(100, 150), Color::WHITE);
        assert!(matches!(
            out.status,
            CompositionStatus::Centered {
                reason: NoFaceReason::DetectorFailed(_)
            }
        ));
        assert!(!out.is_degraded());
    }

    #[test]
    fn test_oversized_face_stretches() {
        let compositor = Compositor::new(FaceLocator::new(StaticFaceDetector::single(
            FaceBox::new(0, 0, 100, 100),
        )));
        let out = compositor.compose(&subject(100, 100), dims(80, 120), Color::WHITE);
        assert!(matches!(out.status, CompositionStatus::Stretched { .. }));
        assert_eq!(out.dimensions(), (80, 120));
    }

    #[test]
    fn test_missing_alpha_degrades() {
        let compositor = Compositor::new(FaceLocator::disabled());
        let rgb = DynamicImage::new_rgb8(50, 50);
        assert!(matches!(
            compositor.try_compose(&rgb, dims(30, 40), Color::WHITE),
            Err(IdPhotoError::MissingAlpha(_))
        ));

        let bg = Color::new(1, 2, 3);
        let out = compositor.compose(&rgb, dims(30, 40), bg);
        assert!(out.is_degraded());
        assert_eq!(out.dimensions(), (30, 40));
        assert!(out.canvas.pixels().all(|p| *p == Rgb([1, 2, 3])));
    }

    #[test]
    fn test_custom_framing_changes_face_scale() {
        let face = FaceBox::new(100, 100, 100, 100);
        let standard =
            Compositor::new(FaceLocator::new(StaticFaceDetector::single(face)));
        let loose = Compositor::with_framing(
            FaceLocator::new(StaticFaceDetector::single(face)),
            CustomFraming::new(0.3, 0.2, 4).unwrap(),
        );
        let img = subject(400, 600);
        let a = standard.compose(&img, dims(200, 300), Color::WHITE);
        let b = loose.compose(&img, dims(200, 300), Color::WHITE);
        assert_eq!(a.dimensions(), b.dimensions());
        assert_ne!(a.canvas, b.canvas);
    }
}
