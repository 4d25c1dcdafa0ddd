//! Background cutout provider
//!
//! A [`SegmentationBackend`] runs a salient-object model on a normalized NCHW
//! tensor. [`Segmenter`] wraps a backend with the letterbox preprocessing
//! and mask post-processing needed to turn any photo into a [`Cutout`].

use crate::error::{IdPhotoError, Result};
use image::{imageops, DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, RgbImage, RgbaImage};
use instant::{Duration, Instant};
use log::{debug, info};
use ndarray::Array4;
use std::io::Cursor;
use tracing::{instrument, span, Level};

/// Input geometry and normalization a model expects
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingConfig {
    /// Side of the square input tensor
    pub target_size: u32,
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],
    /// Fill for the letterbox padding
    pub padding_color: [u8; 3],
}

impl PreprocessingConfig {
    /// BRIA RMBG-1.4: 1024x1024, mean 0.5, std 1.0
    #[must_use]
    pub fn rmbg() -> Self {
        Self {
            target_size: 1024,
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
            padding_color: [255, 255, 255],
        }
    }

    /// Same normalization at a different input size
    #[must_use]
    pub fn with_target_size(mut self, target_size: u32) -> Self {
        self.target_size = target_size;
        self
    }

    /// # Errors
    /// - Zero target size or a zero standard deviation
    pub fn validate(&self) -> Result<()> {
        if self.target_size == 0 {
            return Err(IdPhotoError::invalid_config("Model input size must be positive"));
        }
        if self.normalization_std.iter().any(|s| s.abs() < f32::EPSILON) {
            return Err(IdPhotoError::invalid_config(
                "Normalization std must be non-zero",
            ));
        }
        Ok(())
    }
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self::rmbg()
    }
}

/// Inference engine running a segmentation model
pub trait SegmentationBackend: Send {
    /// Load the model; returns the load time when work was done
    ///
    /// # Errors
    /// - Model file missing or invalid
    /// - Execution provider setup failure
    fn initialize(&mut self) -> Result<Option<Duration>>;

    /// Run the model on a `[1, 3, S, S]` tensor, returning `[1, 1, S, S]`
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Runtime failure or unexpected output shape
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    fn preprocessing_config(&self) -> PreprocessingConfig;

    fn is_initialized(&self) -> bool;

    /// Drop cached accelerator memory after an inference
    fn release_cached_memory(&mut self) {}

    fn name(&self) -> &'static str;
}

/// RGBA image whose background pixels are transparent
#[derive(Debug, Clone, PartialEq)]
pub struct Cutout(RgbaImage);

impl Cutout {
    #[must_use]
    pub fn new(image: RgbaImage) -> Self {
        Self(image)
    }

    /// # Errors
    /// - The image has no alpha channel
    pub fn from_dynamic(image: DynamicImage) -> Result<Self> {
        if !image.color().has_alpha() {
            return Err(IdPhotoError::MissingAlpha(format!("{:?}", image.color())));
        }
        Ok(Self(image.into_rgba8()))
    }

    #[must_use]
    pub fn image(&self) -> &RgbaImage {
        &self.0
    }

    #[must_use]
    pub fn into_image(self) -> RgbaImage {
        self.0
    }

    #[must_use]
    pub fn to_dynamic(&self) -> DynamicImage {
        DynamicImage::ImageRgba8(self.0.clone())
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    /// Share of pixels with non-zero alpha
    #[must_use]
    pub fn foreground_ratio(&self) -> f64 {
        let total = self.0.pixels().len();
        if total == 0 {
            return 0.0;
        }
        let opaque = self.0.pixels().filter(|p| p[3] > 0).count();
        opaque as f64 / total as f64
    }

    /// Encode as PNG
    ///
    /// # Errors
    /// - Encoder failure
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.0
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
        Ok(bytes)
    }
}

/// Where the original image sits inside the square model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub target_size: u32,
}

impl Letterbox {
    /// Fit `original` into a `target_size` square, centred
    #[must_use]
    pub fn fit(original: (u32, u32), target_size: u32) -> Self {
        let (orig_w, orig_h) = original;
        let target_f = target_size as f32;
        let scale = (target_f / orig_w.max(1) as f32).min(target_f / orig_h.max(1) as f32);
        let scaled_width = ((orig_w as f32 * scale).round() as u32).clamp(1, target_size.max(1));
        let scaled_height = ((orig_h as f32 * scale).round() as u32).clamp(1, target_size.max(1));
        Self {
            scale,
            offset_x: target_size.saturating_sub(scaled_width) / 2,
            offset_y: target_size.saturating_sub(scaled_height) / 2,
            scaled_width,
            scaled_height,
            target_size,
        }
    }
}

/// Letterbox `image` into the model input and normalize to NCHW
///
/// # Errors
/// - Invalid preprocessing config
/// - Empty image
pub fn preprocess(
    image: &DynamicImage,
    config: &PreprocessingConfig,
) -> Result<(Array4<f32>, Letterbox)> {
    config.validate()?;
    let rgb = image.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(IdPhotoError::invalid_input("Cannot segment an empty image"));
    }

    let letterbox = Letterbox::fit(rgb.dimensions(), config.target_size);
    let resized = imageops::resize(
        &rgb,
        letterbox.scaled_width,
        letterbox.scaled_height,
        imageops::FilterType::Triangle,
    );

    let mut canvas: RgbImage = ImageBuffer::from_pixel(
        config.target_size,
        config.target_size,
        Rgb(config.padding_color),
    );
    imageops::replace(
        &mut canvas,
        &resized,
        i64::from(letterbox.offset_x),
        i64::from(letterbox.offset_y),
    );

    let size = config.target_size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in canvas.enumerate_pixels() {
        for channel in 0..3 {
            let value = (f32::from(pixel[channel]) / 255.0 - config.normalization_mean[channel])
                / config.normalization_std[channel];
            if let Some(slot) = tensor.get_mut([0, channel, y as usize, x as usize]) {
                *slot = value;
            }
        }
    }

    Ok((tensor, letterbox))
}

/// Map a `[1, 1, S, S]` model output back to an alpha mask of `original` size
///
/// Values inside the letterbox region are min-max normalized before scaling.
///
/// # Errors
/// - Output shape does not match the letterbox
pub fn tensor_to_mask(
    tensor: &Array4<f32>,
    letterbox: &Letterbox,
    original: (u32, u32),
) -> Result<GrayImage> {
    let shape = tensor.shape();
    let expected = letterbox.target_size as usize;
    if shape != [1, 1, expected, expected] {
        return Err(IdPhotoError::segmentation(format!(
            "Unexpected model output shape {shape:?}, expected [1, 1, {expected}, {expected}]"
        )));
    }

    let value_at = |x: u32, y: u32| -> f32 {
        tensor
            .get([
                0,
                0,
                (y + letterbox.offset_y) as usize,
                (x + letterbox.offset_x) as usize,
            ])
            .copied()
            .unwrap_or(0.0)
    };

    let (mut min, mut max) = (f32::INFINITY, f32::NEG_INFINITY);
    for y in 0..letterbox.scaled_height {
        for x in 0..letterbox.scaled_width {
            let v = value_at(x, y);
            if v.is_finite() {
                min = min.min(v);
                max = max.max(v);
            }
        }
    }
    let range = max - min;

    let region = GrayImage::from_fn(letterbox.scaled_width, letterbox.scaled_height, |x, y| {
        let v = value_at(x, y);
        let normalized = if !v.is_finite() {
            0.0
        } else if range > f32::EPSILON {
            (v - min) / range
        } else {
            v.clamp(0.0, 1.0)
        };
        Luma([(normalized * 255.0).round() as u8])
    });

    Ok(imageops::resize(
        &region,
        original.0,
        original.1,
        imageops::FilterType::Triangle,
    ))
}

/// Use `mask` as alpha; fully transparent pixels are zeroed
///
/// # Errors
/// - Mask size differs from the image
pub fn apply_mask(image: &DynamicImage, mask: &GrayImage) -> Result<Cutout> {
    let rgba = image.to_rgba8();
    if rgba.dimensions() != mask.dimensions() {
        return Err(IdPhotoError::segmentation(format!(
            "Mask {:?} does not match image {:?}",
            mask.dimensions(),
            rgba.dimensions()
        )));
    }

    let cutout = RgbaImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let pixel = rgba.get_pixel(x, y);
        let alpha = mask.get_pixel(x, y)[0].min(pixel[3]);
        if alpha > 0 {
            image::Rgba([pixel[0], pixel[1], pixel[2], alpha])
        } else {
            image::Rgba([0, 0, 0, 0])
        }
    });
    Ok(Cutout::new(cutout))
}

/// Turns photos into cutouts with a backend
pub struct Segmenter {
    backend: Box<dyn SegmentationBackend>,
}

impl Segmenter {
    pub fn new<B: SegmentationBackend + 'static>(backend: B) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    #[must_use]
    pub fn from_boxed(backend: Box<dyn SegmentationBackend>) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.backend.is_initialized()
    }

    /// Initialize the backend if needed
    ///
    /// # Errors
    /// - Backend initialization failure, as [`IdPhotoError::Segmentation`]
    pub fn initialize(&mut self) -> Result<()> {
        if self.backend.is_initialized() {
            return Ok(());
        }
        info!("Initializing {} segmentation backend", self.backend.name());
        let load_time = self.backend.initialize().map_err(into_segmentation)?;
        if let Some(load_time) = load_time {
            info!("Segmentation model loaded in {}ms", load_time.as_millis());
        }
        Ok(())
    }

    /// Remove the background from `image`
    ///
    /// # Errors
    /// - Any failure, as [`IdPhotoError::Segmentation`]
    #[instrument(skip(self, image), fields(backend = self.backend.name(), width = image.width(), height = image.height()))]
    pub fn segment(&mut self, image: &DynamicImage) -> Result<Cutout> {
        self.initialize()?;
        let start = Instant::now();
        let original = (image.width(), image.height());
        let config = self.backend.preprocessing_config();

        let (input, letterbox) = {
            let _span = span!(Level::DEBUG, "preprocessing").entered();
            preprocess(image, &config).map_err(into_segmentation)?
        };

        let output = {
            let _span = span!(Level::INFO, "inference", backend = self.backend.name()).entered();
            let output = self.backend.infer(&input);
            self.backend.release_cached_memory();
            output.map_err(into_segmentation)?
        };

        let cutout = {
            let _span = span!(Level::DEBUG, "mask").entered();
            let mask = tensor_to_mask(&output, &letterbox, original)?;
            apply_mask(image, &mask)?
        };

        debug!(
            "Segmentation finished in {}ms, foreground {:.1}%",
            start.elapsed().as_millis(),
            cutout.foreground_ratio() * 100.0
        );
        Ok(cutout)
    }
}

impl std::fmt::Debug for Segmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segmenter")
            .field("backend", &self.backend.name())
            .field("initialized", &self.backend.is_initialized())
            .finish()
    }
}

fn into_segmentation(error: IdPhotoError) -> IdPhotoError {
    match error {
        IdPhotoError::Segmentation(_) => error,
        other => IdPhotoError::Segmentation(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::MockBackend;

    fn photo(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([180, 120, 90])))
    }

    #[test]
    fn test_letterbox_fit() {
        let lb = Letterbox::fit((200, 100), 64);
        assert_eq!((lb.scaled_width, lb.scaled_height), (64, 32));
        assert_eq!((lb.offset_x, lb.offset_y), (0, 16));

        let lb = Letterbox::fit((30, 90), 90);
        assert_eq!((lb.scaled_width, lb.scaled_height), (30, 90));
        assert_eq!((lb.offset_x, lb.offset_y), (30, 0));
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let config = PreprocessingConfig::rmbg().with_target_size(32);
        let (tensor, lb) = preprocess(&photo(64, 32), &config).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 32, 32]);
        assert_eq!(lb.offset_y, 8);

        // White padding maps to 1.0 - 0.5
        assert!((tensor[[0, 0, 0, 0]] - 0.5).abs() < 1e-6);
        // Photo pixel red channel: 180/255 - 0.5
        let expected = 180.0 / 255.0 - 0.5;
        assert!((tensor[[0, 0, 16, 16]] - expected).abs() < 1e-3);
    }

    #[test]
    fn test_preprocess_rejects_bad_config() {
        let mut config = PreprocessingConfig::rmbg();
        config.normalization_std = [1.0, 0.0, 1.0];
        assert!(preprocess(&photo(4, 4), &config).is_err());
    }

    #[test]
    fn test_tensor_to_mask_normalizes_region() {
        let lb = Letterbox::fit((4, 4), 4);
        let mut tensor = Array4::<f32>::from_elem((1, 1, 4, 4), 0.2);
        tensor[[0, 0, 1, 1]] = 0.6;
        let mask = tensor_to_mask(&tensor, &lb, (4, 4)).unwrap();
        assert_eq!(mask.get_pixel(1, 1)[0], 255);
        assert_eq!(mask.get_pixel(3, 3)[0], 0);
    }

    #[test]
    fn test_tensor_to_mask_rejects_wrong_shape() {
        let lb = Letterbox::fit((4, 4), 8);
        let tensor = Array4::<f32>::zeros((1, 1, 4, 4));
        assert!(matches!(
            tensor_to_mask(&tensor, &lb, (4, 4)),
            Err(IdPhotoError::Segmentation(_))
        ));
    }

    #[test]
    fn test_apply_mask_sets_alpha() {
        let mut mask = GrayImage::new(2, 1);
        mask.put_pixel(0, 0, Luma([0]));
        mask.put_pixel(1, 0, Luma([200]));
        let cutout = apply_mask(&photo(2, 1), &mask).unwrap();
        assert_eq!(*cutout.image().get_pixel(0, 0), image::Rgba([0, 0, 0, 0]));
        assert_eq!(*cutout.image().get_pixel(1, 0), image::Rgba([180, 120, 90, 200]));
        assert!((cutout.foreground_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cutout_requires_alpha() {
        assert!(matches!(
            Cutout::from_dynamic(photo(2, 2)),
            Err(IdPhotoError::MissingAlpha(_))
        ));
        assert!(Cutout::from_dynamic(DynamicImage::new_rgba8(2, 2)).is_ok());
    }

    #[test]
    fn test_segment_with_mock_backend() {
        let backend = MockBackend::new().with_target_size(64);
        let history = backend.call_history_handle();
        let mut segmenter = Segmenter::new(backend);

        let cutout = segmenter.segment(&photo(120, 160)).unwrap();
        assert_eq!(cutout.dimensions(), (120, 160));
        // Corners are background, centre is subject
        assert_eq!(cutout.image().get_pixel(0, 0)[3], 0);
        assert_eq!(cutout.image().get_pixel(60, 90)[3], 255);

        let calls = history.lock().unwrap().clone();
        assert_eq!(calls, vec!["initialize", "infer", "release_cached_memory"]);
    }

    #[test]
    fn test_backend_failures_become_segmentation_errors() {
        let mut segmenter = Segmenter::new(MockBackend::failing_init());
        assert!(matches!(
            segmenter.segment(&photo(8, 8)),
            Err(IdPhotoError::Segmentation(_))
        ));

        let mut segmenter = Segmenter::new(MockBackend::failing_inference());
        assert!(matches!(
            segmenter.segment(&photo(8, 8)),
            Err(IdPhotoError::Segmentation(_))
        ));
    }

    #[test]
    fn test_cutout_png_roundtrip_keeps_alpha() {
        let cutout = Cutout::new(RgbaImage::from_pixel(3, 3, image::Rgba([1, 2, 3, 4])));
        let decoded = image::load_from_memory(&cutout.to_png_bytes().unwrap()).unwrap();
        assert!(decoded.color().has_alpha());
    }
}
