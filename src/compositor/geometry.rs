//! Pure placement calculations for the compositor.
//!
//! Nothing here touches pixels. Every real to integer conversion goes through
//! [`round_px`] (half away from zero) and every halving of a pixel span is a
//! floor division, so the same inputs always land on the same pixel grid.

use crate::error::{IdPhotoError, Result};
use crate::face::FaceBox;
use crate::sizes::PixelDimensions;

/// Round a real pixel quantity to the pixel grid.
///
/// Negative and NaN inputs map to zero.
#[must_use]
pub fn round_px(value: f64) -> u32 {
    let rounded = value.round();
    if rounded.is_nan() || rounded <= 0.0 {
        0
    } else if rounded >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        rounded as u32
    }
}

/// Rectangle cut out of an intermediate image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Whether the rectangle lies inside an image of the given size.
    #[must_use]
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        u64::from(self.x) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(height)
    }
}

/// Where a face-anchored composition takes its pixels from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FacePlacement {
    /// Uniform scale applied to the whole cutout
    pub scale: f64,
    /// Size of the cutout after scaling
    pub resized: (u32, u32),
    /// Scaled face top-left corner
    pub face_origin: (u32, u32),
    /// Window of the resized cutout that becomes the canvas, `None` when the
    /// resized cutout is smaller than the canvas in some dimension
    pub crop: Option<CropRect>,
}

/// Scale the cutout so the face fills `face_ratio` of the canvas height, then
/// choose a canvas-sized window with the face top at `top_margin_ratio` of the
/// height and the face centred horizontally.
///
/// # Errors
/// - The face box has zero height or width
pub fn face_anchored_placement(
    source: (u32, u32),
    face: &FaceBox,
    target: PixelDimensions,
    face_ratio: f64,
    top_margin_ratio: f64,
) -> Result<FacePlacement> {
    if face.height == 0 || face.width == 0 {
        return Err(IdPhotoError::processing_stage_error(
            "face placement",
            "face box is empty",
            Some(&format!("{}x{}", source.0, source.1)),
        ));
    }

    let (target_w, target_h) = target.as_tuple();
    let new_face_height = round_px(f64::from(target_h) * face_ratio);
    let scale = f64::from(new_face_height) / f64::from(face.height);

    let resized_w = round_px(f64::from(source.0) * scale);
    let resized_h = round_px(f64::from(source.1) * scale);

    let new_face_left = round_px(f64::from(face.x) * scale);
    let new_face_top = round_px(f64::from(face.y) * scale);
    let scaled_face_w = round_px(f64::from(face.width) * scale);
    let top_margin = round_px(f64::from(target_h) * top_margin_ratio);

    // Signed: the face can be wider than the canvas
    let side_slack = (i64::from(target_w) - i64::from(scaled_face_w)).div_euclid(2);
    let mut crop_left = (i64::from(new_face_left) - side_slack).max(0);
    let mut crop_top = (i64::from(new_face_top) - i64::from(top_margin)).max(0);

    if crop_left + i64::from(target_w) > i64::from(resized_w) {
        crop_left = (i64::from(resized_w) - i64::from(target_w)).max(0);
    }
    if crop_top + i64::from(target_h) > i64::from(resized_h) {
        crop_top = (i64::from(resized_h) - i64::from(target_h)).max(0);
    }

    let window = CropRect {
        x: crop_left as u32,
        y: crop_top as u32,
        width: target_w,
        height: target_h,
    };
    let crop = (resized_w > 0 && resized_h > 0 && window.fits_within(resized_w, resized_h))
        .then_some(window);

    Ok(FacePlacement {
        scale,
        resized: (resized_w, resized_h),
        face_origin: (new_face_left, new_face_top),
        crop,
    })
}

/// Which side of the source constrains a fill crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillAxis {
    /// Source is relatively wider: heights match, crop horizontally centred
    Horizontal,
    /// Source is relatively taller or equal: widths match, crop biased upward
    Vertical,
}

/// Resize-then-crop plan for compositions without a face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillCrop {
    pub axis: FillAxis,
    pub resized: (u32, u32),
    pub crop: CropRect,
}

/// Cover the canvas while keeping the source aspect ratio.
///
/// Wider sources are cropped centred horizontally. Taller (or equal) sources
/// are cropped `slack / vertical_bias_divisor` from the top.
///
/// # Errors
/// - A zero-sized source
/// - A resize that would not cover the canvas
pub fn fill_crop(
    source: (u32, u32),
    target: PixelDimensions,
    vertical_bias_divisor: u32,
) -> Result<FillCrop> {
    let (src_w, src_h) = source;
    if src_w == 0 || src_h == 0 {
        return Err(IdPhotoError::processing_stage_error(
            "fill crop",
            "source image is empty",
            Some(&format!("{src_w}x{src_h}")),
        ));
    }

    let (target_w, target_h) = target.as_tuple();
    let img_ratio = f64::from(src_w) / f64::from(src_h);
    let target_ratio = target.aspect_ratio();

    let (axis, resized, origin) = if img_ratio > target_ratio {
        let resized_w = round_px(f64::from(target_h) * img_ratio).max(target_w);
        (
            FillAxis::Horizontal,
            (resized_w, target_h),
            ((resized_w - target_w) / 2, 0),
        )
    } else {
        let resized_h = round_px(f64::from(target_w) / img_ratio).max(target_h);
        let bias = vertical_bias_divisor.max(1);
        (
            FillAxis::Vertical,
            (target_w, resized_h),
            (0, (resized_h - target_h) / bias),
        )
    };

    let crop = CropRect {
        x: origin.0,
        y: origin.1,
        width: target_w,
        height: target_h,
    };
    if !crop.fits_within(resized.0, resized.1) {
        return Err(IdPhotoError::processing_stage_error(
            "fill crop",
            "crop window exceeds resized image",
            Some(&format!("{}x{}", resized.0, resized.1)),
        ));
    }

    Ok(FillCrop {
        axis,
        resized,
        crop,
    })
}

/// Largest intermediate resize, in pixels, done in one piece. Bigger plans
/// resample only the [`SourceWindow`] that survives the crop.
pub const MAX_INTERMEDIATE_PIXELS: u64 = 40_000_000;

/// Whether a resize to `resized` stays under [`MAX_INTERMEDIATE_PIXELS`].
#[must_use]
pub fn fits_intermediate_budget(resized: (u32, u32)) -> bool {
    u64::from(resized.0) * u64::from(resized.1) <= MAX_INTERMEDIATE_PIXELS
}

/// Part of the source that a crop of a larger resize keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceWindow {
    /// Region of the source image to resample
    pub region: CropRect,
    /// Size the region is resampled to
    pub scaled: (u32, u32),
    /// Window inside the resampled region
    pub crop: CropRect,
}

/// Map `crop` of the full `resized` image back onto `source`.
///
/// The region is padded beyond the reach of the resampling filter on every
/// side that is not the image edge, so the window matches a full resize up
/// to rounding and the resampled region always covers it.
///
/// # Errors
/// - An empty source or crop
/// - `crop` outside `resized`
pub fn source_window(source: (u32, u32), resized: (u32, u32), crop: CropRect) -> Result<SourceWindow> {
    let invalid = |details: &str| {
        IdPhotoError::processing_stage_error(
            "source window",
            details,
            Some(&format!("{}x{} -> {}x{}", source.0, source.1, resized.0, resized.1)),
        )
    };
    if source.0 == 0 || source.1 == 0 || crop.width == 0 || crop.height == 0 {
        return Err(invalid("empty source or crop"));
    }
    if !crop.fits_within(resized.0, resized.1) {
        return Err(invalid("crop window exceeds resized image"));
    }

    let horizontal = window_span(source.0, resized.0, crop.x, crop.width).ok_or_else(|| invalid("window too narrow"))?;
    let vertical = window_span(source.1, resized.1, crop.y, crop.height).ok_or_else(|| invalid("window too short"))?;

    Ok(SourceWindow {
        region: CropRect {
            x: horizontal.first,
            y: vertical.first,
            width: horizontal.len,
            height: vertical.len,
        },
        scaled: (horizontal.scaled_len, vertical.scaled_len),
        crop: CropRect {
            x: horizontal.offset,
            y: vertical.offset,
            width: crop.width,
            height: crop.height,
        },
    })
}

struct Span {
    first: u32,
    len: u32,
    scaled_len: u32,
    offset: u32,
}

fn window_span(src_len: u32, resized_len: u32, start: u32, len: u32) -> Option<Span> {
    let scale = f64::from(resized_len) / f64::from(src_len);
    // Lanczos3 reaches three pixels on the coarser grid
    let pad = (3.0 / scale.min(1.0)).ceil() + 1.0;
    let first = (f64::from(start) / scale - pad).floor().max(0.0);
    let last = ((f64::from(start) + f64::from(len)) / scale + pad)
        .ceil()
        .min(f64::from(src_len));
    if last <= first {
        return None;
    }
    let (first, last) = (first as u32, last as u32);

    let scaled_len = if first == 0 && last == src_len {
        resized_len
    } else {
        round_px(f64::from(last - first) * scale)
    };
    if scaled_len < len {
        return None;
    }
    let offset = round_px(f64::from(start) - f64::from(first) * scale).min(scaled_len - len);
    Some(Span {
        first,
        len: last - first,
        scaled_len,
        offset,
    })
}
