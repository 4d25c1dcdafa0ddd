//! Border decoration for finished photos

use crate::color::Color;
use crate::error::{IdPhotoError, Result};
use image::{imageops, DynamicImage, ImageFormat, RgbaImage};
use std::path::Path;
use tracing::{debug, instrument, warn};

/// Default border width in pixels
pub const DEFAULT_BORDER_WIDTH: u32 = 2;

/// Largest accepted border width in pixels
pub const MAX_BORDER_WIDTH: u32 = 500;

/// Result of decorating a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderOutcome {
    /// The bordered image was written
    Bordered { width: u32, height: u32 },
    /// The input could not be decorated and was copied unchanged
    CopiedOriginal,
}

/// Reject border widths outside `1..=MAX_BORDER_WIDTH`
///
/// # Errors
/// - `width_px` is zero or too large
pub fn validate_border_width(width_px: u32) -> Result<()> {
    if width_px == 0 || width_px > MAX_BORDER_WIDTH {
        return Err(IdPhotoError::config_value_error(
            "border width",
            width_px,
            &format!("1-{MAX_BORDER_WIDTH}"),
            Some(DEFAULT_BORDER_WIDTH),
        ));
    }
    Ok(())
}

/// Surround `canvas` with a solid `width_px` border of `color`
///
/// The output is `(w + 2*width_px, h + 2*width_px)` with the input pasted at
/// `(width_px, width_px)`. Inputs with alpha are blended over the border color.
///
/// # Errors
/// - `width_px` is zero or larger than [`MAX_BORDER_WIDTH`]
#[instrument(skip(canvas), fields(width = canvas.width(), height = canvas.height()))]
pub fn add_border(canvas: &DynamicImage, width_px: u32, color: Color) -> Result<RgbaImage> {
    validate_border_width(width_px)?;

    let out_w = canvas
        .width()
        .checked_add(2 * width_px)
        .ok_or_else(|| IdPhotoError::invalid_config("Bordered width overflows"))?;
    let out_h = canvas
        .height()
        .checked_add(2 * width_px)
        .ok_or_else(|| IdPhotoError::invalid_config("Bordered height overflows"))?;

    let mut bordered = RgbaImage::from_pixel(out_w, out_h, color.to_rgba());
    let offset = i64::from(width_px);
    if canvas.color().has_alpha() {
        imageops::overlay(&mut bordered, &canvas.to_rgba8(), offset, offset);
    } else {
        imageops::replace(&mut bordered, &canvas.to_rgba8(), offset, offset);
    }
    debug!(out_w, out_h, "Border added");
    Ok(bordered)
}

/// Read `input`, add a border and write a PNG to `output`
///
/// If `input` cannot be decoded the file is copied to `output` unchanged so a
/// downstream consumer still finds a photo there.
///
/// # Errors
/// - Invalid border width
/// - The fallback copy itself fails
/// - Writing the bordered image fails
pub fn add_border_to_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    width_px: u32,
    color: Color,
) -> Result<BorderOutcome> {
    let input = input.as_ref();
    let output = output.as_ref();
    validate_border_width(width_px)?;

    let bordered = image::open(input)
        .map_err(IdPhotoError::from)
        .and_then(|img| add_border(&img, width_px, color));

    match bordered {
        Ok(bordered) => {
            let (width, height) = bordered.dimensions();
            bordered
                .save_with_format(output, ImageFormat::Png)
                .map_err(IdPhotoError::from)?;
            Ok(BorderOutcome::Bordered { width, height })
        },
        Err(e) => {
            warn!(input = %input.display(), error = %e, "Border failed, copying original");
            std::fs::copy(input, output)
                .map_err(|io| IdPhotoError::file_io_error("copy original photo", output, &io))?;
            Ok(BorderOutcome::CopiedOriginal)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage, Rgba};
    use tempfile::TempDir;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7) as u8, (y * 11) as u8, 99])
        }))
    }

    #[test]
    fn test_dimensions_and_center_content() {
        let src = gradient(30, 40);
        let out = add_border(&src, 5, Color::new(9, 9, 9)).unwrap();
        assert_eq!(out.dimensions(), (40, 50));

        let src_rgba = src.to_rgba8();
        for y in 0..40 {
            for x in 0..30 {
                assert_eq!(out.get_pixel(x + 5, y + 5), src_rgba.get_pixel(x, y));
            }
        }
        assert_eq!(*out.get_pixel(0, 0), Rgba([9, 9, 9, 255]));
        assert_eq!(*out.get_pixel(39, 49), Rgba([9, 9, 9, 255]));
        assert_eq!(*out.get_pixel(4, 25), Rgba([9, 9, 9, 255]));
    }

    #[test]
    fn test_transparent_input_shows_border_color() {
        let src = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0])));
        let out = add_border(&src, 2, Color::new(1, 200, 3)).unwrap();
        assert_eq!(*out.get_pixel(3, 3), Rgba([1, 200, 3, 255]));
    }

    #[test]
    fn test_zero_width_rejected() {
        assert!(matches!(
            add_border(&gradient(2, 2), 0, Color::BLACK),
            Err(IdPhotoError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_file_variant_writes_png() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("idphoto.png");
        let output = dir.path().join("idphoto_border.png");
        gradient(10, 12).save(&input).unwrap();

        let outcome = add_border_to_file(&input, &output, 2, Color::BLACK).unwrap();
        assert_eq!(outcome, BorderOutcome::Bordered { width: 14, height: 16 });
        assert_eq!(image::open(&output).unwrap().dimensions(), (14, 16));
    }

    #[test]
    fn test_file_variant_copies_undecodable_input() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("broken.png");
        let output = dir.path().join("broken_border.png");
        std::fs::write(&input, b"not an image").unwrap();

        let outcome = add_border_to_file(&input, &output, 2, Color::BLACK).unwrap();
        assert_eq!(outcome, BorderOutcome::CopiedOriginal);
        assert_eq!(std::fs::read(&output).unwrap(), b"not an image");
    }
}
