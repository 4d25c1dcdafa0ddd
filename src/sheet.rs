//! Print sheet layout: a grid of identical photos with uniform spacing.

use crate::color::Color;
use crate::error::{IdPhotoError, Result};
use image::{imageops, DynamicImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

pub const DEFAULT_ROWS: u32 = 4;
pub const DEFAULT_COLS: u32 = 6;
pub const DEFAULT_SPACING: u32 = 10;

/// Most rows or columns on one sheet
pub const MAX_TILES_PER_SIDE: u32 = 50;

/// Largest sheet area in pixels (a 4x6 sheet of 5x5 photos is about 16 million)
pub const MAX_SHEET_PIXELS: u64 = 100_000_000;

/// Grid geometry for a sheet of `rows` x `cols` units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetLayout {
    pub rows: u32,
    pub cols: u32,
    pub spacing_px: u32,
    pub unit_width: u32,
    pub unit_height: u32,
}

impl SheetLayout {
    /// # Errors
    /// - `rows` or `cols` is zero or above [`MAX_TILES_PER_SIDE`]
    /// - An empty unit
    /// - The sheet would not fit in `u32` pixels or exceeds [`MAX_SHEET_PIXELS`]
    pub fn new(unit: (u32, u32), rows: u32, cols: u32, spacing_px: u32) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(IdPhotoError::invalid_config(format!(
                "Sheet needs at least one row and column, got {rows}x{cols}"
            )));
        }
        if rows > MAX_TILES_PER_SIDE || cols > MAX_TILES_PER_SIDE {
            return Err(IdPhotoError::config_value_error(
                "sheet rows and columns",
                format!("{rows}x{cols}"),
                &format!("1-{MAX_TILES_PER_SIDE} each"),
                Some(format!("{DEFAULT_ROWS}x{DEFAULT_COLS}")),
            ));
        }
        if unit.0 == 0 || unit.1 == 0 {
            return Err(IdPhotoError::invalid_config("Sheet unit image is empty"));
        }
        let layout = Self {
            rows,
            cols,
            spacing_px,
            unit_width: unit.0,
            unit_height: unit.1,
        };
        let (width, height) = layout.sheet_dimensions()?;
        if u64::from(width) * u64::from(height) > MAX_SHEET_PIXELS {
            return Err(IdPhotoError::invalid_config(format!(
                "Sheet of {width}x{height} px exceeds {MAX_SHEET_PIXELS} pixels"
            )));
        }
        Ok(layout)
    }

    /// `(cols*w + (cols+1)*s, rows*h + (rows+1)*s)`
    ///
    /// # Errors
    /// - Overflow of `u32`
    pub fn sheet_dimensions(&self) -> Result<(u32, u32)> {
        let span = |count: u32, unit: u32| -> Option<u32> {
            count
                .checked_mul(unit)?
                .checked_add(count.checked_add(1)?.checked_mul(self.spacing_px)?)
        };
        match (
            span(self.cols, self.unit_width),
            span(self.rows, self.unit_height),
        ) {
            (Some(width), Some(height)) => Ok((width, height)),
            _ => Err(IdPhotoError::invalid_config(format!(
                "Sheet of {}x{} units at {}x{} px is too large",
                self.rows, self.cols, self.unit_width, self.unit_height
            ))),
        }
    }

    /// Top-left corner of tile `(row, col)`
    #[must_use]
    pub fn tile_origin(&self, row: u32, col: u32) -> (u32, u32) {
        tile_origin(row, col, (self.unit_width, self.unit_height), self.spacing_px)
    }
}

/// Top-left corner of tile `(row, col)`: `(s + col*(w+s), s + row*(h+s))`
#[must_use]
pub fn tile_origin(row: u32, col: u32, unit: (u32, u32), spacing_px: u32) -> (u32, u32) {
    (
        spacing_px + col * (unit.0 + spacing_px),
        spacing_px + row * (unit.1 + spacing_px),
    )
}

/// Tile `unit` into a `rows` x `cols` grid on a `bg` sheet
///
/// Units with alpha are blended onto the sheet color.
///
/// # Errors
/// - Invalid layout, see [`SheetLayout::new`]
#[instrument(skip(unit), fields(unit_width = unit.width(), unit_height = unit.height()))]
pub fn tile(
    unit: &DynamicImage,
    rows: u32,
    cols: u32,
    spacing_px: u32,
    bg: Color,
) -> Result<RgbImage> {
    let layout = SheetLayout::new((unit.width(), unit.height()), rows, cols, spacing_px)?;
    let (width, height) = layout.sheet_dimensions()?;

    let mut sheet = RgbaImage::from_pixel(width, height, bg.to_rgba());
    let tile_px = unit.to_rgba8();
    let blend = unit.color().has_alpha();
    for row in 0..rows {
        for col in 0..cols {
            let (x, y) = layout.tile_origin(row, col);
            if blend {
                imageops::overlay(&mut sheet, &tile_px, i64::from(x), i64::from(y));
            } else {
                imageops::replace(&mut sheet, &tile_px, i64::from(x), i64::from(y));
            }
        }
    }
    debug!(width, height, tiles = rows * cols, "Sheet assembled");
    Ok(DynamicImage::ImageRgba8(sheet).to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba};

    #[test]
    fn test_standard_sheet_geometry() {
        let unit = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 150, Rgb([5, 6, 7])));
        let sheet = tile(&unit, 4, 6, 10, Color::WHITE).unwrap();
        assert_eq!(sheet.dimensions(), (670, 650));

        for row in 0..4 {
            for col in 0..6 {
                let (x, y) = tile_origin(row, col, (100, 150), 10);
                assert_eq!((x, y), (10 + col * 110, 10 + row * 160));
                assert_eq!(*sheet.get_pixel(x, y), Rgb([5, 6, 7]));
                assert_eq!(*sheet.get_pixel(x + 99, y + 149), Rgb([5, 6, 7]));
                assert_eq!(*sheet.get_pixel(x - 1, y), Rgb([255, 255, 255]));
            }
        }
    }

    #[test]
    fn test_zero_spacing_packs_tiles() {
        let unit = DynamicImage::ImageRgb8(RgbImage::new(3, 2));
        let sheet = tile(&unit, 2, 2, 0, Color::WHITE).unwrap();
        assert_eq!(sheet.dimensions(), (6, 4));
        assert!(sheet.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_alpha_units_blend_onto_sheet() {
        let unit = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0])));
        let sheet = tile(&unit, 1, 1, 1, Color::new(40, 50, 60)).unwrap();
        assert!(sheet.pixels().all(|p| *p == Rgb([40, 50, 60])));
    }

    #[test]
    fn test_invalid_layouts_are_reported() {
        let unit = DynamicImage::ImageRgb8(RgbImage::new(10, 10));
        assert!(matches!(
            tile(&unit, 0, 6, 10, Color::WHITE),
            Err(IdPhotoError::InvalidConfig(_))
        ));
        assert!(matches!(
            tile(&unit, 4, 0, 10, Color::WHITE),
            Err(IdPhotoError::InvalidConfig(_))
        ));
        assert!(SheetLayout::new((u32::MAX / 2, 10), 1, 3, 0).is_err());
    }

    #[test]
    fn test_oversized_sheets_rejected_before_allocation() {
        let unit = DynamicImage::ImageRgb8(RgbImage::new(10, 10));
        assert!(matches!(
            tile(&unit, 10_000, 10_000, 10, Color::WHITE),
            Err(IdPhotoError::InvalidConfig(_))
        ));
        assert!(SheetLayout::new((10, 10), MAX_TILES_PER_SIDE, MAX_TILES_PER_SIDE, 0).is_ok());
        assert!(SheetLayout::new((10, 10), MAX_TILES_PER_SIDE + 1, 1, 0).is_err());

        // 50x50 tiles of 591x591 stay under u32 but not under the area cap
        let err = SheetLayout::new((591, 591), 50, 50, 10).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
        assert!(SheetLayout::new((591, 591), DEFAULT_ROWS, DEFAULT_COLS, DEFAULT_SPACING).is_ok());
    }
}
