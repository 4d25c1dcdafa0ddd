//! Physical photo sizes and their pixel dimensions at print resolution
//!
//! The catalog is process-wide static data. Lookups by an unknown name fall
//! back to the first entry (`3x4`), matching how clients that send stale
//! size identifiers are served.

use crate::error::{IdPhotoError, Result};
use serde::{Deserialize, Serialize};

/// Print resolution used to convert millimetres to pixels
pub const DEFAULT_DPI: u32 = 300;

/// Millimetres per inch
pub const MM_PER_INCH: f64 = 25.4;

/// A named physical ID photo format
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhotoSize {
    /// Identifier used by clients, e.g. `"3x4"`
    pub name: &'static str,
    /// Physical width in millimetres
    pub width_mm: f64,
    /// Physical height in millimetres
    pub height_mm: f64,
    /// Human-readable description
    pub description: Option<&'static str>,
}

impl PhotoSize {
    /// Pixel dimensions at the default print resolution
    #[must_use]
    pub fn pixel_dimensions(&self) -> PixelDimensions {
        self.pixel_dimensions_at(DEFAULT_DPI)
    }

    /// Pixel dimensions at an arbitrary resolution
    #[must_use]
    pub fn pixel_dimensions_at(&self, dpi: u32) -> PixelDimensions {
        PixelDimensions {
            width_px: mm_to_pixels_at(self.width_mm, dpi),
            height_px: mm_to_pixels_at(self.height_mm, dpi),
        }
    }
}

/// Supported sizes. The first entry is the fallback.
pub static PHOTO_SIZES: &[PhotoSize] = &[
    PhotoSize {
        name: "3x4",
        width_mm: 30.0,
        height_mm: 40.0,
        description: Some("3x4 cm, standard ID card and document photo"),
    },
    PhotoSize {
        name: "2x3",
        width_mm: 20.0,
        height_mm: 30.0,
        description: Some("2x3 cm, small badge and certificate photo"),
    },
    PhotoSize {
        name: "4x6",
        width_mm: 40.0,
        height_mm: 60.0,
        description: Some("4x6 cm, large profile and record photo"),
    },
    PhotoSize {
        name: "3.5x4.5",
        width_mm: 35.0,
        height_mm: 45.0,
        description: Some("3.5x4.5 cm, passport and Schengen visa photo"),
    },
    PhotoSize {
        name: "5x5",
        width_mm: 50.0,
        height_mm: 50.0,
        description: Some("5x5 cm, square visa photo"),
    },
];

/// The whole catalog
#[must_use]
pub fn catalog() -> &'static [PhotoSize] {
    PHOTO_SIZES
}

/// The fallback size
#[must_use]
pub fn default_size() -> &'static PhotoSize {
    // The catalog is a non-empty static
    &PHOTO_SIZES[0]
}

/// Exact lookup by name
#[must_use]
pub fn lookup(name: &str) -> Option<&'static PhotoSize> {
    PHOTO_SIZES.iter().find(|size| size.name == name.trim())
}

/// Lookup by name, falling back to the default entry
#[must_use]
pub fn find_size(name: &str) -> &'static PhotoSize {
    lookup(name).unwrap_or_else(|| {
        log::debug!("Unknown photo size '{name}', using {}", default_size().name);
        default_size()
    })
}

/// Convert millimetres to pixels at [`DEFAULT_DPI`]
///
/// `round(mm / 25.4 * 300)`, never less than one pixel.
#[must_use]
pub fn mm_to_pixels(mm: f64) -> u32 {
    mm_to_pixels_at(mm, DEFAULT_DPI)
}

/// Convert millimetres to pixels at the given resolution
#[must_use]
pub fn mm_to_pixels_at(mm: f64, dpi: u32) -> u32 {
    let px = (mm / MM_PER_INCH * f64::from(dpi)).round();
    if px.is_nan() || px < 1.0 {
        1
    } else if px >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        px as u32
    }
}

/// Canvas dimensions in pixels, both sides at least 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelDimensions {
    pub width_px: u32,
    pub height_px: u32,
}

impl PixelDimensions {
    /// Validated constructor
    ///
    /// # Errors
    /// - Either side is zero
    pub fn new(width_px: u32, height_px: u32) -> Result<Self> {
        if width_px == 0 || height_px == 0 {
            return Err(IdPhotoError::invalid_config(format!(
                "Pixel dimensions must be at least 1x1, got {width_px}x{height_px}"
            )));
        }
        Ok(Self {
            width_px,
            height_px,
        })
    }

    #[must_use]
    pub fn as_tuple(self) -> (u32, u32) {
        (self.width_px, self.height_px)
    }

    /// Width over height
    #[must_use]
    pub fn aspect_ratio(self) -> f64 {
        f64::from(self.width_px) / f64::from(self.height_px)
    }
}

impl std::fmt::Display for PixelDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width_px, self.height_px)
    }
}

/// What the caller asked the canvas to be
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSize {
    /// A catalog entry (unknown names fall back to the default)
    Named(String),
    /// Explicit pixel dimensions
    Explicit(PixelDimensions),
}

impl TargetSize {
    /// Resolve to pixels at `dpi`
    #[must_use]
    pub fn resolve(&self, dpi: u32) -> PixelDimensions {
        match self {
            Self::Named(name) => find_size(name).pixel_dimensions_at(dpi),
            Self::Explicit(dimensions) => *dimensions,
        }
    }

    /// Label used in file names and logs
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Named(name) => find_size(name).name.to_string(),
            Self::Explicit(dimensions) => dimensions.to_string(),
        }
    }
}

impl Default for TargetSize {
    fn default() -> Self {
        Self::Named(default_size().name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_inch_is_dpi_pixels() {
        assert_eq!(mm_to_pixels(25.4), 300);
        assert_eq!(mm_to_pixels_at(25.4, 600), 600);
    }

    #[test]
    fn test_known_sizes() {
        // 35 mm -> 413.39, 49 mm -> 578.74
        assert_eq!(mm_to_pixels(35.0), 413);
        assert_eq!(mm_to_pixels(49.0), 579);

        let dims = find_size("3x4").pixel_dimensions();
        assert_eq!(dims, PixelDimensions { width_px: 354, height_px: 472 });
    }

    #[test]
    fn test_mm_to_pixels_is_monotonic_and_deterministic() {
        let mut previous = 0;
        for tenth_mm in 0..2000 {
            let mm = f64::from(tenth_mm) / 10.0;
            let px = mm_to_pixels(mm);
            assert!(px >= previous, "{mm}mm gave {px}px after {previous}px");
            assert_eq!(px, mm_to_pixels(mm));
            previous = px;
        }
    }

    #[test]
    fn test_never_below_one_pixel() {
        assert_eq!(mm_to_pixels(0.0), 1);
        assert_eq!(mm_to_pixels(-5.0), 1);
        assert_eq!(mm_to_pixels(f64::NAN), 1);
    }

    #[test]
    fn test_lookup_falls_back_to_default() {
        assert_eq!(find_size("4x6").name, "4x6");
        assert_eq!(find_size(" 2x3 ").name, "2x3");
        assert_eq!(find_size("9x9").name, "3x4");
        assert!(lookup("9x9").is_none());
    }

    #[test]
    fn test_catalog_is_well_formed() {
        assert!(!catalog().is_empty());
        for size in catalog() {
            assert!(size.width_mm > 0.0 && size.height_mm > 0.0);
            let dims = size.pixel_dimensions();
            assert!(dims.width_px >= 1 && dims.height_px >= 1);
        }
    }

    #[test]
    fn test_pixel_dimensions_validation() {
        assert!(PixelDimensions::new(0, 10).is_err());
        assert!(PixelDimensions::new(10, 0).is_err());
        let dims = PixelDimensions::new(413, 579).unwrap();
        assert_eq!(dims.to_string(), "413x579");
    }

    #[test]
    fn test_target_size_resolution() {
        let named = TargetSize::Named("3.5x4.5".to_string());
        assert_eq!(named.resolve(DEFAULT_DPI).as_tuple(), (413, 531));
        assert_eq!(named.label(), "3.5x4.5");

        let explicit = TargetSize::Explicit(PixelDimensions::new(100, 150).unwrap());
        assert_eq!(explicit.resolve(DEFAULT_DPI).as_tuple(), (100, 150));
        assert_eq!(TargetSize::default().label(), "3x4");
    }
}
