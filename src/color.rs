//! RGB colors parsed from form values
//!
//! Clients send colors as `"r,g,b"` strings. Hex notation (`#rrggbb`, `#rgb`)
//! is accepted as well. Parsing never fails at the request level: malformed
//! values resolve to a per-field default through [`Color::parse_or`].

use crate::error::{IdPhotoError, Result};
use image::{Rgb, Rgba};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An opaque RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Self = Self::new(255, 255, 255);
    pub const BLACK: Self = Self::new(0, 0, 0);

    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `"r,g,b"`, `#rrggbb` or `#rgb`
    ///
    /// # Errors
    /// - Wrong number of components
    /// - A component is not an integer in `0..=255`
    /// - Invalid hex digits
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if let Some(hex) = value.strip_prefix('#') {
            return Self::parse_hex(hex);
        }

        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(IdPhotoError::invalid_input(format!(
                "Color '{value}' must have exactly three components"
            )));
        }

        let mut channels = [0u8; 3];
        for (channel, part) in channels.iter_mut().zip(&parts) {
            *channel = part.parse::<u8>().map_err(|e| {
                IdPhotoError::invalid_input(format!("Color component '{part}' is invalid: {e}"))
            })?;
        }
        Ok(Self::new(channels[0], channels[1], channels[2]))
    }

    fn parse_hex(hex: &str) -> Result<Self> {
        let invalid = || IdPhotoError::invalid_input(format!("Invalid hex color '#{hex}'"));
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let digit = |range: std::ops::Range<usize>| {
            hex.get(range)
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(invalid)
        };
        match hex.len() {
            6 => Ok(Self::new(digit(0..2)?, digit(2..4)?, digit(4..6)?)),
            // #abc expands to #aabbcc
            3 => Ok(Self::new(
                digit(0..1)? * 17,
                digit(1..2)? * 17,
                digit(2..3)? * 17,
            )),
            _ => Err(invalid()),
        }
    }

    /// Parse, falling back to `default` on malformed input
    #[must_use]
    pub fn parse_or(value: &str, default: Self) -> Self {
        Self::parse(value).unwrap_or_else(|e| {
            log::debug!("{e}; using {default}");
            default
        })
    }

    #[must_use]
    pub fn to_rgb(self) -> Rgb<u8> {
        Rgb([self.r, self.g, self.b])
    }

    /// Fully opaque RGBA pixel
    #[must_use]
    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba([self.r, self.g, self.b, 255])
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = IdPhotoError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Color {
    type Error = IdPhotoError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}
