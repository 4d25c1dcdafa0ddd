//! Framing policy: which face to anchor on and where it sits on the canvas.

use crate::face::{largest_face, FaceBox};

/// Policy knobs for face-anchored compositing.
pub trait FramingStrategy: Send + Sync {
    /// Pick the anchor face from the detector's boxes (detector order).
    fn select_face(&self, faces: &[FaceBox]) -> Option<FaceBox>;

    /// Share of the canvas height the face should cover.
    fn face_ratio(&self) -> f64;

    /// Distance from the canvas top to the face top, as a share of the height.
    fn top_margin_ratio(&self) -> f64;

    /// Without a face, taller sources are cropped `slack / divisor` from the top.
    fn fallback_vertical_bias_divisor(&self) -> u32;
}

/// Head and shoulders framing used for document photos.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StandardFraming;

impl StandardFraming {
    pub const FACE_RATIO: f64 = 0.45;
    pub const TOP_MARGIN_RATIO: f64 = 0.25;
    pub const VERTICAL_BIAS_DIVISOR: u32 = 4;
}

impl FramingStrategy for StandardFraming {
    fn select_face(&self, faces: &[FaceBox]) -> Option<FaceBox> {
        largest_face(faces)
    }

    fn face_ratio(&self) -> f64 {
        Self::FACE_RATIO
    }

    fn top_margin_ratio(&self) -> f64 {
        Self::TOP_MARGIN_RATIO
    }

    fn fallback_vertical_bias_divisor(&self) -> u32 {
        Self::VERTICAL_BIAS_DIVISOR
    }
}

/// Framing with custom ratios, validated to `(0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CustomFraming {
    face_ratio: f64,
    top_margin_ratio: f64,
    vertical_bias_divisor: u32,
}

impl CustomFraming {
    /// Returns `None` for ratios outside `(0, 1]` or a zero divisor.
    #[must_use]
    pub fn new(face_ratio: f64, top_margin_ratio: f64, vertical_bias_divisor: u32) -> Option<Self> {
        let valid = |ratio: f64| ratio > 0.0 && ratio <= 1.0;
        (valid(face_ratio) && (0.0..1.0).contains(&top_margin_ratio) && vertical_bias_divisor > 0)
            .then_some(Self {
                face_ratio,
                top_margin_ratio,
                vertical_bias_divisor,
            })
    }
}

impl FramingStrategy for CustomFraming {
    fn select_face(&self, faces: &[FaceBox]) -> Option<FaceBox> {
        largest_face(faces)
    }

    fn face_ratio(&self) -> f64 {
        self.face_ratio
    }

    fn top_margin_ratio(&self) -> f64 {
        self.top_margin_ratio
    }

    fn fallback_vertical_bias_divisor(&self) -> u32 {
        self.vertical_bias_divisor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_constants() {
        let framing = StandardFraming;
        assert!((framing.face_ratio() - 0.45).abs() < f64::EPSILON);
        assert!((framing.top_margin_ratio() - 0.25).abs() < f64::EPSILON);
        assert_eq!(framing.fallback_vertical_bias_divisor(), 4);
    }

    #[test]
    fn test_standard_selects_largest_first() {
        let faces = [FaceBox::new(0, 0, 8, 8), FaceBox::new(9, 9, 16, 4)];
        assert_eq!(StandardFraming.select_face(&faces), Some(faces[0]));
    }

    #[test]
    fn test_custom_framing_validation() {
        assert!(CustomFraming::new(0.5, 0.2, 3).is_some());
        assert!(CustomFraming::new(0.0, 0.2, 3).is_none());
        assert!(CustomFraming::new(1.2, 0.2, 3).is_none());
        assert!(CustomFraming::new(0.5, 1.0, 3).is_none());
        assert!(CustomFraming::new(0.5, 0.2, 0).is_none());
    }
}
