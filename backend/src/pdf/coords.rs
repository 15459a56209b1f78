//! Conversion between PDF user space and the overlay's display space.
//!
//! PDF space has its origin at the bottom-left with y growing upward. Display
//! space has its origin at the top-left with y growing downward and is
//! multiplied by the render scale. Rotation is applied to the whole canvas
//! when rendering, so item coordinates always stay in the unrotated frame.

use serde::{Deserialize, Serialize};

use crate::config::ViewConfig;
use crate::error::{EditError, EditResult};
use crate::types::Position;

/// A render scale that has been checked against the configured range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Scale(f64);

impl Scale {
    pub const UNIT: Scale = Scale(1.0);

    /// Out-of-range values are rejected rather than clamped.
    pub fn new(value: f64, view: &ViewConfig) -> EditResult<Self> {
        if !value.is_finite() || value < view.min_scale || value > view.max_scale {
            return Err(EditError::InvalidScale {
                value,
                min: view.min_scale,
                max: view.max_scale,
            });
        }
        Ok(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

/// Page rotation in quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Rotation {
    #[default]
    None,
    Quarter,
    Half,
    ThreeQuarters,
}

impl Rotation {
    /// Accepts any multiple of 90, including negative values.
    pub fn from_degrees(degrees: i64) -> EditResult<Self> {
        if degrees % 90 != 0 {
            return Err(EditError::InvalidRotation(degrees));
        }
        Ok(match degrees.rem_euclid(360) {
            0 => Rotation::None,
            90 => Rotation::Quarter,
            180 => Rotation::Half,
            _ => Rotation::ThreeQuarters,
        })
    }

    pub fn degrees(self) -> i64 {
        match self {
            Rotation::None => 0,
            Rotation::Quarter => 90,
            Rotation::Half => 180,
            Rotation::ThreeQuarters => 270,
        }
    }

    pub fn compose(self, other: Rotation) -> Rotation {
        match Rotation::from_degrees(self.degrees() + other.degrees()) {
            Ok(rotation) => rotation,
            Err(_) => Rotation::None,
        }
    }

    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Quarter | Rotation::ThreeQuarters)
    }
}

impl TryFrom<i64> for Rotation {
    type Error = EditError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Rotation::from_degrees(value)
    }
}

impl From<Rotation> for i64 {
    fn from(value: Rotation) -> Self {
        value.degrees()
    }
}

/// Display geometry of one page at one scale.
#[derive(Debug, Clone, Copy)]
pub struct DisplayTransform {
    pub page_width: f64,
    pub page_height: f64,
    pub scale: Scale,
    pub rotation: Rotation,
}

impl DisplayTransform {
    pub fn new(page_width: f64, page_height: f64, scale: Scale, rotation: Rotation) -> Self {
        Self {
            page_width,
            page_height,
            scale,
            rotation,
        }
    }

    /// Map the bottom-left corner of a glyph box to the display-space
    /// top-left corner of the same box.
    pub fn to_display(&self, pdf_x: f64, pdf_y: f64, glyph_height: f64) -> (f64, f64) {
        to_display_space(pdf_x, pdf_y, glyph_height, self.page_height, self.scale)
    }

    pub fn to_pdf(&self, display_x: f64, display_y: f64, glyph_height: f64) -> (f64, f64) {
        to_pdf_space(display_x, display_y, glyph_height, self.page_height, self.scale)
    }

    /// Size of the rotated canvas that wraps the page.
    pub fn canvas_size(&self) -> (f64, f64) {
        let width = self.page_width * self.scale.value();
        let height = self.page_height * self.scale.value();
        if self.rotation.swaps_axes() {
            (height, width)
        } else {
            (width, height)
        }
    }
}

/// `displayY = pageHeight - pdfY - glyphHeight` at scale 1, then scaled.
pub fn to_display_space(
    pdf_x: f64,
    pdf_y: f64,
    glyph_height: f64,
    page_height: f64,
    scale: Scale,
) -> (f64, f64) {
    let s = scale.value();
    (pdf_x * s, (page_height - pdf_y - glyph_height) * s)
}

/// Inverse of [`to_display_space`].
pub fn to_pdf_space(
    display_x: f64,
    display_y: f64,
    glyph_height: f64,
    page_height: f64,
    scale: Scale,
) -> (f64, f64) {
    let s = scale.value();
    (display_x / s, page_height - glyph_height - display_y / s)
}

/// Positions are stored at scale 1; this produces the rendered copy.
pub fn scale_position(position: Position, scale: Scale) -> Position {
    let s = scale.value();
    Position {
        x: position.x * s,
        y: position.y * s,
        width: position.width * s,
        height: position.height * s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale(value: f64) -> Scale {
        Scale::new(value, &ViewConfig::default()).unwrap()
    }

    #[test]
    fn flips_the_y_axis_at_unit_scale() {
        let (x, y) = to_display_space(72.0, 700.0, 12.0, 792.0, Scale::UNIT);
        assert_eq!(x, 72.0);
        assert_eq!(y, 80.0);
    }

    #[test]
    fn scale_multiplies_after_the_flip() {
        let (x, y) = to_display_space(72.0, 700.0, 12.0, 792.0, scale(2.0));
        assert_eq!(x, 144.0);
        assert_eq!(y, 160.0);
    }

    #[test]
    fn inverse_recovers_pdf_coordinates() {
        for &(px, py, h, s) in &[
            (0.0, 0.0, 10.0, 1.0),
            (33.3, 512.25, 9.5, 1.5),
            (400.0, 17.0, 24.0, 0.5),
            (612.0, 792.0, 0.0, 3.0),
        ] {
            let scale = scale(s);
            let (dx, dy) = to_display_space(px, py, h, 792.0, scale);
            let (bx, by) = to_pdf_space(dx, dy, h, 792.0, scale);
            assert!((bx - px).abs() < 1e-9, "x {bx} != {px}");
            assert!((by - py).abs() < 1e-9, "y {by} != {py}");
        }
    }

    #[test]
    fn out_of_range_scale_is_rejected() {
        let view = ViewConfig::default();
        assert!(matches!(
            Scale::new(0.25, &view),
            Err(EditError::InvalidScale { .. })
        ));
        assert!(Scale::new(3.5, &view).is_err());
        assert!(Scale::new(f64::NAN, &view).is_err());
        assert!(Scale::new(3.0, &view).is_ok());
    }

    #[test]
    fn rotation_does_not_move_item_coordinates() {
        let upright = DisplayTransform::new(612.0, 792.0, Scale::UNIT, Rotation::None);
        let turned = DisplayTransform::new(612.0, 792.0, Scale::UNIT, Rotation::Quarter);
        assert_eq!(upright.to_display(10.0, 10.0, 5.0), turned.to_display(10.0, 10.0, 5.0));
        assert_eq!(turned.canvas_size(), (792.0, 612.0));
    }

    #[test]
    fn rotation_normalizes_degrees() {
        assert_eq!(Rotation::from_degrees(-90).unwrap(), Rotation::ThreeQuarters);
        assert_eq!(Rotation::from_degrees(450).unwrap(), Rotation::Quarter);
        assert!(Rotation::from_degrees(45).is_err());
        assert_eq!(Rotation::Half.compose(Rotation::Quarter), Rotation::ThreeQuarters);
    }
}
