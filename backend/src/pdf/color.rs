//! Fill color normalization.

use serde::{Deserialize, Serialize};

/// An RGB triple with 0-255 channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub const BLACK: Rgb = Rgb([0, 0, 0]);
    pub const WHITE: Rgb = Rgb([255, 255, 255]);

    /// Channels in the 0-1 range used by content-stream color operators.
    pub fn to_unit(self) -> [f64; 3] {
        self.0.map(|channel| f64::from(channel) / 255.0)
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Rgb::BLACK
    }
}

/// A color as it appears in its source, before normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceColor {
    Gray(f64),
    Rgb([f64; 3]),
    Cmyk([f64; 4]),
    /// `0xRRGGBB`
    Packed(u32),
}

impl Default for SourceColor {
    fn default() -> Self {
        SourceColor::Gray(0.0)
    }
}

impl SourceColor {
    /// Build from a run of color operands, guessing the space from the arity.
    pub fn from_components(components: &[f64]) -> Option<Self> {
        match components {
            [gray] => Some(SourceColor::Gray(*gray)),
            [r, g, b] => Some(SourceColor::Rgb([*r, *g, *b])),
            [c, m, y, k] => Some(SourceColor::Cmyk([*c, *m, *y, *k])),
            _ => None,
        }
    }

    pub fn normalize(self) -> Rgb {
        match self {
            SourceColor::Gray(value) => {
                let channel = unit_to_byte(value);
                Rgb([channel; 3])
            }
            SourceColor::Rgb(components) => {
                // Triples above 1 come from producers that already use bytes.
                if components.iter().any(|c| *c > 1.0) {
                    Rgb(components.map(|c| c.round().clamp(0.0, 255.0) as u8))
                } else {
                    Rgb(components.map(unit_to_byte))
                }
            }
            SourceColor::Cmyk([c, m, y, k]) => {
                let k = k.clamp(0.0, 1.0);
                Rgb([c, m, y].map(|v| unit_to_byte((1.0 - v.clamp(0.0, 1.0)) * (1.0 - k))))
            }
            SourceColor::Packed(value) => Rgb([
                ((value >> 16) & 0xFF) as u8,
                ((value >> 8) & 0xFF) as u8,
                (value & 0xFF) as u8,
            ]),
        }
    }
}

fn unit_to_byte(value: f64) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grayscale_half_is_mid_gray() {
        assert_eq!(SourceColor::Gray(0.5).normalize(), Rgb([128, 128, 128]));
    }

    #[test]
    fn packed_red() {
        assert_eq!(SourceColor::Packed(0xFF0000).normalize(), Rgb([255, 0, 0]));
    }

    #[test]
    fn unit_rgb_green() {
        assert_eq!(SourceColor::Rgb([0.0, 1.0, 0.0]).normalize(), Rgb([0, 255, 0]));
    }

    #[test]
    fn byte_range_rgb_passes_through() {
        assert_eq!(
            SourceColor::Rgb([10.0, 200.0, 0.0]).normalize(),
            Rgb([10, 200, 0])
        );
    }

    #[test]
    fn cmyk_black_and_cyan() {
        assert_eq!(
            SourceColor::Cmyk([0.0, 0.0, 0.0, 1.0]).normalize(),
            Rgb::BLACK
        );
        assert_eq!(
            SourceColor::Cmyk([1.0, 0.0, 0.0, 0.0]).normalize(),
            Rgb([0, 255, 255])
        );
    }

    #[test]
    fn components_pick_a_space_by_arity() {
        assert_eq!(
            SourceColor::from_components(&[0.2]),
            Some(SourceColor::Gray(0.2))
        );
        assert!(SourceColor::from_components(&[0.1, 0.2]).is_none());
    }
}
