//! Font helpers: display-family resolution, glyph metrics and the standard
//! fonts used for redrawn text.
//!
//! Resolution is presentation-only. Nothing here feeds the identity used to
//! locate a run during edit application.

use std::fmt;

use serde::{Deserialize, Serialize};

pub use encoding::SimpleEncoding;
pub use metrics::{FontInfo, FontKind};
pub use standard::StandardFont;

pub mod cmap;
pub mod encoding;
pub mod metrics;
pub mod standard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FontFamily {
    Helvetica,
    Courier,
    Times,
    Calibri,
    Verdana,
    Tahoma,
    Georgia,
    Serif,
}

impl FontFamily {
    /// CSS `font-family` value for the overlay.
    pub fn css(self) -> &'static str {
        match self {
            FontFamily::Helvetica => "Arial, Helvetica, sans-serif",
            FontFamily::Courier => "Courier New, Courier, monospace",
            FontFamily::Times => "Times New Roman, Times, serif",
            FontFamily::Calibri => "Calibri, Carlito, sans-serif",
            FontFamily::Verdana => "Verdana, sans-serif",
            FontFamily::Tahoma => "Tahoma, sans-serif",
            FontFamily::Georgia => "Georgia, serif",
            FontFamily::Serif => "serif",
        }
    }

    pub fn is_monospace(self) -> bool {
        matches!(self, FontFamily::Courier)
    }

    pub fn is_sans(self) -> bool {
        matches!(
            self,
            FontFamily::Helvetica | FontFamily::Calibri | FontFamily::Verdana | FontFamily::Tahoma
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum FontWeight {
    Normal,
    Bold,
    Numeric(u16),
}

impl FontWeight {
    pub fn is_bold(self) -> bool {
        match self {
            FontWeight::Normal => false,
            FontWeight::Bold => true,
            FontWeight::Numeric(value) => value >= 600,
        }
    }
}

impl fmt::Display for FontWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FontWeight::Normal => f.write_str("normal"),
            FontWeight::Bold => f.write_str("bold"),
            FontWeight::Numeric(value) => write!(f, "{value}"),
        }
    }
}

impl From<FontWeight> for String {
    fn from(value: FontWeight) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for FontWeight {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "normal" => Ok(FontWeight::Normal),
            "bold" => Ok(FontWeight::Bold),
            other => other
                .parse::<u16>()
                .map(FontWeight::Numeric)
                .map_err(|_| format!("unknown font weight {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontStyle {
    Normal,
    Italic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontDescriptor {
    pub family: FontFamily,
    pub weight: FontWeight,
    pub style: FontStyle,
}

impl Default for FontDescriptor {
    fn default() -> Self {
        Self {
            family: FontFamily::Serif,
            weight: FontWeight::Normal,
            style: FontStyle::Normal,
        }
    }
}

/// Drop a leading `ABCDEF+` subset tag.
pub fn strip_subset_tag(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    if bytes.len() > 7 && bytes[6] == b'+' && bytes[..6].iter().all(u8::is_ascii_uppercase) {
        &raw[7..]
    } else {
        raw
    }
}

/// Map a raw embedded font name to a display family, weight and style.
/// Never fails; unknown names resolve to serif/normal/normal.
pub fn resolve(raw_font_name: &str) -> FontDescriptor {
    let name = strip_subset_tag(raw_font_name).to_lowercase();

    // First keyword wins: "SemiBold" contains "bold" and resolves to bold.
    let weight = if name.contains("black") || name.contains("heavy") {
        FontWeight::Numeric(900)
    } else if name.contains("extrabold") {
        FontWeight::Numeric(800)
    } else if name.contains("bold") {
        FontWeight::Bold
    } else if name.contains("semibold") || name.contains("demi") {
        FontWeight::Numeric(600)
    } else if name.contains("medium") {
        FontWeight::Numeric(500)
    } else if name.contains("light") {
        FontWeight::Numeric(300)
    } else if name.contains("thin") {
        FontWeight::Numeric(200)
    } else {
        FontWeight::Normal
    };

    let style = if name.contains("italic") || name.contains("oblique") {
        FontStyle::Italic
    } else {
        FontStyle::Normal
    };

    let family = if name.contains("arial") || name.contains("helvetica") {
        FontFamily::Helvetica
    } else if name.contains("courier") {
        FontFamily::Courier
    } else if name.contains("times") {
        FontFamily::Times
    } else if name.contains("calibri") {
        FontFamily::Calibri
    } else if name.contains("verdana") {
        FontFamily::Verdana
    } else if name.contains("tahoma") {
        FontFamily::Tahoma
    } else if name.contains("georgia") {
        FontFamily::Georgia
    } else {
        FontFamily::Serif
    };

    FontDescriptor {
        family,
        weight,
        style,
    }
}
