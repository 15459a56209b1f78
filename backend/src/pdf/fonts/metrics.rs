//! Glyph widths and code/text conversion for page fonts.

use std::{ops::Range, sync::Arc};

use lopdf::{Dictionary, Document, Object};

use super::{cmap::ToUnicodeMap, encoding::SimpleEncoding, resolve, FontFamily};
use crate::pdf::loader::{as_number, decoded_stream, resolve_object};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontKind {
    /// One byte per character code.
    Simple,
    /// `Type0` fonts with two-byte codes.
    Composite,
}

/// What the extractor and the edit engine need to know about a page font.
#[derive(Debug, Clone)]
pub struct FontInfo {
    pub resource_name: String,
    pub base_font: String,
    pub kind: FontKind,
    pub first_char: u32,
    /// Advance widths in thousandths of an em, starting at `first_char`.
    pub widths: Vec<f64>,
    pub missing_width: f64,
    encoding: SimpleEncoding,
    to_unicode: Option<Arc<ToUnicodeMap>>,
}

impl FontInfo {
    /// Used when the resource cannot be resolved at all.
    pub fn fallback(resource_name: &str) -> Self {
        Self {
            resource_name: resource_name.to_string(),
            base_font: resource_name.to_string(),
            kind: FontKind::Simple,
            first_char: 0,
            widths: Vec::new(),
            missing_width: average_width(resolve(resource_name).family),
            encoding: SimpleEncoding::standard(),
            to_unicode: None,
        }
    }

    pub fn from_dictionary(document: &Document, resource_name: &str, dict: &Dictionary) -> Self {
        let base_font = match dict.get(b"BaseFont").ok() {
            Some(Object::Name(name)) => String::from_utf8_lossy(name).into_owned(),
            _ => resource_name.to_string(),
        };
        let subtype = match dict.get(b"Subtype").ok() {
            Some(Object::Name(subtype)) => subtype.as_slice(),
            _ => b"Type1".as_slice(),
        };
        let kind = if subtype == b"Type0" {
            FontKind::Composite
        } else {
            FontKind::Simple
        };
        let first_char = dict
            .get(b"FirstChar")
            .ok()
            .and_then(|object| as_number(object).ok())
            .map_or(0, |value| value.max(0.0) as u32);
        let widths = dict
            .get(b"Widths")
            .ok()
            .and_then(|object| resolve_object(document, object).ok())
            .and_then(|object| object.as_array().ok())
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        resolve_object(document, item)
                            .ok()
                            .and_then(|value| as_number(value).ok())
                            .unwrap_or(0.0)
                    })
                    .collect()
            })
            .unwrap_or_default();
        let missing_width = average_width(resolve(&base_font).family);

        // TrueType fonts without an encoding are read as WinAnsi.
        let default_encoding = if subtype == b"TrueType" {
            SimpleEncoding::win_ansi()
        } else {
            SimpleEncoding::standard()
        };
        let encoding =
            SimpleEncoding::from_entry(document, dict.get(b"Encoding").ok(), default_encoding);
        let to_unicode = dict
            .get(b"ToUnicode")
            .ok()
            .and_then(|object| resolve_object(document, object).ok())
            .and_then(|object| object.as_stream().ok())
            .and_then(|stream| decoded_stream(stream).ok())
            .map(|data| ToUnicodeMap::parse(&data))
            .filter(|map| !map.is_empty())
            .map(Arc::new);

        Self {
            resource_name: resource_name.to_string(),
            base_font,
            kind,
            first_char,
            widths,
            missing_width,
            encoding,
            to_unicode,
        }
    }

    pub fn is_multibyte(&self) -> bool {
        self.kind == FontKind::Composite
    }

    pub fn has_to_unicode(&self) -> bool {
        self.to_unicode.is_some()
    }

    /// Split a string operand into character codes.
    pub fn codes(&self, bytes: &[u8]) -> Vec<u32> {
        self.code_spans(bytes).into_iter().map(|(code, _)| code).collect()
    }

    /// Character codes with the byte range each one occupies.
    pub fn code_spans(&self, bytes: &[u8]) -> Vec<(u32, Range<usize>)> {
        match self.kind {
            FontKind::Simple => bytes
                .iter()
                .enumerate()
                .map(|(at, byte)| (u32::from(*byte), at..at + 1))
                .collect(),
            FontKind::Composite => bytes
                .chunks(2)
                .enumerate()
                .map(|(chunk, pair)| {
                    let code = match pair {
                        [hi, lo] => (u32::from(*hi) << 8) | u32::from(*lo),
                        [single] => u32::from(*single),
                        _ => 0,
                    };
                    let start = chunk * 2;
                    (code, start..start + pair.len())
                })
                .collect(),
        }
    }

    /// Text of one code: `/ToUnicode` first, then the font's encoding.
    /// `None` when neither maps it.
    pub fn mapped_text(&self, code: u32) -> Option<String> {
        if let Some(text) = self.to_unicode.as_ref().and_then(|map| map.get(code)) {
            return Some(text.to_string());
        }
        match self.kind {
            FontKind::Simple => u8::try_from(code)
                .ok()
                .and_then(|byte| self.encoding.decode(byte))
                .map(String::from),
            // Without a ToUnicode map, Identity-H codes are taken as code points.
            FontKind::Composite => char::from_u32(code)
                .filter(|ch| !ch.is_control())
                .map(String::from),
        }
    }

    /// Text of one code, U+FFFD when unmapped.
    pub fn code_text(&self, code: u32) -> String {
        self.mapped_text(code)
            .unwrap_or_else(|| char::REPLACEMENT_CHARACTER.to_string())
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        self.codes(bytes)
            .into_iter()
            .map(|code| self.code_text(code))
            .collect()
    }

    /// Encode text back into string-operand bytes. Only single-byte fonts are
    /// supported, and only for characters some code of the font decodes to.
    pub fn encode(&self, text: &str) -> Option<Vec<u8>> {
        if self.kind != FontKind::Simple {
            return None;
        }
        text.chars().map(|ch| self.code_for(ch)).collect()
    }

    fn code_for(&self, ch: char) -> Option<u8> {
        let Some(map) = &self.to_unicode else {
            return self.encoding.encode(ch);
        };
        let mut buffer = [0u8; 4];
        let wanted: &str = ch.encode_utf8(&mut buffer);
        (0..=u8::MAX).find(|code| match map.get(u32::from(*code)) {
            Some(text) => text == wanted,
            None => self.encoding.decode(*code) == Some(ch),
        })
    }

    /// Advance width of one code in thousandths of an em.
    pub fn code_width(&self, code: u32) -> f64 {
        code.checked_sub(self.first_char)
            .and_then(|offset| self.widths.get(offset as usize))
            .copied()
            .filter(|width| *width > 0.0)
            .unwrap_or(self.missing_width)
    }
}

/// Average glyph advance used when a font carries no `/Widths`.
pub fn average_width(family: FontFamily) -> f64 {
    if family.is_monospace() {
        600.0
    } else if family.is_sans() {
        556.0
    } else {
        500.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    #[test]
    fn widths_are_read_from_the_dictionary() {
        let document = Document::with_version("1.5");
        let dict = dictionary! {
            "Type" => "Font",
            "Subtype" => "TrueType",
            "BaseFont" => "ABCDEF+Arial",
            "FirstChar" => Object::Integer(65),
            "Widths" => vec![Object::Integer(667), Object::Integer(0)],
        };
        let info = FontInfo::from_dictionary(&document, "F1", &dict);

        assert_eq!(info.base_font, "ABCDEF+Arial");
        assert_eq!(info.code_width(65), 667.0);
        // zero and out-of-table widths fall back to the family average
        assert_eq!(info.code_width(66), 556.0);
        assert_eq!(info.code_width(10), 556.0);
    }

    #[test]
    fn composite_fonts_use_two_byte_codes() {
        let document = Document::with_version("1.5");
        let dict = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => "Foo",
        };
        let info = FontInfo::from_dictionary(&document, "F2", &dict);

        assert!(info.is_multibyte());
        assert_eq!(info.codes(&[0x00, 0x41, 0x00, 0x42]), vec![0x41, 0x42]);
        assert_eq!(info.decode(&[0x00, 0x41]), "A");
        // glyph ids in the control range never decode to blank text
        assert_eq!(info.decode(&[0x00, 0x03]), "\u{FFFD}");
        assert!(info.encode("A").is_none());
    }

    #[test]
    fn win_ansi_fonts_decode_and_encode_through_the_table() {
        let document = Document::with_version("1.5");
        let dict = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        };
        let info = FontInfo::from_dictionary(&document, "F1", &dict);
        assert_eq!(info.decode(b"It\x92s \x80 5"), "It\u{2019}s \u{20AC} 5");
        assert_eq!(info.encode("Caf\u{e9} \u{20AC}"), Some(b"Caf\xe9 \x80".to_vec()));
        assert!(info.encode("\u{6F22}").is_none());
    }

    #[test]
    fn to_unicode_takes_precedence_over_the_encoding() {
        let mut document = Document::with_version("1.5");
        let cmap = document.add_object(Stream::new(
            dictionary! {},
            b"1 beginbfchar <41> <00DF> endbfchar".to_vec(),
        ));
        let dict = dictionary! {
            "Type" => "Font",
            "Subtype" => "TrueType",
            "BaseFont" => "ABCDEF+Calibri",
            "ToUnicode" => cmap,
        };
        let info = FontInfo::from_dictionary(&document, "F1", &dict);
        assert!(info.has_to_unicode());
        assert_eq!(info.decode(b"AB"), "\u{df}B");
        assert_eq!(info.encode("\u{df}B"), Some(b"AB".to_vec()));
    }

    #[test]
    fn unresolved_fonts_use_the_standard_encoding() {
        let info = FontInfo::fallback("Helvetica");
        assert_eq!(info.decode(b"Hi"), "Hi");
        assert_eq!(info.decode(b"\x27"), "\u{2019}");
        assert!(info.encode("\u{e9}").is_none());
    }
}
