//! Single-byte font encodings: the base encodings lopdf knows about plus
//! `/Differences` overrides resolved through glyph names.

use std::{collections::HashMap, sync::Arc};

use lopdf::{Document, Object};
use once_cell::sync::Lazy;

use crate::pdf::loader::resolve_object;

pub type CodeTable = [Option<char>; 256];

static STANDARD: Lazy<CodeTable> = Lazy::new(|| named_table("StandardEncoding"));
static WIN_ANSI: Lazy<CodeTable> = Lazy::new(|| named_table("WinAnsiEncoding"));
static MAC_ROMAN: Lazy<CodeTable> = Lazy::new(|| named_table("MacRomanEncoding"));
static MAC_EXPERT: Lazy<CodeTable> = Lazy::new(|| named_table("MacExpertEncoding"));

/// Glyph names for 0x20..=0x7E that are not the character itself.
const ASCII_NAMES: [(&str, char); 32] = [
    ("space", ' '),
    ("exclam", '!'),
    ("quotedbl", '"'),
    ("numbersign", '#'),
    ("dollar", '$'),
    ("percent", '%'),
    ("ampersand", '&'),
    ("quotesingle", '\''),
    ("parenleft", '('),
    ("parenright", ')'),
    ("asterisk", '*'),
    ("plus", '+'),
    ("comma", ','),
    ("hyphen", '-'),
    ("period", '.'),
    ("slash", '/'),
    ("colon", ':'),
    ("semicolon", ';'),
    ("less", '<'),
    ("equal", '='),
    ("greater", '>'),
    ("question", '?'),
    ("at", '@'),
    ("bracketleft", '['),
    ("backslash", '\\'),
    ("bracketright", ']'),
    ("asciicircum", '^'),
    ("underscore", '_'),
    ("grave", '`'),
    ("braceleft", '{'),
    ("bar", '|'),
    ("braceright", '}'),
];

const DIGIT_NAMES: [&str; 10] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
];

/// Latin-1 supplement, U+00A0 onwards.
const LATIN1_NAMES: [&str; 96] = [
    "nbspace", "exclamdown", "cent", "sterling", "currency", "yen", "brokenbar", "section",
    "dieresis", "copyright", "ordfeminine", "guillemotleft", "logicalnot", "sfthyphen",
    "registered", "macron", "degree", "plusminus", "twosuperior", "threesuperior", "acute", "mu",
    "paragraph", "periodcentered", "cedilla", "onesuperior", "ordmasculine", "guillemotright",
    "onequarter", "onehalf", "threequarters", "questiondown", "Agrave", "Aacute", "Acircumflex",
    "Atilde", "Adieresis", "Aring", "AE", "Ccedilla", "Egrave", "Eacute", "Ecircumflex",
    "Edieresis", "Igrave", "Iacute", "Icircumflex", "Idieresis", "Eth", "Ntilde", "Ograve",
    "Oacute", "Ocircumflex", "Otilde", "Odieresis", "multiply", "Oslash", "Ugrave", "Uacute",
    "Ucircumflex", "Udieresis", "Yacute", "Thorn", "germandbls", "agrave", "aacute",
    "acircumflex", "atilde", "adieresis", "aring", "ae", "ccedilla", "egrave", "eacute",
    "ecircumflex", "edieresis", "igrave", "iacute", "icircumflex", "idieresis", "eth", "ntilde",
    "ograve", "oacute", "ocircumflex", "otilde", "odieresis", "divide", "oslash", "ugrave",
    "uacute", "ucircumflex", "udieresis", "yacute", "thorn", "ydieresis",
];

const PUNCTUATION_NAMES: [(&str, char); 32] = [
    ("quoteleft", '\u{2018}'),
    ("quoteright", '\u{2019}'),
    ("quotesinglbase", '\u{201A}'),
    ("quotedblleft", '\u{201C}'),
    ("quotedblright", '\u{201D}'),
    ("quotedblbase", '\u{201E}'),
    ("dagger", '\u{2020}'),
    ("daggerdbl", '\u{2021}'),
    ("bullet", '\u{2022}'),
    ("ellipsis", '\u{2026}'),
    ("perthousand", '\u{2030}'),
    ("guilsinglleft", '\u{2039}'),
    ("guilsinglright", '\u{203A}'),
    ("endash", '\u{2013}'),
    ("emdash", '\u{2014}'),
    ("Euro", '\u{20AC}'),
    ("trademark", '\u{2122}'),
    ("minus", '\u{2212}'),
    ("fraction", '\u{2044}'),
    ("florin", '\u{0192}'),
    ("circumflex", '\u{02C6}'),
    ("tilde", '\u{02DC}'),
    ("OE", '\u{0152}'),
    ("oe", '\u{0153}'),
    ("Scaron", '\u{0160}'),
    ("scaron", '\u{0161}'),
    ("Zcaron", '\u{017D}'),
    ("zcaron", '\u{017E}'),
    ("Ydieresis", '\u{0178}'),
    ("dotlessi", '\u{0131}'),
    ("fi", '\u{FB01}'),
    ("fl", '\u{FB02}'),
];

static GLYPH_NAMES: Lazy<HashMap<&'static str, char>> = Lazy::new(|| {
    let mut names: HashMap<&'static str, char> = HashMap::new();
    names.extend(ASCII_NAMES);
    names.extend(PUNCTUATION_NAMES);
    for (digit, name) in DIGIT_NAMES.iter().enumerate() {
        names.insert(*name, char::from(b'0' + digit as u8));
    }
    for (offset, name) in LATIN1_NAMES.iter().enumerate() {
        if let Some(ch) = char::from_u32(0xA0 + offset as u32) {
            names.insert(*name, ch);
        }
    }
    names
});

fn named_table(name: &str) -> CodeTable {
    let mut table = [None; 256];
    for (code, slot) in table.iter_mut().enumerate() {
        *slot = Document::decode_text(Some(name), &[code as u8]).chars().next();
    }
    table
}

fn base_table(name: &[u8]) -> Option<&'static CodeTable> {
    match name {
        b"StandardEncoding" => Some(&*STANDARD),
        b"WinAnsiEncoding" => Some(&*WIN_ANSI),
        b"MacRomanEncoding" => Some(&*MAC_ROMAN),
        b"MacExpertEncoding" => Some(&*MAC_EXPERT),
        _ => None,
    }
}

/// Character for an Adobe glyph name: `uniXXXX`, `uXXXX[XX]`, single
/// letters, and the names used by the Latin text encodings.
pub fn glyph_char(name: &str) -> Option<char> {
    if let Some(hex) = name.strip_prefix("uni") {
        if let Some(ch) = hex.get(..4).and_then(hex_char) {
            return Some(ch);
        }
    }
    if let Some(hex) = name.strip_prefix('u') {
        if (4..=6).contains(&hex.len()) {
            if let Some(ch) = hex_char(hex) {
                return Some(ch);
            }
        }
    }
    let mut chars = name.chars();
    if let (Some(ch), None) = (chars.next(), chars.next()) {
        if ch.is_ascii_alphabetic() {
            return Some(ch);
        }
    }
    GLYPH_NAMES.get(name).copied()
}

fn hex_char(hex: &str) -> Option<char> {
    u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
}

/// Code to character table of a simple font.
#[derive(Debug, Clone)]
pub struct SimpleEncoding {
    table: Arc<CodeTable>,
}

impl SimpleEncoding {
    pub fn standard() -> Self {
        Self::from_table(&STANDARD)
    }

    pub fn win_ansi() -> Self {
        Self::from_table(&WIN_ANSI)
    }

    fn from_table(table: &CodeTable) -> Self {
        Self {
            table: Arc::new(*table),
        }
    }

    /// Build from a font's `/Encoding` entry: a base encoding name, or a
    /// dictionary with `/BaseEncoding` and `/Differences`.
    pub fn from_entry(document: &Document, entry: Option<&Object>, default: Self) -> Self {
        let Some(entry) = entry.and_then(|object| resolve_object(document, object).ok()) else {
            return default;
        };
        match entry {
            Object::Name(name) => base_table(name).map_or(default, Self::from_table),
            Object::Dictionary(dict) => {
                let mut table = match dict.get(b"BaseEncoding").ok() {
                    Some(Object::Name(name)) => base_table(name).copied(),
                    _ => None,
                }
                .unwrap_or(*default.table);
                if let Some(differences) = dict
                    .get(b"Differences")
                    .ok()
                    .and_then(|object| resolve_object(document, object).ok())
                    .and_then(|object| object.as_array().ok())
                {
                    apply_differences(document, differences, &mut table);
                }
                Self {
                    table: Arc::new(table),
                }
            }
            _ => default,
        }
    }

    pub fn decode(&self, code: u8) -> Option<char> {
        self.table[usize::from(code)]
    }

    /// Lowest code that decodes to `ch`.
    pub fn encode(&self, ch: char) -> Option<u8> {
        self.table
            .iter()
            .position(|entry| *entry == Some(ch))
            .map(|code| code as u8)
    }
}

fn apply_differences(document: &Document, differences: &[Object], table: &mut CodeTable) {
    let mut next_code: Option<usize> = None;
    for entry in differences {
        match resolve_object(document, entry) {
            Ok(Object::Integer(code)) if (0..=255).contains(code) => {
                next_code = Some(*code as usize);
            }
            Ok(Object::Name(name)) => {
                if let Some(code) = next_code {
                    // Unknown names leave the code unmapped.
                    table[code] = glyph_char(&String::from_utf8_lossy(name));
                    next_code = (code < 255).then_some(code + 1);
                }
            }
            _ => {}
        }
    }
}
