//! `/ToUnicode` CMap parsing: `bfchar` and `bfrange` sections only.

use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToUnicodeMap {
    map: HashMap<u32, String>,
}

impl ToUnicodeMap {
    pub fn parse(data: &[u8]) -> Self {
        let mut tokens = Tokenizer::new(data);
        let mut map = HashMap::new();
        while let Some(token) = tokens.next() {
            match token.as_str() {
                "beginbfchar" => {
                    while let Some(source) = tokens.next() {
                        if source == "endbfchar" {
                            break;
                        }
                        let target = tokens.next().unwrap_or_default();
                        if let (Some(code), Some(text)) = (hex_code(&source), hex_text(&target)) {
                            map.insert(code, text);
                        }
                    }
                }
                "beginbfrange" => {
                    while let Some(start) = tokens.next() {
                        if start == "endbfrange" {
                            break;
                        }
                        let end = tokens.next().unwrap_or_default();
                        let target = tokens.next().unwrap_or_default();
                        let (Some(start), Some(end)) = (hex_code(&start), hex_code(&end)) else {
                            continue;
                        };
                        if target == "[" {
                            let mut code = start;
                            while let Some(entry) = tokens.next() {
                                if entry == "]" {
                                    break;
                                }
                                if code <= end {
                                    if let Some(text) = hex_text(&entry) {
                                        map.insert(code, text);
                                    }
                                }
                                code += 1;
                            }
                        } else if let Some(first) = hex_text(&target) {
                            insert_range(&mut map, start, end, &first);
                        }
                    }
                }
                _ => {}
            }
        }
        Self { map }
    }

    pub fn get(&self, code: u32) -> Option<&str> {
        self.map.get(&code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A range maps consecutive codes to consecutive values of its last
/// character.
fn insert_range(map: &mut HashMap<u32, String>, start: u32, end: u32, first: &str) {
    let Some(last) = first.chars().last() else {
        return;
    };
    let prefix: String = first.chars().take(first.chars().count() - 1).collect();
    for (offset, code) in (start..=end).enumerate() {
        if let Some(ch) = char::from_u32(u32::from(last) + offset as u32) {
            map.insert(code, format!("{prefix}{ch}"));
        }
    }
}

fn hex_bytes(token: &str) -> Option<Vec<u8>> {
    let inner = token.strip_prefix('<')?.strip_suffix('>')?;
    let digits: Vec<u8> = inner.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    digits
        .chunks(2)
        .map(|pair| {
            let text = std::str::from_utf8(pair).ok()?;
            // An odd trailing digit is padded with zero.
            let padded = if text.len() == 1 { format!("{text}0") } else { text.to_string() };
            u8::from_str_radix(&padded, 16).ok()
        })
        .collect()
}

fn hex_code(token: &str) -> Option<u32> {
    let bytes = hex_bytes(token)?;
    (!bytes.is_empty() && bytes.len() <= 4)
        .then(|| bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

fn hex_text(token: &str) -> Option<String> {
    let bytes = hex_bytes(token)?;
    if bytes.is_empty() || bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

struct Tokenizer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn next(&mut self) -> Option<String> {
        while self.pos < self.data.len() && self.data[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        let start = self.pos;
        match *self.data.get(self.pos)? {
            b'<' => {
                while self.pos < self.data.len() && self.data[self.pos] != b'>' {
                    self.pos += 1;
                }
                self.pos = (self.pos + 1).min(self.data.len());
            }
            b'[' | b']' => self.pos += 1,
            _ => {
                while self.pos < self.data.len()
                    && !self.data[self.pos].is_ascii_whitespace()
                    && !matches!(self.data[self.pos], b'[' | b']' | b'<')
                {
                    self.pos += 1;
                }
            }
        }
        Some(String::from_utf8_lossy(&self.data[start..self.pos]).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CMAP: &[u8] = b"/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
1 begincodespacerange
<0000> <FFFF>
endcodespacerange
2 beginbfchar
<0003> <0048>
<0004> <0069>
endbfchar
2 beginbfrange
<0010> <0012> <0041>
<0020> <0021> [<00660069> <D83DDE00>]
endbfrange
endcmap";

    #[test]
    fn bfchar_and_bfrange_entries_are_read() {
        let map = ToUnicodeMap::parse(CMAP);
        assert_eq!(map.get(0x03), Some("H"));
        assert_eq!(map.get(0x04), Some("i"));
        assert_eq!(map.get(0x10), Some("A"));
        assert_eq!(map.get(0x12), Some("C"));
        assert_eq!(map.get(0x20), Some("fi"));
        assert_eq!(map.get(0x21), Some("\u{1F600}"));
        assert_eq!(map.get(0x13), None);
        assert_eq!(map.len(), 7);
    }

    #[test]
    fn garbage_yields_an_empty_map() {
        assert!(ToUnicodeMap::parse(b"not a cmap <zz> beginbfchar <01>").is_empty());
    }
}
