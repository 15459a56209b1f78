//! Span-preserving content-stream tokenizer.
//!
//! Every token remembers the byte range it came from, and every string
//! operand remembers its own range and encoding, so the patcher can rewrite
//! a single literal without touching the bytes around it.

use std::{ops::Range, str::FromStr};

use anyhow::{anyhow, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFormat {
    Literal,
    Hex,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PdfString {
    /// Decoded bytes (escapes resolved, hex digits paired).
    pub bytes: Vec<u8>,
    pub format: StringFormat,
    pub span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Number(f64),
    Name(String),
    String(PdfString),
    Array(Vec<Operand>),
    Dict(Vec<(String, Operand)>),
    Keyword(String),
}

impl Operand {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Operand::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Operand::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn dict_get(&self, key: &str) -> Option<&Operand> {
        match self {
            Operand::Dict(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Save,
    Restore,
    Cm,
    Bt,
    Et,
    Tf,
    Tm,
    Td,
    TdLeading,
    TStar,
    Leading,
    CharSpacing,
    WordSpacing,
    HorizontalScaling,
    Rise,
    Tj,
    TjArray,
    NextLineShow,
    NextLineShowSpaced,
    FillGray,
    FillRgb,
    FillCmyk,
    FillColorSpace,
    FillColor,
    FillColorN,
    Rect,
    Fill,
    EndPath,
    BeginMarked,
    BeginMarkedPlain,
    EndMarked,
    Do,
}

impl Operator {
    fn parse(keyword: &str) -> Option<Self> {
        let op = match keyword {
            "q" => Operator::Save,
            "Q" => Operator::Restore,
            "cm" => Operator::Cm,
            "BT" => Operator::Bt,
            "ET" => Operator::Et,
            "Tf" => Operator::Tf,
            "Tm" => Operator::Tm,
            "Td" => Operator::Td,
            "TD" => Operator::TdLeading,
            "T*" => Operator::TStar,
            "TL" => Operator::Leading,
            "Tc" => Operator::CharSpacing,
            "Tw" => Operator::WordSpacing,
            "Tz" => Operator::HorizontalScaling,
            "Ts" => Operator::Rise,
            "Tj" => Operator::Tj,
            "TJ" => Operator::TjArray,
            "'" => Operator::NextLineShow,
            "\"" => Operator::NextLineShowSpaced,
            "g" => Operator::FillGray,
            "rg" => Operator::FillRgb,
            "k" => Operator::FillCmyk,
            "cs" => Operator::FillColorSpace,
            "sc" => Operator::FillColor,
            "scn" => Operator::FillColorN,
            "re" => Operator::Rect,
            "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" => Operator::Fill,
            "n" | "S" | "s" => Operator::EndPath,
            "BDC" => Operator::BeginMarked,
            "BMC" => Operator::BeginMarkedPlain,
            "EMC" => Operator::EndMarked,
            "Do" => Operator::Do,
            _ => return None,
        };
        Some(op)
    }

    /// Operators that paint glyphs.
    pub fn shows_text(self) -> bool {
        matches!(
            self,
            Operator::Tj | Operator::TjArray | Operator::NextLineShow | Operator::NextLineShowSpaced
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentToken {
    pub operator: Operator,
    pub operands: Vec<Operand>,
    pub span: Range<usize>,
}

impl ContentToken {
    /// All string operands in painting order, including those inside a `TJ`
    /// array.
    pub fn strings(&self) -> Vec<&PdfString> {
        let mut out = Vec::new();
        for operand in &self.operands {
            match operand {
                Operand::String(s) => out.push(s),
                Operand::Array(items) => out.extend(items.iter().filter_map(|item| match item {
                    Operand::String(s) => Some(s),
                    _ => None,
                })),
                _ => {}
            }
        }
        out
    }

    pub fn numbers(&self) -> Vec<f64> {
        self.operands.iter().filter_map(Operand::as_number).collect()
    }
}

pub fn tokenize_stream(bytes: &[u8]) -> Result<Vec<ContentToken>> {
    let mut tokens = Vec::new();
    let mut pos = 0usize;
    let len = bytes.len();

    while pos < len {
        skip_ws(bytes, &mut pos);
        if pos >= len {
            break;
        }

        let mut operands: Vec<Operand> = Vec::new();
        let mut token_start: Option<usize> = None;

        loop {
            skip_ws(bytes, &mut pos);
            if pos >= len {
                break;
            }
            if let Some((keyword, span)) = read_keyword(bytes, pos) {
                if let Some(op) = Operator::parse(&keyword) {
                    tokens.push(ContentToken {
                        operator: op,
                        operands: std::mem::take(&mut operands),
                        span: token_start.unwrap_or(span.start)..span.end,
                    });
                    pos = span.end;
                    break;
                }
                if keyword == "BI" {
                    pos = skip_inline_image(bytes, span.end);
                    break;
                }
            }

            match read_operand(bytes, pos)? {
                Some((operand, span)) => {
                    if token_start.is_none() {
                        token_start = Some(span.start);
                    }
                    pos = span.end;
                    operands.push(operand);
                }
                None => {
                    // Unknown operator: drop its operands and move on.
                    if let Some((_, span)) = read_keyword(bytes, pos) {
                        pos = span.end;
                    } else {
                        pos += 1;
                    }
                    break;
                }
            }
        }
    }

    Ok(tokens)
}

/// Serialize string bytes back into operand syntax in the given format.
pub fn encode_string(bytes: &[u8], format: StringFormat) -> Vec<u8> {
    match format {
        StringFormat::Hex => {
            let mut out = Vec::with_capacity(bytes.len() * 2 + 2);
            out.push(b'<');
            for byte in bytes {
                out.extend_from_slice(format!("{byte:02X}").as_bytes());
            }
            out.push(b'>');
            out
        }
        StringFormat::Literal => {
            let mut out = Vec::with_capacity(bytes.len() + 2);
            out.push(b'(');
            for &byte in bytes {
                match byte {
                    b'(' | b')' | b'\\' => {
                        out.push(b'\\');
                        out.push(byte);
                    }
                    b'\n' => out.extend_from_slice(b"\\n"),
                    b'\r' => out.extend_from_slice(b"\\r"),
                    0x20..=0x7E => out.push(byte),
                    _ => out.extend_from_slice(format!("\\{byte:03o}").as_bytes()),
                }
            }
            out.push(b')');
            out
        }
    }
}

fn skip_ws(bytes: &[u8], pos: &mut usize) {
    while *pos < bytes.len() {
        match bytes[*pos] {
            b'\0' | b'\n' | b'\r' | b'\t' | b'\x0c' | b' ' => *pos += 1,
            b'%' => {
                while *pos < bytes.len() && bytes[*pos] != b'\n' && bytes[*pos] != b'\r' {
                    *pos += 1;
                }
            }
            _ => break,
        }
    }
}

fn skip_inline_image(bytes: &[u8], mut pos: usize) -> usize {
    while pos + 1 < bytes.len() {
        let boundary_before = pos == 0 || is_whitespace(bytes[pos - 1]);
        let boundary_after = bytes.get(pos + 2).map_or(true, |b| is_whitespace(*b));
        if boundary_before && &bytes[pos..pos + 2] == b"EI" && boundary_after {
            return pos + 2;
        }
        pos += 1;
    }
    bytes.len()
}

fn read_keyword(bytes: &[u8], mut pos: usize) -> Option<(String, Range<usize>)> {
    let start = pos;
    while pos < bytes.len() && !is_delimiter(bytes[pos]) {
        pos += 1;
    }
    if pos == start {
        None
    } else {
        Some((String::from_utf8_lossy(&bytes[start..pos]).into_owned(), start..pos))
    }
}

fn read_operand(bytes: &[u8], pos: usize) -> Result<Option<(Operand, Range<usize>)>> {
    if pos >= bytes.len() {
        return Ok(None);
    }
    match bytes[pos] {
        b'/' => Ok(Some(read_name(bytes, pos))),
        b'(' => read_literal(bytes, pos).map(Some),
        b'<' if bytes.get(pos + 1) == Some(&b'<') => read_dict(bytes, pos).map(Some),
        b'<' => read_hex(bytes, pos).map(Some),
        b'[' => read_array(bytes, pos).map(Some),
        b'+' | b'-' | b'.' | b'0'..=b'9' => Ok(Some(read_number(bytes, pos))),
        _ => Ok(None),
    }
}

fn read_name(bytes: &[u8], mut pos: usize) -> (Operand, Range<usize>) {
    let start = pos;
    pos += 1; // skip '/'
    let mut buf = Vec::new();
    while pos < bytes.len() && !is_delimiter(bytes[pos]) {
        // #xx escapes
        if bytes[pos] == b'#' && pos + 2 < bytes.len() {
            if let Some(value) = hex_pair(bytes[pos + 1], bytes[pos + 2]) {
                buf.push(value);
                pos += 3;
                continue;
            }
        }
        buf.push(bytes[pos]);
        pos += 1;
    }
    let name = String::from_utf8_lossy(&buf).into_owned();
    (Operand::Name(name), start..pos)
}

fn read_literal(bytes: &[u8], mut pos: usize) -> Result<(Operand, Range<usize>)> {
    let start = pos;
    pos += 1; // skip '('
    let mut buf = Vec::new();
    let mut depth = 1i32;
    while pos < bytes.len() {
        let ch = bytes[pos];
        match ch {
            b'\\' => {
                pos += 1;
                let Some(&escaped) = bytes.get(pos) else {
                    break;
                };
                match escaped {
                    b'n' => buf.push(b'\n'),
                    b'r' => buf.push(b'\r'),
                    b't' => buf.push(b'\t'),
                    b'b' => buf.push(0x08),
                    b'f' => buf.push(0x0c),
                    b'0'..=b'7' => {
                        let mut value = 0u32;
                        let mut digits = 0;
                        while digits < 3 {
                            match bytes.get(pos) {
                                Some(d @ b'0'..=b'7') => {
                                    value = value * 8 + u32::from(d - b'0');
                                    pos += 1;
                                    digits += 1;
                                }
                                _ => break,
                            }
                        }
                        buf.push((value & 0xFF) as u8);
                        continue;
                    }
                    b'\r' => {
                        // line continuation
                        if bytes.get(pos + 1) == Some(&b'\n') {
                            pos += 1;
                        }
                    }
                    b'\n' => {}
                    other => buf.push(other),
                }
                pos += 1;
            }
            b'(' => {
                depth += 1;
                buf.push(ch);
                pos += 1;
            }
            b')' => {
                depth -= 1;
                pos += 1;
                if depth == 0 {
                    break;
                }
                buf.push(ch);
            }
            _ => {
                buf.push(ch);
                pos += 1;
            }
        }
    }
    if depth != 0 {
        return Err(anyhow!("unterminated string literal at byte {start}"));
    }
    let span = start..pos;
    Ok((
        Operand::String(PdfString {
            bytes: buf,
            format: StringFormat::Literal,
            span: span.clone(),
        }),
        span,
    ))
}

fn read_hex(bytes: &[u8], mut pos: usize) -> Result<(Operand, Range<usize>)> {
    let start = pos;
    pos += 1; // skip '<'
    let mut digits = Vec::new();
    loop {
        let Some(&ch) = bytes.get(pos) else {
            return Err(anyhow!("unterminated hex string at byte {start}"));
        };
        pos += 1;
        match ch {
            b'>' => break,
            b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F' => digits.push(ch),
            _ if is_whitespace(ch) => {}
            _ => return Err(anyhow!("invalid hex digit at byte {}", pos - 1)),
        }
    }
    if digits.len() % 2 == 1 {
        digits.push(b'0');
    }
    let decoded = digits
        .chunks(2)
        .filter_map(|pair| hex_pair(pair[0], pair[1]))
        .collect();
    let span = start..pos;
    Ok((
        Operand::String(PdfString {
            bytes: decoded,
            format: StringFormat::Hex,
            span: span.clone(),
        }),
        span,
    ))
}

fn read_array(bytes: &[u8], mut pos: usize) -> Result<(Operand, Range<usize>)> {
    let start = pos;
    pos += 1; // skip '['
    let mut items = Vec::new();
    loop {
        skip_ws(bytes, &mut pos);
        if pos >= bytes.len() {
            return Err(anyhow!("unterminated array at byte {start}"));
        }
        if bytes[pos] == b']' {
            pos += 1;
            break;
        }
        if let Some((operand, span)) = read_operand(bytes, pos)? {
            pos = span.end;
            items.push(operand);
        } else if let Some((keyword, span)) = read_keyword(bytes, pos) {
            items.push(Operand::Keyword(keyword));
            pos = span.end;
        } else {
            pos += 1;
        }
    }
    Ok((Operand::Array(items), start..pos))
}

fn read_dict(bytes: &[u8], mut pos: usize) -> Result<(Operand, Range<usize>)> {
    let start = pos;
    pos += 2; // skip '<<'
    let mut entries = Vec::new();
    loop {
        skip_ws(bytes, &mut pos);
        if pos >= bytes.len() {
            return Err(anyhow!("unterminated dictionary at byte {start}"));
        }
        if bytes[pos..].starts_with(b">>") {
            pos += 2;
            break;
        }
        let (key, key_span) = match read_operand(bytes, pos)? {
            Some((Operand::Name(name), span)) => (name, span),
            _ => return Err(anyhow!("dictionary key is not a name at byte {pos}")),
        };
        pos = key_span.end;
        skip_ws(bytes, &mut pos);
        let value = if let Some((operand, span)) = read_operand(bytes, pos)? {
            pos = span.end;
            operand
        } else if let Some((keyword, span)) = read_keyword(bytes, pos) {
            pos = span.end;
            Operand::Keyword(keyword)
        } else {
            return Err(anyhow!("dictionary value missing at byte {pos}"));
        };
        entries.push((key, value));
    }
    Ok((Operand::Dict(entries), start..pos))
}

fn read_number(bytes: &[u8], mut pos: usize) -> (Operand, Range<usize>) {
    let start = pos;
    if bytes[pos] == b'+' || bytes[pos] == b'-' {
        pos += 1;
    }
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos < bytes.len() && bytes[pos] == b'.' {
        pos += 1;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    if pos == start {
        pos += 1;
    }
    let text = std::str::from_utf8(&bytes[start..pos]).unwrap_or("0");
    // Malformed numbers like a lone "-" read as zero, as viewers do.
    let value = f64::from_str(text.trim_start_matches('+')).unwrap_or(0.0);
    (Operand::Number(value), start..pos)
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

fn is_whitespace(ch: u8) -> bool {
    matches!(ch, b'\0' | b'\t' | b'\n' | b'\x0c' | b'\r' | b' ')
}

fn is_delimiter(ch: u8) -> bool {
    is_whitespace(ch)
        || matches!(
            ch,
            b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
        )
}
