//! Boundary adapter for extraction records produced outside this crate.
//!
//! External extractors disagree on shape: snake_case or camelCase keys, a
//! `bbox` in top-left display space or a PDF-space `transform`, colors as a
//! packed integer, a component array or a gray scalar. Everything is
//! normalized here into [`PageText`]; nothing loosely typed travels further.

use serde_json::{Map, Value};

use crate::{
    error::{EditError, EditResult},
    pdf::{
        color::SourceColor,
        coords::{to_display_space, Rotation, Scale},
        extract,
        fonts::{self, FontStyle, FontWeight},
    },
    types::{PageText, Position, TextItem, Typography},
};

const FLAG_ITALIC: u64 = 1 << 1;
const FLAG_BOLD: u64 = 1 << 4;

/// Normalize one page of an external extraction. `value` may be the page
/// itself, a bare span array, or a whole-document record with a `pages` list.
/// The result is display-only.
pub fn page_from_json(page_number: u32, value: &Value) -> EditResult<PageText> {
    let value = select_page(page_number, value)?;
    let (page, spans) = match value {
        Value::Array(spans) => (None, spans.iter().collect::<Vec<_>>()),
        Value::Object(page) => (Some(page), collect_spans(page)),
        _ => return Err(invalid("expected an object or an array of spans")),
    };

    let dimensions = page.and_then(|p| p.get("dimensions")).and_then(Value::as_object);
    let width = page
        .and_then(|p| number(p, &["width", "page_width", "pageWidth"]))
        .or_else(|| dimensions.and_then(|d| number(d, &["width"])));
    let height = page
        .and_then(|p| number(p, &["height", "page_height", "pageHeight"]))
        .or_else(|| dimensions.and_then(|d| number(d, &["height"])));
    let rotation = page
        .and_then(|p| number(p, &["rotation", "rotate"]))
        .map(|degrees| Rotation::from_degrees(degrees as i64))
        .transpose()?
        .unwrap_or_default();

    let mut items = Vec::new();
    for span in spans {
        let Value::Object(span) = span else {
            return Err(invalid("span is not an object"));
        };
        let text = string(span, &["text", "str", "content"]).unwrap_or_default();
        if text.trim().is_empty() {
            continue;
        }
        let index = items.len();
        items.push(span_to_item(page_number, index, text, span, height)?);
    }

    let raw_text = page
        .and_then(|p| string(p, &["rawText", "raw_text"]))
        .unwrap_or_else(|| extract::raw_text(&items));

    Ok(PageText {
        page_number,
        width: width.unwrap_or(0.0),
        height: height.unwrap_or(0.0),
        rotation,
        items,
        raw_text,
        placeholder: false,
        read_only: true,
    })
}

/// Pick `page_number` out of a `{document, pages: [...]}` record, by its
/// `pageNumber` or else by position. Other shapes pass through.
fn select_page(page_number: u32, value: &Value) -> EditResult<&Value> {
    let Some(Value::Array(pages)) = value.get("pages") else {
        return Ok(value);
    };
    let numbered = pages.iter().find(|page| {
        page.as_object()
            .and_then(|p| number(p, &["pageNumber", "page_number", "page"]))
            .is_some_and(|number| number as u32 == page_number)
    });
    numbered
        .or_else(|| {
            let position = usize::try_from(page_number).ok()?.checked_sub(1)?;
            pages.get(position)
        })
        .ok_or_else(|| invalid(&format!("no page {page_number} in the record")))
}

fn collect_spans(page: &Map<String, Value>) -> Vec<&Value> {
    for key in ["items", "spans", "textItems", "text_items"] {
        if let Some(Value::Array(spans)) = page.get(key) {
            return spans.iter().collect();
        }
    }
    // PyMuPDF "dict" layout: blocks -> lines -> spans.
    let mut spans = Vec::new();
    let blocks = ["blocks", "textBlocks", "text_blocks"]
        .iter()
        .find_map(|key| page.get(*key).and_then(Value::as_array));
    for block in blocks.into_iter().flatten() {
        let Some(Value::Array(lines)) = block.get("lines") else {
            continue;
        };
        for line in lines {
            if let Some(Value::Array(line_spans)) = line.get("spans") {
                spans.extend(line_spans.iter());
            }
        }
    }
    spans
}

fn span_to_item(
    page_number: u32,
    index: usize,
    text: String,
    span: &Map<String, Value>,
    page_height: Option<f64>,
) -> EditResult<TextItem> {
    let raw_font_name =
        string(span, &["font", "fontName", "font_name", "rawFontName", "raw_font_name"])
            .unwrap_or_default();
    let size = number(span, &["size", "fontSize", "font_size"]).unwrap_or(12.0);
    let transform = numbers(span, &["transform", "origin_transform", "originTransform"]);

    let position = if let Some([x0, y0, x1, y1]) = numbers(span, &["bbox"]).as_deref().and_then(four) {
        Position {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        }
    } else if let Some([_, _, _, _, e, f]) = transform.as_deref().and_then(six) {
        let page_height = page_height.ok_or_else(|| invalid("transform without page height"))?;
        let glyph_height = number(span, &["height"]).unwrap_or(size);
        let width = number(span, &["width"]).unwrap_or(0.0);
        let (x, y) = to_display_space(e, f, glyph_height, page_height, Scale::UNIT);
        Position {
            x,
            y,
            width,
            height: glyph_height,
        }
    } else {
        Position {
            x: number(span, &["x"]).unwrap_or(0.0),
            y: number(span, &["y"]).unwrap_or(0.0),
            width: number(span, &["width"]).unwrap_or(0.0),
            height: number(span, &["height"]).unwrap_or(size),
        }
    };

    let mut descriptor = fonts::resolve(&raw_font_name);
    let flags = span.get("flags").and_then(Value::as_u64).unwrap_or(0);
    if flags & FLAG_BOLD != 0 && !descriptor.weight.is_bold() {
        descriptor.weight = FontWeight::Bold;
    }
    if flags & FLAG_ITALIC != 0 {
        descriptor.style = FontStyle::Italic;
    }

    let color = span
        .get("color")
        .or_else(|| span.get("fill"))
        .map(parse_color)
        .transpose()?
        .unwrap_or_default()
        .normalize();

    Ok(TextItem {
        id: TextItem::key(page_number, index),
        page_number,
        index,
        content: text,
        position,
        typography: Typography {
            font_size: size,
            font_family: descriptor.family.css().to_string(),
            font_weight: descriptor.weight,
            font_style: descriptor.style,
            raw_font_name,
        },
        color,
        origin_transform: transform
            .as_deref()
            .and_then(six)
            .unwrap_or([1.0, 0.0, 0.0, 1.0, position.x, position.y]),
        placeholder: false,
    })
}

fn parse_color(value: &Value) -> EditResult<SourceColor> {
    match value {
        Value::Number(n) if n.is_u64() => {
            let packed = n.as_u64().unwrap_or(0);
            u32::try_from(packed)
                .map(SourceColor::Packed)
                .map_err(|_| invalid("packed color out of range"))
        }
        Value::Number(n) => Ok(SourceColor::Gray(n.as_f64().unwrap_or(0.0))),
        Value::Array(components) => {
            let components: Vec<f64> = components.iter().filter_map(Value::as_f64).collect();
            SourceColor::from_components(&components)
                .ok_or_else(|| invalid("color needs 1, 3 or 4 components"))
        }
        _ => Err(invalid("unsupported color encoding")),
    }
}

fn string(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn number(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| map.get(*key).and_then(Value::as_f64))
}

fn numbers(map: &Map<String, Value>, keys: &[&str]) -> Option<Vec<f64>> {
    keys.iter().find_map(|key| {
        map.get(*key)
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_f64).collect())
    })
}

fn four(values: &[f64]) -> Option<[f64; 4]> {
    values.try_into().ok()
}

fn six(values: &[f64]) -> Option<[f64; 6]> {
    values.try_into().ok()
}

fn invalid(message: &str) -> EditError {
    EditError::Parse(format!("extraction record: {message}"))
}
