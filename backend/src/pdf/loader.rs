//! Document loading and the lopdf lookups shared by extraction and writing.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::{
    error::{EditError, EditResult},
    pdf::fonts::{FontInfo, SimpleEncoding},
    types::DocumentMetadata,
};

const MAX_REFERENCE_DEPTH: usize = 32;
const MAX_PARENT_DEPTH: usize = 64;
/// US Letter, used when a page carries no usable box.
const DEFAULT_PAGE_SIZE: (f64, f64) = (612.0, 792.0);

/// Parse bytes into a document. Any lopdf failure is a `Parse` error.
pub fn parse_document(bytes: &[u8]) -> EditResult<Document> {
    if bytes.is_empty() {
        return Err(EditError::Parse("empty input".into()));
    }
    let document = Document::load_mem(bytes).map_err(|err| EditError::Parse(err.to_string()))?;
    if document.get_pages().is_empty() {
        return Err(EditError::Parse("document has no pages".into()));
    }
    Ok(document)
}

pub fn page_count(document: &Document) -> u32 {
    document.get_pages().len() as u32
}

/// Object id of a 1-based page number.
pub fn page_id(document: &Document, page: u32) -> EditResult<ObjectId> {
    let pages: BTreeMap<u32, ObjectId> = document.get_pages();
    pages
        .get(&page)
        .copied()
        .ok_or(EditError::PageOutOfRange {
            page,
            page_count: pages.len() as u32,
        })
}

pub fn resolve_object<'a>(document: &'a Document, object: &'a Object) -> Result<&'a Object> {
    let mut current = object;
    for _ in 0..MAX_REFERENCE_DEPTH {
        match current {
            Object::Reference(id) => {
                current = document
                    .get_object(*id)
                    .with_context(|| format!("dangling reference {id:?}"))?;
            }
            other => return Ok(other),
        }
    }
    Err(anyhow!("reference chain too deep"))
}

pub fn as_number(object: &Object) -> Result<f64> {
    match object {
        Object::Integer(value) => Ok(*value as f64),
        Object::Real(value) => Ok(f64::from(*value)),
        _ => Err(anyhow!("expected numeric object")),
    }
}

pub fn resolve_dict<'a>(document: &'a Document, object: &'a Object) -> Result<&'a Dictionary> {
    match resolve_object(document, object)? {
        Object::Dictionary(dict) => Ok(dict),
        Object::Stream(stream) => Ok(&stream.dict),
        _ => Err(anyhow!("expected dictionary")),
    }
}

/// Look up a page attribute, walking up `/Parent` for inheritable keys.
pub fn inherited<'a>(
    document: &'a Document,
    page: &'a Dictionary,
    key: &[u8],
) -> Option<&'a Object> {
    let mut dict = page;
    for _ in 0..MAX_PARENT_DEPTH {
        if let Ok(value) = dict.get(key) {
            return resolve_object(document, value).ok();
        }
        let parent = dict.get(b"Parent").ok()?;
        dict = resolve_dict(document, parent).ok()?;
    }
    None
}

pub fn page_dictionary(document: &Document, page_id: ObjectId) -> Result<&Dictionary> {
    document
        .get_object(page_id)
        .with_context(|| format!("page object {page_id:?} missing"))?
        .as_dict()
        .map_err(|_| anyhow!("page object {page_id:?} is not a dictionary"))
}

/// The visible page rectangle in user space: the crop box, falling back to
/// the media box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub x0: f64,
    pub y0: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for PageBox {
    fn default() -> Self {
        Self {
            x0: 0.0,
            y0: 0.0,
            width: DEFAULT_PAGE_SIZE.0,
            height: DEFAULT_PAGE_SIZE.1,
        }
    }
}

pub fn page_box(document: &Document, page: &Dictionary) -> PageBox {
    let read_box = |key: &[u8]| -> Option<PageBox> {
        let values = inherited(document, page, key)?.as_array().ok()?;
        let numbers: Vec<f64> = values
            .iter()
            .filter_map(|value| resolve_object(document, value).ok())
            .filter_map(|value| as_number(value).ok())
            .collect();
        match numbers.as_slice() {
            [ax, ay, bx, by] => {
                let (width, height) = ((bx - ax).abs(), (by - ay).abs());
                (width > 0.0 && height > 0.0).then_some(PageBox {
                    x0: ax.min(*bx),
                    y0: ay.min(*by),
                    width,
                    height,
                })
            }
            _ => None,
        }
    };
    read_box(b"CropBox")
        .or_else(|| read_box(b"MediaBox"))
        .unwrap_or_default()
}

/// Width and height in points of [`page_box`].
pub fn page_size(document: &Document, page: &Dictionary) -> (f64, f64) {
    let page_box = page_box(document, page);
    (page_box.width, page_box.height)
}

/// The page's `/Rotate` value, inherited, in degrees.
pub fn page_rotation(document: &Document, page: &Dictionary) -> i64 {
    inherited(document, page, b"Rotate")
        .and_then(|value| as_number(value).ok())
        .map_or(0, |value| value as i64)
}

/// The resolved resources dictionary, cloned. Missing resources are empty.
pub fn page_resources(document: &Document, page: &Dictionary) -> Dictionary {
    inherited(document, page, b"Resources")
        .and_then(|value| match value {
            Object::Dictionary(dict) => Some(dict.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

/// Content stream object ids in painting order.
pub fn content_stream_ids(document: &Document, page: &Dictionary) -> Result<Vec<ObjectId>> {
    let contents = match page.get(b"Contents") {
        Ok(contents) => contents,
        Err(_) => return Ok(Vec::new()),
    };
    match contents {
        Object::Reference(id) => match document.get_object(*id)? {
            // Some producers put the array behind a reference.
            Object::Array(items) => Ok(items
                .iter()
                .filter_map(|item| item.as_reference().ok())
                .collect()),
            _ => Ok(vec![*id]),
        },
        Object::Array(items) => Ok(items
            .iter()
            .filter_map(|item| item.as_reference().ok())
            .collect()),
        _ => Err(anyhow!("unsupported /Contents entry")),
    }
}

/// Decoded bytes of one content stream.
pub fn stream_bytes(document: &Document, id: ObjectId) -> Result<Vec<u8>> {
    let stream = document
        .get_object(id)
        .with_context(|| format!("missing stream object {id:?}"))?
        .as_stream()
        .map_err(|_| anyhow!("object {id:?} is not a stream"))?;
    decoded_stream(stream).with_context(|| format!("cannot decode stream {id:?}"))
}

/// Stream content with its filters removed.
pub fn decoded_stream(stream: &Stream) -> Result<Vec<u8>> {
    if stream.dict.get(b"Filter").is_ok() {
        Ok(stream.decompressed_content()?)
    } else {
        Ok(stream.content.clone())
    }
}

/// Fonts declared in a resources dictionary, keyed by resource name.
pub fn page_fonts(document: &Document, resources: &Dictionary) -> BTreeMap<String, FontInfo> {
    let mut fonts = BTreeMap::new();
    let Some(font_dict) = resources
        .get(b"Font")
        .ok()
        .and_then(|object| resolve_dict(document, object).ok())
    else {
        return fonts;
    };
    for (name, entry) in font_dict.iter() {
        let name = String::from_utf8_lossy(name).into_owned();
        let info = match resolve_dict(document, entry) {
            Ok(dict) => FontInfo::from_dictionary(document, &name, dict),
            Err(_) => FontInfo::fallback(&name),
        };
        fonts.insert(name, info);
    }
    fonts
}

/// The trailer's `/Info` entries that are text strings.
pub fn document_metadata(document: &Document) -> DocumentMetadata {
    let Some(info) = document
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|object| resolve_dict(document, object).ok())
    else {
        return DocumentMetadata::default();
    };
    let text = |key: &[u8]| -> Option<String> {
        let Object::String(bytes, _) = resolve_object(document, info.get(key).ok()?).ok()? else {
            return None;
        };
        let value = decode_text_string(bytes);
        (!value.is_empty()).then_some(value)
    };
    DocumentMetadata {
        title: text(b"Title"),
        author: text(b"Author"),
        subject: text(b"Subject"),
        keywords: text(b"Keywords"),
        creator: text(b"Creator"),
        producer: text(b"Producer"),
        creation_date: text(b"CreationDate"),
        mod_date: text(b"ModDate"),
    }
}

/// UTF-16BE with a byte order mark, otherwise single-byte text read through
/// WinAnsiEncoding.
fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    let encoding = SimpleEncoding::win_ansi();
    bytes
        .iter()
        .map(|byte| encoding.decode(*byte).unwrap_or(char::from(*byte)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    fn two_level_document() -> (Document, ObjectId) {
        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();
        let content_id = document.add_object(Stream::new(dictionary! {}, b"BT ET".to_vec()));
        let page_id = document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        document.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1i64,
                "MediaBox" => vec![0i64.into(), 0i64.into(), 300i64.into(), 400i64.into()],
                "Rotate" => 90i64,
                "Resources" => dictionary! {},
            }),
        );
        let catalog_id = document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        document.trailer.set("Root", catalog_id);
        (document, page_id)
    }

    #[test]
    fn inherited_attributes_come_from_the_page_tree() {
        let (document, page_id) = two_level_document();
        let page = page_dictionary(&document, page_id).unwrap();
        assert_eq!(page_size(&document, page), (300.0, 400.0));
        assert_eq!(page_rotation(&document, page), 90);
        assert_eq!(content_stream_ids(&document, page).unwrap().len(), 1);
    }

    #[test]
    fn crop_box_origin_is_kept() {
        let (mut document, page_id) = two_level_document();
        if let Ok(Object::Dictionary(page)) = document.get_object_mut(page_id) {
            page.set(
                "CropBox",
                vec![10i64.into(), 20i64.into(), 210i64.into(), 320i64.into()],
            );
        }
        let page = page_dictionary(&document, page_id).unwrap();
        assert_eq!(
            page_box(&document, page),
            PageBox {
                x0: 10.0,
                y0: 20.0,
                width: 200.0,
                height: 300.0
            }
        );
    }

    #[test]
    fn page_lookup_is_one_based() {
        let (document, page_id) = two_level_document();
        assert_eq!(self::page_id(&document, 1).unwrap(), page_id);
        assert!(matches!(
            self::page_id(&document, 2),
            Err(EditError::PageOutOfRange { page: 2, page_count: 1 })
        ));
    }

    #[test]
    fn garbage_bytes_are_a_parse_error() {
        assert!(matches!(parse_document(b"not a pdf"), Err(EditError::Parse(_))));
        assert!(matches!(parse_document(b""), Err(EditError::Parse(_))));
    }

    #[test]
    fn info_strings_become_metadata() {
        let (mut document, _) = two_level_document();
        let info_id = document.add_object(dictionary! {
            "Title" => Object::String(b"Q1 \x80 report".to_vec(), lopdf::StringFormat::Literal),
            "Author" => Object::String(
                vec![0xFE, 0xFF, 0x00, 0x4A, 0x00, 0xF6],
                lopdf::StringFormat::Hexadecimal,
            ),
            "Producer" => Object::string_literal(""),
            "Keywords" => 7i64,
        });
        document.trailer.set("Info", info_id);

        let metadata = document_metadata(&document);
        assert_eq!(metadata.title.as_deref(), Some("Q1 \u{20AC} report"));
        assert_eq!(metadata.author.as_deref(), Some("J\u{F6}"));
        assert_eq!(metadata.producer, None);
        assert_eq!(metadata.keywords, None);
    }

    #[test]
    fn missing_info_is_empty_metadata() {
        let (document, _) = two_level_document();
        assert_eq!(document_metadata(&document), DocumentMetadata::default());
    }
}
