//! Image XObjects: assemble uploaded images into a PDF, one image per page,
//! and list the images a document paints.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use tracing::{debug, warn};

use crate::{
    error::{EditError, EditResult},
    pdf::{
        coords::{to_display_space, Scale},
        extract::{self, PageContent},
        loader,
    },
    types::{ExtractedImage, ImageFormat, Position},
    util::{bbox::BBox, matrix::Matrix2D},
};

/// Each image fills a page of its own pixel size, one pixel per point.
pub fn images_to_pdf(images: &[Vec<u8>]) -> EditResult<Vec<u8>> {
    if images.is_empty() {
        return Err(EditError::Parse("no images supplied".into()));
    }

    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let mut kids = Vec::with_capacity(images.len());

    for (position, bytes) in images.iter().enumerate() {
        let decoded = image::load_from_memory(bytes)
            .map_err(|err| EditError::Parse(format!("image {}: {err}", position + 1)))?
            .to_rgb8();
        let (width, height) = decoded.dimensions();
        debug!(image = position + 1, width, height, "embedding image page");

        let image_id = document.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(width),
                "Height" => i64::from(height),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8i64,
            },
            decoded.into_raw(),
        ));
        let draw = format!("q {width} 0 0 {height} 0 0 cm /Im0 Do Q").into_bytes();
        let content_id = document.add_object(Stream::new(dictionary! {}, draw));
        let page_id = document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(i64::from(width)),
                Object::Integer(i64::from(height)),
            ],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    document
        .save_to(&mut buffer)
        .map_err(|err| EditError::Write(err.to_string()))?;
    Ok(buffer)
}

/// Every image painted on every page, in page then painting order.
/// `include_data` attaches a data URL where the pixels can be exported.
pub fn extract_images(document: &Document, include_data: bool) -> EditResult<Vec<ExtractedImage>> {
    let mut images = Vec::new();
    for page in 1..=loader::page_count(document) {
        let content = extract::extract_page(document, page)?;
        let page_dict = loader::page_dictionary(document, content.page_id)?;
        let resources = loader::page_resources(document, page_dict);
        let Some(xobjects) = resources
            .get(b"XObject")
            .ok()
            .and_then(|object| loader::resolve_dict(document, object).ok())
        else {
            continue;
        };

        let mut index = 0;
        for placement in &content.placements {
            let Ok(Object::Reference(id)) = xobjects.get(placement.name.as_bytes()) else {
                continue;
            };
            let Ok(stream) = document.get_object(*id).and_then(Object::as_stream) else {
                continue;
            };
            if !matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(name)) if name == b"Image") {
                continue;
            }
            index += 1;
            let format = image_format(&stream.dict);
            let data = if include_data {
                image_data_url(stream, format)
            } else {
                None
            };
            images.push(ExtractedImage {
                page_number: page,
                index,
                xref: id.0,
                width: dimension(&stream.dict, b"Width"),
                height: dimension(&stream.dict, b"Height"),
                format,
                file_size: stream.content.len(),
                position: placement_position(&content, placement.ctm),
                data,
            });
        }
    }
    debug!(images = images.len(), include_data, "listed document images");
    Ok(images)
}

fn dimension(dict: &Dictionary, key: &[u8]) -> u32 {
    dict.get(key)
        .ok()
        .and_then(|object| object.as_i64().ok())
        .and_then(|value| u32::try_from(value).ok())
        .unwrap_or(0)
}

/// The last filter decides what the stored bytes are.
fn image_format(dict: &Dictionary) -> ImageFormat {
    let last_filter = match dict.get(b"Filter") {
        Ok(Object::Name(name)) => Some(name.as_slice()),
        Ok(Object::Array(filters)) => filters.last().and_then(|filter| filter.as_name().ok()),
        _ => None,
    };
    match last_filter {
        Some(b"DCTDecode") => ImageFormat::Jpeg,
        Some(b"JPXDecode") => ImageFormat::Jpx,
        _ => ImageFormat::Png,
    }
}

/// The image fills the unit square of its CTM.
fn placement_position(content: &PageContent, ctm: Matrix2D) -> Position {
    let corners = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]
        .map(|(x, y)| ctm.transform_point(x, y));
    let bbox = BBox::from_points(&corners).unwrap_or_default();
    let (x, y) = to_display_space(
        bbox.min_x - content.x0,
        bbox.min_y - content.y0,
        bbox.height(),
        content.height,
        Scale::UNIT,
    );
    Position {
        x,
        y,
        width: bbox.width(),
        height: bbox.height(),
    }
}

/// JPEG bytes pass through; 8-bit gray and RGB samples are re-encoded as
/// PNG. Anything else has no data URL.
fn image_data_url(stream: &Stream, format: ImageFormat) -> Option<String> {
    match format {
        ImageFormat::Jpeg => Some(format!("data:image/jpeg;base64,{}", BASE64.encode(&stream.content))),
        ImageFormat::Jpx => None,
        ImageFormat::Png => {
            let dict = &stream.dict;
            let (width, height) = (dimension(dict, b"Width"), dimension(dict, b"Height"));
            let bits = dict.get(b"BitsPerComponent").ok().and_then(|object| object.as_i64().ok());
            if bits != Some(8) {
                return None;
            }
            let samples = match loader::decoded_stream(stream) {
                Ok(samples) => samples,
                Err(err) => {
                    warn!(error = %err, "image samples could not be decoded");
                    return None;
                }
            };
            let pixels = match dict.get(b"ColorSpace") {
                Ok(Object::Name(name)) if name == b"DeviceRGB" => {
                    image::RgbImage::from_raw(width, height, samples).map(image::DynamicImage::from)
                }
                Ok(Object::Name(name)) if name == b"DeviceGray" => {
                    image::GrayImage::from_raw(width, height, samples).map(image::DynamicImage::from)
                }
                _ => None,
            }?;
            let mut out = Cursor::new(Vec::new());
            pixels.write_to(&mut out, image::ImageFormat::Png).ok()?;
            Some(format!("data:image/png;base64,{}", BASE64.encode(out.into_inner())))
        }
    }
}
