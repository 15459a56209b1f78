#![allow(dead_code)]

use lopdf::{dictionary, Dictionary, Document, Object, Stream};

/// A one-page letter-size document with a Helvetica `/F1`, one `Tj` per line,
/// 20pt apart starting at (72, 700).
pub fn lines_pdf(lines: &[&str]) -> Vec<u8> {
    let mut content = String::from("BT\n/F1 12 Tf\n72 700 Td\n");
    for (index, line) in lines.iter().enumerate() {
        if index > 0 {
            content.push_str("0 -20 Td\n");
        }
        content.push_str(&format!("({line}) Tj\n"));
    }
    content.push_str("ET\n");
    single_page_pdf(content.as_bytes(), helvetica())
}

pub fn helvetica() -> Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    }
}

/// Two-byte font; its strings cannot be rewritten in place.
pub fn composite_font() -> Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => "ABCDEF+NotoSansCJK-Regular",
        "Encoding" => "Identity-H",
    }
}

/// Two-byte font whose `/ToUnicode` maps `<0003>` to H and `<0004>` to i.
pub fn to_unicode_font(document: &mut Document) -> Dictionary {
    let cmap = b"/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n\
2 beginbfchar\n<0003> <0048>\n<0004> <0069>\nendbfchar\n\
endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n";
    let cmap_id = document.add_object(Stream::new(dictionary! {}, cmap.to_vec()));
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => "ABCDEF+SubsetSans",
        "Encoding" => "Identity-H",
        "ToUnicode" => cmap_id,
    }
}

pub fn single_page_pdf(content: &[u8], font: Dictionary) -> Vec<u8> {
    single_page_pdf_with(content, |_| font)
}

/// Like [`single_page_pdf`], with a font that needs objects of its own.
pub fn single_page_pdf_with(content: &[u8], font: impl FnOnce(&mut Document) -> Dictionary) -> Vec<u8> {
    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let font = font(&mut document);
    let font_id = document.add_object(font);
    let content_id = document.add_object(Stream::new(dictionary! {}, content.to_vec()));
    let page_id = document.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0i64.into(), 0i64.into(), 612i64.into(), 792i64.into()],
        "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        "Contents" => content_id,
    });
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1i64,
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    document.save_to(&mut bytes).unwrap();
    bytes
}

/// Add an `/Info` title to a saved document.
pub fn titled(bytes: &[u8], title: &str) -> Vec<u8> {
    let mut document = Document::load_mem(bytes).unwrap();
    let info_id = document.add_object(dictionary! {
        "Title" => Object::string_literal(title),
        "Producer" => Object::string_literal("fixtures"),
    });
    document.trailer.set("Info", info_id);
    let mut out = Vec::new();
    document.save_to(&mut out).unwrap();
    out
}

pub fn multipart_body(boundary: &str, field: &str, file_name: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}
