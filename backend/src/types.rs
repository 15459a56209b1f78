use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pdf::{
    color::Rgb,
    coords::{scale_position, Rotation, Scale},
    fonts::{FontStyle, FontWeight},
};

/// Top-left-origin box in display units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Position {
    pub fn scaled(self, scale: Scale) -> Position {
        scale_position(self, scale)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typography {
    pub font_size: f64,
    /// CSS font-family list.
    pub font_family: String,
    pub font_weight: FontWeight,
    pub font_style: FontStyle,
    pub raw_font_name: String,
}

/// Stable identity of a text item: its slot among the page's visible runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemKey {
    pub page_number: u32,
    pub index: usize,
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}:t{}", self.page_number, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextItem {
    pub id: String,
    pub page_number: u32,
    pub index: usize,
    pub content: String,
    pub position: Position,
    pub typography: Typography,
    pub color: Rgb,
    pub origin_transform: [f64; 6],
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub placeholder: bool,
}

impl TextItem {
    pub fn key(page_number: u32, index: usize) -> String {
        ItemKey { page_number, index }.to_string()
    }

    pub fn item_key(&self) -> ItemKey {
        ItemKey {
            page_number: self.page_number,
            index: self.index,
        }
    }
}

/// Extracted items of one page, positions at scale 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageText {
    pub page_number: u32,
    pub width: f64,
    pub height: f64,
    /// The page's own `/Rotate`.
    pub rotation: Rotation,
    pub items: Vec<TextItem>,
    /// Item contents in reading order, one per line.
    #[serde(default)]
    pub raw_text: String,
    /// Set when the backend could not deliver a real extraction.
    #[serde(default)]
    pub placeholder: bool,
    /// Display-only items from an external extractor; they carry no engine
    /// identity and cannot be edited.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

impl PageText {
    /// Stand-in returned when the backend is unavailable. Nothing in it is
    /// editable.
    pub fn placeholder(page_number: u32, reason: &str) -> Self {
        Self {
            page_number,
            width: 0.0,
            height: 0.0,
            rotation: Rotation::None,
            items: vec![TextItem {
                id: format!("p{page_number}:placeholder"),
                page_number,
                index: 0,
                content: format!("Text unavailable: {reason}"),
                position: Position {
                    x: 0.0,
                    y: 0.0,
                    width: 0.0,
                    height: 0.0,
                },
                typography: Typography {
                    font_size: 12.0,
                    font_family: "serif".into(),
                    font_weight: FontWeight::Normal,
                    font_style: FontStyle::Normal,
                    raw_font_name: String::new(),
                },
                color: Rgb::BLACK,
                origin_transform: [1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
                placeholder: true,
            }],
            raw_text: String::new(),
            placeholder: true,
            read_only: true,
        }
    }

    pub fn item(&self, index: usize) -> Option<&TextItem> {
        self.items
            .iter()
            .find(|item| item.index == index && !item.placeholder)
    }

    pub fn at_scale(&self, scale: Scale, view_rotation: Rotation) -> PageView {
        PageView {
            page_number: self.page_number,
            width: self.width,
            height: self.height,
            scale,
            view_rotation,
            placeholder: self.placeholder,
            read_only: self.read_only,
            raw_text: self.raw_text.clone(),
            items: self
                .items
                .iter()
                .map(|item| PositionedItem {
                    display_position: item.position.scaled(scale),
                    item: item.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionedItem {
    #[serde(flatten)]
    pub item: TextItem,
    pub display_position: Position,
}

/// What the overlay renders for one page at one scale.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    pub page_number: u32,
    pub width: f64,
    pub height: f64,
    pub scale: Scale,
    /// Display rotation wrapped around the canvas; item positions ignore it.
    pub view_rotation: Rotation,
    pub placeholder: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
    pub raw_text: String,
    pub items: Vec<PositionedItem>,
}

/// A pending or applied change to one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRecord {
    pub page_number: u32,
    pub target_item_key: usize,
    pub original_text: String,
    pub replacement_text: String,
    pub applied_at: Option<DateTime<Utc>>,
}

impl EditRecord {
    pub fn key(&self) -> ItemKey {
        ItemKey {
            page_number: self.page_number,
            index: self.target_item_key,
        }
    }

    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Edit intent as it crosses the transport boundary.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    #[serde(alias = "page")]
    pub page_number: u32,
    #[serde(alias = "item", alias = "targetItemKey")]
    pub item_index: usize,
    #[serde(alias = "oldText")]
    pub original_text: String,
    #[serde(alias = "newText")]
    pub replacement_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppliedStrategy {
    Substituted,
    Redrawn,
    /// The replacement matched the current text.
    Unchanged,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedEdit {
    pub page_number: u32,
    pub item_index: usize,
    pub strategy: AppliedStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedEdit {
    pub page_number: u32,
    pub item_index: usize,
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub applied: Vec<AppliedEdit>,
    pub failed: Vec<FailedEdit>,
    pub has_unapplied_changes: bool,
    /// `data:application/pdf;base64,...` of the current document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_pdf: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenResponse {
    pub doc_id: String,
    pub file_name: String,
    pub page_count: u32,
    pub pages: Vec<PageSummary>,
    pub metadata: DocumentMetadata,
}

/// Entries of the trailer's `/Info` dictionary. Missing or undecodable
/// entries are left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mod_date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Jpx,
    Png,
}

/// An image XObject painted on a page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedImage {
    pub page_number: u32,
    /// 1-based, in painting order on the page.
    pub index: usize,
    pub xref: u32,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub file_size: usize,
    /// Top-left-origin box at scale 1.
    pub position: Position,
    /// `data:image/...;base64,...` when requested and the pixels could be
    /// exported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub page_number: u32,
    pub width: f64,
    pub height: f64,
    pub rotation: Rotation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_request_accepts_short_field_names() {
        let request: EditRequest = serde_json::from_str(
            r#"{"page":1,"item":3,"oldText":"N/A","newText":"Paid"}"#,
        )
        .unwrap();
        assert_eq!(request.page_number, 1);
        assert_eq!(request.item_index, 3);
        assert_eq!(request.replacement_text, "Paid");
    }

    #[test]
    fn metadata_omits_missing_entries() {
        let metadata = DocumentMetadata {
            title: Some("Invoice".into()),
            mod_date: Some("D:20240101".into()),
            ..DocumentMetadata::default()
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json, serde_json::json!({"title": "Invoice", "modDate": "D:20240101"}));
    }

    #[test]
    fn item_key_display() {
        assert_eq!(TextItem::key(2, 7), "p2:t7");
    }

    #[test]
    fn placeholder_pages_have_no_editable_items() {
        let page = PageText::placeholder(4, "backend timed out");
        assert!(page.placeholder);
        assert!(page.read_only);
        assert!(page.item(0).is_none());
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["items"][0]["placeholder"], true);
    }
}
