//! Text run enumeration and text item extraction.
//!
//! The walker replays a page's content streams with a minimal graphics and
//! text state, recording one [`RawRun`] per text-showing operation. Runs with
//! visible text become items; an item's identity is its position among those
//! runs. Redraw overlays written by the patcher (marked content tagged
//! `/RetextRedraw`) never take an identity slot, they override the content of
//! the item they name, even when the overlay text is blank.

use std::{collections::BTreeMap, ops::Range};

use lopdf::{Document, ObjectId};
use tracing::debug;

use crate::{
    error::{EditError, EditResult},
    pdf::{
        color::{Rgb, SourceColor},
        content::{tokenize_stream, ContentToken, Operand, Operator, PdfString, StringFormat},
        coords::{to_display_space, Scale},
        fonts::{self, FontInfo},
        loader,
    },
    types::{Position, TextItem, Typography},
    util::{bbox::BBox, matrix::Matrix2D},
};

/// Marked-content tag wrapped around redraw overlays.
pub const REDRAW_TAG: &str = "RetextRedraw";
/// Fraction of the font size that sits below the baseline in an item box.
pub const DESCENT_RATIO: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct ContentStreamData {
    pub object_id: ObjectId,
    pub bytes: Vec<u8>,
    pub tokens: Vec<ContentToken>,
}

/// One string operand of a text-showing operation.
#[derive(Debug, Clone, PartialEq)]
pub struct StringSlot {
    pub span: Range<usize>,
    pub format: StringFormat,
    pub bytes: Vec<u8>,
}

impl From<&PdfString> for StringSlot {
    fn from(value: &PdfString) -> Self {
        Self {
            span: value.span.clone(),
            format: value.format,
            bytes: value.bytes.clone(),
        }
    }
}

/// Where a run lives in the page's content streams.
#[derive(Debug, Clone, PartialEq)]
pub struct RunLocator {
    /// Index into [`PageContent::streams`].
    pub stream_index: usize,
    pub operator_span: Range<usize>,
    pub strings: Vec<StringSlot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRun {
    pub text: String,
    /// Text space to user space at the start of the run, without font size.
    pub transform: Matrix2D,
    pub font_resource: String,
    pub base_font: String,
    pub font_size: f64,
    /// Font size after the transform's vertical scale.
    pub effective_size: f64,
    /// Advance width in user space.
    pub width: f64,
    pub spacing: Spacing,
    pub multibyte: bool,
    pub color: SourceColor,
    /// Fill color behind the run's center, white when nothing was painted.
    pub background: Rgb,
    pub locator: RunLocator,
}

impl RawRun {
    pub fn bbox(&self) -> BBox {
        let (x, baseline) = (self.transform.e, self.transform.f);
        let bottom = baseline - DESCENT_RATIO * self.effective_size;
        BBox {
            min_x: x,
            min_y: bottom,
            max_x: x + self.width,
            max_y: bottom + self.effective_size,
        }
    }

    pub fn has_visible_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Character and word spacing in effect when a run was shown.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Spacing {
    pub char_spacing: f64,
    pub word_spacing: f64,
}

/// Horizontal advance of `bytes` in unscaled text space units, before
/// horizontal scaling.
pub fn string_advance(font: &FontInfo, bytes: &[u8], size: f64, spacing: Spacing) -> f64 {
    font.codes(bytes)
        .into_iter()
        .map(|code| {
            let mut tx = font.code_width(code) / 1000.0 * size + spacing.char_spacing;
            if !font.is_multibyte() && code == 32 {
                tx += spacing.word_spacing;
            }
            tx
        })
        .sum()
}

/// An XObject painted by `Do`, with the CTM at that point.
#[derive(Debug, Clone, PartialEq)]
pub struct XObjectPlacement {
    pub name: String,
    pub ctm: Matrix2D,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilledRect {
    pub bbox: BBox,
    pub color: SourceColor,
}

/// An item slot: the original run plus the latest redraw overriding it.
#[derive(Debug, Clone, Copy)]
pub struct ItemRuns<'a> {
    pub index: usize,
    pub original: &'a RawRun,
    pub redraw: Option<&'a RawRun>,
}

impl<'a> ItemRuns<'a> {
    pub fn visible(&self) -> &'a RawRun {
        self.redraw.unwrap_or(self.original)
    }

    pub fn is_redrawn(&self) -> bool {
        self.redraw.is_some()
    }
}

/// Everything extraction learned about one page.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub page_number: u32,
    pub page_id: ObjectId,
    /// Crop box origin in user space.
    pub x0: f64,
    pub y0: f64,
    pub width: f64,
    pub height: f64,
    pub rotation: i64,
    pub streams: Vec<ContentStreamData>,
    pub fonts: BTreeMap<String, FontInfo>,
    /// Runs outside redraw overlays, in stream order, including blank ones.
    pub runs: Vec<RawRun>,
    /// Latest redraw per item index.
    pub redraws: BTreeMap<usize, RawRun>,
    pub filled_rects: Vec<FilledRect>,
    pub placements: Vec<XObjectPlacement>,
}

impl PageContent {
    /// Item slots in identity order.
    pub fn items(&self) -> Vec<ItemRuns<'_>> {
        self.runs
            .iter()
            .filter(|run| run.has_visible_text())
            .enumerate()
            .map(|(index, original)| ItemRuns {
                index,
                original,
                redraw: self.redraws.get(&index),
            })
            .collect()
    }

    pub fn item(&self, index: usize) -> EditResult<ItemRuns<'_>> {
        self.items()
            .into_iter()
            .nth(index)
            .ok_or(EditError::ItemNotFound {
                page: self.page_number,
                index,
            })
    }

    /// Overlay-facing items with positions at scale 1.
    pub fn text_items(&self) -> Vec<TextItem> {
        self.items()
            .into_iter()
            .map(|slot| to_text_item(self, slot))
            .collect()
    }
}

/// Parse and walk one page.
pub fn extract_page(document: &Document, page_number: u32) -> EditResult<PageContent> {
    let page_id = loader::page_id(document, page_number)?;
    let page = loader::page_dictionary(document, page_id)?;
    let page_box = loader::page_box(document, page);
    let rotation = loader::page_rotation(document, page);
    let resources = loader::page_resources(document, page);
    let fonts = loader::page_fonts(document, &resources);

    let mut streams = Vec::new();
    for object_id in loader::content_stream_ids(document, page)? {
        let bytes = loader::stream_bytes(document, object_id)?;
        let tokens = tokenize_stream(&bytes).map_err(|err| {
            EditError::Parse(format!("page {page_number} content {object_id:?}: {err}"))
        })?;
        streams.push(ContentStreamData {
            object_id,
            bytes,
            tokens,
        });
    }

    let mut walker = Walker::new(&fonts);
    for (stream_index, stream) in streams.iter().enumerate() {
        for token in &stream.tokens {
            walker.apply(token, stream_index);
        }
    }
    let Walker {
        runs,
        redraws,
        filled,
        placements,
        ..
    } = walker;

    debug!(
        page = page_number,
        runs = runs.len(),
        redraws = redraws.len(),
        "extracted page content"
    );

    Ok(PageContent {
        page_number,
        page_id,
        x0: page_box.x0,
        y0: page_box.y0,
        width: page_box.width,
        height: page_box.height,
        rotation,
        streams,
        fonts,
        runs,
        redraws,
        filled_rects: filled,
        placements,
    })
}

/// `extract(page, scale)`: ordered text items with positions at `scale`.
pub fn extract_items(content: &PageContent, scale: Scale) -> Vec<TextItem> {
    content
        .text_items()
        .into_iter()
        .map(|mut item| {
            item.position = item.position.scaled(scale);
            item
        })
        .collect()
}

/// Plain text of a page: item contents in identity order, one per line.
pub fn raw_text(items: &[TextItem]) -> String {
    items
        .iter()
        .map(|item| item.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn to_text_item(content: &PageContent, slot: ItemRuns<'_>) -> TextItem {
    let original = slot.original;
    let visible = slot.visible();
    let descriptor = fonts::resolve(&original.base_font);
    let bbox = RawRun {
        width: visible.width,
        ..original.clone()
    }
    .bbox();
    let (x, y) = to_display_space(
        bbox.min_x - content.x0,
        bbox.min_y - content.y0,
        bbox.height(),
        content.height,
        Scale::UNIT,
    );

    TextItem {
        id: TextItem::key(content.page_number, slot.index),
        page_number: content.page_number,
        index: slot.index,
        content: visible.text.clone(),
        position: Position {
            x,
            y,
            width: bbox.width(),
            height: bbox.height(),
        },
        typography: Typography {
            font_size: original.effective_size,
            font_family: descriptor.family.css().to_string(),
            font_weight: descriptor.weight,
            font_style: descriptor.style,
            raw_font_name: original.base_font.clone(),
        },
        color: original.color.normalize(),
        origin_transform: original.transform.to_array(),
        placeholder: false,
    }
}

#[derive(Debug, Clone)]
struct TextParams {
    font: Option<String>,
    size: f64,
    char_spacing: f64,
    word_spacing: f64,
    horizontal_scaling: f64,
    leading: f64,
    rise: f64,
}

impl Default for TextParams {
    fn default() -> Self {
        Self {
            font: None,
            size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scaling: 1.0,
            leading: 0.0,
            rise: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct GraphicsState {
    ctm: Matrix2D,
    fill: SourceColor,
    text: TextParams,
}

enum ShowElement<'t> {
    Text(&'t PdfString),
    Kern(f64),
}

struct Walker<'f> {
    fonts: &'f BTreeMap<String, FontInfo>,
    state: GraphicsState,
    stack: Vec<GraphicsState>,
    tm: Matrix2D,
    tlm: Matrix2D,
    /// One entry per open marked-content sequence; `Some(n)` for redraws.
    marked: Vec<Option<usize>>,
    pending_rects: Vec<BBox>,
    filled: Vec<FilledRect>,
    placements: Vec<XObjectPlacement>,
    runs: Vec<RawRun>,
    redraws: BTreeMap<usize, RawRun>,
}

impl<'f> Walker<'f> {
    fn new(fonts: &'f BTreeMap<String, FontInfo>) -> Self {
        Self {
            fonts,
            state: GraphicsState::default(),
            stack: Vec::new(),
            tm: Matrix2D::identity(),
            tlm: Matrix2D::identity(),
            marked: Vec::new(),
            pending_rects: Vec::new(),
            filled: Vec::new(),
            placements: Vec::new(),
            runs: Vec::new(),
            redraws: BTreeMap::new(),
        }
    }

    fn redraw_target(&self) -> Option<usize> {
        self.marked.iter().rev().find_map(|entry| *entry)
    }

    fn apply(&mut self, token: &ContentToken, stream_index: usize) {
        let numbers = token.numbers();
        match token.operator {
            Operator::Save => self.stack.push(self.state.clone()),
            Operator::Restore => {
                if let Some(state) = self.stack.pop() {
                    self.state = state;
                }
            }
            Operator::Cm => {
                if let Some(matrix) = six(&numbers) {
                    self.state.ctm = self.state.ctm.multiply(matrix);
                }
            }
            Operator::Bt => {
                self.tm = Matrix2D::identity();
                self.tlm = Matrix2D::identity();
            }
            Operator::Et => {}
            Operator::Tf => {
                if let Some(name) = token.operands.first().and_then(Operand::as_name) {
                    self.state.text.font = Some(name.to_string());
                }
                if let Some(size) = numbers.first() {
                    self.state.text.size = *size;
                }
            }
            Operator::Tm => {
                if let Some(matrix) = six(&numbers) {
                    self.tm = matrix;
                    self.tlm = matrix;
                }
            }
            Operator::Td => {
                if let [tx, ty] = numbers[..] {
                    self.next_line(tx, ty);
                }
            }
            Operator::TdLeading => {
                if let [tx, ty] = numbers[..] {
                    self.state.text.leading = -ty;
                    self.next_line(tx, ty);
                }
            }
            Operator::TStar => self.next_line(0.0, -self.state.text.leading),
            Operator::Leading => set_first(&numbers, &mut self.state.text.leading),
            Operator::CharSpacing => set_first(&numbers, &mut self.state.text.char_spacing),
            Operator::WordSpacing => set_first(&numbers, &mut self.state.text.word_spacing),
            Operator::HorizontalScaling => {
                if let Some(value) = numbers.first() {
                    self.state.text.horizontal_scaling = value / 100.0;
                }
            }
            Operator::Rise => set_first(&numbers, &mut self.state.text.rise),
            Operator::Tj | Operator::TjArray => self.show(token, stream_index),
            Operator::NextLineShow => {
                self.next_line(0.0, -self.state.text.leading);
                self.show(token, stream_index);
            }
            Operator::NextLineShowSpaced => {
                if let [word, character] = numbers[..] {
                    self.state.text.word_spacing = word;
                    self.state.text.char_spacing = character;
                }
                self.next_line(0.0, -self.state.text.leading);
                self.show(token, stream_index);
            }
            Operator::FillGray | Operator::FillRgb | Operator::FillCmyk => {
                if let Some(color) = SourceColor::from_components(&numbers) {
                    self.state.fill = color;
                }
            }
            Operator::FillColor | Operator::FillColorN => {
                // Pattern fills carry a name operand and no usable components.
                if let Some(color) = SourceColor::from_components(&numbers) {
                    self.state.fill = color;
                }
            }
            Operator::FillColorSpace => {
                self.state.fill = match token.operands.first().and_then(Operand::as_name) {
                    Some("DeviceCMYK") => SourceColor::Cmyk([0.0, 0.0, 0.0, 1.0]),
                    Some("DeviceRGB") => SourceColor::Rgb([0.0; 3]),
                    _ => SourceColor::Gray(0.0),
                };
            }
            Operator::Rect => {
                if let [x, y, w, h] = numbers[..] {
                    let ctm = self.state.ctm;
                    let corners = [
                        ctm.transform_point(x, y),
                        ctm.transform_point(x + w, y),
                        ctm.transform_point(x, y + h),
                        ctm.transform_point(x + w, y + h),
                    ];
                    if let Some(bbox) = BBox::from_points(&corners) {
                        self.pending_rects.push(bbox);
                    }
                }
            }
            Operator::Fill => {
                let color = self.state.fill;
                let inside_redraw = self.redraw_target().is_some();
                for bbox in self.pending_rects.drain(..) {
                    if !inside_redraw {
                        self.filled.push(FilledRect { bbox, color });
                    }
                }
            }
            Operator::EndPath => self.pending_rects.clear(),
            Operator::BeginMarked => {
                let is_redraw = token.operands.first().and_then(Operand::as_name) == Some(REDRAW_TAG);
                let target = is_redraw
                    .then(|| token.operands.get(1))
                    .flatten()
                    .and_then(|props| props.dict_get("Item"))
                    .and_then(Operand::as_number)
                    .filter(|n| *n >= 0.0)
                    .map(|n| n as usize);
                self.marked.push(target);
            }
            Operator::BeginMarkedPlain => self.marked.push(None),
            Operator::EndMarked => {
                self.marked.pop();
            }
            Operator::Do => {
                let name = token.operands.first().and_then(Operand::as_name);
                if let (Some(name), None) = (name, self.redraw_target()) {
                    self.placements.push(XObjectPlacement {
                        name: name.to_string(),
                        ctm: self.state.ctm,
                    });
                }
            }
        }
    }

    fn next_line(&mut self, tx: f64, ty: f64) {
        self.tlm = self.tlm.multiply(Matrix2D::translate(tx, ty));
        self.tm = self.tlm;
    }

    fn show(&mut self, token: &ContentToken, stream_index: usize) {
        let params = self.state.text.clone();
        let font_name = params.font.clone().unwrap_or_default();
        let font = self
            .fonts
            .get(&font_name)
            .cloned()
            .unwrap_or_else(|| FontInfo::fallback(&font_name));

        let start = self
            .state
            .ctm
            .multiply(self.tm.multiply(Matrix2D::translate(0.0, params.rise)));

        let spacing = Spacing {
            char_spacing: params.char_spacing,
            word_spacing: params.word_spacing,
        };
        let mut text = String::new();
        let mut advance = 0.0;
        for element in show_elements(token) {
            match element {
                ShowElement::Text(string) => {
                    text.push_str(&font.decode(&string.bytes));
                    let tx = string_advance(&font, &string.bytes, params.size, spacing)
                        * params.horizontal_scaling;
                    self.tm = self.tm.multiply(Matrix2D::translate(tx, 0.0));
                    advance += tx;
                }
                ShowElement::Kern(amount) => {
                    let tx = -amount / 1000.0 * params.size * params.horizontal_scaling;
                    self.tm = self.tm.multiply(Matrix2D::translate(tx, 0.0));
                    advance += tx;
                }
            }
        }

        let scaled_size = (params.size * start.vertical_scale()).abs();
        let effective_size = if scaled_size > 0.0 {
            scaled_size
        } else {
            params.size.abs()
        };
        let mut run = RawRun {
            text,
            transform: start,
            font_resource: font_name,
            base_font: font.base_font.clone(),
            font_size: params.size,
            effective_size,
            width: advance.abs() * start.horizontal_scale(),
            spacing,
            multibyte: font.is_multibyte(),
            color: self.state.fill,
            background: Rgb::WHITE,
            locator: RunLocator {
                stream_index,
                operator_span: token.span.clone(),
                strings: token.strings().into_iter().map(StringSlot::from).collect(),
            },
        };

        match self.redraw_target() {
            // Blank redraws count too: they clear the item.
            Some(target) => {
                self.redraws.insert(target, run);
            }
            None => {
                run.background = self.background_at(&run.bbox());
                self.runs.push(run);
            }
        }
    }

    fn background_at(&self, bbox: &BBox) -> Rgb {
        let (cx, cy) = bbox.center();
        self.filled
            .iter()
            .rev()
            .find(|rect| rect.bbox.contains(cx, cy))
            .map_or(Rgb::WHITE, |rect| rect.color.normalize())
    }
}

fn show_elements(token: &ContentToken) -> Vec<ShowElement<'_>> {
    let mut elements = Vec::new();
    for operand in &token.operands {
        match operand {
            Operand::String(string) => elements.push(ShowElement::Text(string)),
            Operand::Array(items) => {
                for item in items {
                    match item {
                        Operand::String(string) => elements.push(ShowElement::Text(string)),
                        Operand::Number(amount) => elements.push(ShowElement::Kern(*amount)),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    elements
}

fn six(numbers: &[f64]) -> Option<Matrix2D> {
    let values: [f64; 6] = numbers.get(..6)?.try_into().ok()?;
    Some(Matrix2D::from_array(values))
}

fn set_first(numbers: &[f64], target: &mut f64) {
    if let Some(value) = numbers.first() {
        *target = *value;
    }
}
