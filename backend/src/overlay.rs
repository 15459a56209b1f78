//! Per-page edit-focus state machine for the text overlay.
//!
//! ```text
//! EditModeOff --toggle--> EditModeOn(Idle) --click--> EditModeOn(Focused)
//!      ^                       |    ^                    |  confirm / blur
//!      +-------toggle----------+    +--------------------+  cancel / navigate
//! ```
//!
//! Confirm always commits. Blur follows the configured [`BlurPolicy`].
//! Focusing a second item is a blur of the first. Navigation discards.

use std::collections::BTreeMap;

use crate::{
    config::BlurPolicy,
    error::{EditError, EditResult},
    pdf::coords::{Rotation, Scale},
    types::{EditRecord, PageText, PositionedItem},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditMode {
    Off,
    On,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Focus {
    Idle,
    Focused { index: usize, buffer: String },
}

#[derive(Debug)]
pub struct OverlayController {
    page_number: u32,
    mode: EditMode,
    focus: Focus,
    items: Option<PageText>,
    scale: Scale,
    blur_policy: BlurPolicy,
    /// Committed text per item for this session, shown instead of the
    /// extracted content.
    edited: BTreeMap<usize, String>,
}

impl OverlayController {
    pub fn new(page_number: u32, scale: Scale, blur_policy: BlurPolicy) -> Self {
        Self {
            page_number,
            mode: EditMode::Off,
            focus: Focus::Idle,
            items: None,
            scale,
            blur_policy,
            edited: BTreeMap::new(),
        }
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    pub fn focus(&self) -> &Focus {
        &self.focus
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    /// Enter or leave edit mode. The first entry runs `extract`; later ones
    /// reuse the cached items. Leaving while focused is a blur.
    pub fn toggle_edit_mode<F>(&mut self, extract: F) -> EditResult<Option<EditRecord>>
    where
        F: FnOnce() -> EditResult<PageText>,
    {
        match self.mode {
            EditMode::Off => {
                if self.items.is_none() {
                    self.items = Some(extract()?);
                }
                self.mode = EditMode::On;
                Ok(None)
            }
            EditMode::On => {
                let emitted = self.blur();
                self.mode = EditMode::Off;
                Ok(emitted)
            }
        }
    }

    /// Positions follow from the cached items; nothing is re-extracted.
    pub fn set_scale(&mut self, scale: Scale) {
        self.scale = scale;
    }

    /// Replace the cached items, e.g. after edits were applied to the PDF.
    pub fn refresh(&mut self, items: PageText) {
        self.items = Some(items);
        self.edited.clear();
        self.focus = Focus::Idle;
    }

    pub fn display_items(&self) -> Vec<PositionedItem> {
        if self.mode == EditMode::Off {
            return Vec::new();
        }
        let Some(items) = &self.items else {
            return Vec::new();
        };
        items
            .at_scale(self.scale, Rotation::None)
            .items
            .into_iter()
            .map(|mut positioned| {
                if let Some(text) = self.edited.get(&positioned.item.index) {
                    positioned.item.content = text.clone();
                }
                positioned
            })
            .collect()
    }

    /// Focus an item, seeding the buffer with its current text. A previously
    /// focused item is blurred first; its record, if any, is returned.
    pub fn click(&mut self, index: usize) -> EditResult<Option<EditRecord>> {
        if self.mode == EditMode::Off || self.is_read_only() {
            return Ok(None);
        }
        let seed = match self.current_text(index) {
            Some(text) => text,
            None if self.is_placeholder(index) => return Ok(None),
            None => {
                return Err(EditError::ItemNotFound {
                    page: self.page_number,
                    index,
                })
            }
        };
        if matches!(&self.focus, Focus::Focused { index: focused, .. } if *focused == index) {
            return Ok(None);
        }
        let emitted = self.blur();
        self.focus = Focus::Focused {
            index,
            buffer: seed,
        };
        Ok(emitted)
    }

    pub fn input(&mut self, text: &str) {
        if let Focus::Focused { buffer, .. } = &mut self.focus {
            buffer.clear();
            buffer.push_str(text);
        }
    }

    pub fn confirm(&mut self) -> Option<EditRecord> {
        self.commit()
    }

    pub fn blur(&mut self) -> Option<EditRecord> {
        match self.blur_policy {
            BlurPolicy::Commit => self.commit(),
            BlurPolicy::Discard => {
                self.focus = Focus::Idle;
                None
            }
        }
    }

    pub fn cancel(&mut self) {
        self.focus = Focus::Idle;
    }

    /// Leaving the page drops any uncommitted buffer.
    pub fn navigate_away(&mut self) {
        self.focus = Focus::Idle;
    }

    fn commit(&mut self) -> Option<EditRecord> {
        let Focus::Focused { index, buffer } = std::mem::replace(&mut self.focus, Focus::Idle) else {
            return None;
        };
        let current = self.current_text(index)?;
        if buffer == current {
            return None;
        }
        let original_text = self
            .items
            .as_ref()
            .and_then(|items| items.item(index))
            .map(|item| item.content.clone())
            .unwrap_or_default();
        self.edited.insert(index, buffer.clone());
        Some(EditRecord {
            page_number: self.page_number,
            target_item_key: index,
            original_text,
            replacement_text: buffer,
            applied_at: None,
        })
    }

    fn current_text(&self, index: usize) -> Option<String> {
        let item = self.items.as_ref()?.item(index)?;
        Some(
            self.edited
                .get(&index)
                .cloned()
                .unwrap_or_else(|| item.content.clone()),
        )
    }

    fn is_read_only(&self) -> bool {
        self.items.as_ref().is_some_and(|items| items.read_only)
    }

    fn is_placeholder(&self, index: usize) -> bool {
        self.items.as_ref().map_or(false, |items| {
            items.placeholder || items.items.iter().any(|i| i.index == index && i.placeholder)
        })
    }
}
