//! Incremental PDF writer.
//!
//! Updates are appended after the original bytes: new content streams, and a
//! cloned page dictionary pointing at them. Objects shared with other pages
//! are never rewritten in place.

use anyhow::{anyhow, Context, Result};
use lopdf::{Dictionary, Document, IncrementalDocument, Object, ObjectId, Stream};

/// One entry of a page's new `/Contents` array.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Existing(ObjectId),
    New(Vec<u8>),
}

#[derive(Debug, Clone, Default)]
pub struct PageUpdate {
    pub page_id: Option<ObjectId>,
    pub contents: Option<Vec<ContentPart>>,
    /// Replaces the page's resources with an inline dictionary.
    pub resources: Option<Dictionary>,
    pub rotation: Option<i64>,
}

impl PageUpdate {
    pub fn for_page(page_id: ObjectId) -> Self {
        Self {
            page_id: Some(page_id),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_none() && self.resources.is_none() && self.rotation.is_none()
    }
}

/// Append `updates` to `original_bytes`. An empty update list returns the
/// original bytes unchanged.
pub fn incremental_update(
    original_bytes: &[u8],
    previous: &Document,
    updates: &[PageUpdate],
) -> Result<Vec<u8>> {
    if updates.iter().all(PageUpdate::is_empty) {
        return Ok(original_bytes.to_vec());
    }

    let mut incremental =
        IncrementalDocument::create_from(original_bytes.to_vec(), previous.clone());
    incremental.new_document.version = previous.version.clone();

    for update in updates.iter().filter(|update| !update.is_empty()) {
        let page_id = update
            .page_id
            .ok_or_else(|| anyhow!("page update without a page id"))?;

        let contents = update.contents.as_ref().map(|parts| {
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Existing(id) => Object::Reference(*id),
                    ContentPart::New(data) => {
                        let stream = Stream::new(Dictionary::new(), data.clone());
                        Object::Reference(incremental.new_document.add_object(stream))
                    }
                })
                .collect::<Vec<Object>>()
        });

        incremental
            .opt_clone_object_to_new_document(page_id)
            .with_context(|| format!("cannot clone page {page_id:?}"))?;
        let page = incremental
            .new_document
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|_| anyhow!("page dictionary {page_id:?} unavailable"))?;

        if let Some(contents) = contents {
            page.set("Contents", Object::Array(contents));
        }
        if let Some(resources) = &update.resources {
            page.set("Resources", Object::Dictionary(resources.clone()));
        }
        if let Some(rotation) = update.rotation {
            page.set("Rotate", Object::Integer(rotation));
        }
    }

    let mut buffer = Vec::new();
    incremental
        .save_to(&mut buffer)
        .context("failed to serialize incremental update")?;
    Ok(buffer)
}
