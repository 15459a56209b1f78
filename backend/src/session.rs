//! The open document: immutable source bytes, the current bytes, lazily
//! extracted pages and the edit log.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{
    error::{EditError, EditResult},
    pdf::coords::Rotation,
    types::{EditRecord, ItemKey, PageSummary, PageText},
};

/// At most one record per item; a later commit overwrites.
#[derive(Debug, Default, Clone)]
pub struct EditLog {
    records: BTreeMap<ItemKey, EditRecord>,
}

impl EditLog {
    /// Insert or overwrite. Returns the record that was replaced.
    pub fn upsert(&mut self, record: EditRecord) -> Option<EditRecord> {
        self.records.insert(record.key(), record)
    }

    pub fn revert(&mut self, key: ItemKey) -> Option<EditRecord> {
        self.records.remove(&key)
    }

    pub fn get(&self, key: ItemKey) -> Option<&EditRecord> {
        self.records.get(&key)
    }

    /// Unapplied records in (page, item) order.
    pub fn pending(&self) -> Vec<EditRecord> {
        self.records
            .values()
            .filter(|record| !record.is_applied())
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<EditRecord> {
        self.records.values().cloned().collect()
    }

    /// Stamp a record as applied, unless it was overwritten meanwhile.
    pub fn mark_applied(&mut self, applied: &EditRecord, at: DateTime<Utc>) {
        if let Some(record) = self.records.get_mut(&applied.key()) {
            if record.replacement_text == applied.replacement_text {
                record.applied_at = Some(at);
            }
        }
    }

    pub fn has_unapplied(&self) -> bool {
        self.records.values().any(|record| !record.is_applied())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug)]
pub struct DocumentSession {
    pub doc_id: String,
    pub file_name: String,
    original: Arc<[u8]>,
    current: Arc<[u8]>,
    pages: Vec<PageSummary>,
    page_cache: BTreeMap<u32, PageText>,
    /// External extractions shown instead of the engine's items.
    ingested: BTreeMap<u32, PageText>,
    edits: EditLog,
    view_rotations: BTreeMap<u32, Rotation>,
    active_page: Option<u32>,
}

impl DocumentSession {
    pub fn new(doc_id: String, file_name: String, bytes: Vec<u8>, pages: Vec<PageSummary>) -> Self {
        let original: Arc<[u8]> = Arc::from(bytes);
        Self {
            doc_id,
            file_name,
            current: Arc::clone(&original),
            original,
            pages,
            page_cache: BTreeMap::new(),
            ingested: BTreeMap::new(),
            edits: EditLog::default(),
            view_rotations: BTreeMap::new(),
            active_page: None,
        }
    }

    pub fn original_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.original)
    }

    pub fn current_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.current)
    }

    pub fn pages(&self) -> &[PageSummary] {
        &self.pages
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn check_page(&self, page: u32) -> EditResult<()> {
        if page == 0 || page > self.page_count() {
            return Err(EditError::PageOutOfRange {
                page,
                page_count: self.page_count(),
            });
        }
        Ok(())
    }

    pub fn cached_page(&self, page: u32) -> Option<&PageText> {
        self.page_cache.get(&page)
    }

    /// Placeholders are never cached, so the next visit retries.
    pub fn cache_page(&mut self, text: PageText) {
        if !text.placeholder {
            self.page_cache.insert(text.page_number, text);
        }
    }

    /// Show an external extraction for `page`. Its items are display-only.
    pub fn ingest_page(&mut self, mut text: PageText) -> EditResult<()> {
        self.check_page(text.page_number)?;
        text.read_only = true;
        self.ingested.insert(text.page_number, text);
        Ok(())
    }

    pub fn ingested_page(&self, page: u32) -> Option<&PageText> {
        self.ingested.get(&page)
    }

    /// Go back to the engine's items for `page`.
    pub fn discard_ingested(&mut self, page: u32) -> bool {
        self.ingested.remove(&page).is_some()
    }

    pub fn edits(&self) -> &EditLog {
        &self.edits
    }

    pub fn commit_edit(&mut self, record: EditRecord) -> EditResult<Option<EditRecord>> {
        self.check_page(record.page_number)?;
        if self.ingested.contains_key(&record.page_number) {
            return Err(EditError::ReadOnlyPage(record.page_number));
        }
        if let Some(page) = self.page_cache.get(&record.page_number) {
            if page.item(record.target_item_key).is_none() {
                return Err(EditError::ItemNotFound {
                    page: record.page_number,
                    index: record.target_item_key,
                });
            }
        }
        Ok(self.edits.upsert(record))
    }

    /// Drop a pending record. Applied records are part of the current bytes
    /// and stay.
    pub fn revert_edit(&mut self, key: ItemKey) -> EditResult<EditRecord> {
        match self.edits.get(key) {
            None => Err(EditError::ItemNotFound {
                page: key.page_number,
                index: key.index,
            }),
            Some(record) if record.is_applied() => Err(EditError::AlreadyApplied {
                page: key.page_number,
                index: key.index,
            }),
            Some(_) => self.edits.revert(key).ok_or(EditError::ItemNotFound {
                page: key.page_number,
                index: key.index,
            }),
        }
    }

    pub fn has_unapplied_changes(&self) -> bool {
        self.edits.has_unapplied()
    }

    /// Swap in the bytes produced by an apply pass and stamp what it applied.
    /// Extracted text for the touched pages is dropped.
    pub fn record_applied(&mut self, bytes: Vec<u8>, applied: &[EditRecord], at: DateTime<Utc>) {
        self.current = Arc::from(bytes);
        for record in applied {
            self.edits.mark_applied(record, at);
            self.page_cache.remove(&record.page_number);
        }
    }

    pub fn set_view_rotation(&mut self, page: u32, rotation: Rotation) -> EditResult<()> {
        self.check_page(page)?;
        if rotation == Rotation::None {
            self.view_rotations.remove(&page);
        } else {
            self.view_rotations.insert(page, rotation);
        }
        Ok(())
    }

    pub fn view_rotation(&self, page: u32) -> Rotation {
        self.view_rotations.get(&page).copied().unwrap_or_default()
    }

    pub fn view_rotations(&self) -> Vec<(u32, Rotation)> {
        self.view_rotations
            .iter()
            .map(|(page, rotation)| (*page, *rotation))
            .collect()
    }

    /// Make `page` the active page, returning the previous one.
    pub fn activate_page(&mut self, page: u32) -> Option<u32> {
        self.active_page.replace(page)
    }

    pub fn active_page(&self) -> Option<u32> {
        self.active_page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(page: u32, index: usize, text: &str) -> EditRecord {
        EditRecord {
            page_number: page,
            target_item_key: index,
            original_text: "old".into(),
            replacement_text: text.into(),
            applied_at: None,
        }
    }

    fn session() -> DocumentSession {
        let pages = (1..=2)
            .map(|page_number| PageSummary {
                page_number,
                width: 612.0,
                height: 792.0,
                rotation: Rotation::None,
            })
            .collect();
        DocumentSession::new("d".into(), "a.pdf".into(), b"%PDF".to_vec(), pages)
    }

    #[test]
    fn second_commit_to_an_item_overwrites() {
        let mut session = session();
        session.commit_edit(record(1, 0, "first")).unwrap();
        let replaced = session.commit_edit(record(1, 0, "second")).unwrap();
        assert_eq!(replaced.unwrap().replacement_text, "first");
        assert_eq!(session.edits().len(), 1);
        assert_eq!(session.edits().all()[0].replacement_text, "second");
    }

    #[test]
    fn applied_records_stay_in_the_log() {
        let mut session = session();
        let edit = record(2, 1, "new");
        session.commit_edit(edit.clone()).unwrap();
        assert!(session.has_unapplied_changes());

        session.record_applied(b"%PDF-2".to_vec(), &[edit], Utc::now());
        assert!(!session.has_unapplied_changes());
        assert_eq!(session.edits().len(), 1);
        assert_eq!(&*session.original_bytes(), b"%PDF");
        assert_eq!(&*session.current_bytes(), b"%PDF-2");
    }

    #[test]
    fn a_newer_commit_is_not_stamped_by_an_older_apply() {
        let mut log = EditLog::default();
        let old = record(1, 0, "a");
        log.upsert(old.clone());
        log.upsert(record(1, 0, "b"));
        log.mark_applied(&old, Utc::now());
        assert!(log.has_unapplied());
    }

    #[test]
    fn pages_are_range_checked() {
        let mut session = session();
        assert!(matches!(
            session.commit_edit(record(3, 0, "x")),
            Err(EditError::PageOutOfRange { page: 3, page_count: 2 })
        ));
        assert!(session.set_view_rotation(0, Rotation::Half).is_err());
        assert!(session
            .revert_edit(ItemKey {
                page_number: 1,
                index: 0
            })
            .is_err());
    }

    #[test]
    fn applied_records_cannot_be_reverted() {
        let mut session = session();
        let edit = record(1, 2, "new");
        session.commit_edit(edit.clone()).unwrap();
        session.record_applied(b"%PDF-2".to_vec(), &[edit.clone()], Utc::now());

        assert!(matches!(
            session.revert_edit(edit.key()),
            Err(EditError::AlreadyApplied { page: 1, index: 2 })
        ));
        assert_eq!(session.edits().len(), 1);

        // A newer pending commit on the same item can still be dropped.
        session.commit_edit(record(1, 2, "newer")).unwrap();
        assert_eq!(session.revert_edit(edit.key()).unwrap().replacement_text, "newer");
        assert!(session.edits().is_empty());
    }

    #[test]
    fn ingested_pages_are_read_only() {
        let mut session = session();
        let mut page = PageText::placeholder(1, "external");
        page.placeholder = false;
        page.read_only = false;
        session.ingest_page(page).unwrap();

        assert!(session.ingested_page(1).is_some_and(|page| page.read_only));
        assert!(matches!(
            session.commit_edit(record(1, 0, "x")),
            Err(EditError::ReadOnlyPage(1))
        ));
        session.commit_edit(record(2, 0, "x")).unwrap();

        assert!(session.discard_ingested(1));
        assert!(!session.discard_ingested(1));
        session.commit_edit(record(1, 0, "x")).unwrap();
    }
}
