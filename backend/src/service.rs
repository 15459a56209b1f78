//! The editor service: one open document, page extraction on demand, an edit
//! log and serialized edit application.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    adapter,
    backend::{GuardedBackend, LopdfBackend, PdfBackend},
    config::Config,
    error::{EditError, EditResult},
    pdf::{
        coords::{Rotation, Scale},
        images,
    },
    scheduler::PageTaskScheduler,
    session::DocumentSession,
    types::{
        AppliedEdit, ApplyReport, EditRecord, EditRequest, ExtractedImage, FailedEdit, ItemKey,
        OpenResponse, PageView,
    },
};

pub struct EditorService {
    config: Config,
    backend: GuardedBackend,
    scheduler: PageTaskScheduler,
    session: RwLock<Option<DocumentSession>>,
    apply_lock: Mutex<()>,
}

impl EditorService {
    pub fn new(config: Config) -> Self {
        Self::with_backend(config, Arc::new(LopdfBackend))
    }

    pub fn with_backend(config: Config, backend: Arc<dyn PdfBackend>) -> Self {
        let backend = GuardedBackend::new(backend, config.backend.timeout());
        Self {
            config,
            backend,
            scheduler: PageTaskScheduler::new(),
            session: RwLock::new(None),
            apply_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Parse `bytes` and make them the open document. A failed open leaves
    /// the previous session in place.
    pub async fn open_pdf(&self, file_name: String, bytes: Vec<u8>) -> EditResult<OpenResponse> {
        let shared: Arc<[u8]> = Arc::from(bytes.as_slice());
        let pages = self.backend.inspect(Arc::clone(&shared)).await?;
        let metadata = self.backend.metadata(shared).await?;
        let doc_id = Uuid::new_v4().to_string();

        self.scheduler.cancel_all();
        let response = OpenResponse {
            doc_id: doc_id.clone(),
            file_name: file_name.clone(),
            page_count: pages.len() as u32,
            pages: pages.clone(),
            metadata,
        };
        let mut slot = self.session.write().await;
        if let Some(previous) = slot.as_ref() {
            info!(doc_id = %previous.doc_id, "discarding previous document");
        }
        *slot = Some(DocumentSession::new(doc_id.clone(), file_name, bytes, pages));
        info!(doc_id = %doc_id, page_count = response.page_count, "document opened");
        Ok(response)
    }

    /// Build a one-image-per-page PDF and open it.
    pub async fn open_images(&self, file_name: String, images: Vec<Vec<u8>>) -> EditResult<OpenResponse> {
        let bytes = tokio::task::spawn_blocking(move || images::images_to_pdf(&images))
            .await
            .map_err(|err| EditError::BackendUnavailable(format!("image conversion failed: {err}")))??;
        self.open_pdf(file_name, bytes).await
    }

    pub async fn close(&self, doc_id: &str) -> EditResult<()> {
        let mut slot = self.session.write().await;
        current(&slot, doc_id)?;
        self.scheduler.cancel_all();
        *slot = None;
        info!(doc_id, "document closed");
        Ok(())
    }

    /// Items of `page` positioned at `scale`. `None` when the extraction was
    /// superseded by navigation to another page.
    pub async fn page_text(
        &self,
        doc_id: &str,
        page: u32,
        scale: Option<f64>,
    ) -> EditResult<Option<PageView>> {
        let scale = match scale {
            Some(value) => Scale::new(value, &self.config.view)?,
            None => Scale::UNIT,
        };

        let bytes = {
            let mut slot = self.session.write().await;
            let session = current_mut(&mut slot, doc_id)?;
            session.check_page(page)?;
            if let Some(previous) = session.activate_page(page) {
                if previous != page {
                    self.scheduler.cancel_others(page);
                }
            }
            if let Some(ingested) = session.ingested_page(page) {
                return Ok(Some(ingested.at_scale(scale, session.view_rotation(page))));
            }
            if let Some(cached) = session.cached_page(page) {
                return Ok(Some(cached.at_scale(scale, session.view_rotation(page))));
            }
            session.current_bytes()
        };

        let source = Arc::clone(&bytes);
        let backend = self.backend.clone();
        let extracted = self
            .scheduler
            .run(page, async move { backend.extract_or_placeholder(bytes, page).await })
            .await;
        let text = match extracted {
            Ok(text) => text,
            Err(err) if err.is_cancellation() => {
                debug!(doc_id, page, "page extraction superseded");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let mut slot = self.session.write().await;
        let session = current_mut(&mut slot, doc_id)?;
        let view = text.at_scale(scale, session.view_rotation(page));
        // An apply pass may have swapped the bytes while extracting.
        if Arc::ptr_eq(&source, &session.current_bytes()) {
            session.cache_page(text);
        }
        Ok(Some(view))
    }

    /// Show an externally produced extraction for a page. Its items are
    /// display-only; edits need the engine's own items back.
    pub async fn ingest_page_text(&self, doc_id: &str, page: u32, record: &Value) -> EditResult<PageView> {
        let text = adapter::page_from_json(page, record)?;
        let mut slot = self.session.write().await;
        let session = current_mut(&mut slot, doc_id)?;
        session.ingest_page(text)?;
        let view = session
            .ingested_page(page)
            .map(|text| text.at_scale(Scale::UNIT, session.view_rotation(page)))
            .ok_or_else(|| EditError::Internal(anyhow::anyhow!("ingested page {page} missing")))?;
        info!(doc_id, page, items = view.items.len(), "external extraction ingested");
        Ok(view)
    }

    /// Drop an ingested extraction. Returns whether there was one.
    pub async fn discard_ingested(&self, doc_id: &str, page: u32) -> EditResult<bool> {
        let mut slot = self.session.write().await;
        let session = current_mut(&mut slot, doc_id)?;
        session.check_page(page)?;
        Ok(session.discard_ingested(page))
    }

    pub async fn images(&self, doc_id: &str, include_data: bool) -> EditResult<Vec<ExtractedImage>> {
        let bytes = {
            let slot = self.session.read().await;
            current(&slot, doc_id)?.current_bytes()
        };
        self.backend.extract_images(bytes, include_data).await
    }

    pub async fn commit_edit(&self, doc_id: &str, request: EditRequest) -> EditResult<EditRecord> {
        let record = EditRecord {
            page_number: request.page_number,
            target_item_key: request.item_index,
            original_text: request.original_text,
            replacement_text: request.replacement_text,
            applied_at: None,
        };
        let mut slot = self.session.write().await;
        let session = current_mut(&mut slot, doc_id)?;
        if session.commit_edit(record.clone())?.is_some() {
            debug!(doc_id, key = %record.key(), "edit overwritten");
        }
        Ok(record)
    }

    pub async fn revert_edit(&self, doc_id: &str, page: u32, index: usize) -> EditResult<EditRecord> {
        let mut slot = self.session.write().await;
        current_mut(&mut slot, doc_id)?.revert_edit(ItemKey {
            page_number: page,
            index,
        })
    }

    pub async fn list_edits(&self, doc_id: &str) -> EditResult<Vec<EditRecord>> {
        let slot = self.session.read().await;
        Ok(current(&slot, doc_id)?.edits().all())
    }

    /// Apply every pending edit, one at a time, against the current bytes.
    /// A failed edit keeps its record and leaves the bytes as they were.
    pub async fn apply_pending(&self, doc_id: &str) -> EditResult<ApplyReport> {
        let _serialized = self.apply_lock.lock().await;

        let (mut bytes, pending) = {
            let slot = self.session.read().await;
            let session = current(&slot, doc_id)?;
            (session.current_bytes(), session.edits().pending())
        };

        let policy = self.config.edit;
        let mut applied = Vec::new();
        let mut applied_records = Vec::new();
        let mut failed = Vec::new();

        for record in pending {
            let mut outcome = self
                .backend
                .apply_edit(Arc::clone(&bytes), record.clone(), policy)
                .await;
            if let Err(EditError::ItemNotFound { page, index }) = outcome {
                warn!(page, index, "item not found, re-extracting once");
                let refreshed = self.backend.extract_page(Arc::clone(&bytes), page).await;
                if let Ok(text) = refreshed {
                    let mut slot = self.session.write().await;
                    if let Ok(session) = current_mut(&mut slot, doc_id) {
                        if Arc::ptr_eq(&bytes, &session.current_bytes()) {
                            session.cache_page(text);
                        }
                    }
                }
                outcome = self
                    .backend
                    .apply_edit(Arc::clone(&bytes), record.clone(), policy)
                    .await;
            }

            match outcome {
                Ok(result) => {
                    bytes = Arc::from(result.bytes);
                    applied.push(AppliedEdit {
                        page_number: record.page_number,
                        item_index: record.target_item_key,
                        strategy: result.strategy,
                        fallback_reason: result.fallback_reason,
                    });
                    applied_records.push(record);
                }
                Err(err) => {
                    warn!(
                        page = record.page_number,
                        item = record.target_item_key,
                        error = %err,
                        "edit not applied"
                    );
                    failed.push(FailedEdit {
                        page_number: record.page_number,
                        item_index: record.target_item_key,
                        error: err.kind().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        let mut slot = self.session.write().await;
        let session = current_mut(&mut slot, doc_id)?;
        if !applied_records.is_empty() {
            session.record_applied(bytes.to_vec(), &applied_records, Utc::now());
        }
        let has_unapplied_changes = session.has_unapplied_changes();
        info!(
            doc_id,
            applied = applied.len(),
            failed = failed.len(),
            has_unapplied_changes,
            "apply pass finished"
        );

        Ok(ApplyReport {
            updated_pdf: (!applied_records.is_empty()).then(|| {
                format!(
                    "data:application/pdf;base64,{}",
                    BASE64.encode(&*session.current_bytes())
                )
            }),
            applied,
            failed,
            has_unapplied_changes,
        })
    }

    /// Display rotation only; the document is not modified.
    pub async fn set_view_rotation(&self, doc_id: &str, page: u32, degrees: i64) -> EditResult<Rotation> {
        let rotation = Rotation::from_degrees(degrees)?;
        let mut slot = self.session.write().await;
        current_mut(&mut slot, doc_id)?.set_view_rotation(page, rotation)?;
        Ok(rotation)
    }

    /// Current bytes, optionally with view rotations written into `/Rotate`.
    pub async fn export(&self, doc_id: &str, bake_rotation: bool) -> EditResult<(String, Vec<u8>)> {
        let (file_name, bytes, rotations) = {
            let slot = self.session.read().await;
            let session = current(&slot, doc_id)?;
            (
                session.file_name.clone(),
                session.current_bytes(),
                session.view_rotations(),
            )
        };
        if !bake_rotation || rotations.is_empty() {
            return Ok((file_name, bytes.to_vec()));
        }
        let baked = self.backend.rotate_pages(bytes, rotations).await?;
        Ok((file_name, baked))
    }
}

fn current<'a>(slot: &'a Option<DocumentSession>, doc_id: &str) -> EditResult<&'a DocumentSession> {
    slot.as_ref()
        .filter(|session| session.doc_id == doc_id)
        .ok_or_else(|| EditError::DocumentNotFound(doc_id.to_string()))
}

fn current_mut<'a>(
    slot: &'a mut Option<DocumentSession>,
    doc_id: &str,
) -> EditResult<&'a mut DocumentSession> {
    slot.as_mut()
        .filter(|session| session.doc_id == doc_id)
        .ok_or_else(|| EditError::DocumentNotFound(doc_id.to_string()))
}
