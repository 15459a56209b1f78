//! The PDF library seam.
//!
//! [`PdfBackend`] is the synchronous contract over document bytes;
//! [`LopdfBackend`] implements it in-process. [`GuardedBackend`] is what the
//! service talks to: every call runs on the blocking pool under a timeout, and
//! a timed-out or crashed call becomes `BackendUnavailable` instead of a hang.

use std::{sync::Arc, time::Duration};

use tracing::warn;

use crate::{
    config::EditPolicy,
    error::{EditError, EditResult},
    pdf::{
        coords::Rotation,
        extract, images, loader,
        patch::{self, ApplyOutcome, EditTarget},
    },
    types::{DocumentMetadata, EditRecord, ExtractedImage, PageSummary, PageText},
};

pub trait PdfBackend: Send + Sync + 'static {
    fn inspect(&self, bytes: &[u8]) -> EditResult<Vec<PageSummary>>;

    fn metadata(&self, bytes: &[u8]) -> EditResult<DocumentMetadata>;

    fn extract_images(&self, bytes: &[u8], include_data: bool) -> EditResult<Vec<ExtractedImage>>;

    fn extract_page(&self, bytes: &[u8], page: u32) -> EditResult<PageText>;

    fn apply_edit(
        &self,
        bytes: &[u8],
        edit: &EditRecord,
        policy: &EditPolicy,
    ) -> EditResult<ApplyOutcome>;

    fn rotate_pages(&self, bytes: &[u8], rotations: &[(u32, Rotation)]) -> EditResult<Vec<u8>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfBackend;

impl PdfBackend for LopdfBackend {
    fn inspect(&self, bytes: &[u8]) -> EditResult<Vec<PageSummary>> {
        let document = loader::parse_document(bytes)?;
        document
            .get_pages()
            .into_iter()
            .map(|(page_number, page_id)| -> EditResult<PageSummary> {
                let page = loader::page_dictionary(&document, page_id)?;
                let (width, height) = loader::page_size(&document, page);
                Ok(PageSummary {
                    page_number,
                    width,
                    height,
                    rotation: Rotation::from_degrees(loader::page_rotation(&document, page))
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    fn metadata(&self, bytes: &[u8]) -> EditResult<DocumentMetadata> {
        let document = loader::parse_document(bytes)?;
        Ok(loader::document_metadata(&document))
    }

    fn extract_images(&self, bytes: &[u8], include_data: bool) -> EditResult<Vec<ExtractedImage>> {
        let document = loader::parse_document(bytes)?;
        images::extract_images(&document, include_data)
    }

    fn extract_page(&self, bytes: &[u8], page: u32) -> EditResult<PageText> {
        let document = loader::parse_document(bytes)?;
        let content = extract::extract_page(&document, page)?;
        let items = content.text_items();
        Ok(PageText {
            page_number: page,
            width: content.width,
            height: content.height,
            rotation: Rotation::from_degrees(content.rotation).unwrap_or_default(),
            raw_text: extract::raw_text(&items),
            items,
            placeholder: false,
            read_only: false,
        })
    }

    fn apply_edit(
        &self,
        bytes: &[u8],
        edit: &EditRecord,
        policy: &EditPolicy,
    ) -> EditResult<ApplyOutcome> {
        let target = EditTarget {
            page: edit.page_number,
            index: edit.target_item_key,
            expected_text: &edit.original_text,
            replacement: &edit.replacement_text,
        };
        patch::apply(bytes, &target, policy)
    }

    fn rotate_pages(&self, bytes: &[u8], rotations: &[(u32, Rotation)]) -> EditResult<Vec<u8>> {
        patch::rotate_pages(bytes, rotations)
    }
}

#[derive(Clone)]
pub struct GuardedBackend {
    inner: Arc<dyn PdfBackend>,
    timeout: Duration,
}

impl GuardedBackend {
    pub fn new(inner: Arc<dyn PdfBackend>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn call<T, F>(&self, operation: &'static str, job: F) -> EditResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn PdfBackend) -> EditResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task = tokio::task::spawn_blocking(move || job(inner.as_ref()));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(EditError::BackendUnavailable(format!(
                "{operation} failed: {join_error}"
            ))),
            Err(_) => Err(EditError::BackendUnavailable(format!(
                "{operation} timed out after {} ms",
                self.timeout.as_millis()
            ))),
        }
    }

    pub async fn inspect(&self, bytes: Arc<[u8]>) -> EditResult<Vec<PageSummary>> {
        self.call("inspect", move |backend| backend.inspect(&bytes))
            .await
    }

    pub async fn metadata(&self, bytes: Arc<[u8]>) -> EditResult<DocumentMetadata> {
        self.call("metadata", move |backend| backend.metadata(&bytes))
            .await
    }

    pub async fn extract_images(
        &self,
        bytes: Arc<[u8]>,
        include_data: bool,
    ) -> EditResult<Vec<ExtractedImage>> {
        self.call("images", move |backend| {
            backend.extract_images(&bytes, include_data)
        })
        .await
    }

    pub async fn extract_page(&self, bytes: Arc<[u8]>, page: u32) -> EditResult<PageText> {
        self.call("extract", move |backend| backend.extract_page(&bytes, page))
            .await
    }

    /// Extraction that degrades to a placeholder page when the backend is
    /// unavailable. Other failures still surface.
    pub async fn extract_or_placeholder(&self, bytes: Arc<[u8]>, page: u32) -> EditResult<PageText> {
        match self.extract_page(bytes, page).await {
            Err(EditError::BackendUnavailable(reason)) => {
                warn!(page, %reason, "backend unavailable, serving placeholder items");
                Ok(PageText::placeholder(page, &reason))
            }
            other => other,
        }
    }

    pub async fn apply_edit(
        &self,
        bytes: Arc<[u8]>,
        edit: EditRecord,
        policy: EditPolicy,
    ) -> EditResult<ApplyOutcome> {
        self.call("apply", move |backend| {
            backend.apply_edit(&bytes, &edit, &policy)
        })
        .await
    }

    pub async fn rotate_pages(
        &self,
        bytes: Arc<[u8]>,
        rotations: Vec<(u32, Rotation)>,
    ) -> EditResult<Vec<u8>> {
        self.call("rotate", move |backend| backend.rotate_pages(&bytes, &rotations))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StalledBackend;

    impl PdfBackend for StalledBackend {
        fn inspect(&self, _bytes: &[u8]) -> EditResult<Vec<PageSummary>> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Vec::new())
        }

        fn metadata(&self, _bytes: &[u8]) -> EditResult<DocumentMetadata> {
            Ok(DocumentMetadata::default())
        }

        fn extract_images(&self, _bytes: &[u8], _: bool) -> EditResult<Vec<ExtractedImage>> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Vec::new())
        }

        fn extract_page(&self, _bytes: &[u8], _page: u32) -> EditResult<PageText> {
            std::thread::sleep(Duration::from_millis(500));
            Err(EditError::Parse("unreachable".into()))
        }

        fn apply_edit(
            &self,
            _bytes: &[u8],
            _edit: &EditRecord,
            _policy: &EditPolicy,
        ) -> EditResult<ApplyOutcome> {
            panic!("worker crashed")
        }

        fn rotate_pages(&self, bytes: &[u8], _: &[(u32, Rotation)]) -> EditResult<Vec<u8>> {
            Ok(bytes.to_vec())
        }
    }

    fn guarded() -> GuardedBackend {
        GuardedBackend::new(Arc::new(StalledBackend), Duration::from_millis(20))
    }

    fn bytes() -> Arc<[u8]> {
        Arc::from(&b"%PDF"[..])
    }

    #[tokio::test]
    async fn timeouts_become_backend_unavailable() {
        let result = guarded().inspect(bytes()).await;
        assert!(matches!(result, Err(EditError::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn extraction_degrades_to_a_placeholder() {
        let page = guarded().extract_or_placeholder(bytes(), 2).await.unwrap();
        assert!(page.placeholder);
        assert_eq!(page.page_number, 2);
        assert!(page.items.iter().all(|item| item.placeholder));
    }

    #[tokio::test]
    async fn panicking_workers_become_backend_unavailable() {
        let edit = EditRecord {
            page_number: 1,
            target_item_key: 0,
            original_text: "a".into(),
            replacement_text: "b".into(),
            applied_at: None,
        };
        let result = guarded()
            .apply_edit(bytes(), edit, EditPolicy::default())
            .await;
        assert!(matches!(result, Err(EditError::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn slow_image_listing_becomes_backend_unavailable() {
        let result = guarded().extract_images(bytes(), false).await;
        assert!(matches!(result, Err(EditError::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn fast_calls_pass_through() {
        let rotated = guarded().rotate_pages(bytes(), vec![]).await.unwrap();
        assert_eq!(rotated, b"%PDF");
        let metadata = guarded().metadata(bytes()).await.unwrap();
        assert_eq!(metadata, DocumentMetadata::default());
    }
}
