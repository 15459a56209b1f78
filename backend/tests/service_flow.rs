mod common;

use std::{io::Cursor, sync::Arc, time::Duration};

use image::{ImageBuffer, ImageFormat, Rgb};
use retext_backend::{
    backend::{LopdfBackend, PdfBackend},
    config::{BackendConfig, Config, EditPolicy},
    error::{EditError, EditResult},
    pdf::{coords::Rotation, patch::ApplyOutcome},
    service::EditorService,
    types::{
        AppliedStrategy, DocumentMetadata, EditRecord, EditRequest, ExtractedImage, PageSummary,
        PageText,
    },
};

fn request(index: usize, original: &str, replacement: &str) -> EditRequest {
    EditRequest {
        page_number: 1,
        item_index: index,
        original_text: original.into(),
        replacement_text: replacement.into(),
    }
}

#[tokio::test]
async fn edit_apply_and_reextract() {
    let service = EditorService::new(Config::default());
    let bytes = common::lines_pdf(&["Invoice Date: 01-Jan-2024", "Total: $500"]);
    let opened = service.open_pdf("invoice.pdf".into(), bytes.clone()).await.unwrap();
    assert_eq!(opened.page_count, 1);
    let doc = opened.doc_id.as_str();

    let view = service.page_text(doc, 1, Some(1.5)).await.unwrap().unwrap();
    assert_eq!(view.items.len(), 2);
    assert_eq!(view.raw_text, "Invoice Date: 01-Jan-2024\nTotal: $500");
    assert!(!view.read_only);
    assert_eq!(
        view.items[0].display_position.x,
        view.items[0].item.position.x * 1.5
    );

    service
        .commit_edit(
            doc,
            request(0, "Invoice Date: 01-Jan-2024", "Invoice Date: 15-Feb-2024"),
        )
        .await
        .unwrap();
    assert_eq!(service.list_edits(doc).await.unwrap().len(), 1);

    let report = service.apply_pending(doc).await.unwrap();
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.applied[0].strategy, AppliedStrategy::Substituted);
    assert!(report.failed.is_empty());
    assert!(!report.has_unapplied_changes);
    assert!(report
        .updated_pdf
        .as_deref()
        .is_some_and(|url| url.starts_with("data:application/pdf;base64,")));

    let edits = service.list_edits(doc).await.unwrap();
    assert!(edits[0].applied_at.is_some());
    assert!(matches!(
        service.revert_edit(doc, 1, 0).await,
        Err(EditError::AlreadyApplied { page: 1, index: 0 })
    ));
    assert_eq!(service.list_edits(doc).await.unwrap().len(), 1);

    let view = service.page_text(doc, 1, None).await.unwrap().unwrap();
    assert_eq!(view.items[0].item.content, "Invoice Date: 15-Feb-2024");
    assert_eq!(view.items[1].item.content, "Total: $500");

    let (name, exported) = service.export(doc, false).await.unwrap();
    assert_eq!(name, "invoice.pdf");
    assert!(exported.starts_with(&bytes));
    assert!(exported.len() > bytes.len());
}

#[tokio::test]
async fn failed_edits_keep_their_record_and_the_bytes() {
    let service = EditorService::new(Config::default());
    let bytes = common::lines_pdf(&["Only line"]);
    let doc = service.open_pdf("one.pdf".into(), bytes.clone()).await.unwrap().doc_id;

    // Not validated at commit time because the page was never extracted.
    service.commit_edit(&doc, request(7, "ghost", "still ghost")).await.unwrap();
    let report = service.apply_pending(&doc).await.unwrap();

    assert!(report.applied.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].error, "itemNotFound");
    assert!(report.has_unapplied_changes);
    assert!(report.updated_pdf.is_none());
    assert_eq!(service.list_edits(&doc).await.unwrap().len(), 1);
    assert_eq!(service.export(&doc, false).await.unwrap().1, bytes);
}

#[tokio::test]
async fn commits_against_cached_pages_are_validated() {
    let service = EditorService::new(Config::default());
    let doc = service
        .open_pdf("a.pdf".into(), common::lines_pdf(&["A", "B"]))
        .await
        .unwrap()
        .doc_id;
    service.page_text(&doc, 1, None).await.unwrap();

    assert!(matches!(
        service.commit_edit(&doc, request(9, "?", "!")).await,
        Err(EditError::ItemNotFound { page: 1, index: 9 })
    ));
    assert!(matches!(
        service
            .commit_edit(
                &doc,
                EditRequest {
                    page_number: 3,
                    ..request(0, "A", "Z")
                }
            )
            .await,
        Err(EditError::PageOutOfRange { .. })
    ));

    service.commit_edit(&doc, request(1, "B", "C")).await.unwrap();
    service.commit_edit(&doc, request(1, "B", "D")).await.unwrap();
    let edits = service.list_edits(&doc).await.unwrap();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].replacement_text, "D");

    service.revert_edit(&doc, 1, 1).await.unwrap();
    assert!(service.list_edits(&doc).await.unwrap().is_empty());
    assert!(matches!(
        service.revert_edit(&doc, 1, 1).await,
        Err(EditError::ItemNotFound { .. })
    ));
}

#[tokio::test]
async fn a_corrupt_upload_keeps_the_open_document() {
    let service = EditorService::new(Config::default());
    let doc = service
        .open_pdf("good.pdf".into(), common::lines_pdf(&["Kept"]))
        .await
        .unwrap()
        .doc_id;

    let result = service.open_pdf("bad.pdf".into(), b"%PDF-garbage".to_vec()).await;
    assert!(matches!(result, Err(EditError::Parse(_))));

    let view = service.page_text(&doc, 1, None).await.unwrap().unwrap();
    assert_eq!(view.items[0].item.content, "Kept");
}

#[tokio::test]
async fn opening_replaces_and_closing_forgets() {
    let service = EditorService::new(Config::default());
    let first = service
        .open_pdf("first.pdf".into(), common::lines_pdf(&["First"]))
        .await
        .unwrap()
        .doc_id;
    let second = service
        .open_pdf("second.pdf".into(), common::lines_pdf(&["Second"]))
        .await
        .unwrap()
        .doc_id;
    assert_ne!(first, second);
    assert!(matches!(
        service.list_edits(&first).await,
        Err(EditError::DocumentNotFound(_))
    ));

    service.close(&second).await.unwrap();
    assert!(matches!(
        service.page_text(&second, 1, None).await,
        Err(EditError::DocumentNotFound(_))
    ));
}

#[tokio::test]
async fn scale_and_rotation_are_validated() {
    let service = EditorService::new(Config::default());
    let doc = service
        .open_pdf("a.pdf".into(), common::lines_pdf(&["A"]))
        .await
        .unwrap()
        .doc_id;

    assert!(matches!(
        service.page_text(&doc, 1, Some(0.0)).await,
        Err(EditError::InvalidScale { .. })
    ));
    assert!(matches!(
        service.set_view_rotation(&doc, 1, 45).await,
        Err(EditError::InvalidRotation(45))
    ));

    let rotation = service.set_view_rotation(&doc, 1, 270).await.unwrap();
    assert_eq!(rotation, Rotation::ThreeQuarters);
    let view = service.page_text(&doc, 1, None).await.unwrap().unwrap();
    assert_eq!(view.view_rotation, Rotation::ThreeQuarters);

    // Display rotation alone leaves the bytes alone.
    let (_, plain) = service.export(&doc, false).await.unwrap();
    let (_, baked) = service.export(&doc, true).await.unwrap();
    assert_eq!(LopdfBackend.inspect(&plain).unwrap()[0].rotation, Rotation::None);
    assert_eq!(
        LopdfBackend.inspect(&baked).unwrap()[0].rotation,
        Rotation::ThreeQuarters
    );
}

#[tokio::test]
async fn images_open_as_one_page_each() {
    let png = |width, height| {
        let buffer = ImageBuffer::from_pixel(width, height, Rgb([0u8, 0, 0]));
        let mut out = Cursor::new(Vec::new());
        buffer.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    };
    let service = EditorService::new(Config::default());
    let opened = service
        .open_images("scan.pdf".into(), vec![png(10, 20), png(30, 40)])
        .await
        .unwrap();
    assert_eq!(opened.page_count, 2);
    assert_eq!((opened.pages[1].width, opened.pages[1].height), (30.0, 40.0));

    let view = service.page_text(&opened.doc_id, 1, None).await.unwrap().unwrap();
    assert!(view.items.is_empty());
}

#[tokio::test]
async fn external_extractions_are_display_only() {
    let service = EditorService::new(Config::default());
    let doc = service
        .open_pdf("a.pdf".into(), common::lines_pdf(&["A"]))
        .await
        .unwrap()
        .doc_id;

    let record = serde_json::json!({
        "document": { "pageCount": 1 },
        "pages": [{
            "pageNumber": 1,
            "dimensions": { "width": 612.0, "height": 792.0 },
            "textBlocks": [{ "lines": [{ "spans": [
                { "text": "Hello", "bbox": [72.0, 80.0, 120.0, 92.0], "size": 12.0, "font": "Helvetica" }
            ]}]}],
            "rawText": "Hello"
        }]
    });
    let view = service.ingest_page_text(&doc, 1, &record).await.unwrap();
    assert_eq!(view.items[0].item.content, "Hello");
    assert!(view.read_only);

    let shown = service.page_text(&doc, 1, None).await.unwrap().unwrap();
    assert_eq!(shown.items[0].item.content, "Hello");
    assert!(matches!(
        service.commit_edit(&doc, request(0, "Hello", "Bye")).await,
        Err(EditError::ReadOnlyPage(1))
    ));

    assert!(service.discard_ingested(&doc, 1).await.unwrap());
    let engine = service.page_text(&doc, 1, None).await.unwrap().unwrap();
    assert_eq!(engine.items[0].item.content, "A");
    assert!(!engine.read_only);
    service.commit_edit(&doc, request(0, "A", "B")).await.unwrap();
}

#[tokio::test]
async fn open_reports_metadata_and_images_are_listed() {
    let service = EditorService::new(Config::default());
    let bytes = common::titled(&common::lines_pdf(&["A"]), "Quarterly invoice");
    let opened = service.open_pdf("a.pdf".into(), bytes).await.unwrap();
    assert_eq!(
        opened.metadata,
        DocumentMetadata {
            title: Some("Quarterly invoice".into()),
            producer: Some("fixtures".into()),
            ..DocumentMetadata::default()
        }
    );
    assert!(service.images(&opened.doc_id, true).await.unwrap().is_empty());

    let png = {
        let buffer = ImageBuffer::from_pixel(6, 2, Rgb([9u8, 9, 9]));
        let mut out = Cursor::new(Vec::new());
        buffer.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    };
    let scan = service.open_images("scan.pdf".into(), vec![png]).await.unwrap();
    let images = service.images(&scan.doc_id, false).await.unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!((images[0].width, images[0].height), (6, 2));
    assert_eq!(images[0].position.width, 6.0);
    assert!(images[0].data.is_none());
}

/// Delegates to lopdf but takes too long to extract.
struct SlowExtraction;

impl PdfBackend for SlowExtraction {
    fn inspect(&self, bytes: &[u8]) -> EditResult<Vec<PageSummary>> {
        LopdfBackend.inspect(bytes)
    }

    fn metadata(&self, bytes: &[u8]) -> EditResult<DocumentMetadata> {
        LopdfBackend.metadata(bytes)
    }

    fn extract_images(&self, bytes: &[u8], include_data: bool) -> EditResult<Vec<ExtractedImage>> {
        LopdfBackend.extract_images(bytes, include_data)
    }

    fn extract_page(&self, bytes: &[u8], page: u32) -> EditResult<PageText> {
        std::thread::sleep(Duration::from_millis(300));
        LopdfBackend.extract_page(bytes, page)
    }

    fn apply_edit(
        &self,
        bytes: &[u8],
        edit: &EditRecord,
        policy: &EditPolicy,
    ) -> EditResult<ApplyOutcome> {
        LopdfBackend.apply_edit(bytes, edit, policy)
    }

    fn rotate_pages(&self, bytes: &[u8], rotations: &[(u32, Rotation)]) -> EditResult<Vec<u8>> {
        LopdfBackend.rotate_pages(bytes, rotations)
    }
}

#[tokio::test]
async fn a_stalled_backend_serves_placeholders() {
    let config = Config {
        backend: BackendConfig {
            timeout_ms: 50,
            ..BackendConfig::default()
        },
        ..Config::default()
    };
    let service = EditorService::with_backend(config, Arc::new(SlowExtraction));
    let doc = service
        .open_pdf("slow.pdf".into(), common::lines_pdf(&["Late"]))
        .await
        .unwrap()
        .doc_id;

    let view = service.page_text(&doc, 1, None).await.unwrap().unwrap();
    assert!(view.placeholder);
    assert!(view.items.iter().all(|item| item.item.placeholder));

    // Placeholders are never cached, so edits stay unvalidated.
    service.commit_edit(&doc, request(0, "Late", "Early")).await.unwrap();
}
