mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use retext_backend::{build_router, AppState};
use serde_json::{json, Value};
use tower::util::ServiceExt;

const BOUNDARY: &str = "X-BOUNDARY";

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, request).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn upload(field: &str, data: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/open")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(common::multipart_body(
            BOUNDARY,
            field,
            "upload.pdf",
            "application/pdf",
            data,
        )))
        .unwrap()
}

#[tokio::test]
async fn open_edit_apply_and_download() {
    let app = build_router(AppState::default());

    let (status, health) = send_json(&app, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");

    let pdf = common::lines_pdf(&["Status", "N/A", "Notes", "N/A"]);
    let (status, opened) = send_json(&app, upload("file", &pdf)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(opened["pageCount"], 1);
    assert_eq!(opened["fileName"], "upload.pdf");
    let doc_id = opened["docId"].as_str().expect("docId missing").to_string();

    let (status, page) =
        send_json(&app, get(&format!("/api/doc/{doc_id}/pages/1/text?scale=2"))).await;
    assert_eq!(status, StatusCode::OK);
    let items = page["items"].as_array().unwrap();
    assert_eq!(items.len(), 4);
    assert_eq!(items[3]["id"], "p1:t3");
    assert_eq!(items[3]["content"], "N/A");
    assert_eq!(items[0]["displayPosition"]["x"], 144.0);
    assert_eq!(items[0]["position"]["x"], 72.0);

    let (status, record) = send_json(
        &app,
        post_json(
            &format!("/api/doc/{doc_id}/edits"),
            json!({ "page": 1, "item": 3, "oldText": "N/A", "newText": "Paid" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["targetItemKey"], 3);
    assert_eq!(record["appliedAt"], Value::Null);

    let (status, report) =
        send_json(&app, post_json(&format!("/api/doc/{doc_id}/apply"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["applied"][0]["strategy"], "substituted");
    assert_eq!(report["hasUnappliedChanges"], false);
    assert!(report["updatedPdf"]
        .as_str()
        .unwrap()
        .starts_with("data:application/pdf;base64,"));

    let (status, page) = send_json(&app, get(&format!("/api/doc/{doc_id}/pages/1/text"))).await;
    assert_eq!(status, StatusCode::OK);
    let contents: Vec<_> = page["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["content"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(contents, ["Status", "N/A", "Notes", "Paid"]);

    let response = app
        .clone()
        .oneshot(get(&format!("/api/doc/{doc_id}/pdf")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/pdf"
    );
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.starts_with(b"%PDF"));
    assert!(body.starts_with(&pdf));

    let close = Request::builder()
        .method("DELETE")
        .uri(format!("/api/doc/{doc_id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, close).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, error) = send_json(&app, get(&format!("/api/doc/{doc_id}/edits"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["error"], "documentNotFound");
}

#[tokio::test]
async fn client_errors_carry_a_kind() {
    let app = build_router(AppState::default());
    let pdf = common::lines_pdf(&["Only"]);
    let (_, opened) = send_json(&app, upload("file", &pdf)).await;
    let doc_id = opened["docId"].as_str().unwrap().to_string();

    let (status, error) =
        send_json(&app, get(&format!("/api/doc/{doc_id}/pages/1/text?scale=40"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "invalidScale");

    let (status, error) = send_json(&app, get(&format!("/api/doc/{doc_id}/pages/9/text"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["error"], "pageOutOfRange");

    let (status, error) = send_json(
        &app,
        post_json(
            &format!("/api/doc/{doc_id}/pages/1/rotate"),
            json!({ "degrees": 30 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "invalidRotation");

    let (status, rotated) = send_json(
        &app,
        post_json(
            &format!("/api/doc/{doc_id}/pages/1/rotate"),
            json!({ "degrees": 90 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rotated["viewRotation"], 90);

    let (status, error) = send_json(&app, upload("file", b"definitely not a pdf")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "parseError");

    let (status, error) = send_json(&app, upload("other", &pdf)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "badRequest");

    let revert = Request::builder()
        .method("DELETE")
        .uri(format!("/api/doc/{doc_id}/edits/1/0"))
        .body(Body::empty())
        .unwrap();
    let (status, error) = send_json(&app, revert).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["error"], "itemNotFound");
}

#[tokio::test]
async fn applied_edits_stay_and_images_are_listed() {
    let app = build_router(AppState::default());
    let pdf = common::lines_pdf(&["Alpha", "Beta"]);
    let (_, opened) = send_json(&app, upload("file", &pdf)).await;
    let doc_id = opened["docId"].as_str().unwrap().to_string();
    assert!(opened["metadata"].is_object());

    let (status, _) = send_json(
        &app,
        post_json(
            &format!("/api/doc/{doc_id}/edits"),
            json!({ "page": 1, "item": 1, "oldText": "Beta", "newText": "Gamma" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) =
        send_json(&app, post_json(&format!("/api/doc/{doc_id}/apply"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let revert = Request::builder()
        .method("DELETE")
        .uri(format!("/api/doc/{doc_id}/edits/1/1"))
        .body(Body::empty())
        .unwrap();
    let (status, error) = send_json(&app, revert).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"], "alreadyApplied");

    let (status, page) = send_json(&app, get(&format!("/api/doc/{doc_id}/pages/1/text"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["rawText"], "Alpha\nGamma");

    let (status, images) =
        send_json(&app, get(&format!("/api/doc/{doc_id}/images?includeData=true"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(images, json!([]));

    let discard = Request::builder()
        .method("DELETE")
        .uri(format!("/api/doc/{doc_id}/pages/1/text"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, discard).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
