pub mod adapter;
pub mod backend;
pub mod config;
pub mod error;
pub mod overlay;
pub mod pdf;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod types;
pub mod util;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::prelude::*;

use crate::{
    config::Config,
    error::EditError,
    service::EditorService,
    types::{ApplyReport, EditRecord, EditRequest, ExtractedImage, OpenResponse, PageView},
};

#[derive(Clone)]
pub struct AppState {
    service: Arc<EditorService>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self::with_service(EditorService::new(config))
    }

    pub fn with_service(service: EditorService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }

    pub fn service(&self) -> &EditorService {
        &self.service
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.service.config().backend.max_upload_bytes;
    Router::new()
        .route("/api/health", get(health))
        .route("/api/open", post(open_document))
        .route("/api/doc/:doc_id", delete(close_document))
        .route(
            "/api/doc/:doc_id/pages/:page/text",
            get(page_text)
                .put(ingest_page_text)
                .delete(discard_ingested),
        )
        .route("/api/doc/:doc_id/pages/:page/rotate", post(rotate_page))
        .route("/api/doc/:doc_id/edits", get(list_edits).post(commit_edit))
        .route("/api/doc/:doc_id/edits/:page/:item", delete(revert_edit))
        .route("/api/doc/:doc_id/apply", post(apply_edits))
        .route("/api/doc/:doc_id/pdf", get(download_pdf))
        .route("/api/doc/:doc_id/images", get(list_images))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}

pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info,tower_http=debug,lopdf=warn".into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Multipart upload: a `file` field holding a PDF, or one or more
/// `images`/`image` fields that become one page each.
async fn open_document(
    Extension(state): Extension<AppState>,
    mut multipart: Multipart,
) -> Result<Json<OpenResponse>, ApiError> {
    let mut pdf: Option<(String, Vec<u8>)> = None;
    let mut images = Vec::new();
    let mut image_name = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let bytes = field.bytes().await?.to_vec();
                pdf = Some((file_name.unwrap_or_else(|| "document.pdf".into()), bytes));
            }
            Some("images") | Some("image") => {
                images.push(field.bytes().await?.to_vec());
                image_name = image_name.or(file_name);
            }
            _ => {}
        }
    }

    let response = match pdf {
        Some((file_name, bytes)) => state.service.open_pdf(file_name, bytes).await?,
        None if !images.is_empty() => {
            let file_name = image_name
                .map(|name| format!("{name}.pdf"))
                .unwrap_or_else(|| "images.pdf".into());
            state.service.open_images(file_name, images).await?
        }
        None => return Err(ApiError::BadRequest("expected a file or images field".into())),
    };
    Ok(Json(response))
}

async fn close_document(
    Path(doc_id): Path<String>,
    Extension(state): Extension<AppState>,
) -> Result<StatusCode, ApiError> {
    state.service.close(&doc_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct TextQuery {
    scale: Option<f64>,
}

async fn page_text(
    Path((doc_id, page)): Path<(String, u32)>,
    Query(query): Query<TextQuery>,
    Extension(state): Extension<AppState>,
) -> Result<Response, ApiError> {
    match state.service.page_text(&doc_id, page, query.scale).await? {
        Some(view) => Ok(Json(view).into_response()),
        // Superseded by a request for another page.
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn ingest_page_text(
    Path((doc_id, page)): Path<(String, u32)>,
    Extension(state): Extension<AppState>,
    Json(record): Json<Value>,
) -> Result<Json<PageView>, ApiError> {
    Ok(Json(
        state.service.ingest_page_text(&doc_id, page, &record).await?,
    ))
}

/// Back to the engine's own, editable items.
async fn discard_ingested(
    Path((doc_id, page)): Path<(String, u32)>,
    Extension(state): Extension<AppState>,
) -> Result<StatusCode, ApiError> {
    if state.service.discard_ingested(&doc_id, page).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

#[derive(Debug, Deserialize)]
struct RotateRequest {
    degrees: i64,
}

async fn rotate_page(
    Path((doc_id, page)): Path<(String, u32)>,
    Extension(state): Extension<AppState>,
    Json(request): Json<RotateRequest>,
) -> Result<Json<Value>, ApiError> {
    let rotation = state
        .service
        .set_view_rotation(&doc_id, page, request.degrees)
        .await?;
    Ok(Json(json!({ "pageNumber": page, "viewRotation": rotation })))
}

async fn list_edits(
    Path(doc_id): Path<String>,
    Extension(state): Extension<AppState>,
) -> Result<Json<Vec<EditRecord>>, ApiError> {
    Ok(Json(state.service.list_edits(&doc_id).await?))
}

async fn commit_edit(
    Path(doc_id): Path<String>,
    Extension(state): Extension<AppState>,
    Json(request): Json<EditRequest>,
) -> Result<Json<EditRecord>, ApiError> {
    tracing::info!(doc_id, page = request.page_number, item = request.item_index, "edit committed");
    Ok(Json(state.service.commit_edit(&doc_id, request).await?))
}

async fn revert_edit(
    Path((doc_id, page, item)): Path<(String, u32, usize)>,
    Extension(state): Extension<AppState>,
) -> Result<Json<EditRecord>, ApiError> {
    Ok(Json(state.service.revert_edit(&doc_id, page, item).await?))
}

async fn apply_edits(
    Path(doc_id): Path<String>,
    Extension(state): Extension<AppState>,
) -> Result<Json<ApplyReport>, ApiError> {
    Ok(Json(state.service.apply_pending(&doc_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadQuery {
    #[serde(default)]
    bake_rotation: bool,
}

async fn download_pdf(
    Path(doc_id): Path<String>,
    Query(query): Query<DownloadQuery>,
    Extension(state): Extension<AppState>,
) -> Result<Response, ApiError> {
    let (file_name, bytes) = state.service.export(&doc_id, query.bake_rotation).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        file_name.replace(['"', '\\'], "_")
    );
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImagesQuery {
    #[serde(default)]
    include_data: bool,
}

async fn list_images(
    Path(doc_id): Path<String>,
    Query(query): Query<ImagesQuery>,
    Extension(state): Extension<AppState>,
) -> Result<Json<Vec<ExtractedImage>>, ApiError> {
    Ok(Json(state.service.images(&doc_id, query.include_data).await?))
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Multipart(#[from] axum::extract::multipart::MultipartError),
    #[error(transparent)]
    Edit(#[from] EditError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Multipart(_) => StatusCode::BAD_REQUEST,
            ApiError::Edit(err) => match err {
                EditError::Parse(_)
                | EditError::InvalidScale { .. }
                | EditError::InvalidRotation(_) => StatusCode::BAD_REQUEST,
                EditError::DocumentNotFound(_)
                | EditError::PageOutOfRange { .. }
                | EditError::ItemNotFound { .. } => StatusCode::NOT_FOUND,
                EditError::AmbiguousMatch { .. }
                | EditError::AlreadyApplied { .. }
                | EditError::ReadOnlyPage(_) => StatusCode::CONFLICT,
                EditError::Encoding(_) | EditError::SubstitutionInfeasible(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                EditError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                EditError::RenderCancelled(_) | EditError::Write(_) | EditError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "badRequest",
            ApiError::Multipart(_) => "multipart",
            ApiError::Edit(err) => err.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let body = Json(json!({ "error": self.kind(), "message": self.to_string() }));
        (status, body).into_response()
    }
}
