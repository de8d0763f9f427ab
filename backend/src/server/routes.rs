//! REST API routes

use crate::catalog::{CatalogItem, CatalogState, ItemId};
use crate::download::{DownloadRequest, DownloadState, DownloadStats, RequestOutcome};
use crate::notification::NotificationRecord;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Create API routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Catalog
        .route("/catalog", get(get_catalog))
        .route("/catalog/refresh", post(refresh_catalog))
        // Downloads
        .route("/downloads", get(list_downloads))
        .route("/downloads/stats", get(download_stats))
        .route("/downloads/{id}", post(start_download))
        .route("/downloads/{id}/cancel", post(cancel_download))
        // Notifications
        .route("/notifications", get(list_notifications))
}

// ============ Catalog Endpoints ============

/// Current catalog sample
async fn get_catalog(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CatalogItem>>, AppError> {
    match state.catalog.state() {
        CatalogState::Ready { items } => Ok(Json(items)),
        CatalogState::Loading => Err(AppError::Unavailable("Catalog is loading".into())),
        CatalogState::Failed { error } => Err(AppError::Unavailable(error)),
    }
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub count: usize,
}

/// Fetch a fresh sample from the catalog
async fn refresh_catalog(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RefreshResponse>, AppError> {
    let count = state
        .catalog
        .refresh()
        .await
        .map_err(|e| AppError::Unavailable(e.to_string()))?;
    Ok(Json(RefreshResponse { count }))
}

// ============ Download Endpoints ============

/// A catalog row together with its download state
#[derive(Debug, Serialize)]
pub struct DownloadEntry {
    #[serde(flatten)]
    pub item: CatalogItem,
    pub download: DownloadState,
}

/// List catalog items with their download state
async fn list_downloads(State(state): State<Arc<AppState>>) -> Json<Vec<DownloadEntry>> {
    let entries = state
        .catalog
        .items()
        .into_iter()
        .map(|item| DownloadEntry {
            download: state.downloads.state(&item.id),
            item,
        })
        .collect();
    Json(entries)
}

#[derive(Debug, Serialize)]
pub struct StartDownloadResponse {
    pub id: ItemId,
    pub started: bool,
}

/// Request a download for one catalog item
async fn start_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<StartDownloadResponse>), AppError> {
    let id = ItemId::new(id);
    let item = state
        .catalog
        .find(&id)
        .ok_or_else(|| AppError::NotFound(format!("No catalog item {}", id)))?;

    match state.downloads.request_download(DownloadRequest::from(&item)) {
        RequestOutcome::Started => {
            info!("Download requested for {} ({})", id, item.filename);
            Ok((
                StatusCode::ACCEPTED,
                Json(StartDownloadResponse { id, started: true }),
            ))
        }
        RequestOutcome::AlreadyActive => {
            Err(AppError::Conflict("Download already in progress".into()))
        }
        RequestOutcome::AlreadyDownloaded => {
            Err(AppError::Conflict("Image already downloaded".into()))
        }
    }
}

/// Cancel an active download
async fn cancel_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    if state.downloads.cancel(&ItemId::new(id)) {
        (StatusCode::OK, Json(serde_json::json!({ "success": true }))).into_response()
    } else {
        AppError::NotFound("Download not found or already completed".into()).into_response()
    }
}

/// Get download statistics
async fn download_stats(State(state): State<Arc<AppState>>) -> Json<DownloadStats> {
    Json(state.downloads.stats())
}

// ============ Notification Endpoints ============

/// Current notification for every item that has one
async fn list_notifications(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<NotificationRecord>> {
    Json(state.notifications.records())
}

// ============ Error Handling ============

/// API error type
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Conflict(String),
    Unavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(serde_json::json!({ "error": message }));
        (status, body).into_response()
    }
}
