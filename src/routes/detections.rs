//! Detection browsing routes, backed by the external file backend.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use tracing::warn;

use super::servers::{key_error_to_status, store_error_to_status};
use crate::keys;
use crate::services::detections::{
    self, BatFolder, DetectionDetail, FileBackendError, HistoryPage, HistoryQuery, SortKey, SortOrder,
};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TargetParams {
    pub server: Option<String>,
    pub client: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HistoryParams {
    pub server: String,
    pub client: String,
    pub search: Option<String>,
    pub sort: Option<SortKey>,
    pub order: SortOrder,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

pub(crate) fn file_backend_error_to_status(err: &FileBackendError) -> StatusCode {
    match err {
        FileBackendError::Unsuccessful(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn backend_failure(err: &FileBackendError) -> StatusCode {
    warn!(error = %err, "detections: file backend failed");
    file_backend_error_to_status(err)
}

/// Numeric part of a server or client key, e.g. `"Server 2"` → 2.
fn target_number(raw: &str, normalize: fn(&str) -> Result<String, keys::KeyError>) -> Result<u32, StatusCode> {
    let key = normalize(raw).map_err(key_error_to_status)?;
    keys::key_number(&key).ok_or(StatusCode::BAD_REQUEST)
}

/// `GET /api/detections`: every matching folder, optionally for one target.
pub async fn list_detections(
    State(state): State<AppState>,
    Query(params): Query<TargetParams>,
) -> Result<Json<Vec<BatFolder>>, StatusCode> {
    let server = params.server.as_deref().map(|s| target_number(s, keys::server_key)).transpose()?;
    let client = params.client.as_deref().map(|c| target_number(c, keys::client_key)).transpose()?;

    let folders = state.files.folders().await.map_err(|e| backend_failure(&e))?;
    let matching = folders
        .into_iter()
        .filter(|f| server.is_none_or(|n| f.server_num == n) && client.is_none_or(|n| f.client_num == n))
        .collect();
    Ok(Json(matching))
}

/// `GET /api/detections/history`: one client's table, searched and paged.
pub async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryPage>, StatusCode> {
    let server_key = keys::server_key(&params.server).map_err(key_error_to_status)?;
    let server_num = keys::key_number(&server_key).ok_or(StatusCode::BAD_REQUEST)?;
    let client_key = keys::client_key(&params.client).map_err(key_error_to_status)?;
    let client_num = keys::key_number(&client_key).ok_or(StatusCode::BAD_REQUEST)?;
    let record = state.store.snapshot(&server_key).await.map_err(store_error_to_status)?;

    let folders = state.files.folders().await.map_err(|e| backend_failure(&e))?;
    let rows = detections::history_rows(&folders, server_num, client_num, record.location_of(&client_key));
    let query = HistoryQuery {
        search: params.search,
        sort: params.sort,
        order: params.order,
        page: params.page.unwrap_or(1),
        page_size: params.page_size.unwrap_or(state.config.history_page_size),
    };
    Ok(Json(detections::query_history(rows, &query)))
}

/// `GET /api/detections/{bat_id}`: files and sensor readings for one event.
pub async fn detection_detail(
    State(state): State<AppState>,
    Path(bat_id): Path<String>,
    Query(params): Query<TargetParams>,
) -> Result<Json<DetectionDetail>, StatusCode> {
    let (Some(server), Some(client)) = (params.server.as_deref(), params.client.as_deref()) else {
        return Err(StatusCode::BAD_REQUEST);
    };
    let server = target_number(server, keys::server_key)?;
    let client = target_number(client, keys::client_key)?;
    let detail = state.files.detail(&bat_id, server, client).await.map_err(|e| backend_failure(&e))?;
    Ok(Json(detail))
}

/// `GET /api/detections/health`: whether the file backend answers.
pub async fn backend_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let healthy = state.files.healthy().await;
    Json(serde_json::json!({ "backend": state.files.base_url(), "healthy": healthy }))
}

#[cfg(test)]
#[path = "detections_test.rs"]
mod tests;
