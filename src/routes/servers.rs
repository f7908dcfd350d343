//! Registry and agent routes.
//!
//! Operators add and remove servers and clients here, and move them between
//! locations. The recording hardware
//! and upload pipeline report progress through the two `PATCH` endpoints,
//! which merge partial bodies over the current store value.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::keys::{self, KeyError};
use crate::state::AppState;
use crate::store::{DataSession, Mode, RecordSession, RecordStatus, Registry, ServerRecord, StoreError};

#[derive(Debug, Serialize)]
pub struct ClientSummary {
    pub key: String,
    pub name: String,
    pub location: String,
}

impl ClientSummary {
    fn new(key: &str, location: &str) -> Self {
        Self { key: key.to_string(), name: keys::client_display(key), location: location.to_string() }
    }
}

#[derive(Debug, Serialize)]
pub struct ServerSummary {
    pub key: String,
    pub name: String,
    pub location: String,
    pub mode: Mode,
    pub active_client: String,
    pub clients: Vec<ClientSummary>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateServerBody {
    pub name: Option<String>,
    pub location: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateClientBody {
    pub name: Option<String>,
    pub location: String,
}

#[derive(Debug, Deserialize)]
pub struct LocationBody {
    pub location: String,
}

/// Partial pipeline update. Absent fields keep their stored value.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DataPatch {
    pub folder_no: Option<String>,
    pub connected: Option<bool>,
    pub sensor_file: Option<bool>,
    pub image_file: Option<bool>,
    pub audio_file: Option<bool>,
    pub transmission_completed: Option<bool>,
}

impl DataPatch {
    fn apply(self, mut session: DataSession) -> DataSession {
        if let Some(folder) = self.folder_no {
            session.folder_id = folder;
        }
        let flags = [
            (self.connected, &mut session.connected),
            (self.sensor_file, &mut session.sensor_file_ready),
            (self.image_file, &mut session.image_file_ready),
            (self.audio_file, &mut session.audio_file_ready),
            (self.transmission_completed, &mut session.transmission_completed),
        ];
        for (value, slot) in flags {
            if let Some(value) = value {
                *slot = value;
            }
        }
        session
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RecordPatch {
    pub status: Option<RecordStatus>,
    pub request: Option<bool>,
    pub time_range: Option<String>,
    pub date: Option<String>,
}

impl RecordPatch {
    fn apply(self, mut session: RecordSession) -> RecordSession {
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(requested) = self.request {
            session.requested = requested;
        }
        if let Some(time_range) = self.time_range {
            session.time_range = time_range;
        }
        if let Some(date) = self.date {
            session.date = date;
        }
        session
    }
}

pub(crate) fn store_error_to_status(err: StoreError) -> StatusCode {
    match err {
        StoreError::UnknownServer(_) | StoreError::UnknownClient(_) => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists(_) => StatusCode::CONFLICT,
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub(crate) fn key_error_to_status(_err: KeyError) -> StatusCode {
    StatusCode::BAD_REQUEST
}

fn summarize(key: &str, record: ServerRecord, registry: &Registry) -> ServerSummary {
    let clients = registry
        .servers
        .get(key)
        .map(|entry| entry.clients.iter().map(|(client, location)| ClientSummary::new(client, location)).collect())
        .unwrap_or_default();
    ServerSummary {
        key: key.to_string(),
        name: keys::server_display(key),
        location: record.location,
        mode: record.mode,
        active_client: record.active_client,
        clients,
    }
}

/// Next `prefix<n>` key above every numbered key in `taken`.
fn next_key<'a>(taken: impl Iterator<Item = &'a String>, build: fn(u32) -> String) -> String {
    let highest = taken.filter_map(|key| keys::key_number(key)).max().unwrap_or(0);
    build(highest + 1)
}

/// `GET /api/servers`: registered servers with their live mode.
pub async fn list_servers(State(state): State<AppState>) -> Result<Json<Vec<ServerSummary>>, StatusCode> {
    let registry = state.store.registry().await;
    let mut out = Vec::with_capacity(registry.servers.len());
    for key in registry.servers.keys() {
        let record = state.store.snapshot(key).await.map_err(store_error_to_status)?;
        out.push(summarize(key, record, &registry));
    }
    Ok(Json(out))
}

/// `POST /api/servers`: register a server. Unnamed servers take the next number.
pub async fn create_server(
    State(state): State<AppState>,
    Json(body): Json<CreateServerBody>,
) -> Result<(StatusCode, Json<ServerSummary>), StatusCode> {
    let registry = state.store.registry().await;
    let key = match body.name.as_deref() {
        Some(name) => keys::server_key(name).map_err(key_error_to_status)?,
        None => next_key(registry.servers.keys(), keys::server_key_for),
    };
    state.store.create_server(&key, &body.location).await.map_err(store_error_to_status)?;

    let record = state.store.snapshot(&key).await.map_err(store_error_to_status)?;
    let registry = state.store.registry().await;
    Ok((StatusCode::CREATED, Json(summarize(&key, record, &registry))))
}

/// `GET /api/servers/{server}`: full server node.
pub async fn get_server(
    State(state): State<AppState>,
    Path(server): Path<String>,
) -> Result<Json<ServerRecord>, StatusCode> {
    let key = keys::server_key(&server).map_err(key_error_to_status)?;
    let record = state.store.snapshot(&key).await.map_err(store_error_to_status)?;
    Ok(Json(record))
}

/// `DELETE /api/servers/{server}`: only an idle server can be removed.
pub async fn delete_server(State(state): State<AppState>, Path(server): Path<String>) -> Result<StatusCode, StatusCode> {
    let key = keys::server_key(&server).map_err(key_error_to_status)?;
    let record = state.store.snapshot(&key).await.map_err(store_error_to_status)?;
    if record.mode != Mode::Idle {
        return Err(StatusCode::CONFLICT);
    }
    state.store.delete_server(&key).await.map_err(store_error_to_status)?;
    info!(server = %key, "servers: deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/servers/{server}/clients`: add a client.
pub async fn create_client(
    State(state): State<AppState>,
    Path(server): Path<String>,
    Json(body): Json<CreateClientBody>,
) -> Result<(StatusCode, Json<ClientSummary>), StatusCode> {
    let server = keys::server_key(&server).map_err(key_error_to_status)?;
    let registry = state.store.registry().await;
    let Some(entry) = registry.servers.get(&server) else {
        return Err(StatusCode::NOT_FOUND);
    };
    let key = match body.name.as_deref() {
        Some(name) => keys::client_key(name).map_err(key_error_to_status)?,
        None => next_key(entry.clients.keys(), keys::client_key_for),
    };
    state.store.create_client(&server, &key, &body.location).await.map_err(store_error_to_status)?;
    Ok((StatusCode::CREATED, Json(ClientSummary::new(&key, &body.location))))
}

/// `PATCH /api/servers/{server}`: move a server to a new location.
pub async fn patch_server_location(
    State(state): State<AppState>,
    Path(server): Path<String>,
    Json(body): Json<LocationBody>,
) -> Result<Json<ServerSummary>, StatusCode> {
    let key = keys::server_key(&server).map_err(key_error_to_status)?;
    state.store.set_server_location(&key, &body.location).await.map_err(store_error_to_status)?;
    let record = state.store.snapshot(&key).await.map_err(store_error_to_status)?;
    let registry = state.store.registry().await;
    Ok(Json(summarize(&key, record, &registry)))
}

/// `PATCH /api/servers/{server}/clients/{client}`: set a client's own location.
/// An empty location falls back to the server's.
pub async fn patch_client_location(
    State(state): State<AppState>,
    Path((server, client)): Path<(String, String)>,
    Json(body): Json<LocationBody>,
) -> Result<Json<ClientSummary>, StatusCode> {
    let server = keys::server_key(&server).map_err(key_error_to_status)?;
    let client = keys::client_key(&client).map_err(key_error_to_status)?;
    state.store.set_client_location(&server, &client, &body.location).await.map_err(store_error_to_status)?;
    Ok(Json(ClientSummary::new(&client, &body.location)))
}

/// `DELETE /api/servers/{server}/clients/{client}`.
pub async fn delete_client(
    State(state): State<AppState>,
    Path((server, client)): Path<(String, String)>,
) -> Result<StatusCode, StatusCode> {
    let server = keys::server_key(&server).map_err(key_error_to_status)?;
    let client = keys::client_key(&client).map_err(key_error_to_status)?;
    state.store.delete_client(&server, &client).await.map_err(store_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PATCH /api/servers/{server}/data`: pipeline progress from the uploader.
pub async fn patch_data(
    State(state): State<AppState>,
    Path(server): Path<String>,
    Json(patch): Json<DataPatch>,
) -> Result<Json<DataSession>, StatusCode> {
    let server = keys::server_key(&server).map_err(key_error_to_status)?;
    let record = state.store.snapshot(&server).await.map_err(store_error_to_status)?;
    let session = patch.apply(record.data);
    state.store.write_data_session(&server, &session).await.map_err(store_error_to_status)?;
    Ok(Json(session))
}

/// `PATCH /api/servers/{server}/record/{client}`: recorder status.
pub async fn patch_record(
    State(state): State<AppState>,
    Path((server, client)): Path<(String, String)>,
    Json(patch): Json<RecordPatch>,
) -> Result<Json<RecordSession>, StatusCode> {
    let server = keys::server_key(&server).map_err(key_error_to_status)?;
    let client = keys::client_key(&client).map_err(key_error_to_status)?;
    let mut record = state.store.snapshot(&server).await.map_err(store_error_to_status)?;
    let Some(current) = record.record.remove(&client) else {
        return Err(StatusCode::NOT_FOUND);
    };
    let session = patch.apply(current);
    state.store.write_record_session(&server, &client, &session).await.map_err(store_error_to_status)?;
    Ok(Json(session))
}

#[cfg(test)]
#[path = "servers_test.rs"]
mod tests;
