//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the viewer WebSocket, the registry and agent REST
//! endpoints, and the detections browser under a single Axum router.

pub mod detections;
pub mod servers;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{delete, get, patch, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/servers", get(servers::list_servers).post(servers::create_server))
        .route(
            "/api/servers/{server}",
            get(servers::get_server).patch(servers::patch_server_location).delete(servers::delete_server),
        )
        .route("/api/servers/{server}/clients", post(servers::create_client))
        .route(
            "/api/servers/{server}/clients/{client}",
            patch(servers::patch_client_location).delete(servers::delete_client),
        )
        .route("/api/servers/{server}/data", patch(servers::patch_data))
        .route("/api/servers/{server}/record/{client}", patch(servers::patch_record))
        .route("/api/detections", get(detections::list_detections))
        .route("/api/detections/history", get(detections::history))
        .route("/api/detections/health", get(detections::backend_health))
        .route("/api/detections/{bat_id}", get(detections::detection_detail))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
