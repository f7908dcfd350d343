//! WebSocket handler: one dashboard per viewer.
//!
//! DESIGN
//! ======
//! On upgrade, builds a `Dashboard` synced to the registry and enters a
//! `select!` loop:
//! - Incoming viewer frames → parse + dispatch by syscall prefix
//! - Controller and aggregator events → forward as `event:*` frames
//! - Registry changes → resync controllers, push a fresh overview
//!
//! Handler functions validate, call the dashboard, and return an `Outcome`.
//! The dispatch layer turns that into the reply frame.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `viewer_id`, then the overview
//! 2. Viewer sends frames → dispatch → handler returns Outcome
//! 3. Close → dashboard dropped, every controller task aborted

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame, Status};
use crate::services::dashboard::Dashboard;
use crate::services::events::{ViewerEvent, merge_fields};
use crate::services::runtime::RuntimeConfig;
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions.
enum Outcome {
    /// Send done+data to the viewer.
    Reply(Data),
    /// Send empty done to the viewer.
    Done,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let viewer_id = Uuid::new_v4();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ViewerEvent>();
    let mut dashboard = Dashboard::new(state.store.clone(), RuntimeConfig::from(&*state.config), events_tx);
    let mut registry = state.store.subscribe_registry().await;
    dashboard.sync(&registry.current()).await;

    let welcome = Frame::request("session:connected", Data::new()).with_data("viewer_id", viewer_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }
    if send_overview(&mut socket, &dashboard).await.is_err() {
        return;
    }

    info!(%viewer_id, "ws: viewer connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let frames = process_inbound_text(&mut dashboard, viewer_id, &text).await;
                        if send_all(&mut socket, &frames).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(event) = events_rx.recv() => {
                if send_frame(&mut socket, &event.to_frame()).await.is_err() {
                    break;
                }
                if event.changes_overview() && send_overview(&mut socket, &dashboard).await.is_err() {
                    break;
                }
            }
            changed = registry.changed() => {
                let Some(current) = changed else { break };
                dashboard.sync(&current).await;
                if send_overview(&mut socket, &dashboard).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(dashboard);
    info!(%viewer_id, "ws: viewer disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the viewer.
async fn process_inbound_text(dashboard: &mut Dashboard, viewer_id: Uuid, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%viewer_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    if req.status != Status::Request {
        return vec![req.error(format!("expected request frame, got {:?}", req.status))];
    }

    req.from = Some(viewer_id.to_string());
    info!(%viewer_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match req.prefix() {
        "data" => handle_data(dashboard, &req).await,
        "record" => handle_record(dashboard, &req).await,
        "client" => handle_client(dashboard, &req).await,
        "dashboard" => handle_dashboard(dashboard, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Err(err_frame) => vec![err_frame],
    }
}

/// `server` and `client` fields every targeted command carries.
fn target(req: &Frame) -> Result<(&str, &str), Frame> {
    match (req.str_field("server"), req.str_field("client")) {
        (Some(server), Some(client)) => Ok((server, client)),
        _ => Err(req.error("server and client required")),
    }
}

fn owned_field(req: &Frame, key: &str) -> Option<String> {
    req.str_field(key).map(str::to_string)
}

// =============================================================================
// DATA HANDLERS
// =============================================================================

async fn handle_data(dashboard: &Dashboard, req: &Frame) -> Result<Outcome, Frame> {
    let (server, client) = target(req)?;
    let result = match req.op() {
        "start" => dashboard.start_data(server, client).await,
        "stop" => dashboard.stop_data(server, client).await,
        "hide" => dashboard.hide_data(server, client).await,
        op => return Err(req.error(format!("unknown data op: {op}"))),
    };
    result.map_err(|e| req.error_from(&e))?;
    Ok(Outcome::Done)
}

// =============================================================================
// RECORD HANDLERS
// =============================================================================

async fn handle_record(dashboard: &mut Dashboard, req: &Frame) -> Result<Outcome, Frame> {
    let (server, client) = target(req)?;
    let time_range = owned_field(req, "time_range");
    let date = owned_field(req, "date");

    match req.op() {
        "start" => {
            dashboard.start_record(server, client, time_range, date).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Done)
        }
        "close" => {
            dashboard.close_record(server, client).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Done)
        }
        "settings" => {
            let settings =
                dashboard.set_record_settings(server, client, time_range, date).map_err(|e| req.error_from(&e))?;
            let mut data = Data::new();
            merge_fields(&mut data, &settings);
            Ok(Outcome::Reply(data))
        }
        op => Err(req.error(format!("unknown record op: {op}"))),
    }
}

// =============================================================================
// QUERY HANDLERS
// =============================================================================

async fn handle_client(dashboard: &Dashboard, req: &Frame) -> Result<Outcome, Frame> {
    if req.op() != "state" {
        return Err(req.error(format!("unknown client op: {}", req.op())));
    }
    let (server, client) = target(req)?;
    let state = dashboard.client_state(server, client).await.map_err(|e| req.error_from(&e))?;
    let mut data = Data::new();
    merge_fields(&mut data, &state);
    Ok(Outcome::Reply(data))
}

async fn handle_dashboard(dashboard: &Dashboard, req: &Frame) -> Result<Outcome, Frame> {
    if req.op() != "overview" {
        return Err(req.error(format!("unknown dashboard op: {}", req.op())));
    }
    let mut data = Data::new();
    merge_fields(&mut data, &dashboard.overview().await);
    merge_fields(&mut data, &serde_json::json!({ "servers": dashboard.targets() }));
    Ok(Outcome::Reply(data))
}

// =============================================================================
// OUTBOUND
// =============================================================================

async fn send_overview(socket: &mut WebSocket, dashboard: &Dashboard) -> Result<(), ()> {
    let frame = ViewerEvent::Overview(dashboard.overview().await).to_frame();
    send_frame(socket, &frame).await
}

async fn send_all(socket: &mut WebSocket, frames: &[Frame]) -> Result<(), ()> {
    for frame in frames {
        send_frame(socket, frame).await?;
    }
    Ok(())
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.str_field("code").unwrap_or("-");
        let message = frame.str_field("message").unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else if frame.syscall.starts_with("event:") {
        debug!(id = %frame.id, syscall = %frame.syscall, "ws: send event");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
