//! Dashboard: one viewer's controllers, aggregators, and record settings.
//!
//! ARCHITECTURE
//! ============
//! A dashboard mirrors the registry: one `ServerAggregator` per registered
//! server and one running controller per registered client. `sync` is fed
//! every registry value and spawns or drops controllers to match.
//!
//! ```text
//! registry ─► Dashboard::sync ─► { server → (aggregator, { client → handle }) }
//! viewer command ─► Dashboard ─► ControllerHandle ─► driver task
//! ```
//!
//! All controllers share one outbound event channel, drained by the viewer's
//! connection.
//!
//! DESIGN
//! ======
//! The busy gate is read by the controller at command time from its server
//! aggregator. The dashboard does not revalidate against the store.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

use super::aggregator::{Overview, ServerAggregator};
use super::controller::{ControllerView, SessionError, SessionKind};
use super::countdown::{self, CountdownError, Window};
use super::events::ViewerEvent;
use super::runtime::{self, ControllerHandle, RuntimeConfig, SharedAggregator};
use crate::frame::ErrorCode;
use crate::keys::{self, KeyError};
use crate::store::{ModeStore, Registry};

/// Capture window offered before the operator picks one.
pub const DEFAULT_TIME_RANGE: &str = "9:00 AM - 5:00 PM";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DashboardError {
    #[error("unknown server: {0}")]
    UnknownServer(String),
    #[error("unknown client: {client} on {server}")]
    UnknownClient { server: String, client: String },
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    TimeRange(#[from] CountdownError),
}

impl ErrorCode for DashboardError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownServer(_) => "E_UNKNOWN_SERVER",
            Self::UnknownClient { .. } => "E_UNKNOWN_CLIENT",
            Self::Key(err) => err.error_code(),
            Self::Session(err) => err.error_code(),
            Self::TimeRange(err) => err.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Session(err) => err.retryable(),
            _ => false,
        }
    }
}

/// Per-client record form values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSettings {
    pub time_range: String,
    pub date: String,
}

impl Default for RecordSettings {
    fn default() -> Self {
        Self { time_range: DEFAULT_TIME_RANGE.into(), date: countdown::local_now().date().to_string() }
    }
}

/// Reply payload for `client:state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientState {
    #[serde(flatten)]
    pub view: ControllerView,
    pub settings: RecordSettings,
    pub server_busy: bool,
    /// Client holding the server's lock, data before record.
    pub busy_holder: Option<String>,
}

struct ServerSlot {
    aggregator: SharedAggregator,
    controllers: BTreeMap<String, ControllerHandle>,
}

pub struct Dashboard {
    store: Arc<dyn ModeStore>,
    config: RuntimeConfig,
    events: mpsc::UnboundedSender<ViewerEvent>,
    servers: BTreeMap<String, ServerSlot>,
    settings: BTreeMap<(String, String), RecordSettings>,
}

impl Dashboard {
    #[must_use]
    pub fn new(store: Arc<dyn ModeStore>, config: RuntimeConfig, events: mpsc::UnboundedSender<ViewerEvent>) -> Self {
        Self { store, config, events, servers: BTreeMap::new(), settings: BTreeMap::new() }
    }

    /// Registered servers and their running clients.
    #[must_use]
    pub fn targets(&self) -> BTreeMap<&str, Vec<&str>> {
        self.servers
            .iter()
            .map(|(server, slot)| (server.as_str(), slot.controllers.keys().map(String::as_str).collect()))
            .collect()
    }

    // =========================================================================
    // REGISTRY SYNC
    // =========================================================================

    /// Spawn and drop controllers until they match `registry`.
    pub async fn sync(&mut self, registry: &Registry) {
        let gone: Vec<String> =
            self.servers.keys().filter(|server| !registry.servers.contains_key(*server)).cloned().collect();
        for server in gone {
            self.servers.remove(&server);
            self.settings.retain(|(s, _), _| *s != server);
            info!(%server, "dashboard: server removed");
        }

        for (server, entry) in &registry.servers {
            let slot = self.servers.entry(server.clone()).or_insert_with(|| ServerSlot {
                aggregator: Arc::new(Mutex::new(ServerAggregator::new(server.clone()))),
                controllers: BTreeMap::new(),
            });

            let removed: Vec<String> =
                slot.controllers.keys().filter(|client| !entry.clients.contains_key(*client)).cloned().collect();
            for client in removed {
                slot.controllers.remove(&client);
                self.settings.remove(&(server.clone(), client.clone()));
                let changes = slot.aggregator.lock().await.remove_client(&client);
                for event in changes {
                    if self.events.send(ViewerEvent::Server { server: server.clone(), event }).is_err() {
                        warn!(%server, "dashboard: viewer gone");
                    }
                }
                info!(%server, %client, "dashboard: client removed");
            }

            for client in entry.clients.keys() {
                if slot.controllers.contains_key(client) {
                    continue;
                }
                let spawned = runtime::spawn(
                    Arc::clone(&self.store),
                    server,
                    client,
                    Arc::clone(&slot.aggregator),
                    self.events.clone(),
                    self.config,
                )
                .await;
                match spawned {
                    Ok(handle) => {
                        slot.controllers.insert(client.clone(), handle);
                    }
                    Err(err) => warn!(%server, %client, error = %err, "dashboard: controller spawn failed"),
                }
            }
        }
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    fn resolve(&self, server: &str, client: &str) -> Result<(&ServerSlot, &ControllerHandle), DashboardError> {
        let server = keys::server_key(server)?;
        let client = keys::client_key(client)?;
        let slot = self.servers.get(&server).ok_or_else(|| DashboardError::UnknownServer(server.clone()))?;
        let handle =
            slot.controllers.get(&client).ok_or_else(|| DashboardError::UnknownClient { server, client })?;
        Ok((slot, handle))
    }

    fn handle(&self, server: &str, client: &str) -> Result<&ControllerHandle, DashboardError> {
        Ok(self.resolve(server, client)?.1)
    }

    pub async fn start_data(&self, server: &str, client: &str) -> Result<(), DashboardError> {
        Ok(self.handle(server, client)?.start_data().await?)
    }

    pub async fn stop_data(&self, server: &str, client: &str) -> Result<(), DashboardError> {
        Ok(self.handle(server, client)?.stop_data().await?)
    }

    pub async fn hide_data(&self, server: &str, client: &str) -> Result<(), DashboardError> {
        Ok(self.handle(server, client)?.hide_data().await?)
    }

    /// Missing values fall back to the client's saved settings.
    pub async fn start_record(
        &mut self,
        server: &str,
        client: &str,
        time_range: Option<String>,
        date: Option<String>,
    ) -> Result<(), DashboardError> {
        let settings = self.set_record_settings(server, client, time_range, date)?;
        let handle = self.handle(server, client)?;
        Ok(handle.start_record(settings.time_range, settings.date).await?)
    }

    pub async fn close_record(&self, server: &str, client: &str) -> Result<(), DashboardError> {
        Ok(self.handle(server, client)?.close_record().await?)
    }

    /// Update the saved record form. The time range must parse.
    pub fn set_record_settings(
        &mut self,
        server: &str,
        client: &str,
        time_range: Option<String>,
        date: Option<String>,
    ) -> Result<RecordSettings, DashboardError> {
        let handle = self.handle(server, client)?;
        let key = (handle.server().to_string(), handle.client().to_string());
        let mut settings = self.settings.get(&key).cloned().unwrap_or_default();
        if let Some(time_range) = time_range {
            Window::parse(&time_range)?;
            settings.time_range = time_range;
        }
        if let Some(date) = date {
            settings.date = date;
        }
        self.settings.insert(key, settings.clone());
        Ok(settings)
    }

    pub async fn client_state(&self, server: &str, client: &str) -> Result<ClientState, DashboardError> {
        let (slot, handle) = self.resolve(server, client)?;
        let view = handle.view().await?;
        let (server_busy, busy_holder) = {
            let aggregator = slot.aggregator.lock().await;
            let holder = aggregator.lock_holder(SessionKind::Data).or_else(|| aggregator.lock_holder(SessionKind::Record));
            (aggregator.is_busy(), holder.map(str::to_string))
        };
        let key = (handle.server().to_string(), handle.client().to_string());
        let settings = self.settings.get(&key).cloned().unwrap_or_default();
        Ok(ClientState { view, settings, server_busy, busy_holder })
    }

    /// Header counters over every server this viewer tracks.
    pub async fn overview(&self) -> Overview {
        let mut guards = Vec::with_capacity(self.servers.len());
        for slot in self.servers.values() {
            guards.push((slot.controllers.len(), slot.aggregator.lock().await));
        }
        Overview::collect(guards.iter().map(|(clients, guard)| (*clients, &**guard)))
    }
}

#[cfg(test)]
#[path = "dashboard_test.rs"]
mod tests;
