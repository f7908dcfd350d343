//! In-memory mode store backed by one `watch` channel per path.
//!
//! DESIGN
//! ======
//! Each server node owns a `watch::Sender` per subscribable path. Writes use
//! `send_if_modified`, so subscribers only wake when a value actually
//! changes, and always observe the latest value. Registry changes (servers
//! and clients added or removed) are published on a separate channel.

use std::collections::BTreeMap;

use tokio::sync::{RwLock, watch};
use tracing::{debug, info};

use super::{
    DataSession, Mode, ModeStore, RecordSession, Registry, RegistryEntry, ServerRecord, StoreError, Subscription,
};
use crate::keys;

/// Client entry every new server starts with.
pub const DEFAULT_CLIENT: &str = "client1";

struct ServerNode {
    location: String,
    mode: watch::Sender<Mode>,
    active_client: watch::Sender<String>,
    data: watch::Sender<DataSession>,
    records: BTreeMap<String, watch::Sender<Option<RecordSession>>>,
    client_locations: BTreeMap<String, String>,
}

impl ServerNode {
    fn new(location: &str) -> Self {
        let mut records = BTreeMap::new();
        records.insert(DEFAULT_CLIENT.to_string(), watch::Sender::new(Some(RecordSession::idle())));
        let client_locations = BTreeMap::from([(DEFAULT_CLIENT.to_string(), String::new())]);
        Self {
            location: location.to_string(),
            mode: watch::Sender::new(Mode::Idle),
            active_client: watch::Sender::new(String::new()),
            data: watch::Sender::new(DataSession::zeroed()),
            records,
            client_locations,
        }
    }

    fn client_location(&self, client: &str) -> String {
        self.client_locations.get(client).cloned().unwrap_or_default()
    }

    fn record(&self) -> ServerRecord {
        ServerRecord {
            mode: *self.mode.borrow(),
            active_client: self.active_client.borrow().clone(),
            location: self.location.clone(),
            data: self.data.borrow().clone(),
            record: self
                .records
                .iter()
                .filter_map(|(client, tx)| tx.borrow().clone().map(|session| (client.clone(), session)))
                .collect(),
            client_locations: self.client_locations.clone(),
        }
    }
}

/// Replace the channel value when it differs. Returns whether it changed.
fn publish<T: PartialEq>(tx: &watch::Sender<T>, value: T) -> bool {
    tx.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    })
}

pub struct MemoryStore {
    servers: RwLock<BTreeMap<String, ServerNode>>,
    registry: watch::Sender<Registry>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self { servers: RwLock::new(BTreeMap::new()), registry: watch::Sender::new(Registry::default()) }
    }

    fn build_registry(servers: &BTreeMap<String, ServerNode>) -> Registry {
        Registry {
            servers: servers
                .iter()
                .map(|(key, node)| {
                    let clients =
                        node.records.keys().map(|client| (client.clone(), node.client_location(client))).collect();
                    (key.clone(), RegistryEntry { location: node.location.clone(), clients })
                })
                .collect(),
        }
    }

    fn publish_registry(&self, servers: &BTreeMap<String, ServerNode>) {
        publish(&self.registry, Self::build_registry(servers));
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown_server(server: &str) -> StoreError {
    StoreError::UnknownServer(keys::server_path(server))
}

fn unknown_client(server: &str, client: &str) -> StoreError {
    StoreError::UnknownClient(keys::record_session_path(server, client))
}

#[async_trait::async_trait]
impl ModeStore for MemoryStore {
    async fn write_mode(&self, server: &str, mode: Mode) -> Result<(), StoreError> {
        let servers = self.servers.read().await;
        let node = servers.get(server).ok_or_else(|| unknown_server(server))?;
        if publish(&node.mode, mode) {
            debug!(path = %keys::mode_path(server), mode = mode.as_str(), "store: write");
        }
        Ok(())
    }

    async fn write_active_client(&self, server: &str, client: &str) -> Result<(), StoreError> {
        let servers = self.servers.read().await;
        let node = servers.get(server).ok_or_else(|| unknown_server(server))?;
        if publish(&node.active_client, client.to_string()) {
            debug!(path = %keys::active_client_path(server), %client, "store: write");
        }
        Ok(())
    }

    async fn write_data_session(&self, server: &str, session: &DataSession) -> Result<(), StoreError> {
        let servers = self.servers.read().await;
        let node = servers.get(server).ok_or_else(|| unknown_server(server))?;
        if publish(&node.data, session.clone()) {
            debug!(
                path = %keys::data_session_path(server),
                folder = %session.folder_id,
                stages = session.completed_stages(),
                "store: write"
            );
        }
        Ok(())
    }

    async fn write_record_session(
        &self,
        server: &str,
        client: &str,
        session: &RecordSession,
    ) -> Result<(), StoreError> {
        let servers = self.servers.read().await;
        let node = servers.get(server).ok_or_else(|| unknown_server(server))?;
        let tx = node.records.get(client).ok_or_else(|| unknown_client(server, client))?;
        if publish(tx, Some(session.clone())) {
            debug!(path = %keys::record_session_path(server, client), status = ?session.status, "store: write");
        }
        Ok(())
    }

    async fn subscribe_mode(&self, server: &str) -> Result<Subscription<Mode>, StoreError> {
        let servers = self.servers.read().await;
        let node = servers.get(server).ok_or_else(|| unknown_server(server))?;
        Ok(Subscription::new(node.mode.subscribe()))
    }

    async fn subscribe_active_client(&self, server: &str) -> Result<Subscription<String>, StoreError> {
        let servers = self.servers.read().await;
        let node = servers.get(server).ok_or_else(|| unknown_server(server))?;
        Ok(Subscription::new(node.active_client.subscribe()))
    }

    async fn subscribe_data_session(&self, server: &str) -> Result<Subscription<DataSession>, StoreError> {
        let servers = self.servers.read().await;
        let node = servers.get(server).ok_or_else(|| unknown_server(server))?;
        Ok(Subscription::new(node.data.subscribe()))
    }

    async fn subscribe_record_session(
        &self,
        server: &str,
        client: &str,
    ) -> Result<Subscription<Option<RecordSession>>, StoreError> {
        let servers = self.servers.read().await;
        let node = servers.get(server).ok_or_else(|| unknown_server(server))?;
        let tx = node.records.get(client).ok_or_else(|| unknown_client(server, client))?;
        Ok(Subscription::new(tx.subscribe()))
    }

    async fn snapshot(&self, server: &str) -> Result<ServerRecord, StoreError> {
        let servers = self.servers.read().await;
        let node = servers.get(server).ok_or_else(|| unknown_server(server))?;
        Ok(node.record())
    }

    async fn registry(&self) -> Registry {
        let servers = self.servers.read().await;
        Self::build_registry(&servers)
    }

    async fn subscribe_registry(&self) -> Subscription<Registry> {
        Subscription::new(self.registry.subscribe())
    }

    async fn create_server(&self, server: &str, location: &str) -> Result<(), StoreError> {
        let mut servers = self.servers.write().await;
        if servers.contains_key(server) {
            return Err(StoreError::AlreadyExists(keys::server_path(server)));
        }
        servers.insert(server.to_string(), ServerNode::new(location));
        self.publish_registry(&servers);
        info!(path = %keys::server_path(server), %location, "store: server created");
        Ok(())
    }

    async fn delete_server(&self, server: &str) -> Result<(), StoreError> {
        let mut servers = self.servers.write().await;
        if servers.remove(server).is_none() {
            return Err(unknown_server(server));
        }
        self.publish_registry(&servers);
        info!(path = %keys::server_path(server), "store: server deleted");
        Ok(())
    }

    async fn set_server_location(&self, server: &str, location: &str) -> Result<(), StoreError> {
        let mut servers = self.servers.write().await;
        let node = servers.get_mut(server).ok_or_else(|| unknown_server(server))?;
        location.clone_into(&mut node.location);
        self.publish_registry(&servers);
        info!(path = %keys::server_path(server), %location, "store: server location set");
        Ok(())
    }

    async fn create_client(&self, server: &str, client: &str, location: &str) -> Result<(), StoreError> {
        let mut servers = self.servers.write().await;
        let node = servers.get_mut(server).ok_or_else(|| unknown_server(server))?;
        if node.records.contains_key(client) {
            return Err(StoreError::AlreadyExists(keys::record_session_path(server, client)));
        }
        node.records.insert(client.to_string(), watch::Sender::new(Some(RecordSession::idle())));
        node.client_locations.insert(client.to_string(), location.to_string());
        self.publish_registry(&servers);
        info!(path = %keys::record_session_path(server, client), %location, "store: client created");
        Ok(())
    }

    async fn set_client_location(&self, server: &str, client: &str, location: &str) -> Result<(), StoreError> {
        let mut servers = self.servers.write().await;
        let node = servers.get_mut(server).ok_or_else(|| unknown_server(server))?;
        if !node.records.contains_key(client) {
            return Err(unknown_client(server, client));
        }
        node.client_locations.insert(client.to_string(), location.to_string());
        self.publish_registry(&servers);
        info!(path = %keys::record_session_path(server, client), %location, "store: client location set");
        Ok(())
    }

    async fn delete_client(&self, server: &str, client: &str) -> Result<(), StoreError> {
        let mut servers = self.servers.write().await;
        let node = servers.get_mut(server).ok_or_else(|| unknown_server(server))?;
        let Some(tx) = node.records.remove(client) else {
            return Err(unknown_client(server, client));
        };
        publish(&tx, None);
        node.client_locations.remove(client);

        // EDGE: a deleted client must not stay named as the mode holder.
        if *node.active_client.borrow() == client {
            if *node.mode.borrow() == Mode::Data {
                publish(&node.data, DataSession::zeroed());
            }
            publish(&node.active_client, String::new());
            publish(&node.mode, Mode::Idle);
        }
        self.publish_registry(&servers);
        info!(path = %keys::record_session_path(server, client), "store: client deleted");
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
