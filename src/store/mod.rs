//! Shared mode store: contract consumed by session controllers.
//!
//! ARCHITECTURE
//! ============
//! The store is a multi-reader/multi-writer tree keyed by server:
//!
//! ```text
//! servers/{server}/mode                 idle | record | data
//! servers/{server}/client_id            active client key or ""
//! servers/{server}/data                 one in-flight data pipeline run
//! servers/{server}/record/{client}      one record session per client
//! ```
//!
//! Controllers never reach the store ambiently; a `ModeStore` is injected
//! into every controller and route so the contract can be exercised in
//! isolation with an in-memory or failure-injecting fake.
//!
//! DESIGN
//! ======
//! Writes are atomic per path only. A subscription observes the latest
//! value of one path in write order, never older after newer, and may
//! coalesce intermediate values. There is no cross-path atomicity.

pub mod memory;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

pub use memory::MemoryStore;

// =============================================================================
// RECORDS
// =============================================================================

/// Server-wide exclusive operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Idle,
    Record,
    Data,
}

impl Mode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Record => "record",
            Self::Data => "data",
        }
    }
}

/// One in-flight run of the five-stage upload pipeline.
///
/// Flags are expected to turn true in declaration order, but nothing
/// downstream relies on that order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSession {
    #[serde(rename = "folder_no")]
    pub folder_id: String,
    pub connected: bool,
    #[serde(rename = "sensor_file")]
    pub sensor_file_ready: bool,
    #[serde(rename = "image_file")]
    pub image_file_ready: bool,
    #[serde(rename = "audio_file")]
    pub audio_file_ready: bool,
    pub transmission_completed: bool,
}

impl DataSession {
    /// Number of pipeline stages.
    pub const STAGES: usize = 5;

    /// The all-false shape with no folder, used for idle servers and resets.
    #[must_use]
    pub fn zeroed() -> Self {
        Self::default()
    }

    /// The all-false shape for a freshly claimed session.
    #[must_use]
    pub fn fresh(folder_id: impl Into<String>) -> Self {
        Self { folder_id: folder_id.into(), ..Self::default() }
    }

    /// Stage flags in pipeline order.
    #[must_use]
    pub fn flags(&self) -> [bool; Self::STAGES] {
        [
            self.connected,
            self.sensor_file_ready,
            self.image_file_ready,
            self.audio_file_ready,
            self.transmission_completed,
        ]
    }

    /// Count of stages reported done, independent of order.
    #[must_use]
    pub fn completed_stages(&self) -> usize {
        self.flags().iter().filter(|flag| **flag).count()
    }
}

/// Status of a client's record session as reported by the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Idle,
    Done,
}

/// One scheduled capture window for a specific client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordSession {
    pub status: RecordStatus,
    #[serde(rename = "request")]
    pub requested: bool,
    pub time_range: String,
    pub date: String,
}

impl RecordSession {
    /// The shape a client entry has when no capture is requested.
    #[must_use]
    pub fn idle() -> Self {
        Self::default()
    }

    /// A freshly requested capture window.
    #[must_use]
    pub fn requested(time_range: impl Into<String>, date: impl Into<String>) -> Self {
        Self { status: RecordStatus::Idle, requested: true, time_range: time_range.into(), date: date.into() }
    }
}

/// Full server node, as returned by `snapshot`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerRecord {
    pub mode: Mode,
    #[serde(rename = "client_id")]
    pub active_client: String,
    pub location: String,
    pub data: DataSession,
    pub record: BTreeMap<String, RecordSession>,
    /// Client key to its own location. Empty means the server's applies.
    pub client_locations: BTreeMap<String, String>,
}

impl ServerRecord {
    /// Where `client` sits: its own location, else the server's.
    #[must_use]
    pub fn location_of(&self, client: &str) -> &str {
        match self.client_locations.get(client) {
            Some(location) if !location.is_empty() => location,
            _ => &self.location,
        }
    }
}

/// Registered servers and their clients, keyed by normalized key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Registry {
    pub servers: BTreeMap<String, RegistryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RegistryEntry {
    pub location: String,
    /// Client key to client location.
    pub clients: BTreeMap<String, String>,
}

impl Registry {
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.servers.values().map(|entry| entry.clients.len()).sum()
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("unknown server: {0}")]
    UnknownServer(String),
    #[error("unknown client: {0}")]
    UnknownClient(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl crate::frame::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownServer(_) => "E_UNKNOWN_SERVER",
            Self::UnknownClient(_) => "E_UNKNOWN_CLIENT",
            Self::AlreadyExists(_) => "E_ALREADY_EXISTS",
            Self::Unavailable(_) => "E_STORE_UNAVAILABLE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Push-based view of one store path. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: watch::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    #[must_use]
    pub fn new(rx: watch::Receiver<T>) -> Self {
        Self { rx }
    }

    /// Latest value, marking it seen.
    pub fn current(&mut self) -> T {
        self.rx.borrow_and_update().clone()
    }

    /// Wait for the next change. `None` once the path is removed.
    pub async fn changed(&mut self) -> Option<T> {
        match self.rx.changed().await {
            Ok(()) => Some(self.rx.borrow_and_update().clone()),
            Err(_) => None,
        }
    }
}

// =============================================================================
// CONTRACT
// =============================================================================

/// Read/write/subscribe primitives of the shared mode store.
#[async_trait::async_trait]
pub trait ModeStore: Send + Sync {
    async fn write_mode(&self, server: &str, mode: Mode) -> Result<(), StoreError>;

    /// Empty `client` clears the active client.
    async fn write_active_client(&self, server: &str, client: &str) -> Result<(), StoreError>;

    async fn write_data_session(&self, server: &str, session: &DataSession) -> Result<(), StoreError>;

    async fn write_record_session(&self, server: &str, client: &str, session: &RecordSession)
    -> Result<(), StoreError>;

    async fn subscribe_mode(&self, server: &str) -> Result<Subscription<Mode>, StoreError>;

    async fn subscribe_active_client(&self, server: &str) -> Result<Subscription<String>, StoreError>;

    async fn subscribe_data_session(&self, server: &str) -> Result<Subscription<DataSession>, StoreError>;

    /// `None` is delivered once the client entry is removed.
    async fn subscribe_record_session(
        &self,
        server: &str,
        client: &str,
    ) -> Result<Subscription<Option<RecordSession>>, StoreError>;

    async fn snapshot(&self, server: &str) -> Result<ServerRecord, StoreError>;

    async fn registry(&self) -> Registry;

    async fn subscribe_registry(&self) -> Subscription<Registry>;

    async fn create_server(&self, server: &str, location: &str) -> Result<(), StoreError>;

    async fn delete_server(&self, server: &str) -> Result<(), StoreError>;

    async fn set_server_location(&self, server: &str, location: &str) -> Result<(), StoreError>;

    async fn create_client(&self, server: &str, client: &str, location: &str) -> Result<(), StoreError>;

    async fn set_client_location(&self, server: &str, client: &str, location: &str) -> Result<(), StoreError>;

    /// Removes the client's record entry and clears it as active client.
    async fn delete_client(&self, server: &str, client: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
