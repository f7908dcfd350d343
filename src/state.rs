//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the shared mode store, the loaded configuration and the file
//! backend client. Per-viewer dashboards are not kept here: each one lives
//! inside its WebSocket connection task.

use std::sync::Arc;

use crate::config::DashboardConfig;
use crate::services::detections::{FileBackend, FileBackendError};
use crate::store::ModeStore;

/// Clone is required by Axum. Every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ModeStore>,
    pub config: Arc<DashboardConfig>,
    pub files: FileBackend,
}

impl AppState {
    pub fn new(store: Arc<dyn ModeStore>, config: DashboardConfig) -> Result<Self, FileBackendError> {
        let files = FileBackend::new(&config.file_backend_url)?;
        Ok(Self { store, config: Arc::new(config), files })
    }
}

#[cfg(test)]
#[path = "state_helpers_test.rs"]
pub mod test_helpers;
