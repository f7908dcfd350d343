//! Server aggregator: per-server busy gate and activity counts.
//!
//! DESIGN
//! ======
//! Two independent locks, one per mode, each remembering the client that set
//! it. `is_busy` ORs them. The aggregator does not arbitrate between clients:
//! exclusivity comes from the store, and a lock taken over by a different
//! client is logged, not refused. Releases from a client that no longer holds
//! the lock are ignored so a late loss cannot clear a sibling's claim.
//!
//! Changes are reported as `AggregatorEvent`s, only when the derived value
//! actually changes.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use super::controller::SessionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorEvent {
    ServerBusyChange { busy: bool },
    ActiveCount { count: usize },
}

#[derive(Debug, Default)]
pub struct ServerAggregator {
    server: String,
    data_lock: Option<String>,
    record_lock: Option<String>,
    active: BTreeMap<String, SessionKind>,
}

impl ServerAggregator {
    #[must_use]
    pub fn new(server: impl Into<String>) -> Self {
        Self { server: server.into(), ..Self::default() }
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.data_lock.is_some() || self.record_lock.is_some()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn lock_holder(&self, kind: SessionKind) -> Option<&str> {
        match kind {
            SessionKind::Data => self.data_lock.as_deref(),
            SessionKind::Record => self.record_lock.as_deref(),
        }
    }

    pub fn set_lock(&mut self, client: &str, kind: SessionKind, locked: bool) -> Vec<AggregatorEvent> {
        let was_busy = self.is_busy();
        let server = &self.server;
        let slot = match kind {
            SessionKind::Data => &mut self.data_lock,
            SessionKind::Record => &mut self.record_lock,
        };

        match (slot.as_deref(), locked) {
            (Some(holder), true) if holder != client => {
                warn!(%server, %client, %holder, ?kind, "aggregator: lock taken over by another client");
                *slot = Some(client.to_string());
            }
            (None, true) => *slot = Some(client.to_string()),
            (Some(holder), false) if holder == client => *slot = None,
            (Some(holder), false) => {
                debug!(%server, %client, %holder, ?kind, "aggregator: release ignored, not holder");
            }
            _ => {}
        }
        self.busy_events(was_busy)
    }

    pub fn set_active(&mut self, client: &str, kind: SessionKind, active: bool) -> Vec<AggregatorEvent> {
        let before = self.active_count();
        if active {
            self.active.insert(client.to_string(), kind);
        } else if self.active.get(client) == Some(&kind) {
            self.active.remove(client);
        }
        self.count_events(before)
    }

    /// Drop everything a removed client held.
    pub fn remove_client(&mut self, client: &str) -> Vec<AggregatorEvent> {
        let was_busy = self.is_busy();
        let before = self.active_count();
        for slot in [&mut self.data_lock, &mut self.record_lock] {
            if slot.as_deref() == Some(client) {
                *slot = None;
            }
        }
        self.active.remove(client);

        let mut events = self.busy_events(was_busy);
        events.extend(self.count_events(before));
        events
    }

    fn busy_events(&self, was_busy: bool) -> Vec<AggregatorEvent> {
        let busy = self.is_busy();
        if busy == was_busy {
            return Vec::new();
        }
        debug!(server = %self.server, busy, "aggregator: busy changed");
        vec![AggregatorEvent::ServerBusyChange { busy }]
    }

    fn count_events(&self, before: usize) -> Vec<AggregatorEvent> {
        let count = self.active_count();
        if count == before {
            return Vec::new();
        }
        vec![AggregatorEvent::ActiveCount { count }]
    }
}

// =============================================================================
// OVERVIEW
// =============================================================================

/// Global header counters, summed over every server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Overview {
    pub total_servers: usize,
    pub active_servers: usize,
    pub total_clients: usize,
    pub active_clients: usize,
    pub monitoring: bool,
}

impl Overview {
    /// `servers` yields `(client_count, aggregator)` per server.
    pub fn collect<'a>(servers: impl IntoIterator<Item = (usize, &'a ServerAggregator)>) -> Self {
        let mut overview = Self::default();
        for (clients, aggregator) in servers {
            let active = aggregator.active_count();
            overview.total_servers += 1;
            overview.total_clients += clients;
            overview.active_clients += active;
            if active > 0 {
                overview.active_servers += 1;
            }
        }
        overview.monitoring = overview.active_clients > 0;
        overview
    }
}

#[cfg(test)]
#[path = "aggregator_test.rs"]
mod tests;
