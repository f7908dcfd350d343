//! Viewer events: everything pushed to a dashboard viewer unprompted.
//!
//! Controllers and aggregators emit typed events; this module turns them into
//! `event:*` request frames. `dashboard:overview` frames follow any change of
//! active counts.

use serde::Serialize;
use tracing::warn;

use super::aggregator::{AggregatorEvent, Overview};
use super::controller::UiEvent;
use crate::frame::{Data, Frame};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerEvent {
    Client { server: String, client: String, event: UiEvent },
    Server { server: String, event: AggregatorEvent },
    Overview(Overview),
}

impl ViewerEvent {
    #[must_use]
    pub fn syscall(&self) -> String {
        match self {
            Self::Client { event, .. } => format!("event:{}", event.name()),
            Self::Server { event: AggregatorEvent::ServerBusyChange { .. }, .. } => "event:server_busy".into(),
            Self::Server { event: AggregatorEvent::ActiveCount { .. }, .. } => "event:active_count".into(),
            Self::Overview(_) => "dashboard:overview".into(),
        }
    }

    /// Active counts changed, so the overview is stale.
    #[must_use]
    pub fn changes_overview(&self) -> bool {
        matches!(self, Self::Server { event: AggregatorEvent::ActiveCount { .. }, .. })
    }

    #[must_use]
    pub fn to_frame(&self) -> Frame {
        let mut data = Data::new();
        match self {
            Self::Client { server, client, event } => {
                data.insert("server".into(), server.clone().into());
                data.insert("client".into(), client.clone().into());
                merge_fields(&mut data, event);
            }
            Self::Server { server, event } => {
                data.insert("server".into(), server.clone().into());
                match event {
                    AggregatorEvent::ServerBusyChange { busy } => data.insert("busy".into(), (*busy).into()),
                    AggregatorEvent::ActiveCount { count } => data.insert("count".into(), (*count).into()),
                };
            }
            Self::Overview(overview) => merge_fields(&mut data, overview),
        }
        Frame::request(self.syscall(), data)
    }
}

/// Flatten a serializable struct into frame data.
pub(crate) fn merge_fields(data: &mut Data, value: &impl Serialize) {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(fields)) => data.extend(fields),
        Ok(other) => warn!(?other, "events: payload is not an object"),
        Err(err) => warn!(error = %err, "events: payload serialization failed"),
    }
}

#[cfg(test)]
#[path = "events_test.rs"]
mod tests;
