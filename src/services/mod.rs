//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the dashboard state machines and the external file
//! backend, so route handlers stay focused on protocol translation.
//! `controller`, `phase`, `aggregator` and `countdown` are pure; `runtime`
//! and `dashboard` bind them to the store and tokio.

pub mod aggregator;
pub mod controller;
pub mod countdown;
pub mod dashboard;
pub mod detections;
pub mod events;
pub mod phase;
pub mod runtime;
pub mod sensor;
