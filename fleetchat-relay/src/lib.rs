//! `FleetChat` relay server library.
//!
//! Serves the REST endpoints the chat core calls and fans stored messages
//! out to identity rooms over a WebSocket push channel. Exposed as a
//! library for tests and embedding.

pub mod config;
pub mod relay;
pub mod rooms;
pub mod store;
