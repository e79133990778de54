//! `FleetChat`: employee-to-customer live chat core.
//!
//! Keeps per-conversation message threads with optimistic sends, tracks
//! unread counters across conversations, and applies real-time push events
//! from the relay.

pub mod api;
pub mod chat;
pub mod config;
pub mod connection;
pub mod shell;
pub mod transport;
