//! Shared protocol definitions for `FleetChat`: push-channel frames and
//! REST bodies.

pub mod api;
pub mod codec;
pub mod message;
pub mod push;
