//! Push-channel transport abstraction.
//!
//! A push transport carries opaque binary frames between the client and the
//! relay's WebSocket endpoint and reports its own (re)connection lifecycle as
//! in-band [`TransportEvent`]s. Reconnection policy belongs to the transport,
//! not to its user. Implementations:
//! - [`ws::WsTransport`] - tokio-tungstenite client with a reconnecting supervisor
//! - [`loopback::LoopbackTransport`] - in-process channels for tests

pub mod loopback;
pub mod ws;

use std::fmt;

/// Something that happened on the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The underlying connection is (again) up.
    Connected,
    /// The underlying connection dropped; the transport keeps retrying.
    Disconnected,
    /// A binary frame arrived.
    Frame(Vec<u8>),
}

/// Lifecycle of the shared push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport is open.
    #[default]
    Disconnected,
    /// A transport is open but not currently connected.
    Connecting,
    /// Connected and joined.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection is closed or currently down.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The push endpoint could not be reached.
    #[error("push endpoint {0} is unreachable")]
    Unreachable(String),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An open push channel.
///
/// Frames are opaque to the transport; encoding happens one layer up in
/// the connection manager.
pub trait PushTransport: Send + Sync + 'static {
    /// Next lifecycle event or frame.
    ///
    /// Returns `None` once the transport is permanently closed.
    fn recv(&self) -> impl std::future::Future<Output = Option<TransportEvent>> + Send;

    /// Hand a frame to the live connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] while disconnected. Frames
    /// are never queued across a reconnect.
    fn send(
        &self,
        frame: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Stop the transport, including any reconnect attempts.
    fn shutdown(&self);
}

/// Opens push transports on behalf of a connection manager.
pub trait Connector: Send + Sync + 'static {
    /// The transport type this connector produces.
    type Transport: PushTransport;

    /// Open a transport. Must be called inside a tokio runtime.
    ///
    /// The returned transport reports [`TransportEvent::Connected`] once the
    /// first connection is established.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be set up at all (for
    /// example an unusable endpoint). Transient connect failures are retried
    /// by the transport instead.
    fn open(&self) -> Result<Self::Transport, TransportError>;
}
