//! Connection Manager: the single identity-scoped push channel.
//!
//! A [`ConnectionManager`] owns at most one open transport. For that
//! transport it runs a small pump task that joins the identity's room on
//! every (re)connect, decodes frames, and forwards [`PushEvent`]s over a
//! per-connection channel. Disconnecting aborts the pump and drops the
//! channel, so no event reaches the caller afterwards.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use fleetchat_proto::codec;
use fleetchat_proto::message::Identity;
use fleetchat_proto::push::{InboundMessage, PushMessage};

use crate::transport::{ConnectionState, Connector, PushTransport, TransportError, TransportEvent};

/// Default capacity of the per-connection event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Events delivered to the owner of a [`ConnectionManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// The channel is up and the room join was sent.
    Connected,
    /// The channel dropped; the transport is reconnecting.
    Disconnected,
    /// A `new_counterparty_message` push.
    Message(InboundMessage),
}

/// Errors returned by [`ConnectionManager::connect`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The identity has no usable id.
    #[error("identity has an empty id")]
    BlankIdentity,

    /// The transport could not be opened.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

struct Active<T> {
    identity: Identity,
    transport: Arc<T>,
    events: mpsc::Receiver<PushEvent>,
    pump: JoinHandle<()>,
    state: Arc<Mutex<ConnectionState>>,
}

/// Owns the push connection for one logged-in identity at a time.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    buffer: usize,
    active: Option<Active<C::Transport>>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager that opens transports through `connector`.
    pub const fn new(connector: C) -> Self {
        Self::with_buffer(connector, DEFAULT_EVENT_BUFFER)
    }

    /// Like [`new`](Self::new) with an explicit event channel capacity.
    pub const fn with_buffer(connector: C, buffer: usize) -> Self {
        Self {
            connector,
            buffer,
            active: None,
        }
    }

    /// Open the push channel for `identity`.
    ///
    /// A no-op when already open for the same identity. Switching to a
    /// different identity tears the old channel down first. Must be called
    /// inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::BlankIdentity`] for an identity without an
    /// id, or [`ConnectionError::Transport`] if the connector fails.
    pub fn connect(&mut self, identity: &Identity) -> Result<(), ConnectionError> {
        if identity.is_blank() {
            return Err(ConnectionError::BlankIdentity);
        }
        if let Some(active) = &self.active {
            if active.identity == *identity {
                tracing::debug!(%identity, "push channel already open");
                return Ok(());
            }
            self.disconnect();
        }

        let transport = Arc::new(self.connector.open()?);
        let state = Arc::new(Mutex::new(ConnectionState::Connecting));
        let (tx, rx) = mpsc::channel(self.buffer.max(1));
        let pump = tokio::spawn(pump(
            Arc::clone(&transport),
            identity.clone(),
            tx,
            Arc::clone(&state),
        ));

        tracing::info!(%identity, "push channel opened");
        self.active = Some(Active {
            identity: identity.clone(),
            transport,
            events: rx,
            pump,
            state,
        });
        Ok(())
    }

    /// Tear the push channel down.
    ///
    /// After this returns, [`next_event`](Self::next_event) delivers nothing
    /// until the next [`connect`](Self::connect).
    pub fn disconnect(&mut self) {
        if let Some(active) = self.active.take() {
            active.pump.abort();
            active.transport.shutdown();
            tracing::info!(identity = %active.identity, "push channel closed");
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.active
            .as_ref()
            .map_or(ConnectionState::Disconnected, |active| *active.state.lock())
    }

    /// The identity the channel is open for, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.active.as_ref().map(|active| &active.identity)
    }

    /// Wait for the next push event.
    ///
    /// Pends forever while disconnected. Returns `None` once when the
    /// transport closes for good; the manager is then disconnected.
    pub async fn next_event(&mut self) -> Option<PushEvent> {
        let Some(active) = self.active.as_mut() else {
            return std::future::pending().await;
        };
        let event = active.events.recv().await;
        if event.is_none() {
            tracing::warn!("push transport closed permanently");
            self.active = None;
        }
        event
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn pump<T: PushTransport>(
    transport: Arc<T>,
    identity: Identity,
    events: mpsc::Sender<PushEvent>,
    state: Arc<Mutex<ConnectionState>>,
) {
    while let Some(event) = transport.recv().await {
        let forwarded = match event {
            TransportEvent::Connected => {
                *state.lock() = ConnectionState::Connected;
                join_room(transport.as_ref(), &identity).await;
                Some(PushEvent::Connected)
            }
            TransportEvent::Disconnected => {
                *state.lock() = ConnectionState::Connecting;
                Some(PushEvent::Disconnected)
            }
            TransportEvent::Frame(bytes) => decode_frame(&bytes),
        };
        if let Some(event) = forwarded {
            if events.send(event).await.is_err() {
                break;
            }
        }
    }
    *state.lock() = ConnectionState::Disconnected;
}

async fn join_room<T: PushTransport>(transport: &T, identity: &Identity) {
    let join = PushMessage::JoinRoom {
        identity: identity.clone(),
    };
    let bytes = match codec::encode(&join) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(err = %e, "failed to encode room join");
            return;
        }
    };
    match transport.send(bytes).await {
        Ok(()) => tracing::debug!(room = %identity.room(), "room join sent"),
        Err(e) => tracing::warn!(room = %identity.room(), err = %e, "room join failed"),
    }
}

fn decode_frame(bytes: &[u8]) -> Option<PushEvent> {
    match codec::decode(bytes) {
        Ok(PushMessage::NewCounterpartyMessage(message)) => Some(PushEvent::Message(message)),
        Ok(PushMessage::Joined { room }) => {
            tracing::info!(%room, "joined push room");
            None
        }
        Ok(PushMessage::Error { reason }) => {
            tracing::warn!(%reason, "push server reported an error");
            None
        }
        Ok(PushMessage::JoinRoom { .. }) => {
            tracing::debug!("ignoring client-side control frame from server");
            None
        }
        Err(e) => {
            tracing::warn!(err = %e, len = bytes.len(), "dropping undecodable push frame");
            None
        }
    }
}
