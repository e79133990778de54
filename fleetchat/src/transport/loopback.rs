//! Loopback push transport for testing.
//!
//! [`LoopbackConnector::new`] returns a connector and a [`LoopbackServer`].
//! Every transport the connector opens is handed to the server as a
//! [`LoopbackPeer`], which plays the relay side: it can push frames, read
//! what the client sent, and simulate drops and reconnects.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};

use fleetchat_proto::codec;
use fleetchat_proto::push::PushMessage;

use super::{Connector, PushTransport, TransportError, TransportEvent};

/// Link flags shared by both ends.
#[derive(Debug, Default)]
struct Link {
    connected: AtomicBool,
    shut_down: AtomicBool,
}

/// Connector that produces in-process transports.
pub struct LoopbackConnector {
    accepted: mpsc::UnboundedSender<LoopbackPeer>,
}

impl LoopbackConnector {
    /// Create a connector and the server that receives its transports.
    #[must_use]
    pub fn new() -> (Self, LoopbackServer) {
        let (accepted, incoming) = mpsc::unbounded_channel();
        (Self { accepted }, LoopbackServer { incoming })
    }
}

impl Connector for LoopbackConnector {
    type Transport = LoopbackTransport;

    fn open(&self) -> Result<LoopbackTransport, TransportError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let link = Arc::new(Link::default());

        link.connected.store(true, Ordering::Relaxed);
        let _ = events_tx.send(TransportEvent::Connected);

        let peer = LoopbackPeer {
            events: events_tx,
            sent: sent_rx,
            link: Arc::clone(&link),
        };
        // A test that never accepts just doesn't observe the peer.
        let _ = self.accepted.send(peer);

        Ok(LoopbackTransport {
            events: Mutex::new(events_rx),
            sent: sent_tx,
            link,
        })
    }
}

/// Client end of a loopback link.
pub struct LoopbackTransport {
    events: Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
    sent: mpsc::UnboundedSender<Vec<u8>>,
    link: Arc<Link>,
}

impl PushTransport for LoopbackTransport {
    async fn recv(&self) -> Option<TransportEvent> {
        let mut rx = self.events.lock().await;
        rx.recv().await
    }

    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if !self.link.connected.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }
        self.sent
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn shutdown(&self) {
        self.link.connected.store(false, Ordering::Relaxed);
        self.link.shut_down.store(true, Ordering::Relaxed);
    }
}

/// Receives the peers of every transport opened by a [`LoopbackConnector`].
pub struct LoopbackServer {
    incoming: mpsc::UnboundedReceiver<LoopbackPeer>,
}

impl LoopbackServer {
    /// Wait for the next opened transport.
    pub async fn accept(&mut self) -> Option<LoopbackPeer> {
        self.incoming.recv().await
    }

    /// The next opened transport, if one is already waiting.
    pub fn try_accept(&mut self) -> Option<LoopbackPeer> {
        self.incoming.try_recv().ok()
    }
}

/// Relay side of one loopback link.
pub struct LoopbackPeer {
    events: mpsc::UnboundedSender<TransportEvent>,
    sent: mpsc::UnboundedReceiver<Vec<u8>>,
    link: Arc<Link>,
}

impl LoopbackPeer {
    /// Push an encoded message to the client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the link is down or the
    /// client end is gone.
    pub fn push(&self, message: &PushMessage) -> Result<(), TransportError> {
        let bytes = codec::encode(message).map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
        self.push_raw(bytes)
    }

    /// Push arbitrary bytes to the client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the link is down or the
    /// client end is gone.
    pub fn push_raw(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        if !self.link.connected.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }
        self.events
            .send(TransportEvent::Frame(bytes))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Simulate the connection dropping.
    pub fn drop_connection(&self) {
        self.link.connected.store(false, Ordering::Relaxed);
        let _ = self.events.send(TransportEvent::Disconnected);
    }

    /// Simulate the transport reconnecting after a drop.
    pub fn reconnect(&self) {
        self.link.connected.store(true, Ordering::Relaxed);
        let _ = self.events.send(TransportEvent::Connected);
    }

    /// Wait for the next frame the client sent and decode it.
    ///
    /// Returns `None` when the client end is gone. Undecodable frames are
    /// skipped.
    pub async fn next_sent(&mut self) -> Option<PushMessage> {
        loop {
            let bytes = self.sent.recv().await?;
            if let Ok(message) = codec::decode(&bytes) {
                return Some(message);
            }
        }
    }

    /// The next sent frame, if one is already waiting.
    pub fn try_next_sent(&mut self) -> Option<PushMessage> {
        while let Ok(bytes) = self.sent.try_recv() {
            if let Ok(message) = codec::decode(&bytes) {
                return Some(message);
            }
        }
        None
    }

    /// Whether the client shut its transport down.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.link.shut_down.load(Ordering::Relaxed)
    }
}
