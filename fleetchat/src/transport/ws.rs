//! WebSocket push transport.
//!
//! [`WsConnector::open`] spawns a supervisor task that owns the WebSocket.
//! The supervisor dials, reports [`TransportEvent::Connected`], pumps frames
//! in both directions until the socket drops, reports
//! [`TransportEvent::Disconnected`], then waits out an exponential backoff and
//! dials again. It runs until [`PushTransport::shutdown`] or drop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{Connector, PushTransport, TransportError, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Default timeout for a single dial attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Frames buffered in each direction.
const CHANNEL_CAPACITY: usize = 256;

/// Backoff policy between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor applied per failed attempt.
    pub multiplier: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Opens [`WsTransport`]s against one push endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    reconnect: ReconnectConfig,
    connect_timeout: Duration,
}

impl WsConnector {
    /// Connector for `url` (`ws://` or `wss://`).
    #[must_use]
    pub const fn new(url: Url, reconnect: ReconnectConfig) -> Self {
        Self {
            url,
            reconnect,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the per-attempt dial timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The push endpoint.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    fn open(&self) -> Result<WsTransport, TransportError> {
        if !matches!(self.url.scheme(), "ws" | "wss") {
            return Err(TransportError::Unreachable(self.url.to_string()));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        let supervisor = tokio::spawn(supervise(
            self.clone(),
            outbound_rx,
            events_tx,
            Arc::clone(&connected),
        ));

        Ok(WsTransport {
            outbound: outbound_tx,
            incoming: Mutex::new(events_rx),
            connected,
            supervisor,
        })
    }
}

/// Reconnecting WebSocket push transport.
pub struct WsTransport {
    /// Frames for the supervisor to write.
    outbound: mpsc::Sender<Vec<u8>>,
    /// Events produced by the supervisor.
    incoming: Mutex<mpsc::Receiver<TransportEvent>>,
    /// Whether a socket is currently up.
    connected: Arc<AtomicBool>,
    supervisor: JoinHandle<()>,
}

impl WsTransport {
    /// Whether a socket is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl PushTransport for WsTransport {
    async fn recv(&self) -> Option<TransportEvent> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await
    }

    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn shutdown(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.supervisor.abort();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

/// Why a pumped socket stopped.
enum PumpExit {
    /// The socket dropped; dial again.
    Dropped,
    /// The transport handle is gone; stop.
    Closed,
}

async fn supervise(
    connector: WsConnector,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
) {
    let url = connector.url.as_str();
    let mut attempt: u32 = 0;

    loop {
        match dial(url, connector.connect_timeout).await {
            Ok(stream) => {
                attempt = 0;
                // Frames written for a previous connection are stale.
                while outbound.try_recv().is_ok() {}
                connected.store(true, Ordering::Relaxed);
                tracing::info!(url, "push channel connected");
                if events.send(TransportEvent::Connected).await.is_err() {
                    return;
                }

                let exit = pump(stream, &mut outbound, &events).await;
                connected.store(false, Ordering::Relaxed);
                if matches!(exit, PumpExit::Closed) {
                    tracing::debug!(url, "push transport closed, supervisor exiting");
                    return;
                }
                tracing::warn!(url, "push channel dropped");
                if events.send(TransportEvent::Disconnected).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(url, attempt, err = %e, "push channel connect failed");
            }
        }

        let delay = connector.reconnect.delay_for(attempt);
        attempt = attempt.saturating_add(1);
        tracing::debug!(url, delay_ms = delay.as_millis(), "waiting before reconnect");
        tokio::time::sleep(delay).await;
    }
}

async fn dial(url: &str, timeout: Duration) -> Result<WsStream, TransportError> {
    let (stream, _response) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| map_ws_connect_error(url, e))?;
    Ok(stream)
}

async fn pump(
    stream: WsStream,
    outbound: &mut mpsc::Receiver<Vec<u8>>,
    events: &mpsc::Sender<TransportEvent>,
) -> PumpExit {
    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(bytes) = frame else {
                    let _ = sink.close().await;
                    return PumpExit::Closed;
                };
                if let Err(e) = sink.send(Message::Binary(bytes.into())).await {
                    tracing::warn!(err = %e, "push channel write failed");
                    return PumpExit::Dropped;
                }
            }
            incoming = source.next() => match incoming {
                Some(Ok(Message::Binary(data))) => {
                    if events.send(TransportEvent::Frame(data.to_vec())).await.is_err() {
                        return PumpExit::Closed;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return PumpExit::Dropped,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(err = %e, "push channel read error");
                    return PumpExit::Dropped;
                }
            },
        }
    }
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::AddrNotAvailable => {
                TransportError::Unreachable(url.to_string())
            }
            _ => TransportError::Io(io_err),
        },
        WsError::Http(response) => TransportError::Io(std::io::Error::other(format!(
            "push endpoint HTTP error: status {}",
            response.status()
        ))),
        other => TransportError::Io(std::io::Error::other(format!(
            "push connection error: {other}"
        ))),
    }
}
