//! Relay server core: shared state, REST routes and the push WebSocket.
//!
//! REST requests read and write the [`ChatStore`]. A successful send is
//! fanned out as a `NewCounterpartyMessage` push to the customer's room and
//! to every employee room through the [`RoomRegistry`].
//!
//! Routes:
//! - `GET  /ws`: push channel; the first binary frame must be `JoinRoom`
//! - `GET  /api/conversations?role=..&id=..`
//! - `GET  /api/contacts?role=..&id=..`
//! - `GET  /api/messages/{counterparty_id}?role=..&id=..`
//! - `POST /api/messages`
//! - `POST /api/messages/read`

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use fleetchat_proto::api::{
    CONTACTS_PATH, CONVERSATIONS_PATH, Contact, ConversationSummary, HistoryMessage,
    IdentityQuery, MARK_READ_PATH, MESSAGES_PATH, MarkReadRequest, PUSH_PATH, SendMessageRequest,
    SendMessageResponse,
};
use fleetchat_proto::codec;
use fleetchat_proto::message::{CounterpartyId, Identity};
use fleetchat_proto::push::PushMessage;

use crate::rooms::RoomRegistry;
use crate::store::{ChatStore, StoreError};

/// Shared relay state.
#[derive(Default)]
pub struct RelayState {
    /// Conversations and read markers.
    pub store: ChatStore,
    /// Live push connections.
    pub rooms: RoomRegistry,
}

impl RelayState {
    /// State seeded with the given customers.
    #[must_use]
    pub fn new(customers: Vec<Contact>) -> Self {
        Self {
            store: ChatStore::new(customers),
            rooms: RoomRegistry::new(),
        }
    }
}

/// Error response of a REST route.
#[derive(Debug, thiserror::Error)]
pub enum ApiFailure {
    /// Malformed or invalid request (`400`).
    #[error("{0}")]
    BadRequest(String),
    /// The caller may not touch this conversation (`403`).
    #[error("{0}")]
    Forbidden(String),
    /// Unknown resource (`404`).
    #[error("{0}")]
    NotFound(String),
    /// Anything else (`500`).
    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for ApiFailure {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidText(_) | StoreError::Missing(_) => Self::BadRequest(err.to_string()),
            StoreError::Forbidden(_) => Self::Forbidden(err.to_string()),
            StoreError::UnknownCustomer(_) => Self::NotFound(err.to_string()),
        }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Builds the relay router.
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route(PUSH_PATH, get(ws_handler))
        .route(CONVERSATIONS_PATH, get(conversations))
        .route(CONTACTS_PATH, get(contacts))
        .route(MESSAGES_PATH, post(send_message))
        .route(MARK_READ_PATH, post(mark_read))
        .route(&format!("{MESSAGES_PATH}/{{counterparty_id}}"), get(history))
        .with_state(state)
}

async fn conversations(
    State(state): State<Arc<RelayState>>,
    Query(viewer): Query<IdentityQuery>,
) -> Json<Vec<ConversationSummary>> {
    Json(state.store.summaries(&viewer.into()).await)
}

async fn contacts(
    State(state): State<Arc<RelayState>>,
    Query(viewer): Query<IdentityQuery>,
) -> Json<Vec<Contact>> {
    Json(state.store.contacts(&viewer.into()).await)
}

async fn history(
    State(state): State<Arc<RelayState>>,
    Path(counterparty_id): Path<String>,
    Query(viewer): Query<IdentityQuery>,
) -> Result<Json<Vec<HistoryMessage>>, ApiFailure> {
    let conversation = CounterpartyId::new(counterparty_id);
    Ok(Json(
        state.store.history(&conversation, &viewer.into()).await?,
    ))
}

async fn send_message(
    State(state): State<Arc<RelayState>>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiFailure> {
    let event = state.store.append(&request).await.inspect_err(|e| {
        tracing::info!(
            sender = %request.sender_id,
            counterparty = %request.counterparty_id,
            error = %e,
            "send rejected"
        );
    })?;
    let message_id = event.message_id;
    let customer = event.counterparty_id.clone();

    let frame = codec::encode(&PushMessage::NewCounterpartyMessage(event))
        .map_err(|e| ApiFailure::Internal(e.to_string()))?;
    let delivered = state.rooms.fan_out(&customer, frame).await;
    tracing::debug!(
        counterparty = %customer,
        message_id = %message_id,
        delivered,
        "message stored and fanned out"
    );

    Ok(Json(SendMessageResponse { message_id }))
}

async fn mark_read(
    State(state): State<Arc<RelayState>>,
    Json(request): Json<MarkReadRequest>,
) -> Result<StatusCode, ApiFailure> {
    state.store.mark_read(&request).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<RelayState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handles one push connection.
///
/// The connection lifecycle:
/// 1. Wait for a `JoinRoom` frame.
/// 2. Add the connection to the identity's room, then answer `Joined`.
/// 3. Forward room traffic until either side closes.
/// 4. Remove the connection from the room.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(identity) = wait_for_join(&mut ws_receiver).await else {
        tracing::warn!("connection closed before joining a room");
        return;
    };

    // Join before confirming so no fan-out after `Joined` is missed.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let connection = state.rooms.join(&identity, tx.clone()).await;
    let joined = PushMessage::Joined {
        room: identity.room(),
    };
    if let Err(e) = send_push(&mut ws_sender, &joined).await {
        tracing::warn!(room = %identity.room(), error = %e, "failed to confirm join");
        state.rooms.leave(&identity, connection).await;
        return;
    }
    tracing::info!(room = %identity.room(), conn = %connection, "client joined");

    let writer_room = identity.room();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::debug!(room = %writer_room, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_room = identity.room();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => match codec::decode(&data) {
                    // A repeated join on the same socket is confirmed again.
                    Ok(PushMessage::JoinRoom { .. }) => {
                        let room = reader_room.clone();
                        if let Ok(bytes) = codec::encode(&PushMessage::Joined { room }) {
                            let _ = tx.send(Message::Binary(bytes.into()));
                        }
                    }
                    Ok(other) => {
                        tracing::debug!(room = %reader_room, msg = ?other, "ignoring client frame");
                    }
                    Err(e) => {
                        tracing::warn!(room = %reader_room, error = %e, "undecodable client frame");
                    }
                },
                Message::Close(_) => {
                    tracing::info!(room = %reader_room, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    state.rooms.leave(&identity, connection).await;
    tracing::info!(room = %identity.room(), conn = %connection, "client left");
}

/// Waits for the first meaningful frame, expecting `JoinRoom` with a
/// non-blank identity.
async fn wait_for_join(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<Identity> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => match codec::decode(&data) {
                Ok(PushMessage::JoinRoom { identity }) if !identity.is_blank() => {
                    return Some(identity);
                }
                Ok(other) => {
                    tracing::warn!(msg = ?other, "expected JoinRoom, got different message");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode join message");
                    return None;
                }
            },
            Message::Close(_) => return None,
            _ => {
                // Skip ping/pong and text frames while joining.
            }
        }
    }
    None
}

async fn send_push(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    msg: &PushMessage,
) -> Result<(), String> {
    let bytes = codec::encode(msg).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts the relay on `addr` with an empty state.
///
/// Returns the bound address and the server task. Pass `127.0.0.1:0` to let
/// the OS pick a port.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::default())).await
}

/// Starts the relay with a pre-built [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}
