//! Push-channel messages exchanged over the WebSocket connection.
//!
//! The push channel carries no request/response traffic: the client joins
//! its identity room once per connection, and the server pushes
//! [`PushMessage::NewCounterpartyMessage`] events into that room. Sends go
//! through the REST path, never through this channel.

use serde::{Deserialize, Serialize};

use crate::message::{
    CounterpartyId, Identity, MessageId, MessageStatus, SenderRole, TempId, Timestamp,
};

/// Messages carried in push-channel binary frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushMessage {
    /// Client registers for push delivery to its identity room.
    ///
    /// Must be the first frame after (re)connecting. The server responds
    /// with [`PushMessage::Joined`].
    JoinRoom {
        /// The logged-in identity.
        identity: Identity,
    },

    /// Server confirms the room join.
    Joined {
        /// The room key (see [`Identity::room`]).
        room: String,
    },

    /// A new message was posted to a conversation this identity can see.
    NewCounterpartyMessage(InboundMessage),

    /// Server reports an error condition.
    Error {
        /// Human-readable error description.
        reason: String,
    },
}

/// Payload of a `new_counterparty_message` push event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// The conversation (customer id) the message belongs to.
    pub counterparty_id: CounterpartyId,
    /// Server-assigned id.
    pub message_id: MessageId,
    /// The sender's temporary id, echoed so the sender can reconcile.
    pub temp_id: Option<TempId>,
    /// Message text.
    pub text: String,
    /// Server-side creation time.
    pub timestamp: Timestamp,
    /// Which side authored the message.
    pub sender: SenderRole,
    /// The specific employee or customer who sent it.
    pub author_id: String,
    /// Always `Sent` for server-origin messages.
    pub status: MessageStatus,
}

/// Reason an [`InboundMessage`] is rejected as malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedPush {
    /// Conversation id is missing.
    #[error("push event has no counterparty id")]
    MissingCounterparty,
    /// Text is empty.
    #[error("push event has empty text")]
    EmptyText,
    /// Author id is missing.
    #[error("push event has no author id")]
    MissingAuthor,
}

impl InboundMessage {
    /// Checks the fields a receiver needs before applying the event.
    ///
    /// # Errors
    ///
    /// Returns the first [`MalformedPush`] reason found.
    pub fn validate(&self) -> Result<(), MalformedPush> {
        if self.counterparty_id.is_blank() {
            return Err(MalformedPush::MissingCounterparty);
        }
        if self.text.trim().is_empty() {
            return Err(MalformedPush::EmptyText);
        }
        if self.author_id.trim().is_empty() {
            return Err(MalformedPush::MissingAuthor);
        }
        Ok(())
    }
}
