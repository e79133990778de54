//! JSON bodies for the REST endpoints served by the relay.
//!
//! Field names are camelCase on the wire. The push channel never carries
//! these types.

use serde::{Deserialize, Serialize};

use crate::message::{CounterpartyId, Identity, MessageId, SenderRole, TempId, Timestamp};

/// `GET` conversation summaries for an identity.
pub const CONVERSATIONS_PATH: &str = "/api/conversations";
/// `GET` permissible contacts for an identity.
pub const CONTACTS_PATH: &str = "/api/contacts";
/// `POST` a new message; `GET {MESSAGES_PATH}/{counterparty_id}` for history.
pub const MESSAGES_PATH: &str = "/api/messages";
/// `POST` a read receipt.
pub const MARK_READ_PATH: &str = "/api/messages/read";
/// WebSocket upgrade endpoint for the push channel.
pub const PUSH_PATH: &str = "/ws";

/// Query-string form of an [`Identity`] (`?role=employee&id=7`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityQuery {
    /// Which side the caller is on.
    pub role: SenderRole,
    /// Caller id.
    pub id: String,
}

impl From<&Identity> for IdentityQuery {
    fn from(identity: &Identity) -> Self {
        Self {
            role: identity.role,
            id: identity.id.clone(),
        }
    }
}

impl From<IdentityQuery> for Identity {
    fn from(query: IdentityQuery) -> Self {
        Self::new(query.role, query.id)
    }
}

/// One conversation with history, as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// Conversation key.
    pub counterparty_id: CounterpartyId,
    /// Display name of the counterparty.
    pub counterparty_name: String,
    /// Email or phone of the counterparty.
    pub counterparty_contact: String,
    /// Messages the caller has not read yet.
    pub unread_count: u32,
    /// Text of the most recent message.
    #[serde(default)]
    pub last_message: Option<String>,
    /// Time of the most recent message.
    #[serde(default)]
    pub last_activity: Option<Timestamp>,
}

/// A counterparty the caller may start a chat with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Conversation key for this contact.
    pub id: CounterpartyId,
    /// Display name.
    pub name: String,
    /// Email or phone.
    pub contact: String,
}

/// A persisted message returned by the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    /// Server-assigned id.
    pub id: MessageId,
    /// Conversation the message belongs to.
    pub counterparty_id: CounterpartyId,
    /// Message text.
    pub text: String,
    /// Which side authored it.
    pub sender: SenderRole,
    /// The specific author.
    pub author_id: String,
    /// Creation time.
    pub timestamp: Timestamp,
    /// The sender's temporary id, if the send request carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<TempId>,
}

/// Body of `POST /api/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Target conversation.
    pub counterparty_id: CounterpartyId,
    /// Message text (trimmed, non-empty).
    pub text: String,
    /// Id of the sending employee or customer.
    pub sender_id: String,
    /// Display name of the sender.
    pub sender_name: String,
    /// Side of the sender.
    pub sender_role: SenderRole,
    /// Echoed back in the push fan-out so the sender can reconcile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<TempId>,
}

/// Response of `POST /api/messages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    /// Server-assigned id of the stored message.
    pub message_id: MessageId,
}

/// Body of `POST /api/messages/read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    /// Conversation being read.
    pub counterparty_id: CounterpartyId,
    /// Who read it.
    pub identity: Identity,
}
