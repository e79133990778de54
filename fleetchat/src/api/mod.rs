//! REST boundary of the chat core.
//!
//! Defines the [`ChatApi`] trait covering the request/response operations
//! the chat core consumes. Implementations:
//! - [`http::HttpChatApi`] - `reqwest` client against the relay's REST routes
//! - [`memory::InMemoryChatApi`] - in-process backend for tests and demos

pub mod http;
pub mod memory;

use fleetchat_proto::api::{
    Contact, ConversationSummary, HistoryMessage, MarkReadRequest, SendMessageRequest,
    SendMessageResponse,
};
use fleetchat_proto::message::{CounterpartyId, Identity};

/// Errors that can occur during a REST call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The server answered with a non-success status code.
    #[error("server returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The request never produced a response (connect/reset/DNS).
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be decoded.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// No response arrived within the configured time limit.
    #[error("request timed out")]
    Timeout,

    /// The endpoint URL could not be built.
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),
}

/// Async REST operations used by the chat core.
///
/// All calls are independent and may be in flight concurrently; the chat
/// core's correctness does not depend on their completion order.
pub trait ChatApi: Send + Sync + 'static {
    /// Conversations with history for `identity`, in server order.
    fn conversation_summaries(
        &self,
        identity: &Identity,
    ) -> impl std::future::Future<Output = Result<Vec<ConversationSummary>, ApiError>> + Send;

    /// Every counterparty `identity` may contact, independent of history.
    fn contacts(
        &self,
        identity: &Identity,
    ) -> impl std::future::Future<Output = Result<Vec<Contact>, ApiError>> + Send;

    /// Persisted messages of one conversation.
    fn message_history(
        &self,
        counterparty: &CounterpartyId,
        identity: &Identity,
    ) -> impl std::future::Future<Output = Result<Vec<HistoryMessage>, ApiError>> + Send;

    /// Store a new message. The response carries the server-assigned id.
    fn send_message(
        &self,
        request: &SendMessageRequest,
    ) -> impl std::future::Future<Output = Result<SendMessageResponse, ApiError>> + Send;

    /// Post a read receipt. Posting it twice is harmless.
    fn mark_read(
        &self,
        request: &MarkReadRequest,
    ) -> impl std::future::Future<Output = Result<(), ApiError>> + Send;
}
