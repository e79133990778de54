//! In-process [`ChatApi`] backend for tests and offline demos.
//!
//! Assigns sequential message ids, records every send and read receipt,
//! and can be told to fail sends or to hold them until released (to
//! reproduce a push echo overtaking the HTTP response).

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;

use fleetchat_proto::api::{
    Contact, ConversationSummary, HistoryMessage, MarkReadRequest, SendMessageRequest,
    SendMessageResponse,
};
use fleetchat_proto::message::{CounterpartyId, Identity, MessageId, Timestamp};

use super::{ApiError, ChatApi};

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    summaries: Vec<ConversationSummary>,
    contacts: Vec<Contact>,
    history: HashMap<CounterpartyId, Vec<HistoryMessage>>,
    send_failure: Option<ApiError>,
    sent: Vec<SendMessageRequest>,
    read_receipts: Vec<MarkReadRequest>,
    summary_calls: usize,
}

/// Thread-safe in-memory chat backend.
pub struct InMemoryChatApi {
    inner: Mutex<Inner>,
    /// Sends wait until this is `true`.
    send_gate: watch::Sender<bool>,
}

impl Default for InMemoryChatApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryChatApi {
    /// Create an empty backend whose first assigned id is 1.
    #[must_use]
    pub fn new() -> Self {
        let (send_gate, _) = watch::channel(true);
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                ..Inner::default()
            }),
            send_gate,
        }
    }

    /// Start id assignment at `first_id`.
    #[must_use]
    pub fn starting_at(self, first_id: u64) -> Self {
        self.inner.lock().next_id = first_id;
        self
    }

    /// Seed the contacts directory.
    #[must_use]
    pub fn with_contacts(self, contacts: Vec<Contact>) -> Self {
        self.inner.lock().contacts = contacts;
        self
    }

    /// Seed the conversation summaries.
    #[must_use]
    pub fn with_summaries(self, summaries: Vec<ConversationSummary>) -> Self {
        self.inner.lock().summaries = summaries;
        self
    }

    /// Seed one conversation's history.
    #[must_use]
    pub fn with_history(self, counterparty: CounterpartyId, messages: Vec<HistoryMessage>) -> Self {
        self.inner.lock().history.insert(counterparty, messages);
        self
    }

    /// Replace the summaries returned by subsequent calls.
    pub fn set_summaries(&self, summaries: Vec<ConversationSummary>) {
        self.inner.lock().summaries = summaries;
    }

    /// Make every subsequent send fail with `error` (or succeed again with `None`).
    pub fn fail_sends(&self, error: Option<ApiError>) {
        self.inner.lock().send_failure = error;
    }

    /// Hold sends until [`release_sends`](Self::release_sends) is called.
    pub fn hold_sends(&self) {
        self.send_gate.send_replace(false);
    }

    /// Let held sends (and future ones) complete.
    pub fn release_sends(&self) {
        self.send_gate.send_replace(true);
    }

    /// Every send request received so far, in arrival order.
    #[must_use]
    pub fn sent_requests(&self) -> Vec<SendMessageRequest> {
        self.inner.lock().sent.clone()
    }

    /// Every read receipt received so far, in arrival order.
    #[must_use]
    pub fn read_receipts(&self) -> Vec<MarkReadRequest> {
        self.inner.lock().read_receipts.clone()
    }

    /// How many times summaries were requested.
    #[must_use]
    pub fn summary_calls(&self) -> usize {
        self.inner.lock().summary_calls
    }
}

impl ChatApi for InMemoryChatApi {
    async fn conversation_summaries(
        &self,
        _identity: &Identity,
    ) -> Result<Vec<ConversationSummary>, ApiError> {
        let mut inner = self.inner.lock();
        inner.summary_calls += 1;
        Ok(inner.summaries.clone())
    }

    async fn contacts(&self, _identity: &Identity) -> Result<Vec<Contact>, ApiError> {
        Ok(self.inner.lock().contacts.clone())
    }

    async fn message_history(
        &self,
        counterparty: &CounterpartyId,
        _identity: &Identity,
    ) -> Result<Vec<HistoryMessage>, ApiError> {
        Ok(self
            .inner
            .lock()
            .history
            .get(counterparty)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        request: &SendMessageRequest,
    ) -> Result<SendMessageResponse, ApiError> {
        let mut gate = self.send_gate.subscribe();
        // The sender half lives in `self`, so the channel cannot close here.
        let _ = gate.wait_for(|open| *open).await;

        let mut inner = self.inner.lock();
        inner.sent.push(request.clone());
        if let Some(err) = inner.send_failure.clone() {
            return Err(err);
        }
        let id = MessageId::new(inner.next_id);
        inner.next_id += 1;
        inner
            .history
            .entry(request.counterparty_id.clone())
            .or_default()
            .push(HistoryMessage {
                id,
                counterparty_id: request.counterparty_id.clone(),
                text: request.text.clone(),
                sender: request.sender_role,
                author_id: request.sender_id.clone(),
                timestamp: Timestamp::now(),
                temp_id: request.temp_id.clone(),
            });
        drop(inner);
        Ok(SendMessageResponse { message_id: id })
    }

    async fn mark_read(&self, request: &MarkReadRequest) -> Result<(), ApiError> {
        self.inner.lock().read_receipts.push(request.clone());
        Ok(())
    }
}
