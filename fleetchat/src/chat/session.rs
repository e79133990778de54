//! Chat Session Controller as a synchronous state machine.
//!
//! Every user action and every completion is a method call that mutates
//! the store and directory and returns the [`Effect`]s to perform. The
//! caller (see [`super::driver`]) runs the effects, which are all network
//! calls or UI hints, and feeds results back in. Nothing here awaits.

use fleetchat_proto::api::{
    Contact, ConversationSummary, HistoryMessage, MarkReadRequest, SendMessageRequest,
    SendMessageResponse,
};
use fleetchat_proto::message::{
    CounterpartyId, Identity, TempId, ValidationError, validate_text,
};
use fleetchat_proto::push::InboundMessage;

use super::directory::ConversationDirectory;
use super::dispatcher::{Alert, NotificationDispatcher};
use super::store::{InsertOutcome, LocalMessage, MessageStore, PushOutcome};
use crate::api::ApiError;

/// Side effects requested by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Load a conversation's history and feed it to
    /// [`ChatSession::apply_history`].
    FetchHistory {
        /// Conversation to load.
        counterparty_id: CounterpartyId,
    },
    /// Post a message and feed the result to [`ChatSession::complete_send`].
    Send {
        /// Local correlation key.
        temp_id: TempId,
        /// Request body.
        request: SendMessageRequest,
    },
    /// Post a read receipt, then report back through
    /// [`ChatSession::complete_mark_read`].
    MarkRead(MarkReadRequest),
    /// Reload summaries, taking a [`ChatSession::summary_ticket`] first, and
    /// feed them to [`ChatSession::apply_summaries`].
    RefreshSummaries,
    /// Scroll the message view to the newest message.
    ScrollToLatest {
        /// Conversation on screen.
        counterparty_id: CounterpartyId,
    },
}

/// Why [`ChatSession::send_message`] refused to send.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendRejected {
    /// Text is empty after trimming.
    #[error("message text is empty")]
    EmptyText,
    /// Text exceeds the size limit.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Trimmed size in bytes.
        size: usize,
        /// Limit in bytes.
        max: usize,
    },
    /// No conversation is selected.
    #[error("no conversation selected")]
    NoConversation,
    /// The logged-in identity has no id.
    #[error("no identity available")]
    MissingIdentity,
}

impl From<ValidationError> for SendRejected {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Empty => Self::EmptyText,
            ValidationError::TooLarge { size, max } => Self::TooLarge { size, max },
        }
    }
}

/// Client-side chat state for one logged-in identity.
pub struct ChatSession<A> {
    identity: Identity,
    display_name: String,
    store: MessageStore,
    directory: ConversationDirectory,
    dispatcher: NotificationDispatcher<A>,
}

impl<A: Alert> ChatSession<A> {
    /// New session with the panel closed and nothing selected.
    pub fn new(identity: Identity, display_name: impl Into<String>, alert: A) -> Self {
        let role = identity.role;
        Self {
            identity,
            display_name: display_name.into(),
            store: MessageStore::new(role),
            directory: ConversationDirectory::new(),
            dispatcher: NotificationDispatcher::new(alert, role),
        }
    }

    /// The logged-in identity.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Read access to the message store.
    #[must_use]
    pub const fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Read access to the directory.
    #[must_use]
    pub const fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }

    /// Write access to the directory (view and search state).
    pub const fn directory_mut(&mut self) -> &mut ConversationDirectory {
        &mut self.directory
    }

    /// Messages of the active conversation, newest first.
    #[must_use]
    pub fn active_messages(&self) -> Vec<&LocalMessage> {
        self.directory
            .active()
            .map(|id| self.store.messages(id))
            .unwrap_or_default()
    }

    fn mark_read_request(&self, counterparty_id: &CounterpartyId) -> MarkReadRequest {
        MarkReadRequest {
            counterparty_id: counterparty_id.clone(),
            identity: self.identity.clone(),
        }
    }

    /// Show the chat panel.
    ///
    /// An already selected conversation is re-selected: its unread counter
    /// is reset and a read receipt goes out.
    pub fn open_panel(&mut self) -> Vec<Effect> {
        self.directory.set_panel_open(true);
        let Some(active) = self.directory.active().cloned() else {
            return Vec::new();
        };
        self.directory.select(&active);
        vec![
            Effect::MarkRead(self.mark_read_request(&active)),
            Effect::ScrollToLatest {
                counterparty_id: active,
            },
        ]
    }

    /// Hide the chat panel. The selection is kept.
    pub const fn close_panel(&mut self) {
        self.directory.set_panel_open(false);
    }

    /// Make a conversation active, load its history and mark it read.
    pub fn select_conversation(&mut self, counterparty_id: &CounterpartyId) -> Vec<Effect> {
        self.directory.select(counterparty_id);
        vec![
            Effect::FetchHistory {
                counterparty_id: counterparty_id.clone(),
            },
            Effect::MarkRead(self.mark_read_request(counterparty_id)),
            Effect::ScrollToLatest {
                counterparty_id: counterparty_id.clone(),
            },
        ]
    }

    /// Post a read receipt for the active conversation. Idempotent.
    pub fn mark_conversation_read(&mut self) -> Vec<Effect> {
        let Some(active) = self.directory.active().cloned() else {
            return Vec::new();
        };
        self.directory.mark_read(&active);
        vec![Effect::MarkRead(self.mark_read_request(&active))]
    }

    /// Send `text` to the active conversation.
    ///
    /// The message appears immediately as `sending`. A double submit of a
    /// still pending message yields no effects.
    ///
    /// # Errors
    ///
    /// Returns a [`SendRejected`] reason before any state changes if the
    /// text is empty or too large, nothing is selected, or the identity is
    /// unusable.
    pub fn send_message(&mut self, text: &str) -> Result<Vec<Effect>, SendRejected> {
        let text = validate_text(text)?;
        let Some(conversation) = self.directory.active().cloned() else {
            return Err(SendRejected::NoConversation);
        };
        if self.identity.is_blank() {
            return Err(SendRejected::MissingIdentity);
        }

        let temp_id = match self
            .store
            .insert_optimistic(&conversation, &text, &self.identity.id)
        {
            InsertOutcome::Inserted(temp) => temp,
            InsertOutcome::Duplicate(temp) => {
                tracing::debug!(temp_id = %temp, "ignoring double submit");
                return Ok(Vec::new());
            }
        };

        tracing::debug!(counterparty = %conversation, temp_id = %temp_id, "message queued");
        let request = SendMessageRequest {
            counterparty_id: conversation.clone(),
            text,
            sender_id: self.identity.id.clone(),
            sender_name: self.display_name.clone(),
            sender_role: self.identity.role,
            temp_id: Some(temp_id.clone()),
        };
        Ok(vec![
            Effect::Send { temp_id, request },
            Effect::ScrollToLatest {
                counterparty_id: conversation,
            },
        ])
    }

    /// Apply the outcome of a send request.
    ///
    /// Success assigns the server id (a no-op if the push echo already did);
    /// any error marks the message `failed`.
    pub fn complete_send(
        &mut self,
        temp_id: &TempId,
        result: Result<SendMessageResponse, ApiError>,
    ) -> Vec<Effect> {
        match result {
            Ok(response) => {
                if let Some(conversation) = self.store.reconcile(temp_id, response.message_id) {
                    if let Some(sent) = self.store.find_by_id(&conversation, response.message_id) {
                        let (text, at) = (sent.text.clone(), sent.timestamp);
                        self.directory.note_activity(&conversation, &text, at);
                    }
                    tracing::info!(
                        %temp_id,
                        message_id = %response.message_id,
                        "message sent"
                    );
                }
                vec![Effect::RefreshSummaries]
            }
            Err(e) => {
                if self.store.mark_failed(temp_id) {
                    tracing::warn!(%temp_id, err = %e, "message send failed");
                }
                Vec::new()
            }
        }
    }

    /// Merge a loaded history page. Returns whether anything was added.
    pub fn apply_history(
        &mut self,
        counterparty_id: &CounterpartyId,
        messages: Vec<HistoryMessage>,
    ) -> bool {
        let latest = messages
            .iter()
            .max_by_key(|m| m.timestamp)
            .map(|m| (m.text.clone(), m.timestamp));
        let added = self.store.merge_incoming(counterparty_id, messages);
        if let Some((text, at)) = latest {
            self.directory.note_activity(counterparty_id, &text, at);
        }
        added > 0
    }

    /// Ticket to record when a summary request is issued.
    #[must_use]
    pub const fn summary_ticket(&self) -> u64 {
        self.directory.summary_ticket()
    }

    /// Merge server summaries requested at `ticket` into the directory.
    pub fn apply_summaries(&mut self, ticket: u64, summaries: Vec<ConversationSummary>) {
        self.directory.merge_summaries_since(ticket, summaries);
    }

    /// A read receipt request finished; later summaries may overwrite the
    /// local count again.
    pub fn complete_mark_read(&mut self, counterparty_id: &CounterpartyId) {
        self.directory.confirm_read(counterparty_id);
    }

    /// Replace the contacts directory.
    pub fn apply_contacts(&mut self, contacts: Vec<Contact>) {
        self.directory.set_contacts(contacts);
    }

    /// Apply a push event; see [`NotificationDispatcher::dispatch`].
    ///
    /// A new counterparty message arriving in the conversation on screen is
    /// acknowledged with a read receipt straight away.
    pub fn handle_push(&mut self, message: &InboundMessage) -> Vec<Effect> {
        let Some(done) = self
            .dispatcher
            .dispatch(message, &mut self.store, &mut self.directory)
        else {
            return Vec::new();
        };

        let mut effects = Vec::new();
        let seen_on_arrival = message.sender != self.identity.role
            && done.outcome == PushOutcome::Appended
            && self.directory.is_viewing(&done.counterparty_id);
        if seen_on_arrival {
            effects.push(Effect::MarkRead(self.mark_read_request(&done.counterparty_id)));
        }
        if done.scroll_to_latest {
            effects.push(Effect::ScrollToLatest {
                counterparty_id: done.counterparty_id,
            });
        }
        if done.refresh_summaries {
            effects.push(Effect::RefreshSummaries);
        }
        effects
    }
}
