//! Notification Dispatcher: the single entry point for inbound pushes.
//!
//! Applies a `new_counterparty_message` event to the message store and the
//! conversation directory, rings the injected [`Alert`], and reports which
//! follow-up effects the session must run.

use std::io::Write;

use fleetchat_proto::message::{CounterpartyId, SenderRole};
use fleetchat_proto::push::InboundMessage;

use super::directory::ConversationDirectory;
use super::store::{MessageStore, PushOutcome};

/// Errors an [`Alert`] may report. They are never propagated.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// No output device is available.
    #[error("alert unavailable: {0}")]
    Unavailable(String),

    /// Writing the alert failed.
    #[error("alert I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Perceptible feedback for a new inbound message.
pub trait Alert: Send + 'static {
    /// Play the alert once.
    ///
    /// # Errors
    ///
    /// Returns an [`AlertError`] if the alert could not be played.
    fn play(&self) -> Result<(), AlertError>;
}

/// Rings the terminal bell on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalBell;

impl Alert for TerminalBell {
    fn play(&self) -> Result<(), AlertError> {
        let mut stderr = std::io::stderr().lock();
        stderr.write_all(b"\x07")?;
        stderr.flush()?;
        Ok(())
    }
}

/// Does nothing. For tests and headless use.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentAlert;

impl Alert for SilentAlert {
    fn play(&self) -> Result<(), AlertError> {
        Ok(())
    }
}

/// What [`NotificationDispatcher::dispatch`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    /// Conversation the event belongs to.
    pub counterparty_id: CounterpartyId,
    /// How the message store absorbed it.
    pub outcome: PushOutcome,
    /// Whether the event raised the conversation's unread counter.
    pub counted_unread: bool,
    /// The event is for the active conversation.
    pub scroll_to_latest: bool,
    /// The summaries should be refetched.
    pub refresh_summaries: bool,
}

/// Fans inbound events out to the store and directory.
pub struct NotificationDispatcher<A> {
    alert: A,
    local_role: SenderRole,
}

impl<A: Alert> NotificationDispatcher<A> {
    /// Dispatcher for a client acting as `local_role`.
    pub const fn new(alert: A, local_role: SenderRole) -> Self {
        Self { alert, local_role }
    }

    /// Apply one inbound event.
    ///
    /// Malformed events are logged and dropped (`None`). Events authored by
    /// our own side (our echoes, colleagues' replies) are stored but do not
    /// count as unread or ring the alert.
    pub fn dispatch(
        &self,
        message: &InboundMessage,
        store: &mut MessageStore,
        directory: &mut ConversationDirectory,
    ) -> Option<Dispatched> {
        if let Err(reason) = message.validate() {
            tracing::warn!(
                %reason,
                message_id = %message.message_id,
                "dropping malformed push event"
            );
            return None;
        }

        let conversation = &message.counterparty_id;
        let outcome = store.append_from_push(conversation, message);
        directory.note_activity(conversation, &message.text, message.timestamp);

        let from_counterparty = message.sender != self.local_role;
        let counted_unread = from_counterparty
            && outcome == PushOutcome::Appended
            && directory.record_inbound_unread(conversation);

        if from_counterparty && outcome == PushOutcome::Appended {
            if let Err(e) = self.alert.play() {
                tracing::debug!(err = %e, "alert failed, continuing");
            }
        }

        tracing::debug!(
            counterparty = %conversation,
            message_id = %message.message_id,
            ?outcome,
            counted_unread,
            "push event dispatched"
        );

        Some(Dispatched {
            counterparty_id: conversation.clone(),
            outcome,
            counted_unread,
            scroll_to_latest: directory.active() == Some(conversation),
            refresh_summaries: true,
        })
    }
}
