//! Per-conversation message store with optimistic inserts.
//!
//! Each conversation is a map from [`MessageKey`] (the server id once
//! known, the temporary id before) to its message, so a logical message
//! can occupy at most one slot. The HTTP send response and the push echo
//! of the same message may arrive in either order; both paths meet in the
//! same temp-to-server promotion and the loser becomes a no-op.
//!
//! Display order is timestamp descending, ties broken by insertion sequence
//! descending, so equal timestamps never swap between renders.

use std::cmp::Reverse;
use std::collections::HashMap;

use fleetchat_proto::api::HistoryMessage;
use fleetchat_proto::message::{
    CounterpartyId, MessageId, MessageStatus, SenderRole, TempId, Timestamp,
};
use fleetchat_proto::push::InboundMessage;

/// Resolved key of a message: its server id if assigned, else its temp id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// Acknowledged by the server.
    Server(MessageId),
    /// Not (successfully) acknowledged yet.
    Temp(TempId),
}

/// A message as held by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMessage {
    key: MessageKey,
    seq: u64,
    /// Message text.
    pub text: String,
    /// Which side authored it.
    pub sender: SenderRole,
    /// The conversation it belongs to.
    pub counterparty_id: CounterpartyId,
    /// The specific author.
    pub author_id: String,
    /// Creation time, used for ordering.
    pub timestamp: Timestamp,
    /// Client-local delivery state.
    pub status: MessageStatus,
}

impl LocalMessage {
    /// Server-assigned id, once acknowledged.
    #[must_use]
    pub const fn id(&self) -> Option<MessageId> {
        match self.key {
            MessageKey::Server(id) => Some(id),
            MessageKey::Temp(_) => None,
        }
    }

    /// Temporary id, while unacknowledged (kept on failure).
    #[must_use]
    pub const fn temp_id(&self) -> Option<&TempId> {
        match &self.key {
            MessageKey::Server(_) => None,
            MessageKey::Temp(temp) => Some(temp),
        }
    }

    /// The resolved key.
    #[must_use]
    pub const fn key(&self) -> &MessageKey {
        &self.key
    }
}

/// Result of [`MessageStore::insert_optimistic`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new `sending` message was added under this temp id.
    Inserted(TempId),
    /// An equivalent message is already pending under this temp id.
    Duplicate(TempId),
}

impl InsertOutcome {
    /// The temp id either way.
    #[must_use]
    pub const fn temp_id(&self) -> &TempId {
        match self {
            Self::Inserted(temp) | Self::Duplicate(temp) => temp,
        }
    }
}

/// Result of [`MessageStore::append_from_push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The message was new and has been added.
    Appended,
    /// The push resolved one of our own pending messages.
    Reconciled,
    /// Already present; nothing changed.
    Duplicate,
}

#[derive(Debug, Default)]
struct Thread {
    entries: HashMap<MessageKey, LocalMessage>,
}

impl Thread {
    fn pending(&self, temp: &TempId) -> Option<&LocalMessage> {
        self.entries
            .get(&MessageKey::Temp(temp.clone()))
            .filter(|m| !m.status.is_terminal())
    }

    /// Move a pending message from its temp key to `id`.
    ///
    /// Keeps the local timestamp and sequence. If `id` is already present
    /// the pending copy is simply dropped.
    fn promote(&mut self, temp: &TempId, id: MessageId) -> bool {
        let temp_key = MessageKey::Temp(temp.clone());
        if self.pending(temp).is_none() {
            return false;
        }
        let Some(mut message) = self.entries.remove(&temp_key) else {
            return false;
        };
        let server_key = MessageKey::Server(id);
        if !self.entries.contains_key(&server_key) {
            message.key = server_key.clone();
            message.status = MessageStatus::Sent;
            self.entries.insert(server_key, message);
        }
        true
    }
}

/// In-memory store of every conversation's messages.
#[derive(Debug)]
pub struct MessageStore {
    local_role: SenderRole,
    threads: HashMap<CounterpartyId, Thread>,
    /// Which conversation a temp id was inserted into.
    temp_owner: HashMap<TempId, CounterpartyId>,
    next_seq: u64,
}

impl MessageStore {
    /// Create an empty store for a client acting as `local_role`.
    #[must_use]
    pub fn new(local_role: SenderRole) -> Self {
        Self {
            local_role,
            threads: HashMap::new(),
            temp_owner: HashMap::new(),
            next_seq: 0,
        }
    }

    const fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Add a `sending` message with a fresh temp id and the current time.
    pub fn insert_optimistic(
        &mut self,
        conversation: &CounterpartyId,
        text: &str,
        author_id: &str,
    ) -> InsertOutcome {
        self.insert_optimistic_with(
            conversation,
            TempId::generate(),
            text,
            author_id,
            Timestamp::now(),
        )
    }

    /// Like [`insert_optimistic`](Self::insert_optimistic) with a caller-chosen
    /// temp id and timestamp.
    ///
    /// Nothing is inserted if the conversation already holds `temp`, or
    /// holds a still-`sending` message with the same text from the same side
    /// (a double submit); the existing temp id is returned instead.
    pub fn insert_optimistic_with(
        &mut self,
        conversation: &CounterpartyId,
        temp: TempId,
        text: &str,
        author_id: &str,
        timestamp: Timestamp,
    ) -> InsertOutcome {
        let local_role = self.local_role;
        let seq = self.bump_seq();
        let thread = self.threads.entry(conversation.clone()).or_default();

        let key = MessageKey::Temp(temp.clone());
        if thread.entries.contains_key(&key) {
            return InsertOutcome::Duplicate(temp);
        }
        let double_submit = thread.entries.values().find_map(|m| {
            (m.status == MessageStatus::Sending && m.sender == local_role && m.text == text)
                .then(|| m.temp_id().cloned())
                .flatten()
        });
        if let Some(existing) = double_submit {
            tracing::debug!(temp_id = %existing, "suppressed duplicate optimistic insert");
            return InsertOutcome::Duplicate(existing);
        }

        thread.entries.insert(
            key.clone(),
            LocalMessage {
                key,
                seq,
                text: text.to_string(),
                sender: local_role,
                counterparty_id: conversation.clone(),
                author_id: author_id.to_string(),
                timestamp,
                status: MessageStatus::Sending,
            },
        );
        self.temp_owner.insert(temp.clone(), conversation.clone());
        InsertOutcome::Inserted(temp)
    }

    /// Record the server id for a pending message.
    ///
    /// Returns the owning conversation when something changed. Unknown,
    /// already reconciled and failed temp ids are a no-op.
    pub fn reconcile(&mut self, temp: &TempId, id: MessageId) -> Option<CounterpartyId> {
        let conversation = self.temp_owner.get(temp)?.clone();
        let thread = self.threads.get_mut(&conversation)?;
        if !thread.promote(temp, id) {
            return None;
        }
        self.temp_owner.remove(temp);
        Some(conversation)
    }

    /// Mark a pending message as failed. It stays visible.
    ///
    /// Returns `false` if no `sending` message has this temp id.
    pub fn mark_failed(&mut self, temp: &TempId) -> bool {
        let Some(conversation) = self.temp_owner.get(temp) else {
            return false;
        };
        let Some(message) = self
            .threads
            .get_mut(conversation)
            .and_then(|t| t.entries.get_mut(&MessageKey::Temp(temp.clone())))
        else {
            return false;
        };
        if message.status.is_terminal() {
            return false;
        }
        message.status = MessageStatus::Failed;
        true
    }

    /// Merge a server history page into a conversation.
    ///
    /// Messages already present by server id are skipped. A message carrying
    /// the temp id of one of our entries resolves that entry instead: a
    /// pending one is promoted, a failed one stays as it is. Returns how
    /// many entries were added or promoted.
    pub fn merge_incoming(
        &mut self,
        conversation: &CounterpartyId,
        messages: Vec<HistoryMessage>,
    ) -> usize {
        let mut added = 0;
        for message in messages {
            let key = MessageKey::Server(message.id);
            if let Some(thread) = self.threads.get_mut(conversation) {
                if let Some(temp) = message.temp_id.as_ref() {
                    if thread.entries.contains_key(&MessageKey::Temp(temp.clone())) {
                        if thread.promote(temp, message.id) {
                            self.temp_owner.remove(temp);
                            added += 1;
                        }
                        continue;
                    }
                }
                if thread.entries.contains_key(&key) {
                    continue;
                }
            }
            let seq = self.bump_seq();
            self.threads
                .entry(conversation.clone())
                .or_default()
                .entries
                .insert(
                    key.clone(),
                    LocalMessage {
                        key,
                        seq,
                        text: message.text,
                        sender: message.sender,
                        counterparty_id: conversation.clone(),
                        author_id: message.author_id,
                        timestamp: message.timestamp,
                        status: MessageStatus::Sent,
                    },
                );
            added += 1;
        }
        added
    }

    /// Apply a pushed message.
    ///
    /// Deduplicates by server id first, then by the echoed temp id: a push
    /// carrying the temp id of one of our pending messages resolves that
    /// message instead of adding a second copy.
    pub fn append_from_push(
        &mut self,
        conversation: &CounterpartyId,
        message: &InboundMessage,
    ) -> PushOutcome {
        let server_key = MessageKey::Server(message.message_id);
        let echoed = message.temp_id.as_ref();

        if let Some(thread) = self.threads.get_mut(conversation) {
            if let Some(temp) = echoed {
                let temp_key = MessageKey::Temp(temp.clone());
                if thread.entries.contains_key(&temp_key) {
                    if thread.promote(temp, message.message_id) {
                        self.temp_owner.remove(temp);
                        return PushOutcome::Reconciled;
                    }
                    // A failed send stays failed.
                    return PushOutcome::Duplicate;
                }
            }
            if thread.entries.contains_key(&server_key) {
                return PushOutcome::Duplicate;
            }
        }

        let seq = self.bump_seq();
        self.threads
            .entry(conversation.clone())
            .or_default()
            .entries
            .insert(
                server_key.clone(),
                LocalMessage {
                    key: server_key,
                    seq,
                    text: message.text.clone(),
                    sender: message.sender,
                    counterparty_id: conversation.clone(),
                    author_id: message.author_id.clone(),
                    timestamp: message.timestamp,
                    status: MessageStatus::Sent,
                },
            );
        PushOutcome::Appended
    }

    /// A conversation's messages, newest first.
    #[must_use]
    pub fn messages(&self, conversation: &CounterpartyId) -> Vec<&LocalMessage> {
        let Some(thread) = self.threads.get(conversation) else {
            return Vec::new();
        };
        let mut list: Vec<&LocalMessage> = thread.entries.values().collect();
        list.sort_by_key(|m| Reverse((m.timestamp, m.seq)));
        list
    }

    /// Number of messages in a conversation.
    #[must_use]
    pub fn len(&self, conversation: &CounterpartyId) -> usize {
        self.threads
            .get(conversation)
            .map_or(0, |t| t.entries.len())
    }

    /// Whether a conversation holds any message.
    #[must_use]
    pub fn has_messages(&self, conversation: &CounterpartyId) -> bool {
        self.len(conversation) > 0
    }

    /// Look up a message that still carries `temp`.
    #[must_use]
    pub fn find_by_temp(&self, temp: &TempId) -> Option<&LocalMessage> {
        let conversation = self.temp_owner.get(temp)?;
        self.threads
            .get(conversation)?
            .entries
            .get(&MessageKey::Temp(temp.clone()))
    }

    /// Look up an acknowledged message.
    #[must_use]
    pub fn find_by_id(&self, conversation: &CounterpartyId, id: MessageId) -> Option<&LocalMessage> {
        self.threads
            .get(conversation)?
            .entries
            .get(&MessageKey::Server(id))
    }
}
