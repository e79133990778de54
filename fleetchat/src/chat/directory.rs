//! Conversation directory: known conversations, unread counters, search.
//!
//! The aggregate badge is recomputed from the per-conversation counters at
//! the end of every mutating call, so the two can never drift apart.

use std::collections::{HashMap, HashSet};

use fleetchat_proto::api::{Contact, ConversationSummary};
use fleetchat_proto::message::{CounterpartyId, Timestamp};

/// One conversation, keyed by the customer id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// Primary key.
    pub counterparty_id: CounterpartyId,
    /// Display name.
    pub counterparty_name: String,
    /// Email or phone.
    pub counterparty_contact: String,
    /// Unseen inbound messages.
    pub unread_count: u32,
    /// Whether at least one message exists.
    pub has_history: bool,
    /// Preview of the latest message, if known.
    pub last_message: Option<String>,
    /// Time of the latest message, if known.
    pub last_activity: Option<Timestamp>,
}

impl Conversation {
    fn placeholder(counterparty_id: CounterpartyId, contact: Option<&Contact>) -> Self {
        let (name, contact) = contact.map_or_else(
            || (counterparty_id.to_string(), String::new()),
            |c| (c.name.clone(), c.contact.clone()),
        );
        Self {
            counterparty_id,
            counterparty_name: name,
            counterparty_contact: contact,
            unread_count: 0,
            has_history: false,
            last_message: None,
            last_activity: None,
        }
    }
}

/// Which list [`ConversationDirectory::filter`] searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListView {
    /// Conversations with at least one message.
    #[default]
    History,
    /// Every permissible contact ("start new chat").
    Contacts,
}

/// A row of the rendered conversation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Conversation key.
    pub counterparty_id: CounterpartyId,
    /// Display name.
    pub name: String,
    /// Email or phone.
    pub contact: String,
    /// Unread counter (0 for contacts without a conversation).
    pub unread_count: u32,
    /// Whether the conversation has messages.
    pub has_history: bool,
}

impl From<&Conversation> for DirectoryEntry {
    fn from(c: &Conversation) -> Self {
        Self {
            counterparty_id: c.counterparty_id.clone(),
            name: c.counterparty_name.clone(),
            contact: c.counterparty_contact.clone(),
            unread_count: c.unread_count,
            has_history: c.has_history,
        }
    }
}

/// Result of [`ConversationDirectory::select`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectOutcome {
    /// The conversation did not exist before.
    pub created: bool,
    /// Unread messages cleared by the selection.
    pub cleared_unread: u32,
}

/// A local read the server may not know about yet.
#[derive(Debug, Clone, Copy)]
struct ReadMark {
    /// Read clock value when the read happened.
    at: u64,
    /// The read receipt request has completed.
    confirmed: bool,
}

/// Every conversation the logged-in identity knows about.
#[derive(Debug, Default)]
pub struct ConversationDirectory {
    conversations: HashMap<CounterpartyId, Conversation>,
    /// Local reads that in-flight summaries might predate.
    reads: HashMap<CounterpartyId, ReadMark>,
    read_clock: u64,
    /// Display order of the history list; server order first.
    history_order: Vec<CounterpartyId>,
    contacts: Vec<Contact>,
    active: Option<CounterpartyId>,
    panel_open: bool,
    view: ListView,
    badge: u32,
}

impl ConversationDirectory {
    /// Create an empty directory (panel closed, nothing selected).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn recompute_badge(&mut self) {
        self.badge = self
            .conversations
            .values()
            .fold(0u32, |sum, c| sum.saturating_add(c.unread_count));
    }

    fn contact(&self, id: &CounterpartyId) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.id == *id)
    }

    fn ensure(&mut self, id: &CounterpartyId) -> bool {
        if self.conversations.contains_key(id) {
            return false;
        }
        let conversation = Conversation::placeholder(id.clone(), self.contact(id));
        self.conversations.insert(id.clone(), conversation);
        true
    }

    /// Replace the contacts directory.
    ///
    /// Fills in display metadata of conversations created before their
    /// contact was known.
    pub fn set_contacts(&mut self, contacts: Vec<Contact>) {
        for contact in &contacts {
            if let Some(c) = self.conversations.get_mut(&contact.id) {
                if c.counterparty_name == c.counterparty_id.as_str() {
                    c.counterparty_name.clone_from(&contact.name);
                }
                if c.counterparty_contact.is_empty() {
                    c.counterparty_contact.clone_from(&contact.contact);
                }
            }
        }
        self.contacts = contacts;
    }

    /// Every counterparty the identity may contact.
    #[must_use]
    pub fn list_known_contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// Conversations with at least one message, in display order.
    #[must_use]
    pub fn list_with_history(&self) -> Vec<&Conversation> {
        self.history_order
            .iter()
            .filter_map(|id| self.conversations.get(id))
            .filter(|c| c.has_history)
            .collect()
    }

    fn note_read(&mut self, id: &CounterpartyId) {
        self.read_clock += 1;
        self.reads.insert(
            id.clone(),
            ReadMark {
                at: self.read_clock,
                confirmed: false,
            },
        );
    }

    /// Ticket to pass to [`merge_summaries_since`](Self::merge_summaries_since)
    /// for a summary request issued now.
    #[must_use]
    pub const fn summary_ticket(&self) -> u64 {
        self.read_clock
    }

    /// The read receipt for `id` has completed (successfully or not).
    pub fn confirm_read(&mut self, id: &CounterpartyId) {
        if let Some(mark) = self.reads.get_mut(id) {
            mark.confirmed = true;
        }
    }

    /// Merge server summaries requested right now. Safe to call redundantly.
    pub fn merge_summaries(&mut self, summaries: Vec<ConversationSummary>) {
        self.merge_summaries_since(self.read_clock, summaries);
    }

    /// Merge server summaries requested at `ticket`.
    ///
    /// The server's unread counts win, except for the conversation being
    /// viewed, which stays at zero, and conversations read locally after the
    /// request was issued or whose read receipt is still in flight, which
    /// keep their local count.
    pub fn merge_summaries_since(&mut self, ticket: u64, summaries: Vec<ConversationSummary>) {
        let mut order = Vec::with_capacity(summaries.len());
        let mut seen = HashSet::new();

        for summary in summaries {
            let id = summary.counterparty_id;
            if !seen.insert(id.clone()) {
                continue;
            }
            let viewing = self.is_viewing(&id);
            let stale = self
                .reads
                .get(&id)
                .is_some_and(|mark| !mark.confirmed || mark.at > ticket);
            let conversation = self
                .conversations
                .entry(id.clone())
                .or_insert_with(|| Conversation::placeholder(id.clone(), None));
            conversation.counterparty_name = summary.counterparty_name;
            conversation.counterparty_contact = summary.counterparty_contact;
            conversation.has_history = true;
            if viewing {
                conversation.unread_count = 0;
            } else if !stale {
                conversation.unread_count = summary.unread_count;
            }
            if summary.last_message.is_some() {
                conversation.last_message = summary.last_message;
            }
            if summary.last_activity.is_some() {
                conversation.last_activity = summary.last_activity;
            }
            order.push(id);
        }

        // Conversations the server did not list yet keep their place after it.
        for id in std::mem::take(&mut self.history_order) {
            if !seen.contains(&id) {
                seen.insert(id.clone());
                order.push(id);
            }
        }
        self.history_order = order;
        self.reads.retain(|_, mark| !mark.confirmed || mark.at > ticket);
        self.recompute_badge();
    }

    /// Switch the list [`filter`](Self::filter) searches.
    pub const fn set_view(&mut self, view: ListView) {
        self.view = view;
    }

    /// The list currently shown.
    #[must_use]
    pub const fn view(&self) -> ListView {
        self.view
    }

    /// Case-insensitive substring search on display name over the current view.
    ///
    /// An empty query returns the whole list.
    #[must_use]
    pub fn filter(&self, query: &str) -> Vec<DirectoryEntry> {
        let needle = query.trim().to_lowercase();
        let hit = |name: &str| needle.is_empty() || name.to_lowercase().contains(&needle);

        match self.view {
            ListView::History => self
                .list_with_history()
                .into_iter()
                .filter(|c| hit(&c.counterparty_name))
                .map(DirectoryEntry::from)
                .collect(),
            ListView::Contacts => self
                .contacts
                .iter()
                .filter(|c| hit(&c.name))
                .map(|contact| {
                    let known = self.conversations.get(&contact.id);
                    DirectoryEntry {
                        counterparty_id: contact.id.clone(),
                        name: contact.name.clone(),
                        contact: contact.contact.clone(),
                        unread_count: known.map_or(0, |c| c.unread_count),
                        has_history: known.is_some_and(|c| c.has_history),
                    }
                })
                .collect(),
        }
    }

    /// The current view's full list.
    #[must_use]
    pub fn entries(&self) -> Vec<DirectoryEntry> {
        self.filter("")
    }

    /// Make a conversation active and clear its unread counter.
    ///
    /// First-time conversations are created with `has_history = false`.
    pub fn select(&mut self, id: &CounterpartyId) -> SelectOutcome {
        let created = self.ensure(id);
        let cleared_unread = self
            .conversations
            .get_mut(id)
            .map_or(0, |c| std::mem::take(&mut c.unread_count));
        self.active = Some(id.clone());
        self.note_read(id);
        self.recompute_badge();
        tracing::debug!(counterparty = %id, created, cleared_unread, "conversation selected");
        SelectOutcome {
            created,
            cleared_unread,
        }
    }

    /// Deselect the active conversation.
    pub fn clear_selection(&mut self) {
        self.active = None;
    }

    /// The active conversation's key.
    #[must_use]
    pub const fn active(&self) -> Option<&CounterpartyId> {
        self.active.as_ref()
    }

    /// Look a conversation up.
    #[must_use]
    pub fn get(&self, id: &CounterpartyId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    /// Record whether the chat panel is visible.
    pub const fn set_panel_open(&mut self, open: bool) {
        self.panel_open = open;
    }

    /// Whether the chat panel is visible.
    #[must_use]
    pub const fn panel_open(&self) -> bool {
        self.panel_open
    }

    /// Whether `id` is on screen right now (active and panel open).
    #[must_use]
    pub fn is_viewing(&self, id: &CounterpartyId) -> bool {
        self.panel_open && self.active.as_ref() == Some(id)
    }

    /// Count one inbound message as unread.
    ///
    /// Suppressed while the conversation is being viewed. Unknown
    /// conversations are created (they now have history). Returns whether
    /// the counter was incremented.
    pub fn record_inbound_unread(&mut self, id: &CounterpartyId) -> bool {
        self.ensure(id);
        self.mark_has_history(id);
        if self.is_viewing(id) {
            return false;
        }
        if let Some(c) = self.conversations.get_mut(id) {
            c.unread_count = c.unread_count.saturating_add(1);
        }
        self.recompute_badge();
        true
    }

    /// Flag a conversation as having messages.
    pub fn mark_has_history(&mut self, id: &CounterpartyId) {
        self.ensure(id);
        if let Some(c) = self.conversations.get_mut(id) {
            c.has_history = true;
        }
        if !self.history_order.contains(id) {
            self.history_order.push(id.clone());
        }
    }

    /// Update last-activity metadata after a message.
    pub fn note_activity(&mut self, id: &CounterpartyId, text: &str, at: Timestamp) {
        self.mark_has_history(id);
        if let Some(c) = self.conversations.get_mut(id) {
            if c.last_activity.is_none_or(|prev| prev <= at) {
                c.last_message = Some(text.to_string());
                c.last_activity = Some(at);
            }
        }
    }

    /// Reset a conversation's unread counter.
    pub fn mark_read(&mut self, id: &CounterpartyId) {
        if let Some(c) = self.conversations.get_mut(id) {
            c.unread_count = 0;
        }
        self.note_read(id);
        self.recompute_badge();
    }

    /// The aggregate unread badge.
    #[must_use]
    pub const fn badge(&self) -> u32 {
        self.badge
    }

    /// Sum of the per-conversation counters, computed fresh.
    #[must_use]
    pub fn total_unread(&self) -> u32 {
        self.conversations.values().map(|c| c.unread_count).sum()
    }
}
