//! In-memory conversation store for the relay.
//!
//! One thread per customer, keyed by the customer id. Every message gets a
//! relay-wide sequential [`MessageId`]. Each viewer (an employee or the
//! customer) has a read marker per thread; unread counts are the messages
//! from the other side past that marker.

use std::collections::HashMap;

use fleetchat_proto::api::{
    Contact, ConversationSummary, HistoryMessage, MarkReadRequest, SendMessageRequest,
};
use fleetchat_proto::message::{
    CounterpartyId, Identity, MessageId, MessageStatus, SenderRole, TempId, Timestamp,
    ValidationError, validate_text,
};
use fleetchat_proto::push::InboundMessage;
use tokio::sync::RwLock;

/// Name customers see for the employee side of their conversation.
pub const SUPPORT_NAME: &str = "Support";

/// Errors returned by [`ChatStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The message text is empty or too large.
    #[error("invalid message text: {0}")]
    InvalidText(#[from] ValidationError),

    /// The caller may not access this conversation.
    #[error("not allowed to access conversation {0}")]
    Forbidden(CounterpartyId),

    /// No customer with this id exists.
    #[error("unknown customer {0}")]
    UnknownCustomer(CounterpartyId),

    /// The request is missing a sender or conversation id.
    #[error("missing {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: MessageId,
    text: String,
    sender: SenderRole,
    author_id: String,
    timestamp: Timestamp,
    temp_id: Option<TempId>,
}

#[derive(Debug, Default)]
struct Thread {
    messages: Vec<StoredMessage>,
    read_markers: HashMap<Identity, MessageId>,
}

impl Thread {
    fn unread_for(&self, viewer: &Identity) -> u32 {
        let marker = self.read_markers.get(viewer).map_or(0, MessageId::get);
        let count = self
            .messages
            .iter()
            .filter(|m| m.sender != viewer.role && m.id.get() > marker)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    fn last(&self) -> Option<&StoredMessage> {
        self.messages.last()
    }
}

#[derive(Debug, Default)]
struct Inner {
    customers: Vec<Contact>,
    threads: HashMap<CounterpartyId, Thread>,
    next_id: u64,
    last_timestamp: u64,
}

impl Inner {
    fn customer(&self, id: &CounterpartyId) -> Option<&Contact> {
        self.customers.iter().find(|c| &c.id == id)
    }

    const fn allocate_id(&mut self) -> MessageId {
        self.next_id += 1;
        MessageId::new(self.next_id)
    }

    /// Wall-clock time, nudged forward so a thread never goes back in time.
    fn stamp(&mut self) -> Timestamp {
        let now = Timestamp::now().as_millis().max(self.last_timestamp + 1);
        self.last_timestamp = now;
        Timestamp::from_millis(now)
    }
}

/// Thread-safe conversation store.
pub struct ChatStore {
    inner: RwLock<Inner>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ChatStore {
    /// Creates a store that knows `customers`.
    #[must_use]
    pub fn new(customers: Vec<Contact>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                customers,
                ..Inner::default()
            }),
        }
    }

    /// Contacts `viewer` can start a conversation with.
    ///
    /// Employees see every customer; a customer sees only the support side
    /// of their own conversation.
    pub async fn contacts(&self, viewer: &Identity) -> Vec<Contact> {
        let inner = self.inner.read().await;
        match viewer.role {
            SenderRole::Employee => inner.customers.clone(),
            SenderRole::Customer => vec![Contact {
                id: CounterpartyId::new(viewer.id.clone()),
                name: SUPPORT_NAME.to_string(),
                contact: String::new(),
            }],
        }
    }

    /// Conversations with at least one message, most recently active first.
    pub async fn summaries(&self, viewer: &Identity) -> Vec<ConversationSummary> {
        let inner = self.inner.read().await;
        let mut summaries: Vec<ConversationSummary> = inner
            .threads
            .iter()
            .filter(|(id, _)| visible_to(viewer, id))
            .filter_map(|(id, thread)| {
                let last = thread.last()?;
                let (name, contact) = match viewer.role {
                    SenderRole::Employee => inner
                        .customer(id)
                        .map_or_else(|| (id.to_string(), String::new()), |c| {
                            (c.name.clone(), c.contact.clone())
                        }),
                    SenderRole::Customer => (SUPPORT_NAME.to_string(), String::new()),
                };
                Some(ConversationSummary {
                    counterparty_id: id.clone(),
                    counterparty_name: name,
                    counterparty_contact: contact,
                    unread_count: thread.unread_for(viewer),
                    last_message: Some(last.text.clone()),
                    last_activity: Some(last.timestamp),
                })
            })
            .collect();
        drop(inner);
        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        summaries
    }

    /// Full history of one conversation, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Forbidden`] if a customer asks for another
    /// customer's conversation.
    pub async fn history(
        &self,
        conversation: &CounterpartyId,
        viewer: &Identity,
    ) -> Result<Vec<HistoryMessage>, StoreError> {
        if !visible_to(viewer, conversation) {
            return Err(StoreError::Forbidden(conversation.clone()));
        }
        let inner = self.inner.read().await;
        Ok(inner
            .threads
            .get(conversation)
            .map(|thread| {
                thread
                    .messages
                    .iter()
                    .map(|m| HistoryMessage {
                        id: m.id,
                        counterparty_id: conversation.clone(),
                        text: m.text.clone(),
                        sender: m.sender,
                        author_id: m.author_id.clone(),
                        timestamp: m.timestamp,
                        temp_id: m.temp_id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Stores a message and returns the push event to fan out.
    ///
    /// The sender's read marker moves to the new message. A customer
    /// writing for the first time is added to the customer list.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidText`] for empty or oversized text
    /// - [`StoreError::Forbidden`] if a customer posts to another conversation
    /// - [`StoreError::UnknownCustomer`] if an employee writes to an unknown id
    pub async fn append(&self, request: &SendMessageRequest) -> Result<InboundMessage, StoreError> {
        if request.sender_id.trim().is_empty() {
            return Err(StoreError::Missing("sender id"));
        }
        if request.counterparty_id.is_blank() {
            return Err(StoreError::Missing("counterparty id"));
        }
        let text = validate_text(&request.text)?;
        let author = Identity::new(request.sender_role, request.sender_id.clone());
        let conversation = &request.counterparty_id;
        if !visible_to(&author, conversation) {
            return Err(StoreError::Forbidden(conversation.clone()));
        }

        let mut inner = self.inner.write().await;
        if inner.customer(conversation).is_none() {
            match author.role {
                SenderRole::Customer => {
                    tracing::info!(customer = %conversation, "registering new customer");
                    inner.customers.push(Contact {
                        id: conversation.clone(),
                        name: request.sender_name.clone(),
                        contact: String::new(),
                    });
                }
                SenderRole::Employee => {
                    return Err(StoreError::UnknownCustomer(conversation.clone()));
                }
            }
        }

        let id = inner.allocate_id();
        let timestamp = inner.stamp();
        let thread = inner.threads.entry(conversation.clone()).or_default();
        thread.messages.push(StoredMessage {
            id,
            text: text.clone(),
            sender: author.role,
            author_id: author.id.clone(),
            timestamp,
            temp_id: request.temp_id.clone(),
        });
        thread.read_markers.insert(author.clone(), id);
        drop(inner);

        Ok(InboundMessage {
            counterparty_id: conversation.clone(),
            message_id: id,
            temp_id: request.temp_id.clone(),
            text,
            timestamp,
            sender: author.role,
            author_id: author.id,
            status: MessageStatus::Sent,
        })
    }

    /// Moves `viewer`'s read marker to the newest message of a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Forbidden`] if a customer marks another
    /// customer's conversation.
    pub async fn mark_read(&self, request: &MarkReadRequest) -> Result<(), StoreError> {
        let viewer = &request.identity;
        let conversation = &request.counterparty_id;
        if !visible_to(viewer, conversation) {
            return Err(StoreError::Forbidden(conversation.clone()));
        }
        let mut inner = self.inner.write().await;
        if let Some(thread) = inner.threads.get_mut(conversation)
            && let Some(last) = thread.last().map(|m| m.id)
        {
            thread.read_markers.insert(viewer.clone(), last);
        }
        drop(inner);
        Ok(())
    }
}

/// Employees see every conversation; customers only their own.
fn visible_to(viewer: &Identity, conversation: &CounterpartyId) -> bool {
    match viewer.role {
        SenderRole::Employee => true,
        SenderRole::Customer => viewer.id == conversation.as_str(),
    }
}
