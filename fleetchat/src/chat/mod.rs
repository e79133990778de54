//! Client-side chat core.
//!
//! - [`store`]: per-conversation messages with optimistic sends
//! - [`directory`]: conversations, unread counters and search
//! - [`dispatcher`]: applies inbound push events
//! - [`session`]: user actions as a synchronous state machine
//! - [`driver`]: the async event loop that runs a session

pub mod directory;
pub mod dispatcher;
pub mod driver;
pub mod session;
pub mod store;

pub use directory::{Conversation, ConversationDirectory, DirectoryEntry, ListView};
pub use dispatcher::{Alert, AlertError, NotificationDispatcher, SilentAlert, TerminalBell};
pub use driver::{
    SessionClosed, SessionCommand, SessionConfig, SessionEvent, SessionHandle, SessionSnapshot,
    spawn_session,
};
pub use session::{ChatSession, Effect, SendRejected};
pub use store::{InsertOutcome, LocalMessage, MessageKey, MessageStore, PushOutcome};
