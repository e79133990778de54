//! Session driver: the single-writer event loop around [`ChatSession`].
//!
//! One tokio task owns the session and the connection manager. It waits on
//! four sources at once: UI commands, push events, completions of REST
//! calls it spawned, and the summary poll tick. REST calls run as their own
//! tasks so several can be in flight; their results come back through a
//! channel and are applied on the loop, so state is only touched here.
//!
//! ```text
//! UI  ── SessionCommand ──▶ ┌────────────┐ ──spawn──▶ ChatApi
//!     ◀── SessionEvent ──── │ event loop │ ◀─Completion─┘
//!                           └────────────┘ ◀── PushEvent ── ConnectionManager
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use fleetchat_proto::api::{
    Contact, ConversationSummary, HistoryMessage, SendMessageRequest, SendMessageResponse,
};
use fleetchat_proto::message::{CounterpartyId, Identity, TempId};

use super::directory::{Conversation, DirectoryEntry, ListView};
use super::dispatcher::Alert;
use super::session::{ChatSession, Effect, SendRejected};
use super::store::LocalMessage;
use crate::api::{ApiError, ChatApi};
use crate::connection::{ConnectionManager, PushEvent};
use crate::transport::{ConnectionState, Connector};

/// Tuning for a running session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name sent along with every message.
    pub display_name: String,
    /// Interval of the summary reconciliation poll.
    pub poll_interval: Duration,
    /// Client-side limit on a send; `None` waits forever.
    pub send_timeout: Option<Duration>,
    /// Capacity of the command and event channels.
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            poll_interval: Duration::from_secs(30),
            send_timeout: Some(Duration::from_secs(30)),
            channel_capacity: 256,
        }
    }
}

/// Commands accepted by a running session.
#[derive(Debug)]
pub enum SessionCommand {
    /// Show the chat panel.
    OpenPanel,
    /// Hide the chat panel.
    ClosePanel,
    /// Make a conversation active.
    Select(CounterpartyId),
    /// Send text to the active conversation.
    Send(String),
    /// Post a read receipt for the active conversation.
    MarkRead,
    /// List conversations with history.
    ShowHistory,
    /// List every contact.
    ShowContacts,
    /// Filter the current list by name.
    Search(String),
    /// Reload summaries and contacts now.
    Refresh,
    /// Reply with the current state.
    Snapshot(oneshot::Sender<SessionSnapshot>),
    /// Stop the session and close the push channel.
    Shutdown,
}

/// Notifications emitted by a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A conversation's messages changed.
    MessagesChanged {
        /// The conversation.
        counterparty_id: CounterpartyId,
    },
    /// The conversation list or the badge changed.
    DirectoryChanged {
        /// Rows of the current (filtered) list.
        entries: Vec<DirectoryEntry>,
        /// Aggregate unread count.
        badge: u32,
    },
    /// Scroll the message view to the newest message.
    ScrollToLatest {
        /// The conversation on screen.
        counterparty_id: CounterpartyId,
    },
    /// A send was refused before reaching the network.
    SendRejected(SendRejected),
    /// The push channel changed state.
    ConnectionChanged(ConnectionState),
    /// A background call failed; the session carries on.
    Error(String),
}

/// Point-in-time copy of the session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// The logged-in identity.
    pub identity: Identity,
    /// Push channel state.
    pub connection: ConnectionState,
    /// Whether the panel is visible.
    pub panel_open: bool,
    /// The active conversation.
    pub active: Option<CounterpartyId>,
    /// Messages of the active conversation, newest first.
    pub messages: Vec<LocalMessage>,
    /// Which list is shown.
    pub view: ListView,
    /// The current search query.
    pub query: String,
    /// Rows of the current (filtered) list.
    pub entries: Vec<DirectoryEntry>,
    /// Conversations with history.
    pub conversations: Vec<Conversation>,
    /// Aggregate unread badge.
    pub badge: u32,
}

/// Returned when the session task is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("chat session has stopped")]
pub struct SessionClosed;

/// Handle to a session started by [`spawn_session`].
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    events: mpsc::Receiver<SessionEvent>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Queue a command.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the session has stopped.
    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionClosed> {
        self.commands.send(command).await.map_err(|_| SessionClosed)
    }

    /// Fetch a snapshot of the current state.
    ///
    /// Commands sent earlier from this handle are applied first.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the session has stopped.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionClosed> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(tx)).await?;
        rx.await.map_err(|_| SessionClosed)
    }

    /// Next emitted event. `None` once the session has stopped.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// An already emitted event, if any.
    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    /// Stop the session and wait for it to close its push channel.
    pub async fn shutdown(self) {
        let _ = self.commands.send(SessionCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            tracing::warn!(err = %e, "chat session task ended abnormally");
        }
    }
}

/// Results of spawned REST calls.
enum Completion {
    History {
        counterparty_id: CounterpartyId,
        result: Result<Vec<HistoryMessage>, ApiError>,
    },
    Sent {
        temp_id: TempId,
        result: Result<SendMessageResponse, ApiError>,
    },
    Summaries {
        /// Read clock when the request went out.
        ticket: u64,
        result: Result<Vec<ConversationSummary>, ApiError>,
    },
    Contacts(Result<Vec<Contact>, ApiError>),
    MarkedRead {
        counterparty_id: CounterpartyId,
        result: Result<(), ApiError>,
    },
}

/// Start a session for `identity`.
///
/// Opens the push channel right away, loads contacts and summaries, and
/// polls summaries every [`SessionConfig::poll_interval`]. Must be called
/// inside a tokio runtime.
pub fn spawn_session<A, C, L>(
    identity: Identity,
    config: SessionConfig,
    api: Arc<A>,
    connector: C,
    alert: L,
) -> SessionHandle
where
    A: ChatApi,
    C: Connector,
    L: Alert,
{
    let capacity = config.channel_capacity.max(1);
    let (command_tx, command_rx) = mpsc::channel(capacity);
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let (completion_tx, completion_rx) = mpsc::unbounded_channel();

    let driver = Driver {
        session: ChatSession::new(identity, config.display_name.clone(), alert),
        connection: ConnectionManager::new(connector),
        api,
        config,
        completions: completion_tx,
        events: event_tx,
        query: String::new(),
    };
    let task = tokio::spawn(driver.run(command_rx, completion_rx));

    SessionHandle {
        commands: command_tx,
        events: event_rx,
        task,
    }
}

struct Driver<A, C: Connector, L> {
    session: ChatSession<L>,
    connection: ConnectionManager<C>,
    api: Arc<A>,
    config: SessionConfig,
    completions: mpsc::UnboundedSender<Completion>,
    events: mpsc::Sender<SessionEvent>,
    query: String,
}

impl<A: ChatApi, C: Connector, L: Alert> Driver<A, C, L> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        let identity = self.session.identity().clone();
        tracing::info!(%identity, "chat session starting");
        if let Err(e) = self.connection.connect(&identity) {
            tracing::warn!(%identity, err = %e, "push channel unavailable, continuing without live updates");
            self.emit(SessionEvent::Error(e.to_string()));
        }
        self.spawn_contacts();
        self.spawn_summaries();

        let period = self.config.poll_interval.max(Duration::from_millis(1));
        let mut poll = tokio::time::interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(SessionCommand::Shutdown) => break,
                    Some(command) => self.handle_command(command),
                },
                event = self.connection.next_event() => self.handle_push_event(event),
                Some(done) = completions.recv() => self.handle_completion(done),
                _ = poll.tick() => {
                    tracing::debug!("periodic summary refresh");
                    self.spawn_summaries();
                }
            }
        }

        self.connection.disconnect();
        tracing::info!(%identity, "chat session stopped");
    }

    fn emit(&self, event: SessionEvent) {
        // A slow UI misses intermediate events; snapshots stay exact.
        let _ = self.events.try_send(event);
    }

    fn emit_directory(&self) {
        let directory = self.session.directory();
        self.emit(SessionEvent::DirectoryChanged {
            entries: directory.filter(&self.query),
            badge: directory.badge(),
        });
    }

    fn snapshot(&self) -> SessionSnapshot {
        let directory = self.session.directory();
        SessionSnapshot {
            identity: self.session.identity().clone(),
            connection: self.connection.state(),
            panel_open: directory.panel_open(),
            active: directory.active().cloned(),
            messages: self
                .session
                .active_messages()
                .into_iter()
                .cloned()
                .collect(),
            view: directory.view(),
            query: self.query.clone(),
            entries: directory.filter(&self.query),
            conversations: directory
                .list_with_history()
                .into_iter()
                .cloned()
                .collect(),
            badge: directory.badge(),
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::OpenPanel => {
                let effects = self.session.open_panel();
                self.run_effects(effects);
                self.emit_directory();
            }
            SessionCommand::ClosePanel => {
                self.session.close_panel();
                self.emit_directory();
            }
            SessionCommand::Select(counterparty_id) => {
                let effects = self.session.select_conversation(&counterparty_id);
                self.emit(SessionEvent::MessagesChanged { counterparty_id });
                self.run_effects(effects);
                self.emit_directory();
            }
            SessionCommand::Send(text) => match self.session.send_message(&text) {
                Ok(effects) => {
                    if let Some(active) = self.session.directory().active().cloned() {
                        self.emit(SessionEvent::MessagesChanged {
                            counterparty_id: active,
                        });
                    }
                    self.run_effects(effects);
                }
                Err(reason) => {
                    tracing::debug!(%reason, "send rejected");
                    self.emit(SessionEvent::SendRejected(reason));
                }
            },
            SessionCommand::MarkRead => {
                let effects = self.session.mark_conversation_read();
                self.run_effects(effects);
                self.emit_directory();
            }
            SessionCommand::ShowHistory => {
                self.session.directory_mut().set_view(ListView::History);
                self.emit_directory();
            }
            SessionCommand::ShowContacts => {
                self.session.directory_mut().set_view(ListView::Contacts);
                self.spawn_contacts();
                self.emit_directory();
            }
            SessionCommand::Search(query) => {
                self.query = query;
                self.emit_directory();
            }
            SessionCommand::Refresh => {
                self.spawn_summaries();
                self.spawn_contacts();
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            // Handled by the loop.
            SessionCommand::Shutdown => {}
        }
    }

    fn handle_push_event(&mut self, event: Option<PushEvent>) {
        match event {
            Some(PushEvent::Connected) => {
                self.emit(SessionEvent::ConnectionChanged(ConnectionState::Connected));
                // Catch up on whatever was pushed while we were away.
                self.spawn_summaries();
                if let Some(active) = self.session.directory().active().cloned() {
                    self.spawn_history(active);
                }
            }
            Some(PushEvent::Disconnected) => {
                self.emit(SessionEvent::ConnectionChanged(ConnectionState::Connecting));
            }
            Some(PushEvent::Message(message)) => {
                let counterparty_id = message.counterparty_id.clone();
                let effects = self.session.handle_push(&message);
                self.emit(SessionEvent::MessagesChanged { counterparty_id });
                self.run_effects(effects);
                self.emit_directory();
            }
            None => {
                self.emit(SessionEvent::ConnectionChanged(ConnectionState::Disconnected));
            }
        }
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::History {
                counterparty_id,
                result,
            } => match result {
                Ok(messages) => {
                    if self.session.apply_history(&counterparty_id, messages) {
                        self.emit(SessionEvent::MessagesChanged { counterparty_id });
                    }
                    self.emit_directory();
                }
                Err(e) => self.report("history fetch failed", &e),
            },
            Completion::Sent { temp_id, result } => {
                let owner = self
                    .session
                    .store()
                    .find_by_temp(&temp_id)
                    .map(|m| m.counterparty_id.clone());
                let effects = self.session.complete_send(&temp_id, result);
                if let Some(counterparty_id) = owner {
                    self.emit(SessionEvent::MessagesChanged { counterparty_id });
                }
                self.run_effects(effects);
                self.emit_directory();
            }
            Completion::Summaries { ticket, result } => match result {
                Ok(summaries) => {
                    self.session.apply_summaries(ticket, summaries);
                    self.emit_directory();
                }
                Err(e) => self.report("summary refresh failed", &e),
            },
            Completion::Contacts(result) => match result {
                Ok(contacts) => {
                    self.session.apply_contacts(contacts);
                    self.emit_directory();
                }
                Err(e) => self.report("contacts fetch failed", &e),
            },
            Completion::MarkedRead {
                counterparty_id,
                result,
            } => {
                match result {
                    Ok(()) => tracing::debug!(counterparty = %counterparty_id, "read receipt posted"),
                    Err(e) => {
                        tracing::debug!(counterparty = %counterparty_id, err = %e, "read receipt failed");
                    }
                }
                self.session.complete_mark_read(&counterparty_id);
            }
        }
    }

    fn report(&self, what: &str, err: &ApiError) {
        tracing::warn!(err = %err, "{what}");
        self.emit(SessionEvent::Error(format!("{what}: {err}")));
    }

    fn run_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::FetchHistory { counterparty_id } => self.spawn_history(counterparty_id),
                Effect::Send { temp_id, request } => self.spawn_send(temp_id, request),
                Effect::MarkRead(request) => {
                    let api = Arc::clone(&self.api);
                    self.spawn_call(async move {
                        let result = api.mark_read(&request).await;
                        Completion::MarkedRead {
                            counterparty_id: request.counterparty_id,
                            result,
                        }
                    });
                }
                Effect::RefreshSummaries => self.spawn_summaries(),
                Effect::ScrollToLatest { counterparty_id } => {
                    self.emit(SessionEvent::ScrollToLatest { counterparty_id });
                }
            }
        }
    }

    fn spawn_call<F>(&self, call: F)
    where
        F: std::future::Future<Output = Completion> + Send + 'static,
    {
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let _ = completions.send(call.await);
        });
    }

    fn spawn_history(&self, counterparty_id: CounterpartyId) {
        let api = Arc::clone(&self.api);
        let identity = self.session.identity().clone();
        self.spawn_call(async move {
            let result = api.message_history(&counterparty_id, &identity).await;
            Completion::History {
                counterparty_id,
                result,
            }
        });
    }

    fn spawn_send(&self, temp_id: TempId, request: SendMessageRequest) {
        let api = Arc::clone(&self.api);
        let limit = self.config.send_timeout;
        self.spawn_call(async move {
            let call = api.send_message(&request);
            let result = match limit {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or(Err(ApiError::Timeout)),
                None => call.await,
            };
            Completion::Sent { temp_id, result }
        });
    }

    fn spawn_summaries(&self) {
        let api = Arc::clone(&self.api);
        let identity = self.session.identity().clone();
        let ticket = self.session.summary_ticket();
        self.spawn_call(async move {
            Completion::Summaries {
                ticket,
                result: api.conversation_summaries(&identity).await,
            }
        });
    }

    fn spawn_contacts(&self) {
        let api = Arc::clone(&self.api);
        let identity = self.session.identity().clone();
        self.spawn_call(async move { Completion::Contacts(api.contacts(&identity).await) });
    }
}
