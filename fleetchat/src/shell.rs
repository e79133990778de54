//! Line-oriented terminal front end.
//!
//! Turns typed lines into [`SessionCommand`]s and renders session state as
//! plain text. Lines starting with `/` are commands; anything else is sent
//! to the active conversation.

use std::fmt::Write as _;

use fleetchat_proto::message::{CounterpartyId, MessageStatus, SenderRole, Timestamp};

use crate::chat::{DirectoryEntry, ListView, LocalMessage, SessionCommand, SessionSnapshot};

/// Help text printed by `/help`.
pub const HELP: &str = "\
commands:
  /open            show the chat panel
  /close           hide the chat panel
  /select <id>     open a conversation
  /history         list conversations with messages
  /contacts        list all contacts
  /search <name>   filter the list by name
  /read            mark the active conversation read
  /refresh         reload conversations and contacts
  /show            print the active conversation
  /quit            exit
anything else is sent to the active conversation";

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellInput {
    /// `/open`
    Open,
    /// `/close`
    Close,
    /// `/select <id>`
    Select(CounterpartyId),
    /// `/history`
    History,
    /// `/contacts`
    Contacts,
    /// `/search [query]`; an empty query clears the filter.
    Search(String),
    /// `/read`
    Read,
    /// `/refresh`
    Refresh,
    /// `/show`
    Show,
    /// `/help`
    Help,
    /// `/quit` or `/exit`
    Quit,
    /// Text to send.
    Message(String),
    /// An unrecognised or incomplete command.
    Invalid(String),
    /// Blank line.
    Empty,
}

impl ShellInput {
    /// The session command this input maps to, if any.
    ///
    /// `Show`, `Help`, `Quit`, `Invalid` and `Empty` are handled by the
    /// shell itself.
    #[must_use]
    pub fn into_command(self) -> Option<SessionCommand> {
        match self {
            Self::Open => Some(SessionCommand::OpenPanel),
            Self::Close => Some(SessionCommand::ClosePanel),
            Self::Select(id) => Some(SessionCommand::Select(id)),
            Self::History => Some(SessionCommand::ShowHistory),
            Self::Contacts => Some(SessionCommand::ShowContacts),
            Self::Search(query) => Some(SessionCommand::Search(query)),
            Self::Read => Some(SessionCommand::MarkRead),
            Self::Refresh => Some(SessionCommand::Refresh),
            Self::Message(text) => Some(SessionCommand::Send(text)),
            Self::Show | Self::Help | Self::Quit | Self::Invalid(_) | Self::Empty => None,
        }
    }
}

/// Parse one line of user input.
#[must_use]
pub fn parse_line(line: &str) -> ShellInput {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ShellInput::Empty;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return ShellInput::Message(line.trim_end_matches(['\r', '\n']).to_string());
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(name, rest)| (name, rest.trim()));

    match name {
        "open" => ShellInput::Open,
        "close" => ShellInput::Close,
        "select" | "s" if !rest.is_empty() => ShellInput::Select(CounterpartyId::new(rest)),
        "select" | "s" => ShellInput::Invalid("usage: /select <id>".to_string()),
        "history" => ShellInput::History,
        "contacts" => ShellInput::Contacts,
        "search" => ShellInput::Search(rest.to_string()),
        "read" => ShellInput::Read,
        "refresh" => ShellInput::Refresh,
        "show" => ShellInput::Show,
        "help" | "?" => ShellInput::Help,
        "quit" | "exit" | "q" => ShellInput::Quit,
        other => ShellInput::Invalid(format!("unknown command: /{other}")),
    }
}

/// Format an epoch-millisecond timestamp in local time.
#[must_use]
pub fn format_timestamp(timestamp: Timestamp, format: &str) -> String {
    use chrono::{Local, TimeZone};
    let ms = timestamp.as_millis();
    let secs = i64::try_from(ms / 1000).unwrap_or(i64::MAX);
    let nsecs = u32::try_from((ms % 1000) * 1_000_000).unwrap_or(0);
    match Local.timestamp_opt(secs, nsecs) {
        chrono::LocalResult::Single(dt) => {
            let mut out = String::new();
            if write!(out, "{}", dt.format(format)).is_err() {
                return "??:??".to_string();
            }
            out
        }
        _ => "??:??".to_string(),
    }
}

/// Delivery marker shown after a message.
#[must_use]
pub const fn status_marker(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Sending => "\u{2026}",
        MessageStatus::Sent => "\u{2713}",
        MessageStatus::Failed => "\u{2717} not sent",
    }
}

/// Render one message line: `[12:30] you: hello ✓`.
#[must_use]
pub fn render_message(message: &LocalMessage, local_role: SenderRole, format: &str) -> String {
    let who = if message.sender == local_role {
        "you"
    } else {
        message.sender.as_str()
    };
    format!(
        "[{}] {who}: {} {}",
        format_timestamp(message.timestamp, format),
        message.text,
        status_marker(message.status)
    )
}

/// Render list rows: id, name, contact and unread count.
#[must_use]
pub fn render_entries(entries: &[DirectoryEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let mut line = format!("  {:<12} {}", entry.counterparty_id.as_str(), entry.name);
            if !entry.contact.is_empty() {
                let _ = write!(line, " <{}>", entry.contact);
            }
            if entry.unread_count > 0 {
                let _ = write!(line, " ({})", entry.unread_count);
            }
            line
        })
        .collect()
}

/// Render the active conversation, newest message first.
#[must_use]
pub fn render_snapshot(snapshot: &SessionSnapshot, format: &str) -> String {
    let mut out = format!(
        "{} | {} | unread {}",
        snapshot.identity, snapshot.connection, snapshot.badge
    );
    let view = match snapshot.view {
        ListView::History => "history",
        ListView::Contacts => "contacts",
    };
    if snapshot.panel_open {
        let _ = write!(out, " | panel open ({view})");
    }
    let Some(active) = &snapshot.active else {
        out.push_str("\nno conversation selected");
        return out;
    };
    let _ = write!(out, "\n-- {active} --");
    if snapshot.messages.is_empty() {
        out.push_str("\n(no messages)");
    }
    for message in &snapshot.messages {
        out.push('\n');
        out.push_str(&render_message(message, snapshot.identity.role, format));
    }
    out
}
