// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! End-to-end chat session flows over an in-memory REST backend and a
//! loopback push channel.
//!
//! The test plays the server side of the push channel: it accepts the
//! session's connection, checks the room join, and injects
//! `NewCounterpartyMessage` events.

use std::sync::Arc;
use std::time::Duration;

use fleetchat::api::ApiError;
use fleetchat::api::memory::InMemoryChatApi;
use fleetchat::chat::{
    ListView, SessionCommand, SessionConfig, SessionHandle, SessionSnapshot, SilentAlert,
    spawn_session,
};
use fleetchat::transport::loopback::{LoopbackConnector, LoopbackPeer};
use fleetchat_proto::api::{Contact, ConversationSummary};
use fleetchat_proto::message::{
    CounterpartyId, Identity, MessageId, MessageStatus, SenderRole, TempId, Timestamp,
};
use fleetchat_proto::push::{InboundMessage, PushMessage};

// =============================================================================
// Helpers
// =============================================================================

struct Harness {
    api: Arc<InMemoryChatApi>,
    handle: SessionHandle,
    peer: LoopbackPeer,
}

/// Start a session and wait until it has joined its room.
async fn start(identity: Identity, api: InMemoryChatApi) -> Harness {
    let api = Arc::new(api);
    let (connector, mut server) = LoopbackConnector::new();
    let config = SessionConfig {
        display_name: "Dana".into(),
        ..SessionConfig::default()
    };
    let handle = spawn_session(
        identity.clone(),
        config,
        Arc::clone(&api),
        connector,
        SilentAlert,
    );

    let mut peer = server.accept().await.expect("session never connected");
    assert_eq!(
        peer.next_sent().await,
        Some(PushMessage::JoinRoom { identity })
    );
    Harness { api, handle, peer }
}

/// Poll snapshots until `check` holds, failing after a few seconds.
async fn eventually(
    handle: &SessionHandle,
    what: &str,
    check: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = handle.snapshot().await.unwrap();
        if check(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}; last snapshot: {snapshot:#?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn acme() -> CounterpartyId {
    CounterpartyId::new("42")
}

fn contacts() -> Vec<Contact> {
    vec![
        Contact {
            id: acme(),
            name: "Acme Co".into(),
            contact: "ops@acme.test".into(),
        },
        Contact {
            id: CounterpartyId::new("7"),
            name: "Beta Ltd".into(),
            contact: "+1 555 0100".into(),
        },
    ]
}

fn from_customer(id: u64, text: &str) -> PushMessage {
    PushMessage::NewCounterpartyMessage(InboundMessage {
        counterparty_id: acme(),
        message_id: MessageId::new(id),
        temp_id: None,
        text: text.into(),
        timestamp: Timestamp::now(),
        sender: SenderRole::Customer,
        author_id: "42".into(),
        status: MessageStatus::Sent,
    })
}

fn unread_summary(unread: u32) -> ConversationSummary {
    ConversationSummary {
        counterparty_id: acme(),
        counterparty_name: "Acme Co".into(),
        counterparty_contact: "ops@acme.test".into(),
        unread_count: unread,
        last_message: Some("Hi".into()),
        last_activity: Some(Timestamp::now()),
    }
}

fn has_history(snapshot: &SessionSnapshot, id: &CounterpartyId) -> bool {
    snapshot
        .conversations
        .iter()
        .any(|c| &c.counterparty_id == id && c.has_history)
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn first_message_to_new_customer_is_acknowledged() {
    let api = InMemoryChatApi::new()
        .starting_at(9001)
        .with_contacts(contacts());
    let h = start(Identity::employee("emp-1"), api).await;
    h.api.hold_sends();

    h.handle.send(SessionCommand::OpenPanel).await.unwrap();
    h.handle.send(SessionCommand::Select(acme())).await.unwrap();
    let before = h.handle.snapshot().await.unwrap();
    assert!(!has_history(&before, &acme()));
    assert!(before.messages.is_empty());

    h.handle
        .send(SessionCommand::Send("Hello".into()))
        .await
        .unwrap();
    let pending = h.handle.snapshot().await.unwrap();
    assert_eq!(pending.messages.len(), 1);
    assert_eq!(pending.messages[0].status, MessageStatus::Sending);
    assert_eq!(pending.messages[0].id(), None);

    h.api.release_sends();
    let sent = eventually(&h.handle, "send acknowledgment", |s| {
        s.messages.first().and_then(|m| m.id()) == Some(MessageId::new(9001))
    })
    .await;
    assert_eq!(sent.messages.len(), 1);
    assert_eq!(sent.messages[0].status, MessageStatus::Sent);
    assert!(has_history(&sent, &acme()));

    let sent_requests = h.api.sent_requests();
    assert_eq!(sent_requests.len(), 1);
    assert_eq!(sent_requests[0].sender_name, "Dana");
    assert_eq!(sent_requests[0].sender_role, SenderRole::Employee);
    h.handle.shutdown().await;
}

#[tokio::test]
async fn message_while_panel_closed_counts_until_selected() {
    let api = InMemoryChatApi::new().with_contacts(contacts());
    let h = start(Identity::employee("emp-1"), api).await;

    // The relay would count the message before our summary refresh lands.
    h.api.set_summaries(vec![unread_summary(1)]);
    h.peer.push(&from_customer(1, "Hi")).unwrap();

    let counted = eventually(&h.handle, "unread badge", |s| s.badge == 1).await;
    let conversation = counted
        .conversations
        .iter()
        .find(|c| c.counterparty_id == acme())
        .unwrap();
    assert_eq!(conversation.unread_count, 1);
    assert_eq!(conversation.last_message.as_deref(), Some("Hi"));

    h.handle.send(SessionCommand::OpenPanel).await.unwrap();
    h.handle.send(SessionCommand::Select(acme())).await.unwrap();
    let cleared = h.handle.snapshot().await.unwrap();
    assert_eq!(cleared.badge, 0);
    assert_eq!(cleared.messages.len(), 1);
    assert_eq!(cleared.messages[0].text, "Hi");

    let api = Arc::clone(&h.api);
    eventually(&h.handle, "read receipt", move |_| {
        api.read_receipts().iter().any(|r| r.counterparty_id == acme())
    })
    .await;

    // A stale server count does not resurrect the badge of the open conversation.
    let calls_before = h.api.summary_calls();
    h.handle.send(SessionCommand::Refresh).await.unwrap();
    let api = Arc::clone(&h.api);
    eventually(&h.handle, "summary refresh", move |_| {
        api.summary_calls() > calls_before
    })
    .await;
    // Let the refreshed summaries reach the session loop.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.handle.snapshot().await.unwrap().badge, 0);
    h.handle.shutdown().await;
}

#[tokio::test]
async fn push_echo_before_response_leaves_one_message() {
    let api = InMemoryChatApi::new()
        .starting_at(9002)
        .with_contacts(contacts());
    let h = start(Identity::employee("emp-1"), api).await;
    h.api.hold_sends();

    h.handle.send(SessionCommand::OpenPanel).await.unwrap();
    h.handle.send(SessionCommand::Select(acme())).await.unwrap();
    h.handle
        .send(SessionCommand::Send("Test".into()))
        .await
        .unwrap();
    let pending = h.handle.snapshot().await.unwrap();
    let temp: TempId = pending.messages[0].temp_id().cloned().unwrap();

    h.peer
        .push(&PushMessage::NewCounterpartyMessage(InboundMessage {
            counterparty_id: acme(),
            message_id: MessageId::new(9002),
            temp_id: Some(temp.clone()),
            text: "Test".into(),
            timestamp: Timestamp::now(),
            sender: SenderRole::Employee,
            author_id: "emp-1".into(),
            status: MessageStatus::Sent,
        }))
        .unwrap();
    let echoed = eventually(&h.handle, "push echo", |s| {
        s.messages.first().and_then(|m| m.id()) == Some(MessageId::new(9002))
    })
    .await;
    assert_eq!(echoed.messages.len(), 1);
    assert_eq!(echoed.badge, 0, "own echo must not count as unread");

    h.api.release_sends();
    let api = Arc::clone(&h.api);
    eventually(&h.handle, "send request", move |_| api.sent_requests().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let settled = h.handle.snapshot().await.unwrap();
    let tests: Vec<_> = settled.messages.iter().filter(|m| m.text == "Test").collect();
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0].id(), Some(MessageId::new(9002)));
    assert_eq!(tests[0].status, MessageStatus::Sent);
    assert_eq!(h.api.sent_requests()[0].temp_id, Some(temp));
    h.handle.shutdown().await;
}

#[tokio::test]
async fn network_failure_keeps_failed_message_visible() {
    let api = InMemoryChatApi::new().with_contacts(contacts());
    let h = start(Identity::employee("emp-1"), api).await;
    h.api
        .fail_sends(Some(ApiError::Network("connection reset".into())));

    h.handle.send(SessionCommand::Select(acme())).await.unwrap();
    h.handle
        .send(SessionCommand::Send("Retry me".into()))
        .await
        .unwrap();

    let failed = eventually(&h.handle, "failed status", |s| {
        s.messages
            .first()
            .is_some_and(|m| m.status == MessageStatus::Failed)
    })
    .await;
    assert_eq!(failed.messages.len(), 1);
    assert_eq!(failed.messages[0].text, "Retry me");
    assert_eq!(failed.messages[0].id(), None);
    h.handle.shutdown().await;
}

#[tokio::test]
async fn contact_search_is_case_insensitive() {
    let api = InMemoryChatApi::new().with_contacts(contacts());
    let h = start(Identity::employee("emp-1"), api).await;

    h.handle.send(SessionCommand::ShowContacts).await.unwrap();
    h.handle
        .send(SessionCommand::Search("ac".into()))
        .await
        .unwrap();
    let found = eventually(&h.handle, "contacts", |s| !s.entries.is_empty()).await;
    assert_eq!(found.view, ListView::Contacts);
    let names: Vec<_> = found.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["Acme Co"]);
    h.handle.shutdown().await;
}

// =============================================================================
// Supplementary flows
// =============================================================================

#[tokio::test]
async fn message_into_open_conversation_is_read_on_arrival() {
    let api = InMemoryChatApi::new().with_contacts(contacts());
    let h = start(Identity::employee("emp-1"), api).await;

    h.handle.send(SessionCommand::OpenPanel).await.unwrap();
    h.handle.send(SessionCommand::Select(acme())).await.unwrap();
    let api = Arc::clone(&h.api);
    eventually(&h.handle, "select receipt", move |_| !api.read_receipts().is_empty()).await;
    let receipts_before = h.api.read_receipts().len();

    h.peer.push(&from_customer(5, "Are you there?")).unwrap();
    let seen = eventually(&h.handle, "pushed message", |s| s.messages.len() == 1).await;
    assert_eq!(seen.badge, 0);

    let api = Arc::clone(&h.api);
    eventually(&h.handle, "arrival receipt", move |_| {
        api.read_receipts().len() > receipts_before
    })
    .await;
    h.handle.shutdown().await;
}

#[tokio::test]
async fn customer_side_counts_employee_replies() {
    let h = start(Identity::customer("42"), InMemoryChatApi::new()).await;

    h.peer
        .push(&PushMessage::NewCounterpartyMessage(InboundMessage {
            counterparty_id: acme(),
            message_id: MessageId::new(11),
            temp_id: None,
            text: "Your driver is 10 minutes out".into(),
            timestamp: Timestamp::now(),
            sender: SenderRole::Employee,
            author_id: "emp-1".into(),
            status: MessageStatus::Sent,
        }))
        .unwrap();
    eventually(&h.handle, "customer badge", |s| s.badge == 1).await;

    h.handle.send(SessionCommand::OpenPanel).await.unwrap();
    h.handle.send(SessionCommand::Select(acme())).await.unwrap();
    h.handle
        .send(SessionCommand::Send("Thanks!".into()))
        .await
        .unwrap();
    let replied = eventually(&h.handle, "customer reply", |s| {
        s.messages.len() == 2 && s.messages[0].status == MessageStatus::Sent
    })
    .await;
    assert_eq!(replied.badge, 0);
    assert_eq!(replied.messages[0].sender, SenderRole::Customer);
    assert_eq!(h.api.sent_requests()[0].sender_role, SenderRole::Customer);
    h.handle.shutdown().await;
}

#[tokio::test]
async fn reconnect_triggers_catch_up() {
    let api = InMemoryChatApi::new().with_contacts(contacts());
    let mut h = start(Identity::employee("emp-1"), api).await;
    h.handle.send(SessionCommand::Select(acme())).await.unwrap();

    let api = Arc::clone(&h.api);
    eventually(&h.handle, "initial summaries", move |_| api.summary_calls() >= 1).await;
    let calls_before = h.api.summary_calls();

    h.peer.drop_connection();
    h.peer.reconnect();
    assert_eq!(
        h.peer.next_sent().await,
        Some(PushMessage::JoinRoom {
            identity: Identity::employee("emp-1")
        })
    );
    let api = Arc::clone(&h.api);
    eventually(&h.handle, "catch-up refresh", move |_| {
        api.summary_calls() > calls_before
    })
    .await;
    h.handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_push_channel() {
    let h = start(Identity::employee("emp-1"), InMemoryChatApi::new()).await;
    let peer = h.peer;
    h.handle.shutdown().await;
    assert!(peer.is_shut_down());
}
