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

//! Employee and customer sessions talking through a real relay.
//!
//! Each test starts the relay on an ephemeral port and drives both sides
//! over HTTP and WebSocket exactly as the shell binary does.

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use fleetchat::api::http::HttpChatApi;
use fleetchat::api::{ApiError, ChatApi};
use fleetchat::chat::{
    SessionCommand, SessionConfig, SessionHandle, SessionSnapshot, SilentAlert, spawn_session,
};
use fleetchat::transport::ConnectionState;
use fleetchat::transport::ws::{ReconnectConfig, WsConnector};
use fleetchat_proto::api::{Contact, SendMessageRequest};
use fleetchat_proto::message::{CounterpartyId, Identity, MessageStatus, SenderRole};
use fleetchat_relay::relay::{RelayState, start_server_with_state};

// =============================================================================
// Helpers
// =============================================================================

struct Relay {
    state: Arc<RelayState>,
    addr: std::net::SocketAddr,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn start_relay() -> Relay {
    let customers = vec![
        Contact {
            id: CounterpartyId::new("42"),
            name: "Acme Co".into(),
            contact: "ops@acme.test".into(),
        },
        Contact {
            id: CounterpartyId::new("7"),
            name: "Beta Ltd".into(),
            contact: "+1 555 0100".into(),
        },
    ];
    let state = Arc::new(RelayState::new(customers));
    let (addr, server) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("relay failed to start");
    Relay {
        state,
        addr,
        server,
    }
}

fn http_api(relay: &Relay) -> Arc<HttpChatApi> {
    Arc::new(HttpChatApi::new(&format!("http://{}/", relay.addr), Duration::from_secs(5)).unwrap())
}

fn ws_connector(relay: &Relay) -> WsConnector {
    let url = Url::parse(&format!("ws://{}/ws", relay.addr)).unwrap();
    let reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(500),
        multiplier: 2,
    };
    WsConnector::new(url, reconnect)
}

/// Start a session and wait until the relay has it in its room.
async fn join(relay: &Relay, identity: Identity, name: &str) -> SessionHandle {
    let config = SessionConfig {
        display_name: name.into(),
        poll_interval: Duration::from_secs(3600),
        ..SessionConfig::default()
    };
    let handle = spawn_session(
        identity.clone(),
        config,
        http_api(relay),
        ws_connector(relay),
        SilentAlert,
    );

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while relay.state.rooms.member_count(&identity).await == 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "{identity} never joined its room"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle
}

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

// =============================================================================
// Conversations
// =============================================================================

#[tokio::test]
async fn customer_and_employee_exchange_messages() {
    let relay = start_relay().await;
    let employee = join(&relay, Identity::employee("emp-1"), "Dana").await;
    let customer = join(&relay, Identity::customer("42"), "Acme dispatcher").await;

    // The customer writes in.
    customer.send(SessionCommand::OpenPanel).await.unwrap();
    customer.send(SessionCommand::Select(acme())).await.unwrap();
    customer
        .send(SessionCommand::Send("Where is my truck?".into()))
        .await
        .unwrap();

    // Their own fan-out echo reconciles the optimistic entry.
    eventually(&customer, "customer send acknowledged", |s| {
        s.messages.first().is_some_and(|m| m.status == MessageStatus::Sent)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let snapshot = customer.snapshot().await.unwrap();
    assert_eq!(snapshot.messages.len(), 1, "{snapshot:#?}");
    assert_eq!(snapshot.messages[0].text, "Where is my truck?");

    // The employee is notified without having the conversation open.
    let snapshot = eventually(&employee, "employee badge", |s| s.badge == 1).await;
    assert!(snapshot.active.is_none());

    // Opening the conversation loads history and posts a read receipt.
    employee.send(SessionCommand::OpenPanel).await.unwrap();
    employee.send(SessionCommand::Select(acme())).await.unwrap();
    let snapshot = eventually(&employee, "history loaded", |s| {
        s.badge == 0 && !s.messages.is_empty()
    })
    .await;
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].sender, SenderRole::Customer);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let summaries = relay.state.store.summaries(&Identity::employee("emp-1")).await;
        if summaries.iter().all(|s| s.unread_count == 0) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "read receipt never stored");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // The reply reaches the customer, who is viewing the conversation.
    employee
        .send(SessionCommand::Send("On its way, ETA 14:30".into()))
        .await
        .unwrap();
    let snapshot = eventually(&customer, "employee reply", |s| {
        s.messages
            .first()
            .is_some_and(|m| m.sender == SenderRole::Employee)
    })
    .await;
    assert_eq!(snapshot.messages[0].text, "On its way, ETA 14:30");
    assert_eq!(snapshot.badge, 0);

    let snapshot = eventually(&employee, "reply acknowledged", |s| {
        s.messages.len() == 2 && s.messages.iter().all(|m| m.status == MessageStatus::Sent)
    })
    .await;
    assert_eq!(snapshot.messages[0].text, "On its way, ETA 14:30");

    employee.shutdown().await;
    customer.shutdown().await;
}

#[tokio::test]
async fn customer_cannot_post_into_another_conversation() {
    let relay = start_relay().await;
    let api = http_api(&relay);

    let request = SendMessageRequest {
        counterparty_id: CounterpartyId::new("7"),
        text: "hello".into(),
        sender_id: "42".into(),
        sender_name: "Acme dispatcher".into(),
        sender_role: SenderRole::Customer,
        temp_id: None,
    };
    let result = api.send_message(&request).await;
    assert_eq!(result, Err(ApiError::Status { status: 403 }));

    let history = api
        .message_history(&CounterpartyId::new("7"), &Identity::employee("emp-1"))
        .await
        .unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn customer_sees_single_support_contact() {
    let relay = start_relay().await;
    let api = http_api(&relay);

    let contacts = api.contacts(&Identity::customer("42")).await.unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].id, acme());

    let contacts = api.contacts(&Identity::employee("emp-1")).await.unwrap();
    assert_eq!(contacts.len(), 2);
}

// =============================================================================
// Reconnect
// =============================================================================

#[tokio::test]
async fn reconnect_catches_up_on_missed_messages() {
    let relay = start_relay().await;
    let employee = join(&relay, Identity::employee("emp-1"), "Dana").await;
    eventually(&employee, "connected", |s| {
        s.connection == ConnectionState::Connected
    })
    .await;

    // Drop every socket, then store a message the push channel never carries.
    relay.state.rooms.close_all().await;
    relay
        .state
        .store
        .append(&SendMessageRequest {
            counterparty_id: acme(),
            text: "Are you still there?".into(),
            sender_id: "42".into(),
            sender_name: "Acme dispatcher".into(),
            sender_role: SenderRole::Customer,
            temp_id: None,
        })
        .await
        .unwrap();

    let snapshot = eventually(&employee, "catch-up after reconnect", |s| s.badge == 1).await;
    let conversation = snapshot
        .conversations
        .iter()
        .find(|c| c.counterparty_id == acme())
        .expect("conversation missing after catch-up");
    assert_eq!(conversation.last_message.as_deref(), Some("Are you still there?"));

    employee.shutdown().await;
}
