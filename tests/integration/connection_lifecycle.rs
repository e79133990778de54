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

//! Connection Manager lifecycle over the loopback transport.
//!
//! These tests validate:
//! - the identity room is joined on every (re)connect
//! - `connect` is idempotent per identity and switches identities cleanly
//! - nothing is delivered after `disconnect`
//! - undecodable frames are dropped without closing the channel

use std::time::Duration;

use fleetchat::connection::{ConnectionError, ConnectionManager, PushEvent};
use fleetchat::transport::ConnectionState;
use fleetchat::transport::loopback::LoopbackConnector;
use fleetchat_proto::message::{
    CounterpartyId, Identity, MessageId, MessageStatus, SenderRole, Timestamp,
};
use fleetchat_proto::push::{InboundMessage, PushMessage};

fn inbound(id: u64) -> InboundMessage {
    InboundMessage {
        counterparty_id: CounterpartyId::new("42"),
        message_id: MessageId::new(id),
        temp_id: None,
        text: "Where is my delivery?".into(),
        timestamp: Timestamp::from_millis(1_700_000_000_000 + id),
        sender: SenderRole::Customer,
        author_id: "42".into(),
        status: MessageStatus::Sent,
    }
}

async fn next(manager: &mut ConnectionManager<LoopbackConnector>) -> Option<PushEvent> {
    tokio::time::timeout(Duration::from_secs(5), manager.next_event())
        .await
        .expect("timed out waiting for push event")
}

#[tokio::test]
async fn joins_room_on_connect_and_every_reconnect() {
    let (connector, mut server) = LoopbackConnector::new();
    let mut manager = ConnectionManager::new(connector);
    let identity = Identity::employee("emp-1");

    manager.connect(&identity).unwrap();
    let mut peer = server.accept().await.unwrap();
    assert_eq!(next(&mut manager).await, Some(PushEvent::Connected));
    assert_eq!(
        peer.next_sent().await,
        Some(PushMessage::JoinRoom {
            identity: identity.clone()
        })
    );
    assert_eq!(manager.state(), ConnectionState::Connected);

    peer.drop_connection();
    assert_eq!(next(&mut manager).await, Some(PushEvent::Disconnected));
    assert_ne!(manager.state(), ConnectionState::Connected);

    peer.reconnect();
    assert_eq!(next(&mut manager).await, Some(PushEvent::Connected));
    assert_eq!(
        peer.next_sent().await,
        Some(PushMessage::JoinRoom { identity })
    );
}

#[tokio::test]
async fn connect_is_idempotent_per_identity() {
    let (connector, mut server) = LoopbackConnector::new();
    let mut manager = ConnectionManager::new(connector);
    let identity = Identity::customer("42");

    manager.connect(&identity).unwrap();
    manager.connect(&identity).unwrap();
    assert!(server.try_accept().is_some());
    assert!(server.try_accept().is_none(), "second connect opened a transport");
    assert_eq!(manager.identity(), Some(&identity));
}

#[tokio::test]
async fn switching_identity_tears_down_first() {
    let (connector, mut server) = LoopbackConnector::new();
    let mut manager = ConnectionManager::new(connector);

    manager.connect(&Identity::employee("emp-1")).unwrap();
    let first = server.accept().await.unwrap();

    manager.connect(&Identity::employee("emp-2")).unwrap();
    assert!(first.is_shut_down());
    let mut second = server.accept().await.unwrap();
    assert_eq!(
        second.next_sent().await,
        Some(PushMessage::JoinRoom {
            identity: Identity::employee("emp-2")
        })
    );
    assert_eq!(manager.identity(), Some(&Identity::employee("emp-2")));
}

#[tokio::test]
async fn blank_identity_is_refused() {
    let (connector, mut server) = LoopbackConnector::new();
    let mut manager = ConnectionManager::new(connector);

    let result = manager.connect(&Identity::employee("  "));
    assert!(matches!(result, Err(ConnectionError::BlankIdentity)));
    assert!(server.try_accept().is_none());
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn no_events_after_disconnect() {
    let (connector, mut server) = LoopbackConnector::new();
    let mut manager = ConnectionManager::new(connector);
    manager.connect(&Identity::employee("emp-1")).unwrap();
    let peer = server.accept().await.unwrap();
    assert_eq!(next(&mut manager).await, Some(PushEvent::Connected));

    manager.disconnect();
    assert!(peer.is_shut_down());
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    // The peer can no longer reach the manager.
    assert!(peer.push(&PushMessage::NewCounterpartyMessage(inbound(1))).is_err());

    let pending = tokio::time::timeout(Duration::from_millis(50), manager.next_event()).await;
    assert!(pending.is_err(), "event delivered after disconnect");
}

#[tokio::test]
async fn undecodable_frame_is_dropped() {
    let (connector, mut server) = LoopbackConnector::new();
    let mut manager = ConnectionManager::new(connector);
    manager.connect(&Identity::employee("emp-1")).unwrap();
    let peer = server.accept().await.unwrap();
    assert_eq!(next(&mut manager).await, Some(PushEvent::Connected));

    peer.push_raw(vec![0xff, 0xfe, 0xfd]).unwrap();
    peer.push(&PushMessage::Joined {
        room: "employee:emp-1".into(),
    })
    .unwrap();
    peer.push(&PushMessage::NewCounterpartyMessage(inbound(7)))
        .unwrap();

    assert_eq!(
        next(&mut manager).await,
        Some(PushEvent::Message(inbound(7)))
    );
    assert_eq!(manager.state(), ConnectionState::Connected);
}
