//! Property-based tests for the chat core's local state.
//!
//! Uses proptest to verify:
//! 1. However an ack, its push echo, a history page and a send timeout
//!    interleave, each sent message ends up exactly once.
//! 2. Message lists are always ordered newest first.
//! 3. The unread badge always equals the sum of per-conversation counters,
//!    and the viewed conversation never accumulates unread.

use fleetchat::chat::{ConversationDirectory, MessageStore};
use fleetchat_proto::api::{ConversationSummary, HistoryMessage};
use fleetchat_proto::message::{
    CounterpartyId, MessageId, MessageStatus, SenderRole, TempId, Timestamp,
};
use fleetchat_proto::push::InboundMessage;
use proptest::prelude::*;

const POOL: [&str; 3] = ["42", "7", "1001"];

fn conv(index: usize) -> CounterpartyId {
    CounterpartyId::new(POOL[index % POOL.len()])
}

/// The three ways the server's copy of a sent message can reach the store.
#[derive(Debug, Clone, Copy)]
enum Delivery {
    Ack,
    Echo,
    History,
}

fn arb_order() -> impl Strategy<Value = Vec<Delivery>> {
    Just(vec![Delivery::Ack, Delivery::Echo, Delivery::History]).prop_shuffle()
}

/// A non-empty subset, in random order.
fn arb_deliveries() -> impl Strategy<Value = Vec<Delivery>> {
    (arb_order(), 1..=3usize)
        .prop_map(|(all, keep)| all.into_iter().take(keep).collect::<Vec<_>>())
}

fn deliver(
    store: &mut MessageStore,
    conversation: &CounterpartyId,
    delivery: Delivery,
    temp: &TempId,
    id: MessageId,
    text: &str,
    at: Timestamp,
) {
    match delivery {
        Delivery::Ack => {
            store.reconcile(temp, id);
        }
        Delivery::Echo => {
            let push = InboundMessage {
                counterparty_id: conversation.clone(),
                message_id: id,
                temp_id: Some(temp.clone()),
                text: text.to_string(),
                timestamp: at,
                sender: SenderRole::Employee,
                author_id: "emp-1".into(),
                status: MessageStatus::Sent,
            };
            store.append_from_push(conversation, &push);
        }
        Delivery::History => {
            let page = vec![HistoryMessage {
                id,
                counterparty_id: conversation.clone(),
                text: text.to_string(),
                sender: SenderRole::Employee,
                author_id: "emp-1".into(),
                timestamp: at,
                temp_id: Some(temp.clone()),
            }];
            store.merge_incoming(conversation, page);
        }
    }
}

/// Operations on the directory's unread accounting.
#[derive(Debug, Clone)]
enum DirectoryOp {
    Inbound(usize),
    Select(usize),
    MarkRead(usize),
    Panel(bool),
    Deselect,
    Summaries(Vec<(usize, u32)>),
}

fn arb_directory_op() -> impl Strategy<Value = DirectoryOp> {
    prop_oneof![
        4 => (0..POOL.len()).prop_map(DirectoryOp::Inbound),
        2 => (0..POOL.len()).prop_map(DirectoryOp::Select),
        1 => (0..POOL.len()).prop_map(DirectoryOp::MarkRead),
        1 => any::<bool>().prop_map(DirectoryOp::Panel),
        1 => Just(DirectoryOp::Deselect),
        2 => prop::collection::vec((0..POOL.len(), 0..20u32), 0..4)
            .prop_map(DirectoryOp::Summaries),
    ]
}

fn summary(index: usize, unread: u32) -> ConversationSummary {
    ConversationSummary {
        counterparty_id: conv(index),
        counterparty_name: format!("Customer {}", POOL[index % POOL.len()]),
        counterparty_contact: String::new(),
        unread_count: unread,
        last_message: None,
        last_activity: None,
    }
}

proptest! {
    #[test]
    fn sent_message_is_stored_exactly_once(
        deliveries in arb_deliveries(),
        text in "[a-zA-Z ]{1,40}",
        raw_id in 1..1_000_000u64,
    ) {
        let conversation = conv(0);
        let mut store = MessageStore::new(SenderRole::Employee);
        let at = Timestamp::from_millis(1_700_000_000_000);
        let temp = store
            .insert_optimistic_with(&conversation, TempId::new("temp-1"), &text, "emp-1", at)
            .temp_id()
            .clone();
        let id = MessageId::new(raw_id);

        for delivery in &deliveries {
            deliver(&mut store, &conversation, *delivery, &temp, id, &text, at);
        }
        // Replaying everything is harmless.
        for delivery in &deliveries {
            deliver(&mut store, &conversation, *delivery, &temp, id, &text, at);
        }

        let messages = store.messages(&conversation);
        let copies = messages.iter().filter(|m| m.text == text).count();
        prop_assert_eq!(copies, 1, "deliveries {:?}: {:?}", deliveries, messages);
        prop_assert_eq!(messages[0].id(), Some(id));
        prop_assert_eq!(messages[0].status, MessageStatus::Sent);
    }

    #[test]
    fn send_timeout_never_duplicates(
        deliveries in arb_deliveries(),
        timeout_at in 0..=3usize,
        raw_id in 1..1_000_000u64,
    ) {
        let conversation = conv(0);
        let mut store = MessageStore::new(SenderRole::Employee);
        let at = Timestamp::from_millis(1_700_000_000_000);
        let temp = TempId::new("temp-1");
        store.insert_optimistic_with(&conversation, temp.clone(), "Hello", "emp-1", at);
        let id = MessageId::new(raw_id);

        let timeout_at = timeout_at.min(deliveries.len());
        for (step, delivery) in deliveries.iter().enumerate() {
            if step == timeout_at {
                store.mark_failed(&temp);
            }
            deliver(&mut store, &conversation, *delivery, &temp, id, "Hello", at);
        }
        if timeout_at == deliveries.len() {
            store.mark_failed(&temp);
        }

        let messages = store.messages(&conversation);
        prop_assert_eq!(messages.len(), 1, "deliveries {:?}: {:?}", deliveries, messages);
        let expected = if timeout_at == 0 {
            MessageStatus::Failed
        } else {
            MessageStatus::Sent
        };
        prop_assert_eq!(messages[0].status, expected);
    }

    #[test]
    fn delivery_order_does_not_change_the_outcome(
        first in arb_order(),
        second in arb_order(),
        raw_id in 1..1_000_000u64,
    ) {
        let conversation = conv(1);
        let at = Timestamp::from_millis(1_700_000_000_000);
        let id = MessageId::new(raw_id);

        let run = |deliveries: &[Delivery]| {
            let mut store = MessageStore::new(SenderRole::Employee);
            let temp = TempId::new("temp-1");
            store.insert_optimistic_with(&conversation, temp.clone(), "On my way", "emp-1", at);
            for delivery in deliveries {
                deliver(&mut store, &conversation, *delivery, &temp, id, "On my way", at);
            }
            store
                .messages(&conversation)
                .into_iter()
                .map(|m| (m.id(), m.text.clone(), m.status))
                .collect::<Vec<_>>()
        };

        prop_assert_eq!(run(&first), run(&second));
    }

    #[test]
    fn messages_are_newest_first(
        stamps in prop::collection::vec(0..10_000u64, 1..30),
    ) {
        let conversation = conv(2);
        let mut store = MessageStore::new(SenderRole::Customer);
        let page = (1..)
            .zip(&stamps)
            .map(|(i, ms)| HistoryMessage {
                id: MessageId::new(i),
                counterparty_id: conversation.clone(),
                text: format!("message {i}"),
                sender: SenderRole::Employee,
                author_id: "emp-1".into(),
                timestamp: Timestamp::from_millis(*ms),
                temp_id: None,
            })
            .collect();
        store.merge_incoming(&conversation, page);

        let messages = store.messages(&conversation);
        prop_assert_eq!(messages.len(), stamps.len());
        for pair in messages.windows(2) {
            prop_assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }

    #[test]
    fn badge_tracks_per_conversation_unread(
        ops in prop::collection::vec(arb_directory_op(), 0..60),
    ) {
        let mut directory = ConversationDirectory::new();
        for op in ops {
            match op {
                DirectoryOp::Inbound(i) => {
                    directory.record_inbound_unread(&conv(i));
                }
                DirectoryOp::Select(i) => {
                    directory.select(&conv(i));
                }
                DirectoryOp::MarkRead(i) => directory.mark_read(&conv(i)),
                DirectoryOp::Panel(open) => {
                    directory.set_panel_open(open);
                    // Opening the panel reselects the active conversation.
                    if let Some(active) = directory.active().cloned().filter(|_| open) {
                        directory.select(&active);
                    }
                }
                DirectoryOp::Deselect => directory.clear_selection(),
                DirectoryOp::Summaries(rows) => {
                    directory.merge_summaries(
                        rows.into_iter().map(|(i, unread)| summary(i, unread)).collect(),
                    );
                }
            }

            prop_assert_eq!(directory.badge(), directory.total_unread());
            if let Some(active) = directory.active().cloned() {
                if directory.is_viewing(&active) {
                    let unread = directory.get(&active).map_or(0, |c| c.unread_count);
                    prop_assert_eq!(unread, 0);
                }
            }
        }
    }
}
