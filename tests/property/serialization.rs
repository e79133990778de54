//! Property-based tests for push-frame encoding.
//!
//! Uses proptest to verify:
//! 1. Any `PushMessage` survives encode → decode.
//! 2. Random bytes never cause a panic in `decode` (returns `Err` gracefully).
//! 3. Text validation never yields empty or untrimmed output.

use fleetchat_proto::codec;
use fleetchat_proto::message::*;
use fleetchat_proto::push::{InboundMessage, PushMessage};
use proptest::prelude::*;

fn arb_role() -> impl Strategy<Value = SenderRole> {
    prop_oneof![Just(SenderRole::Employee), Just(SenderRole::Customer)]
}

fn arb_identity() -> impl Strategy<Value = Identity> {
    (arb_role(), "[a-z0-9-]{1,16}").prop_map(|(role, id)| Identity::new(role, id))
}

fn arb_inbound() -> impl Strategy<Value = InboundMessage> {
    (
        "[0-9]{1,8}",
        any::<u64>(),
        prop::option::of("temp-[a-z0-9]{1,12}"),
        "[^\x00]{1,256}",
        any::<u64>(),
        arb_role(),
        "[a-z0-9-]{1,16}",
    )
        .prop_map(
            |(counterparty, id, temp, text, ts, sender, author)| InboundMessage {
                counterparty_id: CounterpartyId::new(counterparty),
                message_id: MessageId::new(id),
                temp_id: temp.map(TempId::new),
                text,
                timestamp: Timestamp::from_millis(ts),
                sender,
                author_id: author,
                status: MessageStatus::Sent,
            },
        )
}

fn arb_push_message() -> impl Strategy<Value = PushMessage> {
    prop_oneof![
        arb_identity().prop_map(|identity| PushMessage::JoinRoom { identity }),
        "[a-z]{1,8}:[0-9]{1,6}".prop_map(|room| PushMessage::Joined { room }),
        arb_inbound().prop_map(PushMessage::NewCounterpartyMessage),
        ".*".prop_map(|reason| PushMessage::Error { reason }),
    ]
}

proptest! {
    #[test]
    fn push_message_round_trip(msg in arb_push_message()) {
        let bytes = codec::encode(&msg).unwrap();
        let decoded = codec::decode(&bytes).unwrap();
        prop_assert_eq!(msg, decoded);
    }

    #[test]
    fn random_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode(&bytes);
    }

    #[test]
    fn validated_text_is_trimmed_and_non_empty(text in ".{0,64}") {
        if let Ok(clean) = validate_text(&text) {
            prop_assert!(!clean.is_empty());
            prop_assert_eq!(clean.trim(), clean.as_str());
        }
    }
}
