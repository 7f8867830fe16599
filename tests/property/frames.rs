//! Property-based tests for the frame codec.
//!
//! Uses proptest to verify:
//! 1. Random bytes never cause a panic in `decode_client`/`decode_server`.
//! 2. Any `Send` frame survives encode → decode.
//! 3. Any `Subscribe` frame survives encode → decode.

#![allow(clippy::unwrap_used)]

use parley_proto::codec;
use parley_proto::frame::ClientFrame;
use parley_proto::topic::Topic;
use proptest::prelude::*;

fn arb_name() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_.-]{1,16}"
}

fn arb_topic() -> impl Strategy<Value = Topic> {
    prop_oneof![
        arb_name().prop_map(|user| Topic::Notifications { user }),
        (arb_name(), arb_name()).prop_map(|(user, partner)| Topic::Messages { user, partner }),
    ]
}

proptest! {
    #[test]
    fn decode_random_bytes_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode_client(&bytes);
        let _ = codec::decode_server(&bytes);
    }

    #[test]
    fn send_frame_survives_encoding(
        sender in ".{0,32}",
        receiver in ".{0,32}",
        content in ".{0,1024}",
    ) {
        let frame = ClientFrame::Send { sender, receiver, content };
        let bytes = codec::encode_client(&frame).unwrap();
        prop_assert_eq!(codec::decode_client(&bytes).unwrap(), frame);
    }

    #[test]
    fn subscribe_frame_survives_encoding(topic in arb_topic()) {
        let frame = ClientFrame::Subscribe { topic };
        let bytes = codec::encode_client(&frame).unwrap();
        prop_assert_eq!(codec::decode_client(&bytes).unwrap(), frame);
    }
}
