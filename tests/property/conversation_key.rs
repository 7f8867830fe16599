//! Property-based tests for conversation keys, sequence assignment and
//! unread counters.
//!
//! Uses proptest to verify:
//! 1. `ConversationKey::between` is symmetric and injective over pairs.
//! 2. Appends to one key are numbered 1..=N and read back in append order.
//! 3. Unread counters equal increments since the last reset.

#![allow(clippy::unwrap_used)]

use parley_proto::message::Timestamp;
use parley_relay::store::{ConversationKey, ConversationStore, MemoryConversationStore, MessageDraft};
use parley_relay::unread::UnreadCounter;
use proptest::prelude::*;

fn arb_name() -> impl Strategy<Value = String> {
    "[a-z:]{0,8}"
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn key_is_symmetric(a in arb_name(), b in arb_name()) {
        prop_assert_eq!(ConversationKey::between(&a, &b), ConversationKey::between(&b, &a));
    }

    #[test]
    fn distinct_pairs_have_distinct_keys(
        a in arb_name(),
        b in arb_name(),
        c in arb_name(),
        d in arb_name(),
    ) {
        let mut first = [a.as_str(), b.as_str()];
        let mut second = [c.as_str(), d.as_str()];
        first.sort_unstable();
        second.sort_unstable();
        prop_assume!(first != second);
        prop_assert_ne!(ConversationKey::between(&a, &b), ConversationKey::between(&c, &d));
    }

    #[test]
    fn appends_are_gapless_and_ordered(contents in prop::collection::vec(".{0,16}", 1..40)) {
        let store = MemoryConversationStore::new();
        let key = ConversationKey::between("alice", "bob");
        let rt = runtime();

        let seqs: Vec<u64> = rt.block_on(async {
            let mut seqs = Vec::new();
            for content in &contents {
                let draft = MessageDraft {
                    sender: "alice".into(),
                    sender_nickname: "ace".into(),
                    receiver: "bob".into(),
                    content: content.clone(),
                    sent_at: Timestamp::from_millis(0),
                };
                seqs.push(store.append(&key, draft).await.unwrap());
            }
            seqs
        });
        let expected: Vec<u64> = (1..=contents.len() as u64).collect();
        prop_assert_eq!(seqs, expected);

        let stored = rt.block_on(store.range(&key, 0)).unwrap();
        let stored_contents: Vec<String> = stored.into_iter().map(|m| m.content).collect();
        prop_assert_eq!(stored_contents, contents);
    }

    #[test]
    fn unread_counts_increments_since_last_reset(ops in prop::collection::vec(any::<bool>(), 0..100)) {
        let unread = UnreadCounter::new();
        let mut expected = 0u64;
        for increment in ops {
            if increment {
                let before = unread.get("alice", "bob");
                let after = unread.increment("alice", "bob");
                prop_assert_eq!(after, before + 1);
                expected += 1;
            } else {
                unread.reset("alice", "bob");
                expected = 0;
            }
            prop_assert_eq!(unread.get("alice", "bob"), expected);
        }
    }
}
