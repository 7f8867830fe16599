//! Per-direction unread message counters.
//!
//! A counter keyed by `(sender, receiver)` holds the number of messages
//! `sender` has sent to `receiver` that `receiver` has not read yet. Each
//! counter is an atomic, so increments and resets on one pair never block
//! another pair; the map lock is only written when a pair is seen for the
//! first time.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Key of a single unread counter: `(sender, receiver)`.
type UnreadKey = (String, String);

/// Unread message counters for every conversation direction.
#[derive(Debug, Default)]
pub struct UnreadCounter {
    counters: RwLock<HashMap<UnreadKey, Arc<AtomicU64>>>,
}

impl UnreadCounter {
    /// Creates a counter set with every count at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, sender: &str, receiver: &str) -> Option<Arc<AtomicU64>> {
        self.counters
            .read()
            .get(&(sender.to_string(), receiver.to_string()))
            .cloned()
    }

    /// Adds one unread message from `sender` to `receiver` and returns the
    /// resulting count.
    pub fn increment(&self, sender: &str, receiver: &str) -> u64 {
        let counter = match self.counter(sender, receiver) {
            Some(counter) => counter,
            None => Arc::clone(
                self.counters
                    .write()
                    .entry((sender.to_string(), receiver.to_string()))
                    .or_default(),
            ),
        };
        counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Marks every message from `sender` to `receiver` as read.
    ///
    /// Resetting a counter that is already zero, or was never incremented,
    /// does nothing.
    pub fn reset(&self, sender: &str, receiver: &str) {
        if let Some(counter) = self.counter(sender, receiver) {
            counter.store(0, Ordering::Release);
        }
    }

    /// Returns the current unread count from `sender` to `receiver`.
    #[must_use]
    pub fn get(&self, sender: &str, receiver: &str) -> u64 {
        self.counter(sender, receiver)
            .map_or(0, |counter| counter.load(Ordering::Acquire))
    }
}
