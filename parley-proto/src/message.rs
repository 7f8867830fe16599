//! Chat message types carried between the relay and its clients.
//!
//! A [`ChatMessage`] is the stored, immutable form of a 1:1 message. Its
//! `sequence` is assigned by the relay's conversation store and defines the
//! order in which history is returned.

use serde::{Deserialize, Serialize};

/// Maximum allowed message content length in bytes (16 KB).
pub const MAX_CONTENT_LEN: usize = 16 * 1024;

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A message stored in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Position within the conversation, starting at 1.
    pub sequence: u64,
    /// Canonical username of the sender.
    pub sender: String,
    /// Sender's nickname at the time of sending.
    pub sender_nickname: String,
    /// Canonical username of the receiver.
    pub receiver: String,
    /// Message text.
    pub content: String,
    /// When the relay accepted the message.
    pub sent_at: Timestamp,
}

/// Unread-count notification pushed to a receiver after each new message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadNotice {
    /// Nickname of the user whose messages are unread.
    pub from: String,
    /// Number of messages from `from` not yet read.
    pub count: u64,
}

impl std::fmt::Display for UnreadNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 1 {
            write!(f, "1 new message")
        } else {
            write!(f, "{} new messages", self.count)
        }
    }
}
