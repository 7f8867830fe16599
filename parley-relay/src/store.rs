//! Ordered, append-only conversation storage.
//!
//! Messages are grouped under a [`ConversationKey`] that is identical for
//! both participants. Within a key each message gets the next sequence
//! number, starting at 1, and history is always returned in sequence order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parley_proto::message::{ChatMessage, Timestamp};
use tokio::sync::{Mutex, RwLock};

/// Order-independent identifier for the conversation between two users.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Builds the key for the conversation between `a` and `b`.
    ///
    /// The names are sorted, and the lower one is length-prefixed so that
    /// names containing the separator cannot collide.
    #[must_use]
    pub fn between(a: &str, b: &str) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{}:{lo}:{hi}", lo.len()))
    }

    /// Returns the canonical string form of the key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message that has not been assigned a sequence number yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    /// Canonical username of the sender.
    pub sender: String,
    /// Sender's nickname.
    pub sender_nickname: String,
    /// Canonical username of the receiver.
    pub receiver: String,
    /// Message text.
    pub content: String,
    /// When the relay accepted the message.
    pub sent_at: Timestamp,
}

impl MessageDraft {
    /// Attaches a sequence number, producing the stored message.
    #[must_use]
    pub fn into_message(self, sequence: u64) -> ChatMessage {
        ChatMessage {
            sequence,
            sender: self.sender,
            sender_nickname: self.sender_nickname,
            receiver: self.receiver,
            content: self.content,
            sent_at: self.sent_at,
        }
    }
}

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only storage of messages per conversation.
pub trait ConversationStore: Send + Sync {
    /// Appends a message to `key` and returns its sequence number.
    ///
    /// Appends to the same key are serialized and receive strictly increasing
    /// sequence numbers with no gaps.
    fn append(
        &self,
        key: &ConversationKey,
        draft: MessageDraft,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Returns every message in `key` with `sequence >= from_sequence`,
    /// oldest first.
    fn range(
        &self,
        key: &ConversationKey,
        from_sequence: u64,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, StoreError>> + Send;

    /// Returns the number of messages stored under `key`.
    fn message_count(
        &self,
        key: &ConversationKey,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;
}

type Conversation = Arc<Mutex<Vec<ChatMessage>>>;

/// In-memory conversation store.
///
/// The outer map lock is only held to find or create a conversation; each
/// conversation has its own mutex, so appends to different keys never wait
/// on each other.
#[derive(Default)]
pub struct MemoryConversationStore {
    conversations: RwLock<HashMap<ConversationKey, Conversation>>,
}

impl MemoryConversationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn conversation(&self, key: &ConversationKey) -> Option<Conversation> {
        self.conversations.read().await.get(key).cloned()
    }

    async fn conversation_or_insert(&self, key: &ConversationKey) -> Conversation {
        if let Some(conversation) = self.conversation(key).await {
            return conversation;
        }
        let mut conversations = self.conversations.write().await;
        Arc::clone(conversations.entry(key.clone()).or_default())
    }
}

impl ConversationStore for MemoryConversationStore {
    async fn append(&self, key: &ConversationKey, draft: MessageDraft) -> Result<u64, StoreError> {
        let conversation = self.conversation_or_insert(key).await;
        let mut messages = conversation.lock().await;
        let sequence = messages.len() as u64 + 1;
        messages.push(draft.into_message(sequence));
        drop(messages);
        Ok(sequence)
    }

    async fn range(
        &self,
        key: &ConversationKey,
        from_sequence: u64,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let Some(conversation) = self.conversation(key).await else {
            return Ok(Vec::new());
        };
        let messages = conversation.lock().await;
        // Sequence n lives at index n - 1.
        let start = usize::try_from(from_sequence.saturating_sub(1)).unwrap_or(usize::MAX);
        Ok(messages.get(start..).map(<[_]>::to_vec).unwrap_or_default())
    }

    async fn message_count(&self, key: &ConversationKey) -> Result<u64, StoreError> {
        match self.conversation(key).await {
            Some(conversation) => Ok(conversation.lock().await.len() as u64),
            None => Ok(0),
        }
    }
}
