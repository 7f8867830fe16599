//! Chat orchestration: sending messages and loading history.
//!
//! [`ChatService`] ties the directory, conversation store, unread counters
//! and delivery router together. Each call is one self-contained request.
//! Identity resolution and persistence failures abort the request before any
//! later step runs; live delivery failures are logged and never reach the
//! caller, because the stored message is already the durable record.

use std::sync::Arc;

use parley_proto::frame::{ErrorKind, ServerFrame};
use parley_proto::message::{ChatMessage, MAX_CONTENT_LEN, Timestamp, UnreadNotice};
use parley_proto::topic::Topic;

use crate::directory::{DirectoryError, UserDirectory, UserRecord};
use crate::router::{Delivery, DeliveryRouter};
use crate::store::{ConversationKey, ConversationStore, MessageDraft, StoreError};
use crate::unread::UnreadCounter;

/// Errors a chat request can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// A username or nickname did not resolve.
    #[error("unknown user: {0}")]
    UnknownUser(String),
    /// The conversation store could not be reached.
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
    /// The principal may not act as the requested sender.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// The request violated a limit or was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ChatError {
    /// Wire category for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownUser(_) => ErrorKind::UnknownUser,
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    /// Converts the error into the frame sent back to the client.
    #[must_use]
    pub fn to_frame(&self) -> ServerFrame {
        ServerFrame::Error {
            kind: self.kind(),
            reason: self.to_string(),
        }
    }
}

impl From<DirectoryError> for ChatError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::UnknownUser(name) => Self::UnknownUser(name),
            other => Self::InvalidRequest(other.to_string()),
        }
    }
}

/// Outcome of a successful send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    /// Sequence number assigned to the message.
    pub sequence: u64,
    /// Receiver's unread count for this sender after the send.
    pub unread: u64,
}

/// Orchestrates message sending and history loading.
pub struct ChatService<D, S> {
    directory: Arc<D>,
    store: Arc<S>,
    unread: Arc<UnreadCounter>,
    router: Arc<DeliveryRouter>,
    max_content_len: usize,
}

impl<D: UserDirectory, S: ConversationStore> ChatService<D, S> {
    /// Creates a service over the given collaborators.
    #[must_use]
    pub fn new(
        directory: Arc<D>,
        store: Arc<S>,
        unread: Arc<UnreadCounter>,
        router: Arc<DeliveryRouter>,
    ) -> Self {
        Self {
            directory,
            store,
            unread,
            router,
            max_content_len: MAX_CONTENT_LEN,
        }
    }

    /// Sets the maximum accepted content length in bytes.
    #[must_use]
    pub const fn with_max_content_len(mut self, max_content_len: usize) -> Self {
        self.max_content_len = max_content_len;
        self
    }

    /// The delivery router used for live pushes.
    #[must_use]
    pub fn router(&self) -> &Arc<DeliveryRouter> {
        &self.router
    }

    /// The unread counters.
    #[must_use]
    pub fn unread(&self) -> &Arc<UnreadCounter> {
        &self.unread
    }

    /// The conversation store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Resolves the user a connection is opened for.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::UnknownUser`] if `username` is not registered.
    pub fn principal(&self, username: &str) -> Result<UserRecord, ChatError> {
        Ok(self.directory.get_by_username(username)?)
    }

    /// Stores a message from `sender` to the user nicknamed
    /// `receiver_nickname` and pushes it to the receiver.
    ///
    /// `principal` is the authenticated username of the caller; `sender` must
    /// match it.
    ///
    /// # Errors
    ///
    /// - [`ChatError::Forbidden`] if `sender` is not `principal`.
    /// - [`ChatError::InvalidRequest`] if `content` is empty or too long.
    /// - [`ChatError::UnknownUser`] if either party does not resolve.
    /// - [`ChatError::StoreUnavailable`] if the message cannot be stored.
    ///
    /// Nothing is stored or counted when an error is returned.
    pub async fn send_message(
        &self,
        principal: &str,
        sender: &str,
        receiver_nickname: &str,
        content: &str,
    ) -> Result<SendReceipt, ChatError> {
        if sender != principal {
            return Err(ChatError::Forbidden(format!(
                "{principal} cannot send as {sender}"
            )));
        }
        if content.is_empty() {
            return Err(ChatError::InvalidRequest("empty message".into()));
        }
        if content.len() > self.max_content_len {
            return Err(ChatError::InvalidRequest(format!(
                "message too large: {} bytes (max {})",
                content.len(),
                self.max_content_len
            )));
        }

        let sender = self.directory.get_by_username(sender)?;
        let receiver = self.directory.get_by_nickname(receiver_nickname)?;

        let key = ConversationKey::between(&sender.username, &receiver.username);
        let draft = MessageDraft {
            sender: sender.username.clone(),
            sender_nickname: sender.nickname.clone(),
            receiver: receiver.username.clone(),
            content: content.to_string(),
            sent_at: Timestamp::now(),
        };
        let message = draft.clone();
        let sequence = self.store.append(&key, draft).await?;
        let message = message.into_message(sequence);

        let unread = self.unread.increment(&sender.username, &receiver.username);

        tracing::debug!(
            sender = %sender.username,
            receiver = %receiver.username,
            sequence,
            unread,
            "message stored"
        );

        if unread > 0 {
            let topic = Topic::notifications(&receiver.username);
            let frame = ServerFrame::Notification {
                topic: topic.clone(),
                notice: UnreadNotice {
                    from: sender.nickname.clone(),
                    count: unread,
                },
            };
            self.broadcast(&topic, frame).await;
        }

        let topic = Topic::messages(&receiver.username, &sender.nickname);
        let frame = ServerFrame::Message {
            topic: topic.clone(),
            message,
        };
        self.broadcast(&topic, frame).await;

        Ok(SendReceipt { sequence, unread })
    }

    /// Loads the conversation between `reader` and the user nicknamed
    /// `partner_nickname`, starting at sequence `since`, and pushes it to the
    /// reader's connection.
    ///
    /// Opening the history marks every message from the partner to the
    /// reader as read.
    ///
    /// # Errors
    ///
    /// - [`ChatError::UnknownUser`] if either party does not resolve.
    /// - [`ChatError::StoreUnavailable`] if the history cannot be read.
    pub async fn load_history(
        &self,
        reader: &str,
        partner_nickname: &str,
        since: u64,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let reader = self.directory.get_by_username(reader)?;
        let partner = self.directory.get_by_nickname(partner_nickname)?;

        let key = ConversationKey::between(&reader.username, &partner.username);
        let messages = self.store.range(&key, since).await?;

        // A message appended after `range` but before this reset is cleared
        // from the count without being in `messages`; it still arrives live
        // and on the next load.
        self.unread.reset(&partner.username, &reader.username);

        tracing::debug!(
            reader = %reader.username,
            partner = %partner.username,
            count = messages.len(),
            "history loaded"
        );

        let frame = ServerFrame::History {
            partner: partner.nickname,
            messages: messages.clone(),
        };
        match self.router.publish_to_user(&reader.username, frame).await {
            Ok(Delivery::Delivered) => {}
            Ok(Delivery::NoSubscriber) => {
                tracing::debug!(reader = %reader.username, "reader not connected, history not pushed");
            }
            Err(e) => {
                tracing::warn!(reader = %reader.username, error = %e, "history delivery failed");
            }
        }

        Ok(messages)
    }

    /// Returns how many messages from the user nicknamed `partner_nickname`
    /// `reader` has not read yet.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::UnknownUser`] if either party does not resolve.
    pub fn unread_from(&self, reader: &str, partner_nickname: &str) -> Result<u64, ChatError> {
        let reader = self.directory.get_by_username(reader)?;
        let partner = self.directory.get_by_nickname(partner_nickname)?;
        Ok(self.unread.get(&partner.username, &reader.username))
    }

    async fn broadcast(&self, topic: &Topic, frame: ServerFrame) {
        match self.router.publish_to_topic(topic, frame).await {
            Ok(delivered) => {
                tracing::trace!(topic = %topic, delivered, "broadcast");
            }
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "live delivery failed");
            }
        }
    }
}
