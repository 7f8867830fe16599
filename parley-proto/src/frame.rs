//! Frames exchanged over the relay WebSocket.
//!
//! Clients send [`ClientFrame`]s and receive [`ServerFrame`]s, each carried
//! in a single binary WebSocket message and encoded with [`crate::codec`].
//!
//! The first frame on every connection must be [`ClientFrame::Connect`]; it
//! binds the connection to a principal, and every later request is made on
//! that principal's behalf.

use serde::{Deserialize, Serialize};

use crate::message::{ChatMessage, UnreadNotice};
use crate::topic::Topic;

/// Frames sent from a client to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Binds the connection to `username`. Must be sent first.
    Connect {
        /// Username of the connecting principal.
        username: String,
    },

    /// Sends a message to another user.
    ///
    /// The relay rejects the frame if `sender` is not the connection's
    /// principal.
    Send {
        /// Username of the sender.
        sender: String,
        /// Nickname of the receiver.
        receiver: String,
        /// Message text.
        content: String,
    },

    /// Requests conversation history with another user.
    ///
    /// Loading history marks the partner's messages as read.
    History {
        /// Nickname of the conversation partner.
        receiver: String,
        /// Lowest sequence number to return (0 for the whole history).
        since: u64,
    },

    /// Joins a broadcast topic owned by the principal.
    Subscribe {
        /// Topic to join.
        topic: Topic,
    },

    /// Leaves a broadcast topic.
    Unsubscribe {
        /// Topic to leave.
        topic: Topic,
    },

    /// Queries the unread count for messages from a partner.
    Unread {
        /// Nickname of the conversation partner.
        partner: String,
    },
}

/// Frames pushed from the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// Acknowledges [`ClientFrame::Connect`].
    Connected {
        /// The bound username.
        username: String,
        /// The principal's nickname.
        nickname: String,
    },

    /// Acknowledges a stored message.
    Sent {
        /// Sequence number assigned to the message.
        sequence: u64,
        /// Receiver's unread count for this sender after the send.
        unread: u64,
    },

    /// Acknowledges [`ClientFrame::Subscribe`].
    Subscribed {
        /// The joined topic.
        topic: Topic,
    },

    /// Conversation history, oldest first.
    History {
        /// Nickname of the conversation partner.
        partner: String,
        /// Messages in ascending sequence order.
        messages: Vec<ChatMessage>,
    },

    /// A live message broadcast on a message topic.
    Message {
        /// Topic the message was published on.
        topic: Topic,
        /// The stored message.
        message: ChatMessage,
    },

    /// An unread-count notification broadcast on a notification topic.
    Notification {
        /// Topic the notification was published on.
        topic: Topic,
        /// Unread count details.
        notice: UnreadNotice,
    },

    /// Answer to [`ClientFrame::Unread`].
    Unread {
        /// Nickname of the conversation partner.
        partner: String,
        /// Messages from `partner` not yet read.
        count: u64,
    },

    /// A request failed.
    Error {
        /// Failure category.
        kind: ErrorKind,
        /// Human-readable error description.
        reason: String,
    },
}

/// Category of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A username or nickname did not resolve to a known user.
    UnknownUser,
    /// The message store could not be reached; the request is safe to retry.
    StoreUnavailable,
    /// The principal is not allowed to perform the request.
    Forbidden,
    /// The request was malformed or violated a limit.
    InvalidRequest,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownUser => write!(f, "unknown user"),
            Self::StoreUnavailable => write!(f, "store unavailable"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::InvalidRequest => write!(f, "invalid request"),
        }
    }
}
