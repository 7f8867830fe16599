//! Broadcast topics a connection can subscribe to.
//!
//! Every topic has exactly one owner: the user whose inbox it represents.
//! The relay only lets a connection subscribe to topics it owns.

use serde::{Deserialize, Serialize};

/// A broadcast key for live pushes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// Unread-count notifications for `user`.
    Notifications {
        /// Username of the receiving user.
        user: String,
    },
    /// Live messages sent to `user` by the user nicknamed `partner`.
    Messages {
        /// Username of the receiving user.
        user: String,
        /// Nickname of the sending user.
        partner: String,
    },
}

impl Topic {
    /// Notification topic for a user.
    #[must_use]
    pub fn notifications(user: &str) -> Self {
        Self::Notifications {
            user: user.to_string(),
        }
    }

    /// Message topic for a receiver and the nickname of the sender.
    #[must_use]
    pub fn messages(user: &str, partner: &str) -> Self {
        Self::Messages {
            user: user.to_string(),
            partner: partner.to_string(),
        }
    }

    /// Username of the user this topic delivers to.
    #[must_use]
    pub fn owner(&self) -> &str {
        match self {
            Self::Notifications { user } | Self::Messages { user, .. } => user,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Notifications { user } => write!(f, "notifications/{user}"),
            Self::Messages { user, partner } => write!(f, "messages/{user}/{partner}"),
        }
    }
}
