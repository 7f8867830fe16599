//! User directory: resolves usernames and nicknames to user records.
//!
//! Senders are addressed by username and receivers by nickname, so the
//! directory keeps two indexes over the same records. Every keyed operation
//! in the relay runs on the canonical username returned from here.

use std::collections::HashMap;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct UserRecord {
    /// Canonical, unique login name.
    pub username: String,
    /// Unique display name used to address the user.
    pub nickname: String,
}

/// Errors returned by directory operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// No user matches the given username or nickname.
    #[error("unknown user: {0}")]
    UnknownUser(String),
    /// A username is already registered.
    #[error("username already registered: {0}")]
    DuplicateUsername(String),
    /// A nickname is already taken.
    #[error("nickname already taken: {0}")]
    DuplicateNickname(String),
}

/// Lookup interface over the set of known users.
pub trait UserDirectory: Send + Sync {
    /// Looks a user up by canonical username.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::UnknownUser`] if no user has that username.
    fn get_by_username(&self, username: &str) -> Result<UserRecord, DirectoryError>;

    /// Looks a user up by nickname.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::UnknownUser`] if no user has that nickname.
    fn get_by_nickname(&self, nickname: &str) -> Result<UserRecord, DirectoryError>;
}

/// Directory held in memory, seeded from configuration.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    by_username: HashMap<String, UserRecord>,
    /// Nickname to username.
    by_nickname: HashMap<String, String>,
}

impl InMemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a directory from a list of records.
    ///
    /// # Errors
    ///
    /// Returns an error on the first duplicate username or nickname.
    pub fn from_records(
        records: impl IntoIterator<Item = UserRecord>,
    ) -> Result<Self, DirectoryError> {
        let mut directory = Self::new();
        for record in records {
            directory.insert(record)?;
        }
        Ok(directory)
    }

    /// Adds a user.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::DuplicateUsername`] or
    /// [`DirectoryError::DuplicateNickname`] if either index already holds
    /// the value. The directory is unchanged on error.
    pub fn insert(&mut self, record: UserRecord) -> Result<(), DirectoryError> {
        if self.by_username.contains_key(&record.username) {
            return Err(DirectoryError::DuplicateUsername(record.username));
        }
        if self.by_nickname.contains_key(&record.nickname) {
            return Err(DirectoryError::DuplicateNickname(record.nickname));
        }
        self.by_nickname
            .insert(record.nickname.clone(), record.username.clone());
        self.by_username.insert(record.username.clone(), record);
        Ok(())
    }

    /// Number of registered users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_username.len()
    }

    /// Returns `true` if no users are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_username.is_empty()
    }
}

impl UserDirectory for InMemoryDirectory {
    fn get_by_username(&self, username: &str) -> Result<UserRecord, DirectoryError> {
        self.by_username
            .get(username)
            .cloned()
            .ok_or_else(|| DirectoryError::UnknownUser(username.to_string()))
    }

    fn get_by_nickname(&self, nickname: &str) -> Result<UserRecord, DirectoryError> {
        self.by_nickname
            .get(nickname)
            .and_then(|username| self.by_username.get(username))
            .cloned()
            .ok_or_else(|| DirectoryError::UnknownUser(nickname.to_string()))
    }
}
