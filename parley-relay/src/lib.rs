//! Parley relay server library.
//!
//! Exposes the relay server for use in tests and embedding. The relay
//! accepts WebSocket connections, stores 1:1 messages in per-conversation
//! order, tracks unread counts, and pushes messages and notifications to
//! connected users.

pub mod config;
pub mod directory;
pub mod relay;
pub mod router;
pub mod service;
pub mod store;
pub mod unread;
