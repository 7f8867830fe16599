//! Serialization and deserialization for the Parley wire protocol.
//!
//! Frames are encoded with postcard, one frame per WebSocket binary message.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::frame::{ClientFrame, ServerFrame};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(value).map_err(|e| CodecError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`ClientFrame`] into bytes.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode_client(frame: &ClientFrame) -> Result<Vec<u8>, CodecError> {
    encode(frame)
}

/// Decodes a [`ClientFrame`] from bytes.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not a valid frame.
pub fn decode_client(bytes: &[u8]) -> Result<ClientFrame, CodecError> {
    decode(bytes)
}

/// Encodes a [`ServerFrame`] into bytes.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode_server(frame: &ServerFrame) -> Result<Vec<u8>, CodecError> {
    encode(frame)
}

/// Decodes a [`ServerFrame`] from bytes.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not a valid frame.
pub fn decode_server(bytes: &[u8]) -> Result<ServerFrame, CodecError> {
    decode(bytes)
}
