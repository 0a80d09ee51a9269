//! Encoding of bridge messages as WebSocket payloads.

use webssh_core::{ChannelError, Message};

/// Serialize a message as a JSON text payload.
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_frame(msg: &Message) -> Result<String, ChannelError> {
    serde_json::to_string(msg).map_err(ChannelError::Malformed)
}

/// Parse a JSON text payload.
///
/// # Errors
/// Returns [`ChannelError::Malformed`] if the payload is not a valid message.
pub fn decode_text_frame(text: &str) -> Result<Message, ChannelError> {
    Ok(serde_json::from_str(text)?)
}

/// Parse a binary payload holding UTF-8 JSON.
///
/// # Errors
/// Returns [`ChannelError::Malformed`] if the payload is not a valid message.
pub fn decode_binary_frame(data: &[u8]) -> Result<Message, ChannelError> {
    Ok(serde_json::from_slice(data)?)
}
