//! Wire messages exchanged with the peer.
//!
//! Every frame is a JSON object `{"type", "data", "rows", "cols"}` where
//! `data` is base64 (or `null`). Control messages (`addr`, `term`, `login`,
//! `password`, `publickey`) carry percent-encoded text inside `data`.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Target `host:port` to dial.
    Addr,
    /// Terminal type for the PTY request.
    Term,
    /// Username to authenticate as.
    Login,
    /// Password authentication.
    Password,
    /// Private key authentication (PEM text).
    PublicKey,
    /// Bytes for the remote shell's input.
    Stdin,
    /// Window size change.
    Resize,
    /// Remote standard output.
    Stdout,
    /// Remote standard error, also used for notices.
    Stderr,
    /// Any type this bridge does not know about.
    #[serde(other)]
    Unknown,
}

/// A single framed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, with = "base64_data")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub rows: u32,
    #[serde(default)]
    pub cols: u32,
}

impl Message {
    /// Create a message carrying raw bytes.
    #[must_use]
    pub fn new(kind: MessageType, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            data: data.into(),
            rows: 0,
            cols: 0,
        }
    }

    /// Create a control message whose payload is percent-encoded `text`.
    #[must_use]
    pub fn text(kind: MessageType, text: &str) -> Self {
        Self::new(kind, urlencoding::encode(text).into_owned())
    }

    /// Create an authentication message that also carries the initial PTY size.
    #[must_use]
    pub fn auth(kind: MessageType, secret: &str, rows: u32, cols: u32) -> Self {
        Self {
            rows,
            cols,
            ..Self::text(kind, secret)
        }
    }

    /// Create a resize message.
    #[must_use]
    pub const fn resize(rows: u32, cols: u32) -> Self {
        Self {
            kind: MessageType::Resize,
            data: Vec::new(),
            rows,
            cols,
        }
    }

    #[must_use]
    pub fn stdin(data: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageType::Stdin, data)
    }

    #[must_use]
    pub fn stdout(data: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageType::Stdout, data)
    }

    #[must_use]
    pub fn stderr(data: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageType::Stderr, data)
    }

    /// Decode the percent-encoded text payload.
    ///
    /// Follows query-string rules (`+` is a space). Payloads with a `%` not
    /// followed by two hex digits, or that do not decode to UTF-8, yield an
    /// empty string.
    #[must_use]
    pub fn decode_text(&self) -> String {
        decode_query_component(&self.data)
    }
}

fn decode_query_component(raw: &[u8]) -> String {
    if !has_valid_escapes(raw) {
        return String::new();
    }
    let spaced: Cow<'_, [u8]> = if raw.contains(&b'+') {
        Cow::Owned(
            raw.iter()
                .map(|&b| if b == b'+' { b' ' } else { b })
                .collect(),
        )
    } else {
        Cow::Borrowed(raw)
    };
    String::from_utf8(urlencoding::decode_binary(&spaced).into_owned()).unwrap_or_default()
}

fn has_valid_escapes(raw: &[u8]) -> bool {
    raw.iter()
        .enumerate()
        .filter(|&(_, &b)| b == b'%')
        .all(|(i, _)| {
            raw.get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit))
        })
}

mod base64_data {
    use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S: Serializer>(data: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map_or_else(|| Ok(Vec::new()), |s| {
                BASE64.decode(s).map_err(serde::de::Error::custom)
            })
    }
}
