//! Transport layer for browser terminals.
//!
//! Provides:
//! - Frame codec between WebSocket frames and bridge messages
//! - WebSocket message channel and router (feature: websocket)

pub mod frame;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use frame::{decode_binary_frame, decode_text_frame, encode_frame};

#[cfg(feature = "websocket")]
pub use websocket::{BridgeService, WsChannel, create_ws_router, ws_handler};
