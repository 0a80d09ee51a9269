//! Session-bridging engine between a message channel and a remote shell.
//!
//! This crate provides the building blocks:
//! - `Message` - Wire message (JSON + base64)
//! - `Bridge` - Per-connection state machine driving one remote session
//! - `PumpSet` - Supervised relays from remote output to the peer
//! - `MessageChannel` and `RemoteShell` traits for the transport and backend
//! - `MemoryChannel` - In-process channel pair

pub mod bridge;
pub mod channel;
pub mod config;
pub mod message;
pub mod pump;
pub mod state;
pub mod traits;

pub use bridge::{Bridge, BridgeError};
pub use channel::{MemoryChannel, MemoryPeer};
pub use config::{BridgeConfig, ConfigError};
pub use message::{Message, MessageType};
pub use pump::{OutputPump, PumpExit, PumpSet};
pub use state::{SetupFlags, SetupState};
pub use traits::{
    AuthMethod, ChannelError, Credential, MessageChannel, OUTBOUND_CAPACITY, OutboundSender,
    PtyModes, PtyRequest, RemoteError, RemoteShell, SessionIo, ShellSession,
};
