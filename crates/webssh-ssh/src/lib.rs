//! SSH remote shell backend.
//!
//! Provides:
//! - `SshShell` - Dial, handshake and authenticate with `russh`
//! - `SshSession` - PTY-backed session channel with split stdout/stderr

pub mod client;
pub mod session;

pub use client::{AcceptAnyHostKey, SshShell};
pub use session::SshSession;
