//! Core traits for the message transport and the remote shell.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::Message;

/// Transport error.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel closed")]
    Closed,
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Messages a transport queues for the peer before senders wait.
pub const OUTBOUND_CAPACITY: usize = 64;

/// Cloneable sending half of a message channel.
///
/// Safe to use from several tasks at once; the transport drains the queue
/// from a single writer so frames never interleave. The queue is bounded, so
/// a peer that stops reading stalls the senders instead of growing memory.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<Message>,
}

impl OutboundSender {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    /// A sender whose receiving side is already gone.
    #[must_use]
    pub fn detached() -> Self {
        let (tx, _) = mpsc::channel(1);
        Self { tx }
    }

    /// Queue one message for the peer, waiting while the queue is full.
    ///
    /// # Errors
    /// Returns error if the transport writer has stopped.
    pub async fn send(&self, msg: Message) -> Result<(), ChannelError> {
        self.tx.send(msg).await.map_err(|_| ChannelError::Closed)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Duplex transport carrying framed messages between peer and bridge.
#[async_trait]
pub trait MessageChannel: Send {
    /// Wait for the next inbound message.
    ///
    /// Fails once the transport is closed or a frame cannot be decoded.
    async fn receive(&mut self) -> Result<Message, ChannelError>;

    /// Handle for writing outbound messages.
    fn outbound(&self) -> OutboundSender;

    /// Flush queued output and release the transport.
    async fn close(&mut self);
}

/// Remote shell error.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[error("Timed out")]
    Timeout,
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Authentication rejected for user {0}")]
    Rejected(String),
    #[error("Invalid private key: {0}")]
    InvalidKey(String),
    #[error("Channel request failed: {0}")]
    Channel(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Authentication method a credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Password,
    PublicKey,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password => f.write_str("password"),
            Self::PublicKey => f.write_str("publickey"),
        }
    }
}

/// Secret material for one authentication attempt.
pub enum Credential<K> {
    Password(String),
    PrivateKey(K),
}

impl<K> Credential<K> {
    #[must_use]
    pub const fn method(&self) -> AuthMethod {
        match self {
            Self::Password(_) => AuthMethod::Password,
            Self::PrivateKey(_) => AuthMethod::PublicKey,
        }
    }
}

impl<K> fmt::Debug for Credential<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential::{}(******)", self.method())
    }
}

/// Terminal modes sent with the PTY request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtyModes {
    pub echo: bool,
    pub input_speed: u32,
    pub output_speed: u32,
}

/// Pseudo-terminal allocation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub rows: u32,
    pub cols: u32,
    pub modes: PtyModes,
}

/// Byte streams of an interactive session.
pub struct SessionIo {
    /// Remote process input.
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// Remote standard output.
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// Remote standard error.
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
}

/// Capability for dialing and authenticating against a remote shell host.
///
/// Timeouts are applied by the caller around `connect` and `authenticate`.
#[async_trait]
pub trait RemoteShell: Send + Sync + 'static {
    /// Network connection produced by `connect`.
    type Connection: Send + 'static;
    /// Parsed private key.
    type Key: Send + 'static;
    /// Authenticated session.
    type Session: ShellSession + 'static;

    /// Open a network connection to `addr` (`host:port`).
    async fn connect(&self, addr: &str) -> Result<Self::Connection, RemoteError>;

    /// Parse PEM private key text.
    ///
    /// # Errors
    /// Returns [`RemoteError::InvalidKey`] on malformed key material.
    fn parse_private_key(&self, pem: &str) -> Result<Self::Key, RemoteError>;

    /// Run the protocol handshake, authenticate and open a session channel.
    async fn authenticate(
        &self,
        conn: Self::Connection,
        username: &str,
        credential: Credential<Self::Key>,
    ) -> Result<Self::Session, RemoteError>;

    /// Release a connection that never got authenticated.
    async fn close_connection(&self, conn: Self::Connection) {
        drop(conn);
    }
}

/// An authenticated interactive session.
#[async_trait]
pub trait ShellSession: Send {
    /// Request a pseudo-terminal.
    async fn request_pty(&mut self, request: &PtyRequest) -> Result<(), RemoteError>;

    /// Take the input writer and both output readers. Callable once.
    async fn take_io(&mut self) -> Result<SessionIo, RemoteError>;

    /// Change the window size.
    async fn resize(&mut self, rows: u32, cols: u32) -> Result<(), RemoteError>;

    /// Start the login shell.
    async fn start_shell(&mut self) -> Result<(), RemoteError>;

    /// Close the session and its underlying connection.
    async fn close(&mut self);
}
