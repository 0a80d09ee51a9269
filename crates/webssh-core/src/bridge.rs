//! Per-connection bridge between a message channel and a remote shell.

use std::{sync::Arc, time::Duration};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::pump::PumpSet;
use crate::state::{SetupFlags, SetupState};
use crate::traits::{
    AuthMethod, ChannelError, Credential, MessageChannel, OutboundSender, PtyModes, PtyRequest,
    RemoteError, RemoteShell, ShellSession,
};
use crate::{Message, MessageType};

/// How long teardown waits for each output pump before aborting it.
const PUMP_GRACE: Duration = Duration::from_secs(2);

/// How long a fatal notice may wait for room in the outbound queue.
const NOTICE_GRACE: Duration = Duration::from_secs(2);

/// Bridge error.
///
/// Every variant except [`BridgeError::Transport`] is reported to the peer
/// with a single `stderr` notice before the bridge tears down.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Transport error: {0}")]
    Transport(#[from] ChannelError),
    #[error("Connect addr {addr} error: {source}")]
    Dial { addr: String, source: RemoteError },
    #[error("Parse publickey error: {0}")]
    KeyParse(RemoteError),
    #[error("{method} login error: {source}")]
    Login {
        method: AuthMethod,
        source: RemoteError,
    },
    #[error("Get session I/O error: {0}")]
    SessionIo(RemoteError),
    #[error("Start a login shell error: {0}")]
    Shell(RemoteError),
    #[error("Write to stdin error: {0}")]
    Stdin(std::io::Error),
    #[error("Resize error: {0}")]
    Resize(RemoteError),
}

impl BridgeError {
    /// Human-readable line sent to the peer, if the peer can still be reached.
    #[must_use]
    pub const fn notice(&self) -> Option<&'static str> {
        match self {
            Self::Transport(_) => None,
            Self::Dial { .. } => Some("connect error\r\n"),
            Self::KeyParse(_) => Some("parse publickey error\r\n"),
            Self::Login {
                method: AuthMethod::Password,
                ..
            } => Some("password login error\r\n"),
            Self::Login {
                method: AuthMethod::PublicKey,
                ..
            } => Some("publickey login error\r\n"),
            Self::SessionIo(_) => Some("get stdin channel error\r\n"),
            Self::Shell(_) => Some("start a login shell error\r\n"),
            Self::Stdin(_) => Some("write to stdin error\r\n"),
            Self::Resize(_) => Some("resize error\r\n"),
        }
    }
}

/// Lifecycle of the remote side.
enum Phase<C, S> {
    Idle,
    Connected(C),
    Authenticating,
    Interactive(Live<S>),
    Terminated,
}

/// An established interactive session and everything hanging off it.
struct Live<S> {
    session: S,
    stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pumps: PumpSet,
}

/// Bridge between one message channel and at most one remote session.
pub struct Bridge<R: RemoteShell> {
    id: String,
    config: BridgeConfig,
    shell: Arc<R>,
    setup: SetupState,
    phase: Phase<R::Connection, R::Session>,
}

impl<R: RemoteShell> Bridge<R> {
    /// Create a bridge with a random correlation id.
    #[must_use]
    pub fn new(shell: Arc<R>, config: BridgeConfig) -> Self {
        let setup = SetupState::new(config.default_term.clone());
        Self {
            id: Uuid::new_v4().to_string(),
            config,
            shell,
            setup,
            phase: Phase::Idle,
        }
    }

    /// Set the correlation id used in log output.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach a connection the caller already opened.
    ///
    /// A later `addr` message still dials and replaces it.
    #[must_use]
    pub fn with_connection(mut self, conn: R::Connection) -> Self {
        tracing::info!(id = %self.id, "remote connection attached");
        self.phase = Phase::Connected(conn);
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run the bridge on its own task.
    pub fn spawn<C>(self, channel: C) -> JoinHandle<Result<(), BridgeError>>
    where
        C: MessageChannel + 'static,
    {
        tokio::spawn(self.run(channel))
    }

    /// Process messages from `channel` until it closes or a fatal error occurs.
    ///
    /// All remote resources and the channel are released before returning.
    ///
    /// # Errors
    /// Returns the fatal error that ended the bridge. A clean channel close
    /// returns `Ok(())`.
    pub async fn run<C: MessageChannel>(mut self, mut channel: C) -> Result<(), BridgeError> {
        let span = tracing::info_span!("bridge", id = %self.id);
        async move {
            tracing::info!("message channel connected");
            let outbound = channel.outbound();

            let result = loop {
                let msg = match channel.receive().await {
                    Ok(msg) => msg,
                    Err(ChannelError::Closed) => break Ok(()),
                    Err(e) => break Err(BridgeError::Transport(e)),
                };
                if let Err(e) = self.dispatch(msg, &outbound).await {
                    if let Some(notice) = e.notice() {
                        let sent = tokio::time::timeout(
                            NOTICE_GRACE,
                            outbound.send(Message::stderr(notice)),
                        )
                        .await;
                        if !matches!(sent, Ok(Ok(()))) {
                            tracing::debug!("notice not delivered: {}", notice.trim_end());
                        }
                    }
                    break Err(e);
                }
            };

            self.teardown().await;
            drop(outbound);
            channel.close().await;

            match &result {
                Ok(()) => tracing::info!("message channel closed"),
                Err(e) => tracing::warn!("bridge exit: {e}"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn dispatch(
        &mut self,
        msg: Message,
        outbound: &OutboundSender,
    ) -> Result<(), BridgeError> {
        match msg.kind {
            MessageType::Addr => self.on_addr(&msg).await,
            MessageType::Term => {
                self.on_term(&msg);
                Ok(())
            }
            MessageType::Login => {
                self.on_login(&msg);
                Ok(())
            }
            MessageType::Password => self.on_auth(AuthMethod::Password, &msg, outbound).await,
            MessageType::PublicKey => self.on_auth(AuthMethod::PublicKey, &msg, outbound).await,
            MessageType::Stdin => self.on_stdin(&msg.data).await,
            MessageType::Resize => self.on_resize(msg.rows, msg.cols).await,
            MessageType::Stdout | MessageType::Stderr | MessageType::Unknown => {
                tracing::debug!(kind = ?msg.kind, "ignoring message");
                Ok(())
            }
        }
    }

    async fn on_addr(&mut self, msg: &Message) -> Result<(), BridgeError> {
        if self.setup.has(SetupFlags::ADDR) || self.setup.has(SetupFlags::AUTH) {
            return Ok(());
        }
        let addr = msg.decode_text();
        tracing::info!("connect addr {addr}");

        let dialed = tokio::time::timeout(self.config.connect_timeout(), self.shell.connect(&addr))
            .await
            .unwrap_or(Err(RemoteError::Timeout));
        let conn = match dialed {
            Ok(conn) => conn,
            Err(source) => return Err(BridgeError::Dial { addr, source }),
        };

        if let Phase::Connected(previous) = std::mem::replace(&mut self.phase, Phase::Connected(conn))
        {
            tracing::debug!("closing previously attached connection");
            self.shell.close_connection(previous).await;
        }
        self.setup.set_address(addr);
        tracing::info!("remote connected");
        Ok(())
    }

    fn on_term(&mut self, msg: &Message) {
        if self.setup.has(SetupFlags::TERM) {
            return;
        }
        let term = msg.decode_text();
        tracing::info!("set term {term}");
        self.setup.set_terminal_type(term);
    }

    fn on_login(&mut self, msg: &Message) {
        if self.setup.has(SetupFlags::LOGIN) {
            return;
        }
        let user = msg.decode_text();
        tracing::info!("login with user {user}");
        self.setup.set_username(user);
    }

    async fn on_auth(
        &mut self,
        method: AuthMethod,
        msg: &Message,
        outbound: &OutboundSender,
    ) -> Result<(), BridgeError> {
        if self.setup.has(SetupFlags::AUTH) {
            return Ok(());
        }
        if !matches!(self.phase, Phase::Connected(_)) {
            tracing::warn!("{method} auth dropped: must connect addr first");
            return Ok(());
        }
        if self.setup.username().is_empty() {
            tracing::warn!("{method} auth dropped: must set user first");
            return Ok(());
        }

        tracing::info!("auth with {method} ******");
        let secret = msg.decode_text();
        let credential = match method {
            AuthMethod::Password => Credential::Password(secret),
            AuthMethod::PublicKey => Credential::PrivateKey(
                self.shell
                    .parse_private_key(&secret)
                    .map_err(BridgeError::KeyParse)?,
            ),
        };

        let conn = match std::mem::replace(&mut self.phase, Phase::Authenticating) {
            Phase::Connected(conn) => conn,
            other => {
                self.phase = other;
                return Ok(());
            }
        };
        let request = self.pty_request(msg.rows, msg.cols);
        let live = Self::establish(
            &self.shell,
            &self.config,
            self.setup.username(),
            conn,
            credential,
            &request,
            outbound,
        )
        .await?;
        self.phase = Phase::Interactive(live);
        self.setup.mark_authenticated();
        tracing::info!(user = self.setup.username(), "interactive session started");
        Ok(())
    }

    async fn establish(
        shell: &R,
        config: &BridgeConfig,
        username: &str,
        conn: R::Connection,
        credential: Credential<R::Key>,
        request: &PtyRequest,
        outbound: &OutboundSender,
    ) -> Result<Live<R::Session>, BridgeError> {
        let method = credential.method();
        let mut session = tokio::time::timeout(
            config.connect_timeout(),
            shell.authenticate(conn, username, credential),
        )
        .await
        .unwrap_or(Err(RemoteError::Timeout))
        .map_err(|source| BridgeError::Login { method, source })?;

        match Self::prepare(&mut session, config, method, request, outbound).await {
            Ok((stdin, pumps)) => Ok(Live {
                session,
                stdin,
                pumps,
            }),
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    /// PTY, I/O streams, output pumps and shell, in that order.
    async fn prepare(
        session: &mut R::Session,
        config: &BridgeConfig,
        method: AuthMethod,
        request: &PtyRequest,
        outbound: &OutboundSender,
    ) -> Result<(Box<dyn AsyncWrite + Send + Unpin>, PumpSet), BridgeError> {
        tracing::debug!(?request, "requesting pty");
        session
            .request_pty(request)
            .await
            .map_err(|source| BridgeError::Login { method, source })?;

        let io = session.take_io().await.map_err(BridgeError::SessionIo)?;
        let pumps = PumpSet::start(io.stdout, io.stderr, outbound, config.buffer_size as usize);

        if let Err(e) = session.start_shell().await {
            pumps.shutdown(PUMP_GRACE).await;
            return Err(BridgeError::Shell(e));
        }
        Ok((io.stdin, pumps))
    }

    fn pty_request(&self, rows: u32, cols: u32) -> PtyRequest {
        PtyRequest {
            term: self.setup.terminal_type().to_string(),
            rows: if rows == 0 { self.config.default_rows } else { rows },
            cols: if cols == 0 { self.config.default_cols } else { cols },
            modes: PtyModes {
                echo: true,
                input_speed: self.config.buffer_size,
                output_speed: self.config.buffer_size,
            },
        }
    }

    async fn on_stdin(&mut self, data: &[u8]) -> Result<(), BridgeError> {
        let Phase::Interactive(live) = &mut self.phase else {
            tracing::debug!("stdin dropped: waiting for login");
            return Ok(());
        };
        live.stdin.write_all(data).await.map_err(BridgeError::Stdin)?;
        live.stdin.flush().await.map_err(BridgeError::Stdin)
    }

    async fn on_resize(&mut self, rows: u32, cols: u32) -> Result<(), BridgeError> {
        let Phase::Interactive(live) = &mut self.phase else {
            tracing::debug!("resize dropped: waiting for session");
            return Ok(());
        };
        tracing::debug!(rows, cols, "resize");
        live.session
            .resize(rows, cols)
            .await
            .map_err(BridgeError::Resize)
    }

    /// Release remote resources in reverse acquisition order.
    async fn teardown(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Terminated) {
            Phase::Interactive(Live {
                mut session,
                mut stdin,
                pumps,
            }) => {
                let exits = pumps.shutdown(PUMP_GRACE).await;
                tracing::debug!(?exits, "output pumps stopped");
                let _ = stdin.shutdown().await;
                drop(stdin);
                session.close().await;
                tracing::info!("remote session closed");
            }
            Phase::Connected(conn) => {
                self.shell.close_connection(conn).await;
                tracing::info!("remote connection closed");
            }
            Phase::Idle | Phase::Authenticating | Phase::Terminated => {}
        }
    }
}
