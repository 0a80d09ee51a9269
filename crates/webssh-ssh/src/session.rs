//! Interactive SSH session channel.

use async_trait::async_trait;
use russh::{Channel, ChannelMsg, ChannelReadHalf, ChannelWriteHalf, Disconnect, Pty, client};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use webssh_core::{PtyRequest, RemoteError, SessionIo, ShellSession};

use crate::client::AcceptAnyHostKey;

/// Buffer between the channel reader and each output pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

/// SSH extended data type for standard error.
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

enum ChannelState {
    Whole(Channel<client::Msg>),
    Split(ChannelWriteHalf<client::Msg>),
    Closed,
}

/// Session channel on an authenticated SSH connection.
pub struct SshSession {
    handle: client::Handle<AcceptAnyHostKey>,
    channel: ChannelState,
    demux: Option<JoinHandle<()>>,
}

impl SshSession {
    pub(crate) const fn new(
        handle: client::Handle<AcceptAnyHostKey>,
        channel: Channel<client::Msg>,
    ) -> Self {
        Self {
            handle,
            channel: ChannelState::Whole(channel),
            demux: None,
        }
    }
}

#[async_trait]
impl ShellSession for SshSession {
    async fn request_pty(&mut self, request: &PtyRequest) -> Result<(), RemoteError> {
        let ChannelState::Whole(channel) = &self.channel else {
            return Err(RemoteError::Channel(
                "pty must be requested before taking session I/O".into(),
            ));
        };
        let modes = [
            (Pty::ECHO, u32::from(request.modes.echo)),
            (Pty::TTY_OP_ISPEED, request.modes.input_speed),
            (Pty::TTY_OP_OSPEED, request.modes.output_speed),
        ];
        channel
            .request_pty(true, &request.term, request.cols, request.rows, 0, 0, &modes)
            .await
            .map_err(channel_error)
    }

    async fn take_io(&mut self) -> Result<SessionIo, RemoteError> {
        let channel = match std::mem::replace(&mut self.channel, ChannelState::Closed) {
            ChannelState::Whole(channel) => channel,
            other => {
                self.channel = other;
                return Err(RemoteError::Channel("session I/O already taken".into()));
            }
        };

        let (read_half, write_half) = channel.split();
        let (stdout_tx, stdout_rx) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_tx, stderr_rx) = tokio::io::duplex(PIPE_CAPACITY);
        self.demux = Some(tokio::spawn(demux(read_half, stdout_tx, stderr_tx)));

        let stdin = Box::pin(write_half.make_writer());
        self.channel = ChannelState::Split(write_half);

        Ok(SessionIo {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout_rx),
            stderr: Box::new(stderr_rx),
        })
    }

    async fn resize(&mut self, rows: u32, cols: u32) -> Result<(), RemoteError> {
        match &self.channel {
            ChannelState::Whole(channel) => channel.window_change(cols, rows, 0, 0).await,
            ChannelState::Split(write_half) => write_half.window_change(cols, rows, 0, 0).await,
            ChannelState::Closed => return Err(RemoteError::Channel("session closed".into())),
        }
        .map_err(channel_error)
    }

    async fn start_shell(&mut self) -> Result<(), RemoteError> {
        match &self.channel {
            ChannelState::Whole(channel) => channel.request_shell(true).await,
            ChannelState::Split(write_half) => write_half.request_shell(true).await,
            ChannelState::Closed => return Err(RemoteError::Channel("session closed".into())),
        }
        .map_err(channel_error)
    }

    async fn close(&mut self) {
        let closed = match std::mem::replace(&mut self.channel, ChannelState::Closed) {
            ChannelState::Whole(channel) => channel.close().await,
            ChannelState::Split(write_half) => write_half.close().await,
            ChannelState::Closed => Ok(()),
        };
        if let Err(e) = closed {
            tracing::debug!("Failed to close SSH channel: {e}");
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("Failed to disconnect SSH session: {e}");
        }
        if let Some(demux) = self.demux.take() {
            demux.abort();
        }
    }
}

/// Split channel data into the stdout and stderr pipes until the channel ends.
async fn demux(mut read_half: ChannelReadHalf, mut stdout: DuplexStream, mut stderr: DuplexStream) {
    while let Some(msg) = read_half.wait().await {
        let written = match msg {
            ChannelMsg::Data { ref data } => stdout.write_all(data).await,
            ChannelMsg::ExtendedData { ref data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                stderr.write_all(data).await
            }
            ChannelMsg::ExitStatus { exit_status } => {
                tracing::info!(exit_status, "remote shell exited");
                Ok(())
            }
            ChannelMsg::Eof | ChannelMsg::Close => break,
            _ => Ok(()),
        };
        if let Err(e) = written {
            tracing::debug!("output pipe closed: {e}");
            break;
        }
    }
}

fn channel_error(e: russh::Error) -> RemoteError {
    RemoteError::Channel(e.to_string())
}
