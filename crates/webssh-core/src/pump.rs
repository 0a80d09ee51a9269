//! Relay tasks forwarding remote output streams to the peer.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::traits::OutboundSender;
use crate::{Message, MessageType};

/// Why a relay task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The remote stream reached end of file.
    Eof,
    /// Reading the remote stream failed.
    ReadFailed,
    /// The peer channel no longer accepts messages.
    PeerClosed,
    /// Cancelled by the owning bridge.
    Cancelled,
    /// Did not stop within the grace period and was aborted.
    Aborted,
}

/// One background relay task.
pub struct OutputPump {
    kind: MessageType,
    handle: JoinHandle<PumpExit>,
}

impl OutputPump {
    /// Spawn a relay from `reader` to `outbound` as `kind` messages.
    pub fn spawn<R>(
        kind: MessageType,
        reader: R,
        outbound: OutboundSender,
        buffer_size: usize,
        cancel: watch::Receiver<bool>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let handle = tokio::spawn(
            relay(kind, reader, outbound, buffer_size, cancel).in_current_span(),
        );
        Self { kind, handle }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn relay<R>(
    kind: MessageType,
    mut reader: R,
    outbound: OutboundSender,
    buffer_size: usize,
    mut cancel: watch::Receiver<bool>,
) -> PumpExit
where
    R: AsyncRead + Send + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let n = tokio::select! {
            biased;
            _ = cancel.changed() => return PumpExit::Cancelled,
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!(stream = ?kind, "remote stream closed");
                    return PumpExit::Eof;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(stream = ?kind, "remote read failed: {e}");
                    return PumpExit::ReadFailed;
                }
            },
        };
        // Blocks while the outbound queue is full; no read happens meanwhile.
        let sent = tokio::select! {
            biased;
            _ = cancel.changed() => return PumpExit::Cancelled,
            sent = outbound.send(Message::new(kind, &buf[..n])) => sent,
        };
        if sent.is_err() {
            tracing::debug!(stream = ?kind, "peer stopped accepting output");
            return PumpExit::PeerClosed;
        }
    }
}

/// The stdout and stderr relays of one session, sharing a cancel handle.
pub struct PumpSet {
    cancel: watch::Sender<bool>,
    pumps: Vec<OutputPump>,
}

impl PumpSet {
    /// Start relaying both output streams.
    pub fn start<O, E>(stdout: O, stderr: E, outbound: &OutboundSender, buffer_size: usize) -> Self
    where
        O: AsyncRead + Send + Unpin + 'static,
        E: AsyncRead + Send + Unpin + 'static,
    {
        let (cancel, rx) = watch::channel(false);
        let pumps = vec![
            OutputPump::spawn(
                MessageType::Stdout,
                stdout,
                outbound.clone(),
                buffer_size,
                rx.clone(),
            ),
            OutputPump::spawn(MessageType::Stderr, stderr, outbound.clone(), buffer_size, rx),
        ];
        Self { cancel, pumps }
    }

    /// True once every relay has stopped on its own.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.pumps.iter().all(OutputPump::is_finished)
    }

    /// Cancel both relays and wait up to `grace` for each; stragglers are aborted.
    pub async fn shutdown(self, grace: Duration) -> Vec<(MessageType, PumpExit)> {
        let _ = self.cancel.send(true);
        let mut exits = Vec::with_capacity(self.pumps.len());
        for pump in self.pumps {
            let OutputPump { kind, mut handle } = pump;
            let exit = match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(exit)) => exit,
                Ok(Err(e)) => {
                    tracing::warn!(stream = ?kind, "output pump panicked: {e}");
                    PumpExit::Aborted
                }
                Err(_) => {
                    handle.abort();
                    PumpExit::Aborted
                }
            };
            exits.push((kind, exit));
        }
        exits
    }
}
