//! WebSocket transport for web terminals.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt, stream::SplitStream};
use tokio::{sync::mpsc, task::JoinHandle};
use webssh_core::{
    Bridge, BridgeConfig, ChannelError, Message, MessageChannel, OUTBOUND_CAPACITY,
    OutboundSender, RemoteShell,
};

use crate::frame::{decode_binary_frame, decode_text_frame, encode_frame};

/// How long `close` waits for queued frames to reach the socket.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Message channel over an upgraded WebSocket.
pub struct WsChannel {
    receiver: SplitStream<WebSocket>,
    outbound: Option<OutboundSender>,
    writer: JoinHandle<()>,
}

impl WsChannel {
    /// Wrap a socket, spawning the task that writes outbound frames.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        let (mut sender, receiver) = socket.split();

        // Bounded so a client that stops reading holds back the output pumps
        let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let json = match encode_frame(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("Failed to serialize message: {e}");
                        continue;
                    }
                };
                if sender.send(WsMessage::Text(json.into())).await.is_err() {
                    break;
                }
            }
            let _ = sender.close().await;
        });

        Self {
            receiver,
            outbound: Some(OutboundSender::new(tx)),
            writer,
        }
    }
}

#[async_trait]
impl MessageChannel for WsChannel {
    async fn receive(&mut self) -> Result<Message, ChannelError> {
        loop {
            let frame = match self.receiver.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(ChannelError::Transport(e.to_string())),
                None => return Err(ChannelError::Closed),
            };
            return match frame {
                WsMessage::Text(text) => decode_text_frame(text.as_str()),
                WsMessage::Binary(data) => decode_binary_frame(&data),
                WsMessage::Close(_) => Err(ChannelError::Closed),
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            };
        }
    }

    fn outbound(&self) -> OutboundSender {
        self.outbound
            .clone()
            .unwrap_or_else(OutboundSender::detached)
    }

    async fn close(&mut self) {
        self.outbound = None;
        if tokio::time::timeout(CLOSE_GRACE, &mut self.writer)
            .await
            .is_err()
        {
            tracing::debug!("WebSocket writer did not drain in time");
            self.writer.abort();
        }
    }
}

/// Shared state for spawning one bridge per socket.
pub struct BridgeService<R> {
    /// Remote shell backend.
    pub shell: Arc<R>,
    /// Settings applied to every bridge.
    pub config: BridgeConfig,
}

impl<R> BridgeService<R> {
    /// Create new bridge service state.
    #[must_use]
    pub const fn new(shell: Arc<R>, config: BridgeConfig) -> Self {
        Self { shell, config }
    }
}

impl<R> Clone for BridgeService<R> {
    fn clone(&self) -> Self {
        Self {
            shell: Arc::clone(&self.shell),
            config: self.config.clone(),
        }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler<R>(
    ws: WebSocketUpgrade,
    State(service): State<BridgeService<R>>,
) -> impl IntoResponse
where
    R: RemoteShell,
{
    ws.on_upgrade(move |socket| async move {
        let bridge = Bridge::new(service.shell, service.config);
        tracing::info!(id = bridge.id(), "WebSocket connected");
        // The bridge logs its own exit reason.
        let _ = bridge.run(WsChannel::new(socket)).await;
    })
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(BridgeService::new(Arc::new(SshShell::new()), config)));
/// ```
#[must_use]
pub fn create_ws_router<R>(service: BridgeService<R>) -> axum::Router
where
    R: RemoteShell,
{
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler::<R>))
        .with_state(service)
}
