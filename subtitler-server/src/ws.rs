//! `/ws/{client_id}`: progress push and stop requests.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use subtitler::{ClientMessage, Error, Notification, NotificationChannel};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::routes::AppState;

const OUTBOUND_BUFFER: usize = 256;

/// Server side of one WebSocket. Messages go through a queue drained by a
/// writer task that owns the socket sink. A full queue drops the message
/// rather than waiting on a client that stopped reading.
pub struct WsChannel {
    tx: mpsc::Sender<Message>,
}

impl WsChannel {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    fn push(&self, message: Message) -> subtitler::Result<()> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => Error::Channel("outbound queue is full, message dropped".into()),
            TrySendError::Closed(_) => Error::Channel("websocket writer has shut down".into()),
        })
    }
}

#[async_trait]
impl NotificationChannel for WsChannel {
    async fn send(&self, message: &Notification) -> subtitler::Result<()> {
        let text = serde_json::to_string(message)?;
        self.push(Message::Text(text))
    }

    async fn close(&self, code: u16) -> subtitler::Result<()> {
        self.push(Message::Close(Some(CloseFrame {
            code,
            reason: "replaced by a newer connection".into(),
        })))
    }
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

async fn handle_socket(socket: WebSocket, client_id: String, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

    let writer_client = client_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = sender.send(msg).await {
                debug!(client_id = %writer_client, error = %e, "websocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let channel: Arc<dyn NotificationChannel> = Arc::new(WsChannel::new(tx));
    let connections = state.runner.connections().clone();
    connections.connect(channel.clone(), &client_id).await;

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => handle_text(&state, &channel, &client_id, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(client_id, error = %e, "websocket receive error");
                break;
            }
        }
    }

    info!(client_id, "websocket closed");
    connections.disconnect(&channel, &client_id);
    writer.abort();
}

async fn handle_text(
    state: &AppState,
    channel: &Arc<dyn NotificationChannel>,
    client_id: &str,
    text: &str,
) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::StopProcessing) => {
            info!(client_id, "stop requested");
            let outcome = state.runner.connections().cancel(client_id).await;
            debug!(client_id, ?outcome, "stop handled");
            if let Err(e) = channel.send(&Notification::StopAcknowledged).await {
                warn!(client_id, error = %e, "failed to acknowledge stop");
            }
        }
        Err(e) => warn!(client_id, error = %e, message = text, "ignoring malformed websocket message"),
    }
}
