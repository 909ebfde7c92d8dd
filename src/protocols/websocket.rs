//! # WebSocket Stream Forwarder
//!
//! Bridges an accepted client WebSocket to the chat backend at
//! `ws(s)://<entrypoint>/ws/{chat_id}/{client_id}`.
//!
//! Two relay tasks run per tunnel, one per direction. Text, binary and close frames are
//! relayed; ping/pong stays local to each leg. When either side closes or fails, the
//! other relay is stopped and its socket closed, so neither leg outlives the tunnel.

use crate::core::config::TimeoutConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::metrics::record_tunnel;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as BackendCloseFrame;
use tokio_tungstenite::tungstenite::Message as BackendMessage;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

/// Backend tunnel address for a chat participant
pub fn tunnel_url(entrypoint: &Url, chat_id: i64, client_id: Uuid) -> GatewayResult<Url> {
    let scheme = match entrypoint.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(GatewayError::protocol(
                "websocket",
                format!("Cannot tunnel to '{}' entrypoint {}", other, entrypoint),
            ))
        }
    };

    let mut url = entrypoint.clone();
    url.set_scheme(scheme)
        .map_err(|_| GatewayError::protocol("websocket", format!("Cannot tunnel to {}", entrypoint)))?;
    url.set_path(&format!(
        "{}/ws/{}/{}",
        entrypoint.path().trim_end_matches('/'),
        chat_id,
        client_id
    ));
    url.set_query(None);
    Ok(url)
}

/// Send a close frame and drop the socket
pub async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!(error = %e, code, "Failed to send close frame");
    }
}

/// Opens backend connections and runs tunnels
#[derive(Debug, Clone)]
pub struct StreamForwarder {
    connect_timeout: Duration,
}

impl StreamForwarder {
    pub fn new(timeouts: &TimeoutConfig) -> Self {
        Self {
            connect_timeout: timeouts.upstream_connect,
        }
    }

    /// Connect to `backend` and relay frames until one side goes away.
    ///
    /// If the backend cannot be reached the client is closed with 1011.
    #[instrument(skip(self, client), fields(backend = %backend))]
    pub async fn tunnel(&self, client: WebSocket, backend: Url) {
        let upstream = match timeout(self.connect_timeout, connect_async(backend.as_str())).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                warn!(error = %e, "WebSocket backend unreachable");
                record_tunnel("backend_unreachable");
                close_with(client, close_code::ERROR, "Backend unavailable").await;
                return;
            }
            Err(_) => {
                warn!(timeout_ms = self.connect_timeout.as_millis() as u64, "WebSocket backend connect timed out");
                record_tunnel("backend_unreachable");
                close_with(client, close_code::ERROR, "Backend unavailable").await;
                return;
            }
        };

        record_tunnel("opened");
        info!("WebSocket tunnel opened");

        let (mut client_tx, mut client_rx) = client.split();
        let (mut backend_tx, mut backend_rx) = upstream.split();

        let mut to_backend = tokio::spawn(async move {
            while let Some(Ok(message)) = client_rx.next().await {
                let Some(message) = client_to_backend(message) else {
                    continue;
                };
                let closing = matches!(message, BackendMessage::Close(_));
                if backend_tx.send(message).await.is_err() || closing {
                    break;
                }
            }
            let _ = backend_tx.close().await;
        });

        let mut to_client = tokio::spawn(async move {
            while let Some(Ok(message)) = backend_rx.next().await {
                let Some(message) = backend_to_client(message) else {
                    continue;
                };
                let closing = matches!(message, Message::Close(_));
                if client_tx.send(message).await.is_err() || closing {
                    break;
                }
            }
            let _ = client_tx.close().await;
        });

        tokio::select! {
            _ = &mut to_backend => {
                debug!("Client leg finished");
                to_client.abort();
            }
            _ = &mut to_client => {
                debug!("Backend leg finished");
                to_backend.abort();
            }
        }

        record_tunnel("closed");
        info!("WebSocket tunnel closed");
    }
}

fn client_to_backend(message: Message) -> Option<BackendMessage> {
    match message {
        Message::Text(text) => Some(BackendMessage::Text(text)),
        Message::Binary(data) => Some(BackendMessage::Binary(data)),
        Message::Close(frame) => Some(BackendMessage::Close(frame.map(|f| BackendCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason,
        }))),
        Message::Ping(_) | Message::Pong(_) => None,
    }
}

fn backend_to_client(message: BackendMessage) -> Option<Message> {
    match message {
        BackendMessage::Text(text) => Some(Message::Text(text)),
        BackendMessage::Binary(data) => Some(Message::Binary(data)),
        BackendMessage::Close(frame) => Some(Message::Close(frame.map(|f| CloseFrame {
            code: u16::from(f.code),
            reason: f.reason,
        }))),
        BackendMessage::Ping(_) | BackendMessage::Pong(_) | BackendMessage::Frame(_) => None,
    }
}
