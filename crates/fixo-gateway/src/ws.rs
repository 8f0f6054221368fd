// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket push of session, message and signal changes.
//!
//! Client -> Server (JSON):
//! ```json
//! {"type": "subscribe", "topic": {"kind": "messages", "session_id": "..."}}
//! ```
//!
//! Server -> Client (JSON):
//! ```json
//! {"type": "subscribed", "data": {"kind": "messages", "session_id": "..."}}
//! {"type": "message", "data": {"id": "...", "message": "..."}}
//! {"type": "error", "data": {"code": "forbidden", "error": "..."}}
//! ```

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use fixo_core::protocol::{ClientFrame, ErrorBody, ServerFrame, Topic};
use fixo_core::{FixoError, Identity, Subscription};

use crate::server::GatewayState;

/// Outbound frames buffered per socket before the pumps block.
const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// WebSocket upgrade handler. The token is checked before upgrading.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<GatewayState>,
) -> Response {
    let identity = match state.auth.authenticate(query.token.as_deref()) {
        Ok(identity) => identity,
        Err(status) => return status.into_response(),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

/// Handle an individual WebSocket connection.
///
/// A sender task owns the sink; one pump task per subscription feeds it.
async fn handle_socket(socket: WebSocket, state: GatewayState, identity: Identity) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(OUTBOUND_BUFFER);

    let sender_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("failed to encode WebSocket frame: {e}");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut pumps: Vec<AbortHandle> = Vec::new();
    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) => {
                let text_str: &str = &text;
                let reply = match serde_json::from_str::<ClientFrame>(text_str) {
                    Ok(ClientFrame::Subscribe { topic }) => {
                        match attach(&state, &identity, &topic, tx.clone()).await {
                            Ok(pump) => {
                                tracing::debug!(user = %identity.user_id, ?topic, "subscribed");
                                pumps.push(pump);
                                ServerFrame::Subscribed(topic)
                            }
                            Err(e) => ServerFrame::Error(ErrorBody::from(&e)),
                        }
                    }
                    Err(e) => {
                        tracing::warn!("invalid WebSocket message: {e}");
                        ServerFrame::Error(ErrorBody::from(&FixoError::Validation(format!(
                            "invalid frame: {e}"
                        ))))
                    }
                };
                if tx.send(reply).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {} // Ignore binary, ping (handled by tungstenite layer)
        }
    }

    for pump in pumps {
        pump.abort();
    }
    sender_task.abort();
}

/// Open the backend subscription for `topic` and spawn its pump.
async fn attach(
    state: &GatewayState,
    caller: &Identity,
    topic: &Topic,
    tx: mpsc::Sender<ServerFrame>,
) -> Result<AbortHandle, FixoError> {
    let handle = match topic {
        Topic::Sessions => {
            let sub = state.backend.subscribe_sessions(caller).await?;
            tokio::spawn(pump(sub, tx, ServerFrame::SessionChange))
        }
        Topic::Messages { session_id } => {
            let sub = state.backend.subscribe_messages(caller, session_id).await?;
            tokio::spawn(pump(sub, tx, ServerFrame::Message))
        }
        Topic::Signals { session_id } => {
            let sub = state.backend.subscribe_signals(caller, session_id).await?;
            tokio::spawn(pump(sub, tx, ServerFrame::Signal))
        }
    };
    Ok(handle.abort_handle())
}

async fn pump<T: Send + 'static>(
    mut sub: Subscription<T>,
    tx: mpsc::Sender<ServerFrame>,
    wrap: fn(T) -> ServerFrame,
) {
    while let Some(item) = sub.recv().await {
        if tx.send(wrap(item)).await.is_err() {
            break;
        }
    }
}
