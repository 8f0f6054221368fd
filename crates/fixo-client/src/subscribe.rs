// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One WebSocket per live subscription.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use fixo_core::protocol::{ClientFrame, ServerFrame, Topic};
use fixo_core::{FixoError, Subscription};

/// Buffered items per subscription before the socket reader blocks.
const SUBSCRIPTION_BUFFER: usize = 64;

/// How long the gateway gets to acknowledge a subscribe frame.
const ACK_TIMEOUT: Duration = Duration::from_secs(10);

fn ws_error(context: &str, e: tokio_tungstenite::tungstenite::Error) -> FixoError {
    FixoError::Channel {
        message: format!("{context}: {e}"),
        source: Some(Box::new(e)),
    }
}

/// Open `url`, subscribe to `topic` and return once the gateway has
/// attached the feed.
///
/// Frames that race ahead of the acknowledgement are kept and delivered
/// first. `pick` drops frames of other kinds.
pub(crate) async fn open<T>(
    url: &str,
    topic: Topic,
    pick: fn(ServerFrame) -> Option<T>,
) -> Result<Subscription<T>, FixoError>
where
    T: Send + 'static,
{
    let (stream, _) = connect_async(url)
        .await
        .map_err(|e| ws_error("WebSocket connection failed", e))?;
    let (mut write, mut read) = stream.split();

    let frame = serde_json::to_string(&ClientFrame::Subscribe {
        topic: topic.clone(),
    })
    .map_err(|e| FixoError::Internal(format!("failed to encode subscribe frame: {e}")))?;
    write
        .send(Message::Text(frame.into()))
        .await
        .map_err(|e| ws_error("failed to send subscribe frame", e))?;

    let mut early = Vec::new();
    let ack = tokio::time::timeout(ACK_TIMEOUT, async {
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(ServerFrame::Subscribed(_)) => return Ok(()),
                    Ok(ServerFrame::Error(body)) => return Err(body.into_error()),
                    Ok(frame) => early.push(frame),
                    Err(e) => warn!("failed to parse WebSocket frame: {e}"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(FixoError::channel(
                        "WebSocket closed before the subscription was acknowledged",
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(ws_error("WebSocket error", e)),
            }
        }
    })
    .await;
    match ack {
        Ok(result) => result?,
        Err(_) => {
            return Err(FixoError::Timeout {
                duration: ACK_TIMEOUT,
            });
        }
    }
    debug!(?topic, "subscription acknowledged");

    let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
    let task = tokio::spawn(async move {
        // dropping the sink would half-close the socket
        let _write = write;
        for frame in early {
            if let Some(item) = pick(frame)
                && tx.send(item).await.is_err()
            {
                return;
            }
        }
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(ServerFrame::Error(body)) => {
                        warn!(code = %body.code, "gateway reported: {}", body.error);
                    }
                    Ok(frame) => {
                        if let Some(item) = pick(frame)
                            && tx.send(item).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => warn!("failed to parse WebSocket frame: {e}"),
                },
                Ok(Message::Close(_)) => {
                    debug!(?topic, "subscription closed by gateway");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(?topic, "WebSocket error: {e}");
                    break;
                }
            }
        }
    });
    Ok(Subscription::new(rx, task.abort_handle()))
}
