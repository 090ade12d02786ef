// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Websocket status feed.
//!
//! Subscribes the client to the broadcast channel and forwards every
//! [`iaas_core::model::StatusUpdate`] as a JSON text frame. A lagging
//! client skips missed updates rather than slowing the reconciliation
//! loop.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::broadcast;
use tracing::debug;

use crate::api::AppState;

/// Upgrade to a websocket and stream status updates.
pub(crate) async fn status_feed(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let rx = state.broadcaster.subscribe();
    ws.on_upgrade(move |socket| stream_updates(socket, rx))
}

async fn stream_updates(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<iaas_core::model::StatusUpdate>,
) {
    loop {
        tokio::select! {
            update = rx.recv() => {
                match update {
                    Ok(update) => {
                        let Ok(payload) = serde_json::to_string(&update) else {
                            continue;
                        };
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "websocket client lagged; skipping updates");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            message = socket.recv() => {
                // Any close or error from the client ends the stream.
                match message {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    debug!("websocket status feed closed");
}
