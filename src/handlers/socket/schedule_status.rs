use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::broadcast::{CloseReason, ConnectionState, Handshake};
use crate::state::AppState;

/// GET /pws/schedule-status - Upgrade, read the handshake, stream schedule status
pub async fn get(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    tracing::info!("status socket connected");
    let (mut sender, mut receiver) = socket.split();

    let Some(handshake) = read_handshake(&mut receiver).await else {
        close(&mut sender, close_code::POLICY, "handshake required").await;
        return;
    };

    // The client sends nothing after the handshake; the read half only
    // watches for the connection going away.
    let cancel = CancellationToken::new();
    let disconnected = cancel.clone();
    let watcher = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        disconnected.cancel();
    });

    let outcome = state
        .broadcaster
        .serve(&state.gate, handshake, &mut sender, cancel)
        .await;
    watcher.abort();

    match outcome.state {
        ConnectionState::Closed(CloseReason::Unauthorized) => {
            close(&mut sender, close_code::POLICY, "unauthorized").await
        }
        ConnectionState::Closed(CloseReason::ClientDisconnected) => {}
        _ => close(&mut sender, close_code::ERROR, "status unavailable").await,
    }
    tracing::info!(ticks = outcome.ticks, state = ?outcome.state, "status socket closed");
}

/// First text frame, decoded as the handshake. Control frames before it are
/// skipped.
async fn read_handshake(receiver: &mut SplitStream<WebSocket>) -> Option<Handshake> {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str(&text) {
                Ok(handshake) => return Some(handshake),
                Err(e) => {
                    tracing::warn!(error = %e, "malformed status handshake");
                    return None;
                }
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(_) | Err(_) => return None,
        }
    }
    None
}

async fn close(sender: &mut futures::stream::SplitSink<WebSocket, Message>, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = sender.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "close frame not delivered");
    }
}
