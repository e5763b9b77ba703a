use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;

use super::BroadcastError;

/// Write half of a status connection. One call is one complete message.
#[async_trait]
pub trait StatusSink: Send {
    async fn send_text(&mut self, payload: String) -> Result<(), BroadcastError>;
}

#[async_trait]
impl StatusSink for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, payload: String) -> Result<(), BroadcastError> {
        self.send(Message::Text(payload))
            .await
            .map_err(|e| BroadcastError::StreamWrite(e.to_string()))
    }
}
