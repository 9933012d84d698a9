//! Serialized event writer
//!
//! A signaling connection is written from several tasks at once (dispatcher,
//! convergence passes, candidate notifications, room broadcasts). The
//! underlying sink accepts one writer at a time, so every frame goes
//! through [`EventWriter`], which serializes access with an async mutex.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::{mpsc, Mutex};

use super::event::{Event, Question};
use crate::error::{Error, Result};

/// Text frame sink of a signaling connection
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Write one text frame
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Close the sink
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl FrameSink for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.send(Message::Text(text))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        SinkExt::close(self)
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

#[async_trait]
impl FrameSink for mpsc::UnboundedSender<String> {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.send(text)
            .map_err(|_| Error::Transport("frame receiver dropped".into()))
    }
}

/// Mutually exclusive writer for one signaling connection
pub struct EventWriter {
    sink: Mutex<Box<dyn FrameSink>>,
}

impl EventWriter {
    pub fn new(sink: impl FrameSink) -> Self {
        Self {
            sink: Mutex::new(Box::new(sink)),
        }
    }

    /// Serialize and write an event
    pub async fn write_event(&self, event: &Event) -> Result<()> {
        let text = serde_json::to_string(event)
            .map_err(|e| Error::Transport(format!("event encoding failed: {}", e)))?;

        let mut sink = self.sink.lock().await;
        sink.send_text(text).await
    }

    /// Write a `question` event asking the client for more input
    pub async fn write_question(&self, ask: &str) -> Result<()> {
        self.write_event(&Event::Question(Question::new(ask))).await
    }

    /// Close the underlying sink; errors are logged and dropped
    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            tracing::debug!(error = %e, "Signaling sink close failed");
        }
    }
}
