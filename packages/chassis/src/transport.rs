//! Inbound transport port and an in-process channel implementation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::envelope::EventEnvelope;
use crate::publish::EventPublisher;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Nothing available right now. The worker backs off and polls again.
    #[error("no message available")]
    Idle,

    /// The source is closed and will never yield again; the worker stops
    /// cleanly.
    #[error("end of stream")]
    EndOfStream,

    /// The transport cannot continue; the worker stops.
    #[error("transport failed: {0}")]
    Fatal(#[from] anyhow::Error),
}

/// Source of raw inbound messages.
///
/// Messages are raw JSON so undecodable payloads still reach the DLQ.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn poll(&self, cancel: &CancellationToken) -> Result<Value, TransportError>;
}

/// Transport backed by a tokio mpsc channel.
///
/// `poll` returns whatever is queued without waiting. An empty queue is
/// [`TransportError::Idle`]; once [`close`](Self::close)d and drained it is
/// [`TransportError::EndOfStream`].
pub struct ChannelTransport {
    rx: Mutex<mpsc::UnboundedReceiver<Value>>,
    tx: mpsc::UnboundedSender<Value>,
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            rx: Mutex::new(rx),
            tx,
        }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<Value> {
        self.tx.clone()
    }

    /// Publisher that feeds this transport.
    pub fn publisher(&self) -> ChannelPublisher {
        ChannelPublisher { tx: self.sender() }
    }

    /// Stop accepting messages. Already queued messages are still delivered.
    pub async fn close(&self) {
        self.rx.lock().await.close();
    }
}

#[async_trait]
impl EventTransport for ChannelTransport {
    async fn poll(&self, cancel: &CancellationToken) -> Result<Value, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Idle);
        }
        let mut rx = self.rx.lock().await;
        match rx.try_recv() {
            Ok(raw) => Ok(raw),
            Err(mpsc::error::TryRecvError::Empty) => Err(TransportError::Idle),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::EndOfStream),
        }
    }
}

#[async_trait]
impl<T: EventTransport + ?Sized> EventTransport for Arc<T> {
    async fn poll(&self, cancel: &CancellationToken) -> Result<Value, TransportError> {
        (**self).poll(cancel).await
    }
}

/// Publishes envelopes onto a [`ChannelTransport`].
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<Value>,
}

impl ChannelPublisher {
    pub fn send_raw(&self, raw: Value) -> anyhow::Result<()> {
        self.tx
            .send(raw)
            .map_err(|_| anyhow::anyhow!("inbound channel closed"))
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        self.send_raw(envelope.to_value())
    }
}
