//! In-memory fakes for exercising services built on the chassis.
//!
//! Available in this crate's tests and to downstream crates through the
//! `testing` feature.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::aggregate::{DashboardQuery, GetBySubject, ListBySubject, SummaryReader};
use crate::envelope::EventEnvelope;
use crate::publish::EventPublisher;
use crate::transport::{EventTransport, TransportError};

/// Publisher that records every envelope it accepts.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<EventEnvelope>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<EventEnvelope> {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn event_ids(&self) -> Vec<String> {
        self.published().into_iter().map(|e| e.event_id).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<()> {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(envelope.clone());
        Ok(())
    }
}

/// Publisher whose publish never completes, like a broker that stopped
/// acknowledging.
#[derive(Debug, Default, Clone, Copy)]
pub struct StalledPublisher;

#[async_trait]
impl EventPublisher for StalledPublisher {
    async fn publish(&self, _envelope: &EventEnvelope) -> Result<()> {
        std::future::pending().await
    }
}

/// Publisher that rejects chosen event ids until [`recover`](Self::recover)
/// is called. Accepted envelopes are recorded.
#[derive(Debug, Default)]
pub struct FailingPublisher {
    failing: Mutex<HashSet<String>>,
    healthy: AtomicBool,
    inner: RecordingPublisher,
}

impl FailingPublisher {
    pub fn failing_on<I, S>(event_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failing: Mutex::new(event_ids.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn recover(&self) {
        self.healthy.store(true, Ordering::SeqCst);
    }

    pub fn event_ids(&self) -> Vec<String> {
        self.inner.event_ids()
    }
}

#[async_trait]
impl EventPublisher for FailingPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<()> {
        let fails = !self.healthy.load(Ordering::SeqCst)
            && self
                .failing
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .contains(&envelope.event_id);
        if fails {
            return Err(anyhow!("broker rejected {}", envelope.event_id));
        }
        self.inner.publish(envelope).await
    }
}

#[derive(Debug, Clone)]
enum Script {
    Ok(Value),
    Fail(String),
    Sleep(Duration, Value),
}

/// Reader stub implementing every reader capability with a fixed script.
#[derive(Debug)]
pub struct ScriptedReader {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedReader {
    pub fn ok(value: Value) -> Self {
        Self::with_script(Script::Ok(value))
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_script(Script::Fail(message.into()))
    }

    /// Sleeps for `delay` (ignoring cancellation) before returning `value`.
    pub fn sleeping(delay: Duration, value: Value) -> Self {
        Self::with_script(Script::Sleep(delay, value))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn run(&self) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Ok(value) => Ok(value.clone()),
            Script::Fail(message) => Err(anyhow!("{message}")),
            Script::Sleep(delay, value) => {
                tokio::time::sleep(*delay).await;
                Ok(value.clone())
            }
        }
    }
}

#[async_trait]
impl GetBySubject for ScriptedReader {
    async fn get_by_subject(&self, _query: &DashboardQuery, _cancel: &CancellationToken) -> Result<Value> {
        self.run().await
    }
}

#[async_trait]
impl ListBySubject for ScriptedReader {
    async fn list_by_subject(
        &self,
        _query: &DashboardQuery,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Value>> {
        match self.run().await? {
            Value::Array(items) => Ok(items),
            other => Ok(vec![other]),
        }
    }
}

#[async_trait]
impl SummaryReader for ScriptedReader {
    async fn get_summary(&self, _query: &DashboardQuery, _cancel: &CancellationToken) -> Result<Value> {
        self.run().await
    }
}

/// Transport that yields a fixed list of raw messages, then stays idle.
#[derive(Debug, Default)]
pub struct VecTransport {
    messages: Mutex<VecDeque<Value>>,
}

impl VecTransport {
    pub fn new(messages: impl IntoIterator<Item = Value>) -> Self {
        Self {
            messages: Mutex::new(messages.into_iter().collect()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl EventTransport for VecTransport {
    async fn poll(&self, _cancel: &CancellationToken) -> Result<Value, TransportError> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .ok_or(TransportError::Idle)
    }
}
