//! Dead-letter queue records and sinks.
//!
//! A [`DlqRecord`] keeps the original envelope verbatim (as raw JSON, so
//! undecodable messages can be dead-lettered too) alongside diagnostics.
//! A redelivered event that fails again for the same reason updates its
//! existing record instead of adding another.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{EventClass, EventEnvelope};

/// Why a message ended up in the DLQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqReason {
    InvalidEnvelope,
    UnsupportedEventType,
    HandlerError,
    IdempotencyConflict,
}

impl DlqReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DlqReason::InvalidEnvelope => "invalid_envelope",
            DlqReason::UnsupportedEventType => "unsupported_event_type",
            DlqReason::HandlerError => "handler_error",
            DlqReason::IdempotencyConflict => "idempotency_conflict",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqRecord {
    pub original_envelope: Value,
    pub reason: DlqReason,
    pub error_summary: String,
    pub retry_count: u32,
    pub first_seen_at: DateTime<Utc>,
    pub last_error_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlq_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl DlqRecord {
    /// First failure of a decoded envelope. Topic and trace are taken from the
    /// envelope itself.
    pub fn for_envelope(
        envelope: &EventEnvelope,
        reason: DlqReason,
        error_summary: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            original_envelope: envelope.to_value(),
            reason,
            error_summary: error_summary.into(),
            retry_count: 1,
            first_seen_at: now,
            last_error_at: now,
            source_topic: Some(envelope.event_type.clone()),
            dlq_topic: Some(envelope.event_class.dlq_topic()),
            trace_id: Some(envelope.trace_id.clone()),
        }
    }

    /// First failure of a message that may not even decode. Whatever routing
    /// metadata is present in the raw JSON is carried over.
    pub fn for_raw(
        raw: Value,
        reason: DlqReason,
        error_summary: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let string_field = |name: &str| raw.get(name).and_then(Value::as_str).map(str::to_string);
        let dlq_topic = string_field("event_class")
            .and_then(|class| class.parse::<EventClass>().ok())
            .map(|class| class.dlq_topic());
        Self {
            source_topic: string_field("event_type"),
            trace_id: string_field("trace_id"),
            dlq_topic,
            original_envelope: raw,
            reason,
            error_summary: error_summary.into(),
            retry_count: 1,
            first_seen_at: now,
            last_error_at: now,
        }
    }

    /// Event id of the original envelope, when it carried one.
    pub fn event_id(&self) -> Option<&str> {
        self.original_envelope.get("event_id").and_then(Value::as_str)
    }

    fn is_redelivery_of(&self, other: &DlqRecord) -> bool {
        self.reason == other.reason
            && self.event_id().is_some()
            && self.event_id() == other.event_id()
    }

    /// Record another failed attempt.
    pub fn record_retry(&mut self, error_summary: impl Into<String>, at: DateTime<Utc>) {
        self.retry_count += 1;
        self.error_summary = error_summary.into();
        if at > self.last_error_at {
            self.last_error_at = at;
        }
    }
}

/// Terminal destination for messages that cannot be processed.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn publish(&self, record: DlqRecord) -> Result<()>;
}

/// In-memory DLQ. Records are kept in order of first failure.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDeadLetterQueue {
    records: Arc<Mutex<Vec<DlqRecord>>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DlqRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn records(&self) -> Vec<DlqRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterQueue {
    async fn publish(&self, record: DlqRecord) -> Result<()> {
        tracing::warn!(
            reason = record.reason.as_str(),
            source_topic = ?record.source_topic,
            trace_id = ?record.trace_id,
            error = %record.error_summary,
            "message dead-lettered"
        );
        let mut records = self.lock();
        match records.iter_mut().find(|r| r.is_redelivery_of(&record)) {
            Some(existing) => existing.record_retry(record.error_summary, record.last_error_at),
            None => records.push(record),
        }
        Ok(())
    }
}
