//! Outbox rows and their storage.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::envelope::{EnvelopeError, EnvelopeValidator, EventClass, EventEnvelope};
use crate::error::Result;

/// A pending (or sent) outbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    pub record_id: Uuid,
    pub event_class: EventClass,
    /// Fully formed envelope, already valid at insert time.
    pub envelope: EventEnvelope,
    pub created_at: DateTime<Utc>,
    /// `None` while pending.
    pub sent_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Build a pending row, rejecting envelopes that fail validation.
    pub fn validated(
        validator: &EnvelopeValidator,
        envelope: EventEnvelope,
        now: DateTime<Utc>,
    ) -> std::result::Result<Self, EnvelopeError> {
        validator.validate(&envelope)?;
        Ok(Self::unchecked(envelope, now))
    }

    /// Build a pending row without validation. The relay still validates
    /// before publishing and dead-letters rows that fail.
    pub fn unchecked(envelope: EventEnvelope, now: DateTime<Utc>) -> Self {
        Self {
            record_id: Uuid::now_v7(),
            event_class: envelope.event_class,
            envelope,
            created_at: now,
            sent_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.sent_at.is_none()
    }
}

/// Storage for outbox rows.
///
/// Implementations must preserve insertion order for [`list_pending`] and
/// make [`enqueue_batch`] all-or-nothing.
///
/// [`list_pending`]: OutboxStore::list_pending
/// [`enqueue_batch`]: OutboxStore::enqueue_batch
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue(&self, record: OutboxRecord) -> Result<()> {
        self.enqueue_batch(vec![record]).await
    }

    async fn enqueue_batch(&self, records: Vec<OutboxRecord>) -> Result<()>;

    /// Up to `limit` oldest unsent rows, FIFO by insertion.
    async fn list_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>>;

    /// Set `sent_at`. Repeating the call keeps the first timestamp.
    async fn mark_sent(&self, record_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Delete rows sent before `older_than`; returns how many were removed.
    async fn purge_sent(&self, older_than: DateTime<Utc>) -> Result<u64>;
}

/// Vector-backed store; insertion order is the vector order.
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    rows: Mutex<Vec<OutboxRecord>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<OutboxRecord>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every row, sent or not, in insertion order.
    pub fn all(&self) -> Vec<OutboxRecord> {
        self.lock().clone()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().iter().filter(|r| r.is_pending()).count()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue_batch(&self, records: Vec<OutboxRecord>) -> Result<()> {
        self.lock().extend(records);
        Ok(())
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        Ok(self
            .lock()
            .iter()
            .filter(|r| r.is_pending())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_sent(&self, record_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut rows = self.lock();
        if let Some(row) = rows.iter_mut().find(|r| r.record_id == record_id) {
            if row.sent_at.is_none() {
                row.sent_at = Some(at);
            }
        }
        Ok(())
    }

    async fn purge_sent(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.lock();
        let before = rows.len();
        rows.retain(|r| r.sent_at.map_or(true, |sent| sent >= older_than));
        Ok((before - rows.len()) as u64)
    }
}
