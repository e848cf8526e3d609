//! Inbound event de-duplication by event id within a TTL window.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupRecord {
    pub event_id: String,
    pub event_type: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Whether `event_id` was processed and its record has not expired.
    async fn is_duplicate(&self, event_id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Remember `event_id` until `expires_at`. Re-marking refreshes the
    /// expiry.
    async fn mark_processed(
        &self,
        event_id: &str,
        event_type: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryDedupStore {
    records: Mutex<HashMap<String, DedupRecord>>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DedupRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, event_id: &str) -> Option<DedupRecord> {
        self.lock().get(event_id).cloned()
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn is_duplicate(&self, event_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut records = self.lock();
        match records.get(event_id) {
            Some(record) if record.expires_at <= now => {
                records.remove(event_id);
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        event_type: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.lock().insert(
            event_id.to_string(),
            DedupRecord {
                event_id: event_id.to_string(),
                event_type: event_type.to_string(),
                expires_at,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_unknown_event_is_not_duplicate() {
        let store = InMemoryDedupStore::new();
        assert!(!store.is_duplicate("e1", Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_marked_event_is_duplicate_until_expiry() {
        let store = InMemoryDedupStore::new();
        let now = Utc::now();
        store
            .mark_processed("e1", "payout.paid", now + Duration::days(7))
            .await
            .unwrap();

        assert!(store.is_duplicate("e1", now).await.unwrap());
        assert!(store.is_duplicate("e1", now + Duration::days(6)).await.unwrap());
        assert!(!store.is_duplicate("e1", now + Duration::days(7)).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_record_keeps_event_type() {
        let store = InMemoryDedupStore::new();
        let now = Utc::now();
        store.mark_processed("e1", "payout.paid", now).await.unwrap();
        assert_eq!(store.get("e1").unwrap().event_type, "payout.paid");
    }
}
