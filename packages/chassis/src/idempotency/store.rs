//! Idempotency record storage.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::{ChassisError, Result};

/// Default retention of a completed record, measured from completion.
pub const DEFAULT_MIN_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub fingerprint: String,
    pub response_status: u16,
    /// Empty while the operation is in flight.
    pub response_body: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_complete(&self) -> bool {
        !self.response_body.is_empty()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Outcome of a successful [`IdempotencyStore::reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// No live record existed; the caller owns the key and must run the
    /// operation.
    Acquired,
    /// A record with the same fingerprint is still in flight.
    InFlight,
    /// A record with the same fingerprint already holds a response.
    Completed(IdempotencyRecord),
}

/// Storage for idempotency records. Mutations are serialized per key.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Live record for `key`, if any. Expired records are evicted.
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<IdempotencyRecord>>;

    /// Insert an in-flight record unless a live one exists. Fails with
    /// `IdempotencyConflict` when a live record carries another fingerprint.
    async fn reserve(
        &self,
        key: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Reservation>;

    /// Store the response for a reserved key and extend its expiry to at
    /// least the minimum retention from `now`.
    async fn complete(&self, key: &str, status: u16, body: Vec<u8>, now: DateTime<Utc>) -> Result<()>;

    /// Drop an in-flight reservation owned by `fingerprint`. Completed records
    /// and records owned by another fingerprint are left alone.
    async fn release(&self, key: &str, fingerprint: &str) -> Result<()>;
}

/// Mutex-protected map implementation.
#[derive(Debug)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<String, IdempotencyRecord>>,
    min_retention: Duration,
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::with_min_retention(Duration::days(DEFAULT_MIN_RETENTION_DAYS))
    }

    pub fn with_min_retention(min_retention: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            min_retention,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, IdempotencyRecord>> {
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
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<IdempotencyRecord>> {
        let mut records = self.lock();
        match records.get(key) {
            Some(record) if record.is_expired(now) => {
                records.remove(key);
                Ok(None)
            }
            Some(record) => Ok(Some(record.clone())),
            None => Ok(None),
        }
    }

    async fn reserve(
        &self,
        key: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut records = self.lock();
        if let Some(existing) = records.get(key) {
            if !existing.is_expired(now) {
                if existing.fingerprint != fingerprint {
                    return Err(ChassisError::IdempotencyConflict {
                        key: key.to_string(),
                    });
                }
                return Ok(if existing.is_complete() {
                    Reservation::Completed(existing.clone())
                } else {
                    Reservation::InFlight
                });
            }
        }

        records.insert(
            key.to_string(),
            IdempotencyRecord {
                key: key.to_string(),
                fingerprint: fingerprint.to_string(),
                response_status: 0,
                response_body: Vec::new(),
                created_at: now,
                expires_at,
            },
        );
        Ok(Reservation::Acquired)
    }

    async fn complete(&self, key: &str, status: u16, body: Vec<u8>, now: DateTime<Utc>) -> Result<()> {
        let mut records = self.lock();
        let record = records
            .get_mut(key)
            .ok_or_else(|| ChassisError::NotFound(format!("idempotency reservation {key}")))?;
        record.response_status = status;
        record.response_body = body;
        let retained_until = now + self.min_retention;
        if record.expires_at < retained_until {
            record.expires_at = retained_until;
        }
        Ok(())
    }

    async fn release(&self, key: &str, fingerprint: &str) -> Result<()> {
        let mut records = self.lock();
        let owned_and_in_flight = records
            .get(key)
            .is_some_and(|r| r.fingerprint == fingerprint && !r.is_complete());
        if owned_and_in_flight {
            records.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn later(now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::hours(1)
    }

    #[tokio::test]
    async fn test_reserve_then_get_in_flight() {
        let store = InMemoryIdempotencyStore::new();
        let now = Utc::now();

        let r = store.reserve("k1", "fp", now, later(now)).await.unwrap();
        assert_eq!(r, Reservation::Acquired);

        let record = store.get("k1", now).await.unwrap().unwrap();
        assert!(!record.is_complete());
        assert_eq!(record.fingerprint, "fp");
    }

    #[tokio::test]
    async fn test_same_fingerprint_reservation_is_idempotent() {
        let store = InMemoryIdempotencyStore::new();
        let now = Utc::now();
        store.reserve("k1", "fp", now, later(now)).await.unwrap();

        let second = store.reserve("k1", "fp", now, later(now)).await.unwrap();
        assert_eq!(second, Reservation::InFlight);
    }

    #[tokio::test]
    async fn test_different_fingerprint_conflicts() {
        let store = InMemoryIdempotencyStore::new();
        let now = Utc::now();
        store.reserve("k1", "fp-a", now, later(now)).await.unwrap();

        let err = store.reserve("k1", "fp-b", now, later(now)).await.unwrap_err();
        assert!(matches!(err, ChassisError::IdempotencyConflict { .. }));
    }

    #[tokio::test]
    async fn test_complete_extends_retention() {
        let store = InMemoryIdempotencyStore::with_min_retention(Duration::days(7));
        let now = Utc::now();
        store.reserve("k1", "fp", now, now + Duration::minutes(5)).await.unwrap();
        store.complete("k1", 201, b"{\"id\":1}".to_vec(), now).await.unwrap();

        let record = store.get("k1", now).await.unwrap().unwrap();
        assert!(record.is_complete());
        assert_eq!(record.response_status, 201);
        assert_eq!(record.expires_at, now + Duration::days(7));

        let replay = store.reserve("k1", "fp", now, later(now)).await.unwrap();
        assert!(matches!(replay, Reservation::Completed(_)));
    }

    #[tokio::test]
    async fn test_expired_records_are_evicted() {
        let store = InMemoryIdempotencyStore::new();
        let now = Utc::now();
        store.reserve("k1", "fp-a", now, now + Duration::seconds(10)).await.unwrap();

        let after = now + Duration::seconds(11);
        assert!(store.get("k1", after).await.unwrap().is_none());
        assert!(store.is_empty());

        // A new fingerprint may take over an expired key.
        let r = store.reserve("k1", "fp-b", after, later(after)).await.unwrap();
        assert_eq!(r, Reservation::Acquired);
    }

    #[tokio::test]
    async fn test_release_only_drops_owned_in_flight() {
        let store = InMemoryIdempotencyStore::new();
        let now = Utc::now();
        store.reserve("k1", "fp", now, later(now)).await.unwrap();

        store.release("k1", "other").await.unwrap();
        assert!(store.get("k1", now).await.unwrap().is_some());

        store.release("k1", "fp").await.unwrap();
        assert!(store.get("k1", now).await.unwrap().is_none());

        store.reserve("k2", "fp", now, later(now)).await.unwrap();
        store.complete("k2", 200, b"1".to_vec(), now).await.unwrap();
        store.release("k2", "fp").await.unwrap();
        assert!(store.get("k2", now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_complete_without_reservation() {
        let store = InMemoryIdempotencyStore::new();
        let err = store.complete("missing", 200, b"1".to_vec(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, ChassisError::NotFound(_)));
    }
}
