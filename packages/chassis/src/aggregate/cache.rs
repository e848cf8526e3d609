//! Cache of composed dashboards.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Dashboard;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedAggregate {
    pub cache_key: String,
    pub value: Dashboard,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait AggregateCache: Send + Sync {
    /// Unexpired entry for `cache_key`; expired entries are dropped.
    async fn get(&self, cache_key: &str, now: DateTime<Utc>) -> Result<Option<CachedAggregate>>;

    async fn put(&self, entry: CachedAggregate) -> Result<()>;

    /// Remove every entry whose key starts with `prefix`.
    async fn invalidate_prefix(&self, prefix: &str) -> Result<usize>;
}

#[derive(Debug, Default)]
pub struct InMemoryAggregateCache {
    entries: Mutex<HashMap<String, CachedAggregate>>,
}

impl InMemoryAggregateCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedAggregate>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn contains(&self, cache_key: &str) -> bool {
        self.lock().contains_key(cache_key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl AggregateCache for InMemoryAggregateCache {
    async fn get(&self, cache_key: &str, now: DateTime<Utc>) -> Result<Option<CachedAggregate>> {
        let mut entries = self.lock();
        match entries.get(cache_key) {
            Some(entry) if entry.expires_at <= now => {
                entries.remove(cache_key);
                Ok(None)
            }
            other => Ok(other.cloned()),
        }
    }

    async fn put(&self, entry: CachedAggregate) -> Result<()> {
        self.lock().insert(entry.cache_key.clone(), entry);
        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }
}
