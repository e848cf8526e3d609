//! Aggregating read path: parallel fan-out to upstream readers under one
//! deadline, with caching and per-widget degradation.
//!
//! ```text
//! compose(query)
//!     ├─► cache hit (unexpired) ──► return cached, cache_hit = true
//!     ├─► deadline = now + timeout, child cancellation token
//!     ├─► one task per widget ──► reader ── Ok ──► {status: ok, data}
//!     │                                   └─ Err / deadline ──► {status: unavailable}
//!     ├─► join, fill in widgets that never reported
//!     └─► cache put (failure is logged only) ──► return
//! ```
//!
//! Each subject carries an invalidation generation. A composition that
//! started before an invalidation of its subject is returned but never left
//! in the cache.

mod cache;
mod reader;
mod request;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub use cache::{AggregateCache, CachedAggregate, InMemoryAggregateCache};
pub use reader::{GetBySubject, ListBySubject, SummaryReader, WidgetSource, WidgetSpec};
pub use request::{subject_prefix, DashboardQuery, DateRange, Device, DASHBOARD_CACHE_PREFIX};

use crate::clock::SharedClock;
use crate::error::{ChassisError, Result};

/// Error value reported for a degraded widget.
pub const TEMPORARILY_UNAVAILABLE: &str = "temporarily_unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetStatus {
    Ok,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetValue {
    pub status: WidgetStatus,
    pub source: String,
    pub data: Value,
}

impl WidgetValue {
    pub fn ok(source: impl Into<String>, data: Value) -> Self {
        Self {
            status: WidgetStatus::Ok,
            source: source.into(),
            data,
        }
    }

    pub fn unavailable(source: impl Into<String>) -> Self {
        Self {
            status: WidgetStatus::Unavailable,
            source: source.into(),
            data: json!({ "error": TEMPORARILY_UNAVAILABLE }),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.status == WidgetStatus::Unavailable
    }
}

/// A composed dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub widgets: BTreeMap<String, WidgetValue>,
    /// Failing widget ids, in registration order.
    pub degraded_widgets: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub cache_hit: bool,
}

impl Dashboard {
    pub fn empty(generated_at: DateTime<Utc>) -> Self {
        Self {
            widgets: BTreeMap::new(),
            degraded_widgets: Vec::new(),
            generated_at,
            cache_hit: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Deadline for the whole fan-out.
    pub timeout: Duration,
    /// Lifetime of a cached composition.
    pub cache_ttl: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            cache_ttl: Duration::from_secs(5 * 60),
        }
    }
}

pub struct Aggregator {
    widgets: Vec<Arc<WidgetSpec>>,
    cache: Arc<dyn AggregateCache>,
    clock: SharedClock,
    config: AggregatorConfig,
    /// Bumped by every invalidation of a subject.
    generations: DashMap<String, u64>,
}

impl Aggregator {
    pub fn new(cache: Arc<dyn AggregateCache>, clock: SharedClock) -> Self {
        Self {
            widgets: Vec::new(),
            cache,
            clock,
            config: AggregatorConfig::default(),
            generations: DashMap::new(),
        }
    }

    pub fn with_config(mut self, config: AggregatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_widget(mut self, widget: WidgetSpec) -> Self {
        self.widgets.push(Arc::new(widget));
        self
    }

    pub fn widget_ids(&self) -> impl Iterator<Item = &str> {
        self.widgets.iter().map(|w| w.widget_id.as_str())
    }

    /// Compose the dashboard for `query`.
    ///
    /// Reader failures and timeouts degrade their widget; the only errors are
    /// an empty subject and cancellation by the caller.
    pub async fn compose(&self, query: &DashboardQuery, cancel: &CancellationToken) -> Result<Dashboard> {
        if query.subject_id.trim().is_empty() {
            return Err(ChassisError::Unauthorized);
        }

        let cache_key = query.cache_key();
        match self.cache.get(&cache_key, self.clock.now()).await {
            Ok(Some(cached)) => {
                debug!(cache_key = %cache_key, "dashboard cache hit");
                return Ok(Dashboard {
                    cache_hit: true,
                    ..cached.value
                });
            }
            Ok(None) => {}
            Err(e) => warn!(cache_key = %cache_key, error = %e, "dashboard cache read failed"),
        }

        let generation = self.generation(&query.subject_id);
        let mut widgets = self.fan_out(query, cancel).await;
        if cancel.is_cancelled() {
            return Err(ChassisError::Cancelled);
        }

        let mut dashboard = Dashboard::empty(self.clock.now());
        for spec in &self.widgets {
            if dashboard.widgets.contains_key(&spec.widget_id) {
                continue;
            }
            let value = widgets
                .remove(&spec.widget_id)
                .unwrap_or_else(|| WidgetValue::unavailable(spec.source_service.clone()));
            if value.is_degraded() {
                dashboard.degraded_widgets.push(spec.widget_id.clone());
            }
            dashboard.widgets.insert(spec.widget_id.clone(), value);
        }

        if self.generation(&query.subject_id) != generation {
            debug!(cache_key = %cache_key, "subject invalidated during compose, not caching");
            return Ok(dashboard);
        }

        let now = self.clock.now();
        let entry = CachedAggregate {
            cache_key: cache_key.clone(),
            value: dashboard.clone(),
            expires_at: now + to_chrono(self.config.cache_ttl),
            updated_at: now,
        };
        if let Err(e) = self.cache.put(entry).await {
            warn!(cache_key = %cache_key, error = %e, "dashboard cache write failed");
            return Ok(dashboard);
        }

        // An invalidation may have landed between the check and the put
        if self.generation(&query.subject_id) != generation {
            if let Err(e) = self.cache.invalidate_prefix(&cache_key).await {
                warn!(cache_key = %cache_key, error = %e, "failed to drop superseded dashboard");
            }
        }

        Ok(dashboard)
    }

    fn generation(&self, subject_id: &str) -> u64 {
        self.generations.get(subject_id).map_or(0, |g| *g)
    }

    /// Run every reader in parallel; each job is bounded by the shared
    /// deadline and observes the child token.
    async fn fan_out(&self, query: &DashboardQuery, cancel: &CancellationToken) -> HashMap<String, WidgetValue> {
        let results: Arc<Mutex<HashMap<String, WidgetValue>>> = Arc::default();
        let deadline = tokio::time::Instant::now() + self.config.timeout;
        let child = cancel.child_token();
        let mut jobs = JoinSet::new();

        for spec in &self.widgets {
            let spec = spec.clone();
            let query = query.clone();
            let token = child.clone();
            let results = results.clone();
            jobs.spawn(async move {
                let read = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(anyhow::anyhow!("cancelled")),
                    outcome = tokio::time::timeout_at(deadline, spec.source.read(&query, &token)) => {
                        outcome.unwrap_or_else(|_| Err(anyhow::anyhow!("deadline exceeded")))
                    }
                };
                let value = match read {
                    Ok(data) => WidgetValue::ok(spec.source_service.clone(), data),
                    Err(e) => {
                        warn!(
                            widget_id = %spec.widget_id,
                            source = %spec.source_service,
                            error = %e,
                            "widget degraded"
                        );
                        WidgetValue::unavailable(spec.source_service.clone())
                    }
                };
                results
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(spec.widget_id.clone(), value);
            });
        }

        while let Some(joined) = jobs.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "widget job panicked");
            }
        }
        child.cancel();

        let mut results = results.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *results)
    }

    /// Drop every cached dashboard of `subject_id`.
    ///
    /// Compositions of `subject_id` still in flight will not be cached.
    pub async fn invalidate_by_subject(&self, subject_id: &str) -> Result<usize> {
        *self.generations.entry(subject_id.to_string()).or_default() += 1;
        let removed = self.cache.invalidate_prefix(&subject_prefix(subject_id)).await?;
        debug!(subject_id = %subject_id, removed, "dashboard cache invalidated");
        Ok(removed)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
