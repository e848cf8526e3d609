//! Append-only ledger of security-relevant actions.
//!
//! Handlers append records for role-gated access, mutations and
//! event-processing decisions. Appending never fails from the caller's point
//! of view; querying is restricted to roles that pass
//! [`Role::can_read_audit`](crate::actor::Role::can_read_audit).
//!
//! # Usage
//!
//! ```ignore
//! audit.append(
//!     AuditRecord::new(&actor.subject_id, "dashboard.layout_saved", json!({"widgets": 8}), clock.now())
//!         .with_ip_address(ip),
//! );
//!
//! let recent = audit.query(&actor, &AuditFilter::by_actor("u-1"), 20)?;
//! ```

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::actor::Actor;
use crate::clock::{system_clock, SharedClock};
use crate::error::Result;

/// Limit applied when a query passes `0`.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Upper bound on a single query.
pub const MAX_QUERY_LIMIT: usize = 1000;

/// Action type recorded for every audit query.
pub const AUDIT_QUERY_ACTION: &str = "audit.queried";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: Uuid,
    pub actor_id: String,
    pub action_type: String,
    pub action_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub details: Value,
}

impl AuditRecord {
    pub fn new(
        actor_id: impl Into<String>,
        action_type: impl Into<String>,
        details: Value,
        action_at: DateTime<Utc>,
    ) -> Self {
        Self {
            audit_id: Uuid::now_v7(),
            actor_id: actor_id.into(),
            action_type: action_type.into(),
            action_at,
            ip_address: None,
            details,
        }
    }

    pub fn with_ip_address(mut self, ip: Option<String>) -> Self {
        self.ip_address = ip;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuditFilter {
    pub actor_id: Option<String>,
    pub action_type: Option<String>,
}

impl AuditFilter {
    pub fn by_actor(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            action_type: None,
        }
    }

    pub fn by_action(action_type: impl Into<String>) -> Self {
        Self {
            actor_id: None,
            action_type: Some(action_type.into()),
        }
    }

    fn matches(&self, record: &AuditRecord) -> bool {
        self.actor_id.as_ref().map_or(true, |a| *a == record.actor_id)
            && self
                .action_type
                .as_ref()
                .map_or(true, |t| *t == record.action_type)
    }
}

pub trait AuditLog: Send + Sync {
    fn append(&self, record: AuditRecord);

    /// Most recent records matching `filter`, newest first.
    fn query(&self, actor: &Actor, filter: &AuditFilter, limit: usize) -> Result<Vec<AuditRecord>>;
}

/// Shared handle to an audit log.
pub type SharedAuditLog = Arc<dyn AuditLog>;

pub struct InMemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
    /// Stamps the records this log writes about its own queries.
    clock: SharedClock,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            clock,
        }
    }

    /// Acquire the records lock, recovering from poison so that appends stay
    /// infallible.
    fn lock_records(&self) -> std::sync::MutexGuard<'_, Vec<AuditRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_records().is_empty()
    }

    /// All records in append order, without access checks.
    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.lock_records().clone()
    }
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog for InMemoryAuditLog {
    fn append(&self, record: AuditRecord) {
        self.lock_records().push(record);
    }

    fn query(&self, actor: &Actor, filter: &AuditFilter, limit: usize) -> Result<Vec<AuditRecord>> {
        actor.require_audit_reader()?;

        let limit = match limit {
            0 => DEFAULT_QUERY_LIMIT,
            n => n.min(MAX_QUERY_LIMIT),
        };
        let mut results: Vec<AuditRecord> = self
            .lock_records()
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        results.sort_by(|a, b| b.action_at.cmp(&a.action_at));
        results.truncate(limit);

        self.append(AuditRecord::new(
            actor.subject_id.clone(),
            AUDIT_QUERY_ACTION,
            serde_json::json!({
                "role": actor.role,
                "filter_actor_id": filter.actor_id,
                "filter_action_type": filter.action_type,
                "returned": results.len(),
            }),
            self.clock.now(),
        ));

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Role;
    use crate::clock::{Clock, ManualClock};
    use crate::error::ChassisError;
    use chrono::Duration;
    use serde_json::json;

    fn admin() -> Actor {
        Actor::new("admin-1", Role::Admin).unwrap()
    }

    #[test]
    fn test_query_newest_first_with_limit() {
        let log = InMemoryAuditLog::new();
        let base = Utc::now();
        for i in 0..5 {
            log.append(
                AuditRecord::new(
                    "u-1",
                    "resource.created",
                    json!({"n": i}),
                    base + Duration::seconds(i),
                ),
            );
        }

        let results = log.query(&admin(), &AuditFilter::default(), 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].details["n"], 4);
        assert_eq!(results[1].details["n"], 3);
    }

    #[test]
    fn test_query_filters() {
        let log = InMemoryAuditLog::new();
        let now = Utc::now();
        log.append(AuditRecord::new("u-1", "resource.created", json!({}), now));
        log.append(AuditRecord::new("u-2", "resource.created", json!({}), now));
        log.append(AuditRecord::new("u-1", "dashboard.layout_saved", json!({}), now));

        let by_actor = log.query(&admin(), &AuditFilter::by_actor("u-1"), 10).unwrap();
        assert_eq!(by_actor.len(), 2);

        let filter = AuditFilter {
            actor_id: Some("u-1".into()),
            action_type: Some("dashboard.layout_saved".into()),
        };
        let both = log.query(&admin(), &filter, 10).unwrap();
        assert_eq!(both.len(), 1);
    }

    #[test]
    fn test_query_requires_privileged_role() {
        let log = InMemoryAuditLog::new();
        log.append(AuditRecord::new("u-1", "resource.created", json!({}), Utc::now()));

        let creator = Actor::new("u-1", Role::Creator).unwrap();
        let err = log.query(&creator, &AuditFilter::default(), 10).unwrap_err();
        assert!(matches!(err, ChassisError::Forbidden(_)));
        // Denied queries leave no trace and do not leak records.
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_queries_are_audited_at_clock_time() {
        let clock = ManualClock::new(Utc::now() - Duration::days(30));
        let log = InMemoryAuditLog::with_clock(Arc::new(clock.clone()));
        log.query(&admin(), &AuditFilter::default(), 0).unwrap();

        let records = log.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action_type, AUDIT_QUERY_ACTION);
        assert_eq!(records[0].actor_id, "admin-1");
        assert_eq!(records[0].action_at, clock.now());
    }
}
