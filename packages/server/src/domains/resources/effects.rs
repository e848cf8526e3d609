//! Reactions to resource events.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chassis::aggregate::Aggregator;
use chassis::audit::{AuditRecord, SharedAuditLog};
use chassis::inbound::EventHandler;
use chassis::EventEnvelope;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Audits `resource.created` and drops the owner's cached dashboards so the
/// resources widget picks up the new row.
pub struct ResourceCreatedHandler {
    aggregator: Arc<Aggregator>,
    audit: SharedAuditLog,
}

impl ResourceCreatedHandler {
    pub fn new(aggregator: Arc<Aggregator>, audit: SharedAuditLog) -> Self {
        Self { aggregator, audit }
    }
}

#[async_trait]
impl EventHandler for ResourceCreatedHandler {
    async fn handle(&self, envelope: &EventEnvelope, _cancel: &CancellationToken) -> Result<()> {
        let owner_id = envelope
            .data
            .get("owner_id")
            .and_then(|v| v.as_str())
            .context("resource.created without owner_id")?;

        let removed = self.aggregator.invalidate_by_subject(owner_id).await?;
        debug!(owner_id = %owner_id, removed, "dashboards invalidated after resource creation");

        self.audit.append(
            AuditRecord::new(
                owner_id,
                envelope.event_type.clone(),
                json!({
                    "resource_id": envelope.partition_key,
                    "event_id": envelope.event_id,
                    "trace_id": envelope.trace_id,
                }),
                envelope.occurred_at,
            ),
        );
        Ok(())
    }
}
