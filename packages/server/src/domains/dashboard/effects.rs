//! Reactions to `dashboard.*` events.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chassis::aggregate::Aggregator;
use chassis::inbound::EventHandler;
use chassis::EventEnvelope;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Registered for the whole `dashboard` module: any event about a subject's
/// dashboard drops that subject's cached compositions.
pub struct DashboardEventsHandler {
    aggregator: Arc<Aggregator>,
}

impl DashboardEventsHandler {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self { aggregator }
    }
}

#[async_trait]
impl EventHandler for DashboardEventsHandler {
    async fn handle(&self, envelope: &EventEnvelope, _cancel: &CancellationToken) -> Result<()> {
        let subject_id = envelope
            .data
            .get("subject_id")
            .and_then(|v| v.as_str())
            .with_context(|| format!("{} without subject_id", envelope.event_type))?;

        let removed = self.aggregator.invalidate_by_subject(subject_id).await?;
        debug!(
            event_type = %envelope.event_type,
            subject_id = %subject_id,
            removed,
            "dashboard event applied"
        );
        Ok(())
    }
}
