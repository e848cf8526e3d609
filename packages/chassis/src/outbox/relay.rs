//! Background drain of pending outbox rows into class publishers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::store::{OutboxRecord, OutboxStore};
use crate::cancel::cancellable;
use crate::clock::SharedClock;
use crate::dlq::{DeadLetterSink, DlqReason, DlqRecord};
use crate::envelope::EnvelopeValidator;
use crate::error::{ChassisError, Result};
use crate::publish::{ClassRouter, EventPublisher};
use crate::service::Service;

#[derive(Debug, Clone)]
pub struct OutboxRelayConfig {
    /// How often to poll for unsent rows.
    pub interval: Duration,
    /// Maximum rows published per tick.
    pub batch_size: usize,
    /// How long sent rows are kept before purge.
    pub retention: Duration,
    /// How often to purge.
    pub purge_interval: Duration,
}

impl Default for OutboxRelayConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            batch_size: 100,
            retention: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
            purge_interval: Duration::from_secs(60 * 60),    // 1 hour
        }
    }
}

/// Outcome of one relay tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub published: usize,
    /// Rows that failed validation, were dead-lettered and marked sent.
    pub dead_lettered: usize,
    /// Row whose publish failed; it and everything after it stay pending.
    pub stalled_on: Option<Uuid>,
}

impl RelayReport {
    pub fn is_idle(&self) -> bool {
        self.published == 0 && self.dead_lettered == 0 && self.stalled_on.is_none()
    }
}

/// Publishes outbox rows in insertion order, at least once.
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    publishers: ClassRouter,
    dlq: Arc<dyn DeadLetterSink>,
    validator: EnvelopeValidator,
    clock: SharedClock,
    config: OutboxRelayConfig,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publishers: ClassRouter,
        dlq: Arc<dyn DeadLetterSink>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            publishers,
            dlq,
            validator: EnvelopeValidator::new(),
            clock,
            config: OutboxRelayConfig::default(),
        }
    }

    pub fn with_validator(mut self, validator: EnvelopeValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_config(mut self, config: OutboxRelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Publish up to one batch of pending rows.
    ///
    /// Stops at the first publish failure so later rows never overtake an
    /// earlier one. A row whose envelope fails validation is dead-lettered
    /// and marked sent, otherwise it would block the queue forever.
    /// Publishes are raced against `cancel`; a row whose publish is
    /// interrupted stays pending.
    pub async fn flush_once(&self, cancel: &CancellationToken) -> Result<RelayReport> {
        let pending =
            cancellable(cancel, self.store.list_pending(self.config.batch_size)).await??;
        let mut report = RelayReport::default();

        for row in pending {
            if cancel.is_cancelled() {
                break;
            }

            if let Err(e) = self.validator.validate(&row.envelope) {
                if !self.poison(&row, &e.to_string()).await? {
                    report.stalled_on = Some(row.record_id);
                    break;
                }
                report.dead_lettered += 1;
                continue;
            }

            match cancellable(cancel, self.publishers.publish(&row.envelope)).await? {
                Ok(()) => {
                    self.store.mark_sent(row.record_id, self.clock.now()).await?;
                    debug!(
                        record_id = %row.record_id,
                        event_id = %row.envelope.event_id,
                        event_type = %row.envelope.event_type,
                        "outbox row published"
                    );
                    report.published += 1;
                }
                Err(e) => {
                    warn!(
                        record_id = %row.record_id,
                        event_id = %row.envelope.event_id,
                        error = %e,
                        "publish failed, batch stopped"
                    );
                    report.stalled_on = Some(row.record_id);
                    break;
                }
            }
        }

        Ok(report)
    }

    /// Dead-letter an invalid row and mark it sent. Returns `false` when the
    /// DLQ itself is unavailable, in which case the row stays pending.
    async fn poison(&self, row: &OutboxRecord, reason: &str) -> Result<bool> {
        warn!(
            record_id = %row.record_id,
            event_id = %row.envelope.event_id,
            reason = %reason,
            "invalid outbox envelope, routing to dlq"
        );
        let record = DlqRecord::for_envelope(
            &row.envelope,
            DlqReason::InvalidEnvelope,
            reason,
            self.clock.now(),
        );
        if let Err(e) = self.dlq.publish(record).await {
            error!(record_id = %row.record_id, error = %e, "failed to dead-letter outbox row");
            return Ok(false);
        }
        self.store.mark_sent(row.record_id, self.clock.now()).await?;
        Ok(true)
    }

    /// Remove rows sent longer ago than the retention window.
    pub async fn purge_once(&self) -> Result<u64> {
        let retention = chrono::Duration::from_std(self.config.retention)
            .map_err(|e| ChassisError::Internal(anyhow::Error::new(e)))?;
        self.store.purge_sent(self.clock.now() - retention).await
    }
}

#[async_trait]
impl Service for OutboxRelay {
    fn name(&self) -> &'static str {
        "outbox-relay"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "outbox relay started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_purge = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.flush_once(&shutdown).await {
                Ok(report) if !report.is_idle() => debug!(
                    published = report.published,
                    dead_lettered = report.dead_lettered,
                    stalled = report.stalled_on.is_some(),
                    "outbox tick"
                ),
                Ok(_) => {}
                Err(ChassisError::Cancelled) => break,
                Err(e) => error!(error = %e, "outbox flush failed"),
            }

            if last_purge.elapsed() >= self.config.purge_interval {
                last_purge = Instant::now();
                match self.purge_once().await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "purged sent outbox rows"),
                    Err(e) => error!(error = %e, "outbox purge failed"),
                }
            }
        }

        info!("outbox relay stopped");
        Ok(())
    }
}
