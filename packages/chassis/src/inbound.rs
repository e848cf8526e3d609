//! Inbound event pipeline: validate, de-duplicate, dispatch, dead-letter.
//!
//! ```text
//! InboundWorker (one per transport)
//!     │
//!     ├─► poll transport ── Idle ─────────► wait poll interval
//!     │                 ├─ EndOfStream ───► stop
//!     │                 └─ Fatal ─────────► stop, surface error
//!     └─► InboundPipeline::process(raw)
//!             ├─► decode + validate ── fail ──► DLQ invalid_envelope
//!             ├─► IsDuplicate ──────── yes ───► ack, no handler
//!             ├─► resolve handler ──── none ──► analytics: drop + warn
//!             │                             └─ otherwise: DLQ unsupported_event_type
//!             ├─► lock event_id, re-check dedup
//!             └─► handler ─┬─ Ok  ──► MarkProcessed(now + ttl)
//!                          └─ Err ──► DLQ handler_error (not marked processed)
//! ```
//!
//! A failed handler leaves the event unmarked so the transport may redeliver
//! it; the DLQ record is for operators, not for automatic retry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditRecord, SharedAuditLog};
use crate::cancel::sleep_or_cancel;
use crate::clock::SharedClock;
use crate::dedup::DedupStore;
use crate::dlq::{DeadLetterSink, DlqReason, DlqRecord};
use crate::envelope::{EnvelopeValidator, EventClass, EventEnvelope};
use crate::error::{ChassisError, Result};
use crate::service::Service;
use crate::transport::{EventTransport, TransportError};

/// Audit action recorded whenever the pipeline dead-letters an event.
pub const EVENT_DEAD_LETTERED_ACTION: &str = "event.dead_lettered";

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope, cancel: &CancellationToken) -> AnyResult<()>;
}

/// Adapter so plain async closures can be registered as handlers.
pub struct FnHandler<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = AnyResult<()>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = AnyResult<()>> + Send,
{
    async fn handle(&self, envelope: &EventEnvelope, _cancel: &CancellationToken) -> AnyResult<()> {
        (self.0)(envelope.clone()).await
    }
}

/// How an event type resolves against the registry.
#[derive(Clone)]
pub enum Dispatch {
    Handler(Arc<dyn EventHandler>),
    /// Analytics event with no consumer here.
    Drop,
    Unsupported,
}

/// Event type to handler map.
///
/// Exact registrations win. A module registered with
/// [`register_module`](HandlerRegistry::register_module) receives every
/// `"<module>.*"` type it owns without listing them one by one.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    modules: Vec<(String, Arc<dyn EventHandler>)>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        let event_type = event_type.into();
        if self.handlers.insert(event_type.clone(), handler).is_some() {
            warn!(event_type = %event_type, "handler replaced");
        }
        self
    }

    pub fn register_module(mut self, module: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.modules.push((module.into(), handler));
        self
    }

    pub fn resolve(&self, envelope: &EventEnvelope) -> Dispatch {
        if let Some(handler) = self.handlers.get(&envelope.event_type) {
            return Dispatch::Handler(handler.clone());
        }
        let owner = self.modules.iter().find(|(module, _)| {
            envelope
                .event_type
                .strip_prefix(module.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
        });
        match owner {
            Some((_, handler)) => Dispatch::Handler(handler.clone()),
            None if envelope.event_class == EventClass::Analytics => Dispatch::Drop,
            None => Dispatch::Unsupported,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len() + self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct InboundConfig {
    /// How long processed event ids are remembered.
    pub dedup_ttl: Duration,
    /// Wait between polls when the transport is empty.
    pub poll_interval: Duration,
    /// How long an in-flight handler may run after shutdown is requested.
    pub shutdown_grace: Duration,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            dedup_ttl: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
            poll_interval: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    Processed,
    Duplicate,
    Dropped,
    DeadLettered(DlqReason),
}

pub struct InboundPipeline {
    validator: EnvelopeValidator,
    dedup: Arc<dyn DedupStore>,
    handlers: HandlerRegistry,
    dlq: Arc<dyn DeadLetterSink>,
    audit: Option<SharedAuditLog>,
    clock: SharedClock,
    config: InboundConfig,
    service_name: String,
    in_flight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl InboundPipeline {
    pub fn new(
        service_name: impl Into<String>,
        handlers: HandlerRegistry,
        dedup: Arc<dyn DedupStore>,
        dlq: Arc<dyn DeadLetterSink>,
        clock: SharedClock,
    ) -> Self {
        Self {
            validator: EnvelopeValidator::new(),
            dedup,
            handlers,
            dlq,
            audit: None,
            clock,
            config: InboundConfig::default(),
            service_name: service_name.into(),
            in_flight: DashMap::new(),
        }
    }

    pub fn with_validator(mut self, validator: EnvelopeValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_config(mut self, config: InboundConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_audit(mut self, audit: SharedAuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &InboundConfig {
        &self.config
    }

    /// Worker that feeds this pipeline from `transport`.
    pub fn worker(self: Arc<Self>, transport: Arc<dyn EventTransport>) -> InboundWorker {
        InboundWorker {
            pipeline: self,
            transport,
        }
    }

    /// Run one raw message through the pipeline.
    ///
    /// Envelope and dedup failures never surface here; they are routed to
    /// the DLQ. An `Err` means the DLQ itself could not be written.
    pub async fn process(&self, raw: Value, cancel: &CancellationToken) -> Result<InboundOutcome> {
        let envelope = match EventEnvelope::from_value(raw.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                let record =
                    DlqRecord::for_raw(raw, DlqReason::InvalidEnvelope, e.to_string(), self.clock.now());
                return self.dead_letter(record, None).await;
            }
        };

        if let Err(e) = self.validator.validate(&envelope) {
            return self
                .dead_letter_envelope(&envelope, DlqReason::InvalidEnvelope, e.to_string())
                .await;
        }

        match self.dedup.is_duplicate(&envelope.event_id, self.clock.now()).await {
            Ok(true) => {
                debug!(event_id = %envelope.event_id, "duplicate event, skipping");
                return Ok(InboundOutcome::Duplicate);
            }
            Ok(false) => {}
            Err(e) => {
                return self
                    .dead_letter_envelope(
                        &envelope,
                        DlqReason::HandlerError,
                        format!("dedup check failed: {e}"),
                    )
                    .await;
            }
        }

        let handler = match self.handlers.resolve(&envelope) {
            Dispatch::Handler(handler) => handler,
            Dispatch::Drop => {
                warn!(
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    "no handler for analytics event, dropping"
                );
                return Ok(InboundOutcome::Dropped);
            }
            Dispatch::Unsupported => {
                return self
                    .dead_letter_envelope(
                        &envelope,
                        DlqReason::UnsupportedEventType,
                        format!("no handler registered for {}", envelope.event_type),
                    )
                    .await;
            }
        };

        let lock = Arc::clone(&*self.in_flight.entry(envelope.event_id.clone()).or_default());
        let outcome = {
            let _guard = lock.lock().await;
            self.dispatch_locked(&envelope, handler, cancel).await
        };
        self.in_flight
            .remove_if(&envelope.event_id, |_, held| Arc::strong_count(held) <= 2);
        outcome
    }

    /// Runs with the per-event lock held, so at most one handler per
    /// event_id is in flight across workers sharing this pipeline.
    async fn dispatch_locked(
        &self,
        envelope: &EventEnvelope,
        handler: Arc<dyn EventHandler>,
        cancel: &CancellationToken,
    ) -> Result<InboundOutcome> {
        // Another worker may have finished this event while we waited.
        if matches!(
            self.dedup.is_duplicate(&envelope.event_id, self.clock.now()).await,
            Ok(true)
        ) {
            return Ok(InboundOutcome::Duplicate);
        }

        match handler.handle(envelope, cancel).await {
            Ok(()) => {
                let expires_at = self.clock.now() + to_chrono(self.config.dedup_ttl);
                if let Err(e) = self
                    .dedup
                    .mark_processed(&envelope.event_id, &envelope.event_type, expires_at)
                    .await
                {
                    error!(event_id = %envelope.event_id, error = %e, "failed to mark event processed");
                }
                debug!(
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    "event processed"
                );
                Ok(InboundOutcome::Processed)
            }
            Err(e) => {
                self.dead_letter_envelope(envelope, DlqReason::HandlerError, format!("{e:#}"))
                    .await
            }
        }
    }

    async fn dead_letter_envelope(
        &self,
        envelope: &EventEnvelope,
        reason: DlqReason,
        summary: String,
    ) -> Result<InboundOutcome> {
        let record = DlqRecord::for_envelope(envelope, reason, summary, self.clock.now());
        self.dead_letter(record, Some(envelope)).await
    }

    async fn dead_letter(
        &self,
        record: DlqRecord,
        envelope: Option<&EventEnvelope>,
    ) -> Result<InboundOutcome> {
        let reason = record.reason;
        let event_id = envelope.map(|e| e.event_id.as_str()).unwrap_or("-");
        warn!(
            event_id = %event_id,
            reason = reason.as_str(),
            error = %record.error_summary,
            "routing event to dlq"
        );

        if let Some(audit) = &self.audit {
            audit.append(AuditRecord::new(
                self.service_name.clone(),
                EVENT_DEAD_LETTERED_ACTION,
                json!({
                    "event_id": envelope.map(|e| e.event_id.clone()),
                    "event_type": envelope.map(|e| e.event_type.clone()),
                    "reason": reason.as_str(),
                    "error_summary": record.error_summary,
                }),
                self.clock.now(),
            ));
        }

        self.dlq.publish(record).await.map_err(|e| {
            ChassisError::Internal(e.context(format!("failed to dead-letter event {event_id}")))
        })?;
        Ok(InboundOutcome::DeadLettered(reason))
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Pulls from one transport and processes events serially.
pub struct InboundWorker {
    pipeline: Arc<InboundPipeline>,
    transport: Arc<dyn EventTransport>,
}

impl InboundWorker {
    /// Process one message, honouring the shutdown grace period.
    async fn process_with_grace(&self, raw: Value, shutdown: &CancellationToken) {
        let handler_cancel = CancellationToken::new();
        let work = self.pipeline.process(raw, &handler_cancel);
        tokio::pin!(work);

        let result = tokio::select! {
            result = &mut work => result,
            _ = shutdown.cancelled() => {
                let grace = self.pipeline.config.shutdown_grace;
                info!(grace_ms = grace.as_millis() as u64, "shutdown requested, finishing in-flight event");
                match tokio::time::timeout(grace, &mut work).await {
                    Ok(result) => result,
                    Err(_) => {
                        handler_cancel.cancel();
                        warn!("in-flight event exceeded shutdown grace, abandoning");
                        Err(ChassisError::Cancelled)
                    }
                }
            }
        };

        match result {
            Ok(outcome) => debug!(?outcome, "inbound message handled"),
            Err(ChassisError::Cancelled) => {}
            Err(e) => error!(error = %e, "inbound message failed"),
        }
    }
}

#[async_trait]
impl Service for InboundWorker {
    fn name(&self) -> &'static str {
        "inbound-worker"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> AnyResult<()> {
        info!(
            poll_interval_ms = self.pipeline.config.poll_interval.as_millis() as u64,
            handlers = self.pipeline.handlers.len(),
            "inbound worker started"
        );

        while !shutdown.is_cancelled() {
            match self.transport.poll(&shutdown).await {
                Ok(raw) => self.process_with_grace(raw, &shutdown).await,
                Err(TransportError::Idle) => {
                    if !sleep_or_cancel(&shutdown, self.pipeline.config.poll_interval).await {
                        break;
                    }
                }
                Err(TransportError::EndOfStream) => {
                    info!("transport closed");
                    break;
                }
                Err(TransportError::Fatal(e)) => {
                    error!(error = %e, "transport failed, inbound worker stopping");
                    return Err(e.context("inbound transport failed"));
                }
            }
        }

        info!("inbound worker stopped");
        Ok(())
    }
}
