//! Exactly-once wrapper for mutating operations.
//!
//! ```text
//! run(key, input, op)
//!     │
//!     ├─► fingerprint(input projection)
//!     ├─► Get(key) ── completed, same fp ──► replay stored output
//!     │            └─ different fp ────────► report conflict, fail
//!     ├─► Reserve(key, fp, now + ttl)
//!     │       ├─ Acquired ──► op() ─┬─ Ok  ──► Complete(key, body) ──► output
//!     │       │                     └─ Err ──► Release(key)        ──► error
//!     │       ├─ Completed ──► replay
//!     │       └─ InFlight ───► poll until completed, released or timed out
//! ```
//!
//! Failed operations are not recorded: the reservation is released so the
//! client may retry with the same key straight away.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::fingerprint::Fingerprinted;
use super::store::{IdempotencyRecord, IdempotencyStore, Reservation};
use crate::audit::{AuditRecord, SharedAuditLog};
use crate::cancel::{cancellable, sleep_or_cancel};
use crate::clock::SharedClock;
use crate::dlq::{DeadLetterSink, DlqReason, DlqRecord};
use crate::envelope::EventEnvelope;
use crate::error::ChassisError;

/// Ops event type published when a key is reused with another payload.
pub const IDEMPOTENCY_CONFLICT_EVENT: &str = "idempotency.conflict";

#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// Lifetime of a reservation before completion.
    pub ttl: Duration,
    /// How long a caller waits on a concurrent in-flight request.
    pub in_flight_wait: Duration,
    /// Poll interval while waiting on an in-flight request.
    pub in_flight_poll: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
            in_flight_wait: Duration::from_secs(5),
            in_flight_poll: Duration::from_millis(25),
        }
    }
}

/// Result of a guarded operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Idempotent<O> {
    pub output: O,
    pub status: u16,
    /// True when the output came from the store rather than a fresh run.
    pub replayed: bool,
}

/// Mirrors idempotency conflicts to the DLQ and the audit log.
#[derive(Clone)]
pub struct ConflictReporter {
    dlq: Arc<dyn DeadLetterSink>,
    audit: Option<SharedAuditLog>,
    source_service: String,
}

impl ConflictReporter {
    pub fn new(dlq: Arc<dyn DeadLetterSink>, source_service: impl Into<String>) -> Self {
        Self {
            dlq,
            audit: None,
            source_service: source_service.into(),
        }
    }

    pub fn with_audit(mut self, audit: SharedAuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    async fn report(&self, key: &str, attempted: &str, stored: Option<&str>, now: DateTime<Utc>) {
        let details = json!({
            "idempotency_key": key,
            "attempted_fingerprint": attempted,
            "stored_fingerprint": stored,
        });
        let envelope = EventEnvelope::ops(
            IDEMPOTENCY_CONFLICT_EVENT,
            details.clone(),
            self.source_service.clone(),
            key.to_string(),
        );
        let record = DlqRecord::for_envelope(
            &envelope,
            DlqReason::IdempotencyConflict,
            format!("idempotency key {key} reused with a different payload"),
            now,
        );
        if let Err(e) = self.dlq.publish(record).await {
            error!(idempotency_key = %key, error = %e, "failed to publish idempotency conflict");
        }
        if let Some(audit) = &self.audit {
            audit.append(AuditRecord::new(
                self.source_service.clone(),
                IDEMPOTENCY_CONFLICT_EVENT,
                details,
                now,
            ));
        }
    }
}

/// Wraps operations so the first execution records its response and
/// identical retries replay it.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
    clock: SharedClock,
    config: IdempotencyConfig,
    conflicts: Option<ConflictReporter>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn IdempotencyStore>, clock: SharedClock) -> Self {
        Self::with_config(store, clock, IdempotencyConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn IdempotencyStore>,
        clock: SharedClock,
        config: IdempotencyConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            conflicts: None,
        }
    }

    pub fn with_conflict_reporter(mut self, reporter: ConflictReporter) -> Self {
        self.conflicts = Some(reporter);
        self
    }

    /// Run `op` at most once per `(key, fingerprint)`.
    ///
    /// `status` is the response status recorded with a successful output and
    /// replayed with it. Errors from `op` propagate unchanged.
    pub async fn run<I, O, E, F, Fut>(
        &self,
        key: Option<&str>,
        input: &I,
        status: u16,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<Idempotent<O>, E>
    where
        I: Fingerprinted + ?Sized,
        O: Serialize + DeserializeOwned,
        E: From<ChassisError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<O, E>>,
    {
        let key = key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ChassisError::IdempotencyRequired)?;
        let fingerprint = input.fingerprint();

        let existing = cancellable(cancel, self.store.get(key, self.clock.now())).await??;
        if let Some(record) = existing {
            if record.fingerprint != fingerprint {
                return Err(self.conflict(key, &fingerprint, Some(&record.fingerprint)).await.into());
            }
            if record.is_complete() {
                return Ok(self.replay(record)?);
            }
        }

        let give_up_at = tokio::time::Instant::now() + self.config.in_flight_wait;
        loop {
            let now = self.clock.now();
            let expires_at = now + to_chrono(self.config.ttl);
            let reserved = cancellable(
                cancel,
                self.store.reserve(key, &fingerprint, now, expires_at),
            )
            .await?;

            match reserved {
                Ok(Reservation::Acquired) => break,
                Ok(Reservation::Completed(record)) => return Ok(self.replay(record)?),
                Ok(Reservation::InFlight) => {
                    if tokio::time::Instant::now() >= give_up_at {
                        return Err(ChassisError::Conflict(format!(
                            "request with idempotency key {key} is still in progress"
                        ))
                        .into());
                    }
                    debug!(idempotency_key = %key, "waiting on in-flight request");
                    if !sleep_or_cancel(cancel, self.config.in_flight_poll).await {
                        return Err(ChassisError::Cancelled.into());
                    }
                }
                Err(ChassisError::IdempotencyConflict { .. }) => {
                    return Err(self.conflict(key, &fingerprint, None).await.into());
                }
                Err(e) => return Err(e.into()),
            }
        }

        match op().await {
            Ok(output) => {
                let body = serde_json::to_vec(&output)
                    .map_err(|e| ChassisError::Internal(anyhow::Error::new(e)))?;
                if let Err(e) = self
                    .store
                    .complete(key, status, body, self.clock.now())
                    .await
                {
                    // The output is still valid; a retry will simply re-run.
                    error!(idempotency_key = %key, error = %e, "failed to complete idempotency record");
                }
                Ok(Idempotent {
                    output,
                    status,
                    replayed: false,
                })
            }
            Err(e) => {
                if let Err(release_err) = self.store.release(key, &fingerprint).await {
                    warn!(idempotency_key = %key, error = %release_err, "failed to release idempotency reservation");
                }
                Err(e)
            }
        }
    }

    fn replay<O: DeserializeOwned>(&self, record: IdempotencyRecord) -> Result<Idempotent<O>, ChassisError> {
        let output = serde_json::from_slice(&record.response_body)
            .map_err(|e| ChassisError::Internal(anyhow::Error::new(e).context("stored idempotent response does not decode")))?;
        debug!(idempotency_key = %record.key, "replaying stored response");
        Ok(Idempotent {
            output,
            status: record.response_status,
            replayed: true,
        })
    }

    async fn conflict(&self, key: &str, attempted: &str, stored: Option<&str>) -> ChassisError {
        warn!(idempotency_key = %key, "idempotency key reused with a different payload");
        if let Some(reporter) = &self.conflicts {
            reporter.report(key, attempted, stored, self.clock.now()).await;
        }
        ChassisError::IdempotencyConflict {
            key: key.to_string(),
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
