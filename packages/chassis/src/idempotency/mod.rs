//! Request-level idempotency: exactly-once semantics for mutating calls.
//!
//! A client supplies an idempotency key; the chassis pairs it with a
//! fingerprint of the request's semantic fields. The first execution records
//! its response, identical retries replay it, and a retry with a different
//! payload fails with `idempotency_conflict`.

mod fingerprint;
mod guard;
mod store;

pub use fingerprint::{canonical_json, fingerprint, Fingerprinted};
pub use guard::{
    ConflictReporter, Idempotent, IdempotencyConfig, IdempotencyGuard, IDEMPOTENCY_CONFLICT_EVENT,
};
pub use store::{
    IdempotencyRecord, IdempotencyStore, InMemoryIdempotencyStore, Reservation,
    DEFAULT_MIN_RETENTION_DAYS,
};
