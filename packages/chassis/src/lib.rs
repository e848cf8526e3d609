//! # Chassis
//!
//! Shared reliability layer for fleet services: exactly-once mutating
//! requests, at-most-once event consumption, a transactional outbox, one
//! canonical event envelope, and degraded fan-out reads.
//!
//! ## Layers
//!
//! ```text
//! L0  clock, envelope, error, actor
//! L1  stores: idempotency, dedup, outbox, audit, aggregate cache
//! L2  IdempotencyGuard, EnvelopeValidator
//! L3  Aggregator (dashboard fan-out)
//! L4  InboundPipeline ─► InboundWorker (per transport)
//! L5  OutboxRelay
//! L6  ServiceHost
//! ```
//!
//! Services assemble these at startup, inject concrete reader and publisher
//! ports, and register event handlers.
//!
//! ## Guarantees
//!
//! - **Exactly-once mutations**: a key plus request fingerprint runs once;
//!   retries replay the stored response, drift is `idempotency_conflict`.
//! - **At-most-once handlers**: successfully handled event ids are remembered
//!   for the dedup TTL and serialized per id.
//! - **At-least-once publishing**: outbox rows are relayed in insertion order
//!   and only marked sent after the publisher accepts them.
//! - **Envelope invariants**: every inbound and outbound event passes the
//!   validator; failures go to the DLQ, never to a handler.
//!
//! ## Example
//!
//! ```ignore
//! use chassis::{
//!     clock::system_clock,
//!     dedup::InMemoryDedupStore,
//!     dlq::InMemoryDeadLetterQueue,
//!     inbound::{HandlerRegistry, InboundPipeline},
//!     service::ServiceHost,
//!     transport::ChannelTransport,
//! };
//!
//! let transport = Arc::new(ChannelTransport::new());
//! let pipeline = Arc::new(InboundPipeline::new(
//!     "payments",
//!     HandlerRegistry::new().register("payout.paid", Arc::new(PayoutPaid)),
//!     Arc::new(InMemoryDedupStore::new()),
//!     Arc::new(InMemoryDeadLetterQueue::new()),
//!     system_clock(),
//! ));
//!
//! ServiceHost::new()
//!     .with_service(pipeline.worker(transport))
//!     .run_until_shutdown()
//!     .await?;
//! ```

pub mod actor;
pub mod aggregate;
pub mod audit;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod dlq;
pub mod envelope;
pub mod error;
pub mod idempotency;
pub mod inbound;
pub mod outbox;
pub mod publish;
pub mod service;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use actor::{Actor, Role};
pub use config::ChassisConfig;
pub use envelope::{EnvelopeError, EnvelopeValidator, EventCatalog, EventClass, EventEnvelope};
pub use error::{ChassisError, ErrorKind, Result};
