//! Transactional outbox.
//!
//! Outbound events are written in the same unit of work as the state change
//! that produced them ([`UnitOfWork`]) and drained in insertion order by the
//! [`OutboxRelay`]. Delivery is at-least-once; consumers de-duplicate by
//! event id.

mod relay;
mod store;
mod unit_of_work;

pub use relay::{OutboxRelay, OutboxRelayConfig, RelayReport};
pub use store::{InMemoryOutboxStore, OutboxRecord, OutboxStore};
pub use unit_of_work::{Staged, UnitOfWork};
