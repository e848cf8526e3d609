//! Typed chassis options.
//!
//! Services read their environment however they like and hand the chassis a
//! [`ChassisConfig`]; the per-component configs are derived from it.

use std::time::Duration;

use crate::aggregate::AggregatorConfig;
use crate::idempotency::IdempotencyConfig;
use crate::inbound::InboundConfig;
use crate::outbox::OutboxRelayConfig;

const SEVEN_DAYS: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChassisConfig {
    /// Retention window for idempotency records.
    pub idempotency_ttl: Duration,
    /// Retention window for dedup records.
    pub event_dedup_ttl: Duration,
    /// Maximum rows per relay tick.
    pub outbox_flush_batch_size: usize,
    /// Relay tick.
    pub outbox_flush_interval: Duration,
    /// How long sent outbox rows are kept.
    pub outbox_retention: Duration,
    /// Deadline for one dashboard fan-out.
    pub aggregation_timeout: Duration,
    pub aggregation_cache_ttl: Duration,
    /// Inbound worker tick when the transport is empty.
    pub consumer_poll_interval: Duration,
}

impl Default for ChassisConfig {
    fn default() -> Self {
        Self {
            idempotency_ttl: SEVEN_DAYS,
            event_dedup_ttl: SEVEN_DAYS,
            outbox_flush_batch_size: 100,
            outbox_flush_interval: Duration::from_secs(1),
            outbox_retention: SEVEN_DAYS,
            aggregation_timeout: Duration::from_secs(3),
            aggregation_cache_ttl: Duration::from_secs(5 * 60),
            consumer_poll_interval: Duration::from_secs(2),
        }
    }
}

impl ChassisConfig {
    pub fn idempotency(&self) -> IdempotencyConfig {
        IdempotencyConfig {
            ttl: self.idempotency_ttl,
            ..Default::default()
        }
    }

    pub fn inbound(&self) -> InboundConfig {
        InboundConfig {
            dedup_ttl: self.event_dedup_ttl,
            poll_interval: self.consumer_poll_interval,
            ..Default::default()
        }
    }

    pub fn outbox_relay(&self) -> OutboxRelayConfig {
        OutboxRelayConfig {
            interval: self.outbox_flush_interval,
            batch_size: self.outbox_flush_batch_size,
            retention: self.outbox_retention,
            ..Default::default()
        }
    }

    pub fn aggregator(&self) -> AggregatorConfig {
        AggregatorConfig {
            timeout: self.aggregation_timeout,
            cache_ttl: self.aggregation_cache_ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChassisConfig::default();
        assert_eq!(config.idempotency().ttl, SEVEN_DAYS);
        assert_eq!(config.inbound().poll_interval, Duration::from_secs(2));
        assert_eq!(config.inbound().shutdown_grace, Duration::from_secs(5));
        assert_eq!(config.outbox_relay().batch_size, 100);
        assert_eq!(config.aggregator().timeout, Duration::from_secs(3));
        assert_eq!(config.aggregator().cache_ttl, Duration::from_secs(300));
    }
}
