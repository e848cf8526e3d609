//! Outbound transport port.
//!
//! The chassis is transport-agnostic: anything that can accept a validated
//! envelope implements [`EventPublisher`]. [`ClassRouter`] picks the
//! publisher for an envelope's [`EventClass`].

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::envelope::{EventClass, EventEnvelope};

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<()>;
}

/// Routes envelopes to the publisher registered for their class.
#[derive(Clone)]
pub struct ClassRouter {
    domain: Arc<dyn EventPublisher>,
    analytics: Arc<dyn EventPublisher>,
    ops: Arc<dyn EventPublisher>,
}

impl ClassRouter {
    pub fn new(
        domain: Arc<dyn EventPublisher>,
        analytics: Arc<dyn EventPublisher>,
        ops: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            domain,
            analytics,
            ops,
        }
    }

    /// Same publisher for every class.
    pub fn uniform(publisher: Arc<dyn EventPublisher>) -> Self {
        Self::new(publisher.clone(), publisher.clone(), publisher)
    }

    pub fn for_class(&self, class: EventClass) -> &Arc<dyn EventPublisher> {
        match class {
            EventClass::Domain => &self.domain,
            EventClass::Analytics => &self.analytics,
            EventClass::Ops => &self.ops,
        }
    }
}

#[async_trait]
impl EventPublisher for ClassRouter {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<()> {
        self.for_class(envelope.event_class).publish(envelope).await
    }
}

/// Publisher that only logs. Useful for classes a service produces but
/// nothing consumes yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPublisher;

#[async_trait]
impl EventPublisher for LoggingPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<()> {
        tracing::info!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            event_class = %envelope.event_class,
            partition_key = %envelope.partition_key,
            "event published"
        );
        Ok(())
    }
}
