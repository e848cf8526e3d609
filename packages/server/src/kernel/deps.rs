//! Server dependencies (chassis components wired for this service)
//!
//! Everything is held behind the chassis store traits so tests can swap the
//! in-memory stores, the clock or the widget set.

use std::sync::Arc;

use chassis::aggregate::{Aggregator, InMemoryAggregateCache, WidgetSpec};
use chassis::audit::{InMemoryAuditLog, SharedAuditLog};
use chassis::clock::{system_clock, SharedClock};
use chassis::dedup::InMemoryDedupStore;
use chassis::dlq::{DeadLetterSink, InMemoryDeadLetterQueue};
use chassis::idempotency::{ConflictReporter, IdempotencyGuard, InMemoryIdempotencyStore};
use chassis::inbound::{HandlerRegistry, InboundPipeline, InboundWorker};
use chassis::outbox::{InMemoryOutboxStore, OutboxRelay, OutboxStore};
use chassis::publish::{ClassRouter, LoggingPublisher};
use chassis::service::ServiceHost;
use chassis::transport::ChannelTransport;
use chassis::{EnvelopeValidator, EventCatalog, EventClass};

use crate::config::Config;
use crate::domains::dashboard::{
    creator_widgets, DashboardEventsHandler, Dashboards, DASHBOARD_VIEWED, LAYOUT_SAVED,
};
use crate::domains::resources::{ResourceCreatedHandler, Resources, RESOURCE_CREATED};

/// Canonical event types this service produces and consumes. Ops types are
/// not restricted.
pub fn event_catalog() -> EventCatalog {
    EventCatalog::new()
        .register(EventClass::Domain, RESOURCE_CREATED)
        .register(EventClass::Domain, LAYOUT_SAVED)
        .register(EventClass::Analytics, DASHBOARD_VIEWED)
}

/// Concrete in-memory stores, kept so callers can inspect them.
#[derive(Clone)]
pub struct InMemoryStores {
    pub idempotency: Arc<InMemoryIdempotencyStore>,
    pub dedup: Arc<InMemoryDedupStore>,
    pub outbox: Arc<InMemoryOutboxStore>,
    pub dlq: InMemoryDeadLetterQueue,
    pub audit: Arc<InMemoryAuditLog>,
    pub cache: Arc<InMemoryAggregateCache>,
}

impl InMemoryStores {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// `clock` stamps the audit log's own query records.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            dedup: Arc::new(InMemoryDedupStore::new()),
            outbox: Arc::new(InMemoryOutboxStore::new()),
            dlq: InMemoryDeadLetterQueue::new(),
            audit: Arc::new(InMemoryAuditLog::with_clock(clock)),
            cache: Arc::new(InMemoryAggregateCache::new()),
        }
    }
}

impl Default for InMemoryStores {
    fn default() -> Self {
        Self::new()
    }
}

/// Dependency container shared by handlers and background services
#[derive(Clone)]
pub struct ServerDeps {
    pub config: Arc<Config>,
    pub clock: SharedClock,
    pub validator: EnvelopeValidator,
    pub idempotency: IdempotencyGuard,
    pub outbox: Arc<dyn OutboxStore>,
    pub dlq: Arc<dyn DeadLetterSink>,
    pub audit: SharedAuditLog,
    pub dashboards: Arc<Dashboards>,
    pub resources: Arc<Resources>,
    pub inbound: Arc<InboundPipeline>,
    /// Loopback transport: the relay publishes domain events onto it and the
    /// inbound worker consumes them, as does `POST /v1/events`.
    pub transport: Arc<ChannelTransport>,
}

impl ServerDeps {
    /// Production wiring over fresh in-memory stores.
    pub fn in_memory(config: Config) -> Self {
        Self::assemble(config, system_clock(), &InMemoryStores::new(), None)
    }

    /// Wire every component. `widgets` replaces the creator dashboard's
    /// default widget set when given.
    pub fn assemble(
        config: Config,
        clock: SharedClock,
        stores: &InMemoryStores,
        widgets: Option<Vec<WidgetSpec>>,
    ) -> Self {
        let chassis = config.chassis();
        let service = config.service_name.clone();
        let validator = EnvelopeValidator::with_catalog(event_catalog());
        let outbox: Arc<dyn OutboxStore> = stores.outbox.clone();
        let dlq: Arc<dyn DeadLetterSink> = Arc::new(stores.dlq.clone());
        let audit: SharedAuditLog = stores.audit.clone();

        let idempotency = IdempotencyGuard::with_config(
            stores.idempotency.clone(),
            clock.clone(),
            chassis.idempotency(),
        )
        .with_conflict_reporter(
            ConflictReporter::new(dlq.clone(), service.clone()).with_audit(audit.clone()),
        );

        let resources = Arc::new(Resources::new(
            outbox.clone(),
            validator.clone(),
            clock.clone(),
            service.clone(),
        ));

        let widgets = widgets.unwrap_or_else(|| creator_widgets(resources.clone(), &service));
        let aggregator = Arc::new(widgets.into_iter().fold(
            Aggregator::new(stores.cache.clone(), clock.clone()).with_config(chassis.aggregator()),
            Aggregator::with_widget,
        ));
        let dashboards = Arc::new(Dashboards::new(
            aggregator.clone(),
            outbox.clone(),
            validator.clone(),
            clock.clone(),
            service.clone(),
        ));

        let handlers = HandlerRegistry::new()
            .register(
                RESOURCE_CREATED,
                Arc::new(ResourceCreatedHandler::new(aggregator.clone(), audit.clone())),
            )
            .register_module("dashboard", Arc::new(DashboardEventsHandler::new(aggregator)));
        let inbound = Arc::new(
            InboundPipeline::new(
                service,
                handlers,
                stores.dedup.clone(),
                dlq.clone(),
                clock.clone(),
            )
            .with_validator(validator.clone())
            .with_config(chassis.inbound())
            .with_audit(audit.clone()),
        );

        Self {
            config: Arc::new(config),
            clock,
            validator,
            idempotency,
            outbox,
            dlq,
            audit,
            dashboards,
            resources,
            inbound,
            transport: Arc::new(ChannelTransport::new()),
        }
    }

    /// Relay for this service's outbox. Domain events loop back into the
    /// inbound transport; analytics and ops events are logged.
    pub fn outbox_relay(&self) -> OutboxRelay {
        let router = ClassRouter::new(
            Arc::new(self.transport.publisher()),
            Arc::new(LoggingPublisher),
            Arc::new(LoggingPublisher),
        );
        OutboxRelay::new(self.outbox.clone(), router, self.dlq.clone(), self.clock.clone())
            .with_validator(self.validator.clone())
            .with_config(self.config.chassis().outbox_relay())
    }

    pub fn inbound_worker(&self) -> InboundWorker {
        self.inbound.clone().worker(self.transport.clone())
    }

    /// Host running the relay and the inbound worker.
    pub fn background_services(&self) -> ServiceHost {
        ServiceHost::new()
            .with_service(self.outbox_relay())
            .with_service(self.inbound_worker())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chassis::inbound::InboundOutcome;
    use chassis::transport::EventTransport;
    use chassis::{Actor, Role};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::domains::resources::CreateResource;

    #[test]
    fn test_default_dashboard_has_eight_widgets() {
        let deps = ServerDeps::in_memory(Config::default());
        assert_eq!(deps.dashboards.aggregator().widget_ids().count(), 8);
    }

    #[tokio::test]
    async fn test_resource_event_loops_back_through_inbound() {
        let stores = InMemoryStores::new();
        let deps = ServerDeps::assemble(Config::default(), system_clock(), &stores, None);
        let actor = Actor::new("creator-1", Role::Creator).unwrap();
        let input: CreateResource = serde_json::from_value(json!({"title": "Pantry"})).unwrap();
        deps.resources.create(&actor, input, "t1").await.unwrap();

        let cancel = CancellationToken::new();
        let report = deps.outbox_relay().flush_once(&cancel).await.unwrap();
        assert_eq!(report.published, 1);

        let raw = deps.transport.poll(&cancel).await.unwrap();
        let outcome = deps.inbound.process(raw, &cancel).await.unwrap();

        assert_eq!(outcome, InboundOutcome::Processed);
        assert_eq!(stores.dedup.len(), 1);
        assert!(stores
            .audit
            .snapshot()
            .iter()
            .any(|r| r.action_type == RESOURCE_CREATED && r.actor_id == "creator-1"));
    }
}
