//! Dashboard reads and layout mutations.

use std::collections::HashSet;
use std::sync::Arc;

use chassis::aggregate::{Aggregator, Dashboard, DashboardQuery};
use chassis::clock::SharedClock;
use chassis::outbox::{OutboxRecord, OutboxStore, UnitOfWork};
use chassis::{Actor, ChassisError, EnvelopeValidator, EventEnvelope};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::models::{DashboardLayout, DashboardView, LayoutBook, SaveLayout};

/// Domain event emitted when a subject saves a layout.
pub const LAYOUT_SAVED: &str = "dashboard.layout_saved";

/// Analytics event emitted for every composed dashboard.
pub const DASHBOARD_VIEWED: &str = "dashboard.viewed";

pub struct Dashboards {
    aggregator: Arc<Aggregator>,
    layouts: UnitOfWork<LayoutBook>,
    outbox: Arc<dyn OutboxStore>,
    validator: EnvelopeValidator,
    clock: SharedClock,
    source_service: String,
}

impl Dashboards {
    pub fn new(
        aggregator: Arc<Aggregator>,
        outbox: Arc<dyn OutboxStore>,
        validator: EnvelopeValidator,
        clock: SharedClock,
        source_service: impl Into<String>,
    ) -> Self {
        Self {
            aggregator,
            layouts: UnitOfWork::new(LayoutBook::default(), outbox.clone(), clock.clone())
                .with_validator(validator.clone()),
            outbox,
            validator,
            clock,
            source_service: source_service.into(),
        }
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// Compose the dashboard for `query` with the subject's saved layout.
    pub async fn view(
        &self,
        query: &DashboardQuery,
        trace_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DashboardView, ChassisError> {
        let dashboard = self.aggregator.compose(query, cancel).await?;
        self.record_view(query, &dashboard, trace_id).await;

        let layout = self.layout(&query.subject_id).await.map(|l| l.widgets);
        Ok(DashboardView { dashboard, layout })
    }

    /// Best-effort analytics row; a failure never fails the read.
    async fn record_view(&self, query: &DashboardQuery, dashboard: &Dashboard, trace_id: &str) {
        let envelope = EventEnvelope::analytics(
            DASHBOARD_VIEWED,
            "subject_id",
            json!({
                "subject_id": query.subject_id,
                "date_range": query.date_range,
                "device": query.device,
                "cache_hit": dashboard.cache_hit,
                "degraded_widgets": dashboard.degraded_widgets.len(),
            }),
            self.source_service.clone(),
            trace_id,
        );
        let row = match OutboxRecord::validated(&self.validator, envelope, self.clock.now()) {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "dashboard view event rejected");
                return;
            }
        };
        if let Err(e) = self.outbox.enqueue(row).await {
            warn!(error = %e, "failed to record dashboard view");
        }
    }

    pub async fn layout(&self, subject_id: &str) -> Option<DashboardLayout> {
        self.layouts.read(|book| book.get(subject_id).cloned()).await
    }

    /// Save the actor's layout, then drop their cached dashboards.
    pub async fn save_layout(
        &self,
        actor: &Actor,
        input: SaveLayout,
        trace_id: &str,
    ) -> Result<DashboardLayout, ChassisError> {
        self.check_widgets(&input.widgets)?;

        let subject_id = actor.subject_id.clone();
        let now = self.clock.now();
        let source_service = self.source_service.clone();
        let layout = self
            .layouts
            .atomically(|book, staged| {
                let version = book.get(&subject_id).map_or(0, |l| l.version) + 1;
                let layout = DashboardLayout {
                    subject_id: subject_id.clone(),
                    widgets: input.widgets,
                    version,
                    updated_at: now,
                };
                staged.emit(EventEnvelope::domain(
                    LAYOUT_SAVED,
                    "subject_id",
                    json!({
                        "subject_id": subject_id,
                        "widgets": layout.widgets,
                        "version": version,
                    }),
                    source_service,
                    trace_id,
                ))?;
                book.put(layout.clone());
                Ok::<_, ChassisError>(layout)
            })
            .await?;

        self.invalidate(&layout.subject_id).await?;
        info!(subject_id = %layout.subject_id, version = layout.version, "dashboard layout saved");
        Ok(layout)
    }

    pub async fn invalidate(&self, subject_id: &str) -> Result<usize, ChassisError> {
        self.aggregator.invalidate_by_subject(subject_id).await
    }

    fn check_widgets(&self, widgets: &[String]) -> Result<(), ChassisError> {
        let known: HashSet<&str> = self.aggregator.widget_ids().collect();
        let mut seen = HashSet::new();
        for widget in widgets {
            if !known.contains(widget.as_str()) {
                return Err(ChassisError::InvalidInput(format!("unknown widget: {widget}")));
            }
            if !seen.insert(widget.as_str()) {
                return Err(ChassisError::InvalidInput(format!("duplicate widget: {widget}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chassis::aggregate::{InMemoryAggregateCache, WidgetSpec};
    use chassis::clock::system_clock;
    use chassis::outbox::InMemoryOutboxStore;
    use chassis::testing::ScriptedReader;
    use chassis::{EventClass, Role};

    struct Fixture {
        dashboards: Dashboards,
        cache: Arc<InMemoryAggregateCache>,
        outbox: Arc<InMemoryOutboxStore>,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(InMemoryAggregateCache::new());
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let mut aggregator = Aggregator::new(cache.clone(), system_clock());
        for id in ["earnings", "posts"] {
            aggregator = aggregator.with_widget(WidgetSpec::get(
                id,
                "upstream",
                Arc::new(ScriptedReader::ok(json!({"widget": id}))),
            ));
        }
        let dashboards = Dashboards::new(
            Arc::new(aggregator),
            outbox.clone(),
            EnvelopeValidator::new(),
            system_clock(),
            "fleet-server",
        );
        Fixture {
            dashboards,
            cache,
            outbox,
        }
    }

    fn creator() -> Actor {
        Actor::new("creator-1", Role::Creator).unwrap()
    }

    fn layout(widgets: &[&str]) -> SaveLayout {
        SaveLayout {
            widgets: widgets.iter().map(|w| w.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_view_records_analytics_event() {
        let f = fixture();
        let query = DashboardQuery::normalize(&creator(), None, None, None);

        let view = f
            .dashboards
            .view(&query, "t1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(view.dashboard.widgets.len(), 2);
        assert!(view.layout.is_none());
        let rows = f.outbox.all();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].envelope.event_type, DASHBOARD_VIEWED);
        assert_eq!(rows[0].envelope.event_class, EventClass::Analytics);
    }

    #[tokio::test]
    async fn test_save_layout_bumps_version_and_invalidates() {
        let f = fixture();
        let actor = creator();
        let query = DashboardQuery::normalize(&actor, None, None, None);
        f.dashboards
            .view(&query, "t1", &CancellationToken::new())
            .await
            .unwrap();
        assert!(f.cache.contains(&query.cache_key()));

        let first = f
            .dashboards
            .save_layout(&actor, layout(&["posts", "earnings"]), "t2")
            .await
            .unwrap();
        let second = f
            .dashboards
            .save_layout(&actor, layout(&["earnings"]), "t3")
            .await
            .unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert!(!f.cache.contains(&query.cache_key()));
        let saved: Vec<_> = f
            .outbox
            .all()
            .into_iter()
            .filter(|r| r.envelope.event_type == LAYOUT_SAVED)
            .collect();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1].envelope.partition_key, "creator-1");
    }

    #[tokio::test]
    async fn test_unknown_or_duplicate_widgets_are_rejected() {
        let f = fixture();
        let actor = creator();

        for widgets in [&["earnings", "ghost"][..], &["posts", "posts"][..]] {
            let err = f
                .dashboards
                .save_layout(&actor, layout(widgets), "t1")
                .await
                .unwrap_err();
            assert!(matches!(err, ChassisError::InvalidInput(_)));
        }
        assert!(f.dashboards.layout("creator-1").await.is_none());
        assert_eq!(f.outbox.pending_count(), 0);
    }
}
