//! Resource mutations and queries.

use std::sync::Arc;

use chassis::clock::SharedClock;
use chassis::outbox::{OutboxStore, UnitOfWork};
use chassis::{Actor, ChassisError, EnvelopeValidator, EventEnvelope, Role};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::models::{CreateResource, Resource, ResourceBook};

/// Domain event emitted for every committed resource.
pub const RESOURCE_CREATED: &str = "resource.created";

pub struct Resources {
    book: UnitOfWork<ResourceBook>,
    clock: SharedClock,
    source_service: String,
}

impl Resources {
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        validator: EnvelopeValidator,
        clock: SharedClock,
        source_service: impl Into<String>,
    ) -> Self {
        Self {
            book: UnitOfWork::new(ResourceBook::default(), outbox, clock.clone())
                .with_validator(validator),
            clock,
            source_service: source_service.into(),
        }
    }

    /// Create a resource owned by `actor` and stage `resource.created` in the
    /// same unit of work.
    pub async fn create(
        &self,
        actor: &Actor,
        input: CreateResource,
        trace_id: &str,
    ) -> Result<Resource, ChassisError> {
        require_writer(actor)?;

        let resource = Resource {
            id: Uuid::new_v4(),
            owner_id: actor.subject_id.clone(),
            attributes: input.attributes,
            created_at: self.clock.now(),
        };
        let event = EventEnvelope::domain(
            RESOURCE_CREATED,
            "resource_id",
            json!({
                "resource_id": resource.id.to_string(),
                "owner_id": resource.owner_id,
            }),
            self.source_service.clone(),
            trace_id,
        );

        let created = self
            .book
            .atomically(|book, staged| {
                staged.emit(event)?;
                book.insert(resource.clone());
                Ok::<_, ChassisError>(resource)
            })
            .await?;

        info!(resource_id = %created.id, owner_id = %created.owner_id, "resource created");
        Ok(created)
    }

    pub async fn get(&self, id: &Uuid) -> Option<Resource> {
        self.book.read(|book| book.get(id).cloned()).await
    }

    pub async fn owned_by(&self, owner_id: &str) -> Vec<Resource> {
        self.book.read(|book| book.owned_by(owner_id)).await
    }
}

fn require_writer(actor: &Actor) -> Result<(), ChassisError> {
    match actor.role {
        Role::Admin | Role::Creator | Role::System => Ok(()),
        role => Err(ChassisError::Forbidden(format!(
            "role {role} may not create resources"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chassis::clock::system_clock;
    use chassis::outbox::InMemoryOutboxStore;
    use chassis::EventClass;
    use serde_json::Value;

    fn input(body: Value) -> CreateResource {
        serde_json::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn test_create_commits_resource_and_event() {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let resources = Resources::new(
            outbox.clone(),
            EnvelopeValidator::new(),
            system_clock(),
            "fleet-server",
        );
        let actor = Actor::new("creator-1", Role::Creator).unwrap();

        let created = resources
            .create(&actor, input(json!({"title": "Food shelf"})), "trace-1")
            .await
            .unwrap();

        assert_eq!(resources.get(&created.id).await, Some(created.clone()));
        let rows = outbox.all();
        assert_eq!(rows.len(), 1);
        let envelope = &rows[0].envelope;
        assert_eq!(envelope.event_type, RESOURCE_CREATED);
        assert_eq!(envelope.event_class, EventClass::Domain);
        assert_eq!(envelope.partition_key, created.id.to_string());
        assert_eq!(envelope.trace_id, "trace-1");
    }

    #[tokio::test]
    async fn test_viewer_cannot_create() {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let resources = Resources::new(
            outbox.clone(),
            EnvelopeValidator::new(),
            system_clock(),
            "fleet-server",
        );
        let actor = Actor::new("viewer-1", Role::Viewer).unwrap();

        let err = resources
            .create(&actor, input(json!({})), "trace-1")
            .await
            .unwrap_err();

        assert!(matches!(err, ChassisError::Forbidden(_)));
        assert!(resources.owned_by("viewer-1").await.is_empty());
        assert_eq!(outbox.pending_count(), 0);
    }
}
