use std::collections::BTreeMap;

use chassis::idempotency::Fingerprinted;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// A resource owned by a single subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub owner_id: String,
    pub attributes: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// Body of `POST /v1/resources`: any JSON object of attributes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct CreateResource {
    pub attributes: Map<String, Value>,
}

/// A create request as seen by the idempotency guard.
///
/// The same payload from two subjects is two different requests.
#[derive(Debug, Clone)]
pub struct CreateResourceCommand<'a> {
    pub owner_id: &'a str,
    pub input: &'a CreateResource,
}

impl Fingerprinted for CreateResourceCommand<'_> {
    fn fingerprint_projection(&self) -> Value {
        json!({
            "owner_id": self.owner_id,
            "attributes": self.input.attributes,
        })
    }
}

/// In-memory resource table, committed through a unit of work.
#[derive(Debug, Clone, Default)]
pub struct ResourceBook {
    resources: BTreeMap<Uuid, Resource>,
}

impl ResourceBook {
    pub fn insert(&mut self, resource: Resource) {
        self.resources.insert(resource.id, resource);
    }

    pub fn get(&self, id: &Uuid) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Resources of `owner_id`, newest first.
    pub fn owned_by(&self, owner_id: &str) -> Vec<Resource> {
        let mut owned: Vec<Resource> = self
            .resources
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        owned
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(body: Value) -> CreateResource {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_fingerprint_includes_owner() {
        let input = create(json!({"a": 1}));
        let alice = CreateResourceCommand {
            owner_id: "alice",
            input: &input,
        };
        let bob = CreateResourceCommand {
            owner_id: "bob",
            input: &input,
        };
        assert_ne!(alice.fingerprint(), bob.fingerprint());
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let first = create(json!({"a": 1, "b": {"c": true, "d": null}}));
        let second = create(json!({"b": {"d": null, "c": true}, "a": 1}));
        let fingerprint = |input: &CreateResource| {
            CreateResourceCommand {
                owner_id: "alice",
                input,
            }
            .fingerprint()
        };
        assert_eq!(fingerprint(&first), fingerprint(&second));
    }

    #[test]
    fn test_non_object_body_is_rejected() {
        assert!(serde_json::from_value::<CreateResource>(json!([1, 2])).is_err());
    }

    #[test]
    fn test_owned_by_filters_and_orders() {
        let mut book = ResourceBook::default();
        let at = Utc::now();
        for (owner, offset) in [("alice", 0), ("bob", 1), ("alice", 2)] {
            book.insert(Resource {
                id: Uuid::new_v4(),
                owner_id: owner.to_string(),
                attributes: Map::new(),
                created_at: at + chrono::Duration::seconds(offset),
            });
        }

        let owned = book.owned_by("alice");
        assert_eq!(owned.len(), 2);
        assert!(owned[0].created_at > owned[1].created_at);
        assert_eq!(book.len(), 3);
    }
}
