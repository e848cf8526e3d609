//! Request bodies and event payloads shared across tests.

use serde_json::{json, Value};

/// A `dashboard.layout_saved` envelope as another service would publish it.
pub fn layout_saved_event(event_id: &str, subject_id: &str) -> Value {
    json!({
        "event_id": event_id,
        "event_type": "dashboard.layout_saved",
        "event_class": "domain",
        "occurred_at": "2026-03-01T12:00:00Z",
        "partition_key_path": "data.subject_id",
        "partition_key": subject_id,
        "source_service": "studio",
        "trace_id": format!("trace-{event_id}"),
        "schema_version": "1.0",
        "data": {"subject_id": subject_id, "widgets": ["earnings"]}
    })
}

/// An ops envelope whose type nothing handles.
pub fn unhandled_ops_event(event_id: &str) -> Value {
    json!({
        "event_id": event_id,
        "event_type": "cache.warmed",
        "event_class": "ops",
        "occurred_at": "2026-03-01T12:00:00Z",
        "partition_key_path": "data.node",
        "partition_key": "node-1",
        "source_service": "edge",
        "trace_id": "trace-ops",
        "schema_version": "1.0",
        "data": {"node": "node-1"}
    })
}
