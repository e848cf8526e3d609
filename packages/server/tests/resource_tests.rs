//! Integration tests for idempotent resource creation.

mod common;

use crate::common::{Call, TestHarness};
use axum::http::StatusCode;
use chassis::dlq::DlqReason;
use serde_json::json;
use test_context::test_context;

#[test_context(TestHarness)]
#[tokio::test]
async fn retry_with_same_key_replays_the_stored_response(ctx: &TestHarness) {
    let create = || {
        Call::post("/v1/resources")
            .as_actor("admin-1", "admin")
            .key("K1")
            .json(json!({"a": 1}))
    };

    let first = ctx.send(create()).await;
    assert_eq!(first.status, StatusCode::CREATED);
    assert!(first.header("idempotent-replayed").is_none());
    let resource_id = first.data()["id"].as_str().unwrap().to_string();
    assert_eq!(first.data()["attributes"]["a"], 1);

    let retry = ctx.send(create()).await;
    assert_eq!(retry.status, StatusCode::CREATED);
    assert_eq!(retry.header("idempotent-replayed"), Some("true"));
    assert_eq!(retry.raw, first.raw);
    assert_eq!(retry.data()["id"], resource_id.as_str());

    // The operation ran once: one resource, one outbox row
    assert_eq!(ctx.deps.resources.owned_by("admin-1").await.len(), 1);
    let rows = ctx.stores.outbox.all();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].envelope.event_type, "resource.created");
    assert_eq!(rows[0].envelope.partition_key, resource_id);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn same_key_with_different_body_is_a_conflict(ctx: &TestHarness) {
    let first = ctx
        .send(
            Call::post("/v1/resources")
                .as_actor("admin-1", "admin")
                .key("K1")
                .json(json!({"a": 1})),
        )
        .await;
    assert_eq!(first.status, StatusCode::CREATED);

    let drifted = ctx
        .send(
            Call::post("/v1/resources")
                .as_actor("admin-1", "admin")
                .key("K1")
                .json(json!({"a": 2})),
        )
        .await;
    assert_eq!(drifted.status, StatusCode::CONFLICT);
    assert_eq!(drifted.error_code(), "idempotency_conflict");
    assert!(drifted.body["error"]["request_id"].is_string());

    let dlq = ctx.stores.dlq.records();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].reason, DlqReason::IdempotencyConflict);

    assert!(ctx
        .stores
        .audit
        .snapshot()
        .iter()
        .any(|r| r.action_type == "idempotency.conflict"));

    // Nothing new was created
    assert_eq!(ctx.deps.resources.owned_by("admin-1").await.len(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn mutating_request_without_key_is_rejected(ctx: &TestHarness) {
    let response = ctx
        .send(
            Call::post("/v1/resources")
                .as_actor("c1", "creator")
                .json(json!({"a": 1})),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.error_code(), "missing_idempotency_key");
    assert_eq!(response.body["status"], "error");
    assert!(ctx.stores.outbox.all().is_empty());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn viewer_cannot_create_and_key_is_released(ctx: &TestHarness) {
    let denied = ctx
        .send(
            Call::post("/v1/resources")
                .as_actor("v1", "viewer")
                .key("K-viewer")
                .json(json!({"a": 1})),
        )
        .await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);
    assert_eq!(denied.error_code(), "forbidden");

    // A failed operation releases the key instead of storing the failure
    assert!(ctx.stores.idempotency.is_empty());

    let retried = ctx
        .send(
            Call::post("/v1/resources")
                .as_actor("v1", "admin")
                .key("K-viewer")
                .json(json!({"a": 1})),
        )
        .await;
    assert_eq!(retried.status, StatusCode::CREATED);
    assert!(retried.header("idempotent-replayed").is_none());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn non_object_body_is_invalid_input(ctx: &TestHarness) {
    let response = ctx
        .send(
            Call::post("/v1/resources")
                .as_actor("c1", "creator")
                .key("K-array")
                .json(json!([1, 2, 3])),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.error_code(), "invalid_input");
}
