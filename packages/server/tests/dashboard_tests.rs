//! Integration tests for the creator dashboard.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::common::{Call, TestHarness};
use axum::http::StatusCode;
use chassis::aggregate::WidgetSpec;
use chassis::inbound::InboundOutcome;
use chassis::testing::ScriptedReader;
use serde_json::json;
use test_context::test_context;

#[test_context(TestHarness)]
#[tokio::test]
async fn dashboard_composes_every_widget_then_serves_from_cache(ctx: &TestHarness) {
    let first = ctx
        .send(Call::get("/v1/dashboard?range=7d").as_actor("c1", "creator"))
        .await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body["status"], "success");

    let data = first.data();
    assert_eq!(data["widgets"].as_object().unwrap().len(), 8);
    assert_eq!(data["degraded_widgets"], json!([]));
    assert_eq!(data["cache_hit"], false);
    assert_eq!(data["widgets"]["earnings"]["status"], "ok");
    assert_eq!(data["widgets"]["earnings"]["source"], "payments");
    assert_eq!(data["widgets"]["earnings"]["data"]["date_range"], "7d");
    assert!(data["layout"].is_null());

    let second = ctx
        .send(Call::get("/v1/dashboard?range=7d").as_actor("c1", "creator"))
        .await;
    assert_eq!(second.data()["cache_hit"], true);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn unknown_query_values_are_normalized(ctx: &TestHarness) {
    let response = ctx
        .send(Call::get("/v1/dashboard?range=bogus&device=fridge").as_actor("c1", "creator"))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.data()["widgets"]["earnings"]["data"]["date_range"],
        "30d"
    );
    assert_eq!(response.data()["widgets"]["earnings"]["data"]["timezone"], "UTC");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn dashboard_requires_an_actor(ctx: &TestHarness) {
    let response = ctx.send(Call::get("/v1/dashboard")).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.error_code(), "unauthorized");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn created_resource_is_visible_on_the_next_read(ctx: &TestHarness) {
    let warm = ctx
        .send(Call::get("/v1/dashboard").as_actor("c1", "creator"))
        .await;
    assert_eq!(warm.data()["widgets"]["resources"]["data"], json!([]));
    assert_eq!(
        ctx.send(Call::get("/v1/dashboard").as_actor("c1", "creator"))
            .await
            .data()["cache_hit"],
        true
    );

    let created = ctx
        .send(
            Call::post("/v1/resources")
                .as_actor("c1", "creator")
                .key("K-res")
                .json(json!({"title": "Intro"})),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);

    // No relay or inbound processing in between
    let fresh = ctx
        .send(Call::get("/v1/dashboard").as_actor("c1", "creator"))
        .await;
    assert_eq!(fresh.data()["cache_hit"], false);
    let items = fresh.data()["widgets"]["resources"]["data"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["attributes"]["title"], "Intro");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn resource_created_event_invalidates_the_cached_dashboard(ctx: &TestHarness) {
    let created = ctx
        .send(
            Call::post("/v1/resources")
                .as_actor("c1", "creator")
                .key("K-res")
                .json(json!({"title": "Intro"})),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);

    // Cached after the write, as another instance would have it
    ctx.send(Call::get("/v1/dashboard").as_actor("c1", "creator"))
        .await;
    assert_eq!(ctx.stores.cache.len(), 1);

    let outcomes = ctx.settle().await;
    assert_eq!(outcomes, vec![InboundOutcome::Processed]);
    assert!(ctx.stores.cache.is_empty());

    let fresh = ctx
        .send(Call::get("/v1/dashboard").as_actor("c1", "creator"))
        .await;
    assert_eq!(fresh.data()["cache_hit"], false);
}

#[tokio::test]
async fn failing_and_slow_widgets_degrade_without_failing_the_request() {
    let slow = Arc::new(ScriptedReader::sleeping(Duration::from_secs(10), json!({})));
    let mut widgets = Vec::new();
    for i in 1..=8 {
        let id = format!("w{i}");
        let spec = match i {
            3 | 7 => WidgetSpec::get(id, "flaky", Arc::new(ScriptedReader::failing("upstream 500"))),
            5 => WidgetSpec::summary(id, "slow", slow.clone()),
            _ => WidgetSpec::get(id, "steady", Arc::new(ScriptedReader::ok(json!({"n": i})))),
        };
        widgets.push(spec);
    }
    let ctx = TestHarness::with_widgets(widgets);

    let started = Instant::now();
    let response = ctx
        .send(Call::get("/v1/dashboard").as_actor("c1", "creator"))
        .await;
    assert!(started.elapsed() < Duration::from_millis(3500));

    assert_eq!(response.status, StatusCode::OK);
    let data = response.data();
    assert_eq!(data["degraded_widgets"], json!(["w3", "w5", "w7"]));
    assert_eq!(data["widgets"]["w3"]["status"], "unavailable");
    assert_eq!(data["widgets"]["w3"]["data"]["error"], "temporarily_unavailable");
    assert_eq!(data["widgets"]["w5"]["source"], "slow");
    assert_eq!(data["widgets"]["w1"]["data"]["n"], 1);
    assert_eq!(slow.calls(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn saved_layout_is_returned_with_the_dashboard(ctx: &TestHarness) {
    let save = || {
        Call::put("/v1/dashboard/layout")
            .as_actor("c1", "creator")
            .key("K-layout")
            .json(json!({"widgets": ["resources", "earnings"]}))
    };

    let saved = ctx.send(save()).await;
    assert_eq!(saved.status, StatusCode::OK);
    assert_eq!(saved.data()["version"], 1);
    assert_eq!(saved.data()["subject_id"], "c1");

    let replay = ctx.send(save()).await;
    assert_eq!(replay.header("idempotent-replayed"), Some("true"));
    assert_eq!(replay.data()["version"], 1);

    let view = ctx
        .send(Call::get("/v1/dashboard").as_actor("c1", "creator"))
        .await;
    assert_eq!(view.data()["layout"], json!(["resources", "earnings"]));

    // One audit entry for the save, none for the replay
    let saves = ctx
        .stores
        .audit
        .snapshot()
        .into_iter()
        .filter(|r| r.action_type == "dashboard.layout_saved")
        .count();
    assert_eq!(saves, 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn saving_a_layout_invalidates_the_cached_dashboard(ctx: &TestHarness) {
    ctx.send(Call::get("/v1/dashboard").as_actor("c1", "creator"))
        .await;
    let cached = ctx
        .send(Call::get("/v1/dashboard").as_actor("c1", "creator"))
        .await;
    assert_eq!(cached.data()["cache_hit"], true);
    assert!(cached.data()["layout"].is_null());

    let saved = ctx
        .send(
            Call::put("/v1/dashboard/layout")
                .as_actor("c1", "creator")
                .key("K-layout-2")
                .json(json!({"widgets": ["posts", "reach"]})),
        )
        .await;
    assert_eq!(saved.status, StatusCode::OK);

    let after = ctx
        .send(Call::get("/v1/dashboard").as_actor("c1", "creator"))
        .await;
    assert_eq!(after.data()["cache_hit"], false);
    assert_eq!(after.data()["layout"], json!(["posts", "reach"]));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn layout_with_unknown_widget_is_rejected(ctx: &TestHarness) {
    let response = ctx
        .send(
            Call::put("/v1/dashboard/layout")
                .as_actor("c1", "creator")
                .key("K-bad-layout")
                .json(json!({"widgets": ["earnings", "horoscope"]})),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.error_code(), "invalid_input");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn explicit_invalidation_drops_cached_entries(ctx: &TestHarness) {
    ctx.send(Call::get("/v1/dashboard?range=7d").as_actor("c1", "creator"))
        .await;
    ctx.send(Call::get("/v1/dashboard?range=90d").as_actor("c1", "creator"))
        .await;

    let response = ctx
        .send(
            Call::post("/v1/dashboard/invalidate")
                .as_actor("c1", "creator")
                .key("K-inv"),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["message"], "dashboard cache invalidated");
    assert_eq!(response.data()["subject_id"], "c1");
    assert_eq!(response.data()["removed"], 2);
    assert!(ctx.stores.cache.is_empty());
}
