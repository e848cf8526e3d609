//! Widget readers for the creator dashboard.
//!
//! `resources` reads this server's own state. The rest stand in for upstream
//! services with a fixed payload.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chassis::aggregate::{DashboardQuery, GetBySubject, ListBySubject, SummaryReader, WidgetSpec};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::domains::resources::Resources;

/// Reader over a fixed payload, scoped to the query it answers.
#[derive(Debug, Clone)]
pub struct FixtureReader {
    payload: Value,
}

impl FixtureReader {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    fn scoped(&self, query: &DashboardQuery) -> Value {
        let mut value = self.payload.clone();
        if let Value::Object(fields) = &mut value {
            fields.insert("date_range".into(), json!(query.date_range));
            fields.insert("timezone".into(), json!(query.timezone));
        }
        value
    }
}

#[async_trait]
impl GetBySubject for FixtureReader {
    async fn get_by_subject(&self, query: &DashboardQuery, _cancel: &CancellationToken) -> Result<Value> {
        Ok(self.scoped(query))
    }
}

#[async_trait]
impl ListBySubject for FixtureReader {
    async fn list_by_subject(
        &self,
        _query: &DashboardQuery,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Value>> {
        Ok(match &self.payload {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        })
    }
}

#[async_trait]
impl SummaryReader for FixtureReader {
    async fn get_summary(&self, query: &DashboardQuery, _cancel: &CancellationToken) -> Result<Value> {
        Ok(self.scoped(query))
    }
}

/// The subject's own resources, newest first.
pub struct ResourcesReader {
    resources: Arc<Resources>,
}

impl ResourcesReader {
    pub fn new(resources: Arc<Resources>) -> Self {
        Self { resources }
    }
}

#[async_trait]
impl ListBySubject for ResourcesReader {
    async fn list_by_subject(
        &self,
        query: &DashboardQuery,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Value>> {
        self.resources
            .owned_by(&query.subject_id)
            .await
            .into_iter()
            .map(|r| serde_json::to_value(r).map_err(Into::into))
            .collect()
    }
}

/// The eight widgets of the creator dashboard, in display order.
pub fn creator_widgets(resources: Arc<Resources>, service_name: &str) -> Vec<WidgetSpec> {
    vec![
        WidgetSpec::get(
            "earnings",
            "payments",
            Arc::new(FixtureReader::new(json!({"currency": "USD", "total_cents": 0}))),
        ),
        WidgetSpec::list("payouts", "payments", Arc::new(FixtureReader::new(json!([])))),
        WidgetSpec::summary(
            "audience",
            "audience",
            Arc::new(FixtureReader::new(json!({"followers": 0, "new_followers": 0}))),
        ),
        WidgetSpec::summary(
            "engagement",
            "analytics",
            Arc::new(FixtureReader::new(json!({"views": 0, "likes": 0, "comments": 0}))),
        ),
        WidgetSpec::list("posts", "content", Arc::new(FixtureReader::new(json!([])))),
        WidgetSpec::list(
            "notifications",
            "notifications",
            Arc::new(FixtureReader::new(json!([]))),
        ),
        WidgetSpec::list(
            "resources",
            service_name,
            Arc::new(ResourcesReader::new(resources)),
        ),
        WidgetSpec::get(
            "reach",
            "analytics",
            Arc::new(FixtureReader::new(json!({"impressions": 0, "unique_viewers": 0}))),
        ),
    ]
}
