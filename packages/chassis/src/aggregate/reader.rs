//! Upstream reader ports.
//!
//! A widget is backed by exactly one capability. Real network clients and
//! in-memory stubs implement whichever of the three they support.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::request::DashboardQuery;

#[async_trait]
pub trait GetBySubject: Send + Sync {
    async fn get_by_subject(&self, query: &DashboardQuery, cancel: &CancellationToken) -> Result<Value>;
}

#[async_trait]
pub trait ListBySubject: Send + Sync {
    async fn list_by_subject(
        &self,
        query: &DashboardQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>>;
}

#[async_trait]
pub trait SummaryReader: Send + Sync {
    async fn get_summary(&self, query: &DashboardQuery, cancel: &CancellationToken) -> Result<Value>;
}

/// The capability a widget reads through.
#[derive(Clone)]
pub enum WidgetSource {
    Get(Arc<dyn GetBySubject>),
    List(Arc<dyn ListBySubject>),
    Summary(Arc<dyn SummaryReader>),
}

impl WidgetSource {
    pub async fn read(&self, query: &DashboardQuery, cancel: &CancellationToken) -> Result<Value> {
        match self {
            WidgetSource::Get(reader) => reader.get_by_subject(query, cancel).await,
            WidgetSource::List(reader) => reader
                .list_by_subject(query, cancel)
                .await
                .map(Value::Array),
            WidgetSource::Summary(reader) => reader.get_summary(query, cancel).await,
        }
    }
}

#[derive(Clone)]
pub struct WidgetSpec {
    pub widget_id: String,
    /// Upstream service reported as the widget's `source`.
    pub source_service: String,
    pub source: WidgetSource,
}

impl WidgetSpec {
    pub fn get(
        widget_id: impl Into<String>,
        source_service: impl Into<String>,
        reader: Arc<dyn GetBySubject>,
    ) -> Self {
        Self::new(widget_id, source_service, WidgetSource::Get(reader))
    }

    pub fn list(
        widget_id: impl Into<String>,
        source_service: impl Into<String>,
        reader: Arc<dyn ListBySubject>,
    ) -> Self {
        Self::new(widget_id, source_service, WidgetSource::List(reader))
    }

    pub fn summary(
        widget_id: impl Into<String>,
        source_service: impl Into<String>,
        reader: Arc<dyn SummaryReader>,
    ) -> Self {
        Self::new(widget_id, source_service, WidgetSource::Summary(reader))
    }

    fn new(widget_id: impl Into<String>, source_service: impl Into<String>, source: WidgetSource) -> Self {
        Self {
            widget_id: widget_id.into(),
            source_service: source_service.into(),
            source,
        }
    }
}
