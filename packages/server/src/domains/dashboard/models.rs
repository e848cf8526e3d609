use std::collections::BTreeMap;

use chassis::aggregate::Dashboard;
use chassis::idempotency::Fingerprinted;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Widget order chosen by a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardLayout {
    pub subject_id: String,
    pub widgets: Vec<String>,
    /// Incremented on every save.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Body of `PUT /v1/dashboard/layout`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SaveLayout {
    pub widgets: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SaveLayoutCommand<'a> {
    pub subject_id: &'a str,
    pub input: &'a SaveLayout,
}

impl Fingerprinted for SaveLayoutCommand<'_> {
    fn fingerprint_projection(&self) -> Value {
        json!({
            "subject_id": self.subject_id,
            "widgets": self.input.widgets,
        })
    }
}

/// Saved layouts keyed by subject.
#[derive(Debug, Clone, Default)]
pub struct LayoutBook {
    layouts: BTreeMap<String, DashboardLayout>,
}

impl LayoutBook {
    pub fn get(&self, subject_id: &str) -> Option<&DashboardLayout> {
        self.layouts.get(subject_id)
    }

    pub fn put(&mut self, layout: DashboardLayout) {
        self.layouts.insert(layout.subject_id.clone(), layout);
    }
}

/// Response of `GET /v1/dashboard`.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    #[serde(flatten)]
    pub dashboard: Dashboard,
    /// The subject's saved widget order, if any.
    pub layout: Option<Vec<String>>,
}
