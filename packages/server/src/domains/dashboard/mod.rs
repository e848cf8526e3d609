//! Dashboard domain - the creator dashboard composed from upstream widgets
//!
//! Reads fan out through the chassis aggregator and are cached per subject,
//! role, date range and device. Layout saves commit with their domain event
//! and invalidate the subject's cache before responding.

pub mod actions;
pub mod effects;
pub mod models;
pub mod readers;

pub use actions::{Dashboards, DASHBOARD_VIEWED, LAYOUT_SAVED};
pub use effects::DashboardEventsHandler;
pub use models::{DashboardLayout, DashboardView, SaveLayout, SaveLayoutCommand};
pub use readers::{creator_widgets, FixtureReader, ResourcesReader};
