//! Normalized dashboard read requests.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::actor::{Actor, Role};

/// Key prefix shared by every cached dashboard.
pub const DASHBOARD_CACHE_PREFIX: &str = "dashboard";

const DEFAULT_TIMEZONE: &str = "UTC";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DateRange {
    #[serde(rename = "7d")]
    Last7Days,
    #[default]
    #[serde(rename = "30d")]
    Last30Days,
    #[serde(rename = "90d")]
    Last90Days,
    #[serde(rename = "ytd")]
    YearToDate,
    #[serde(rename = "custom")]
    Custom,
}

impl DateRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateRange::Last7Days => "7d",
            DateRange::Last30Days => "30d",
            DateRange::Last90Days => "90d",
            DateRange::YearToDate => "ytd",
            DateRange::Custom => "custom",
        }
    }

    /// Lenient parse; anything unrecognised becomes the 30 day default.
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
            Some("7d" | "week" | "last_7_days") => DateRange::Last7Days,
            Some("90d" | "quarter" | "last_90_days") => DateRange::Last90Days,
            Some("ytd" | "year_to_date") => DateRange::YearToDate,
            Some("custom") => DateRange::Custom,
            _ => DateRange::Last30Days,
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Web,
    Mobile,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Web => "web",
            Device::Mobile => "mobile",
        }
    }

    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
            Some("mobile" | "ios" | "android") => Device::Mobile,
            _ => Device::Web,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to one dashboard composition, after normalization.
///
/// The timezone is passed through to readers but is not part of the cache
/// key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardQuery {
    pub subject_id: String,
    pub role: Role,
    pub date_range: DateRange,
    pub device: Device,
    pub timezone: String,
}

impl DashboardQuery {
    pub fn normalize(
        actor: &Actor,
        date_range: Option<&str>,
        device: Option<&str>,
        timezone: Option<&str>,
    ) -> Self {
        let timezone = timezone
            .map(str::trim)
            .filter(|tz| !tz.is_empty())
            .unwrap_or(DEFAULT_TIMEZONE)
            .to_string();
        Self {
            subject_id: actor.subject_id.clone(),
            role: actor.role,
            date_range: DateRange::normalize(date_range),
            device: Device::normalize(device),
            timezone,
        }
    }

    /// `dashboard:{subject}:{role}:{date_range}:{device}`
    pub fn cache_key(&self) -> String {
        format!(
            "{}{}:{}:{}",
            subject_prefix(&self.subject_id),
            self.role,
            self.date_range,
            self.device
        )
    }
}

/// Prefix covering every cached dashboard of `subject_id`.
pub fn subject_prefix(subject_id: &str) -> String {
    format!("{DASHBOARD_CACHE_PREFIX}:{subject_id}:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_range_normalization() {
        assert_eq!(DateRange::normalize(Some("7D")), DateRange::Last7Days);
        assert_eq!(DateRange::normalize(Some(" ytd ")), DateRange::YearToDate);
        assert_eq!(DateRange::normalize(Some("custom")), DateRange::Custom);
        assert_eq!(DateRange::normalize(Some("fortnight")), DateRange::Last30Days);
        assert_eq!(DateRange::normalize(None), DateRange::Last30Days);
    }

    #[test]
    fn test_device_normalization() {
        assert_eq!(Device::normalize(Some("iOS")), Device::Mobile);
        assert_eq!(Device::normalize(Some("android")), Device::Mobile);
        assert_eq!(Device::normalize(Some("desktop")), Device::Web);
        assert_eq!(Device::normalize(None), Device::Web);
    }

    #[test]
    fn test_cache_key_is_canonical() {
        let actor = Actor::new("u1", Role::Creator).unwrap();
        let a = DashboardQuery::normalize(&actor, Some("7d"), Some("ios"), Some("Europe/Oslo"));
        let b = DashboardQuery::normalize(&actor, Some("week"), Some("mobile"), None);

        assert_eq!(a.cache_key(), "dashboard:u1:creator:7d:mobile");
        assert_eq!(a.cache_key(), b.cache_key());
        assert!(a.cache_key().starts_with(&subject_prefix("u1")));
        assert_eq!(b.timezone, "UTC");
    }
}
