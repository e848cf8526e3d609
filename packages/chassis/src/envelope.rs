//! Canonical event envelope and its validator.
//!
//! Every event that enters or leaves a service travels in an
//! [`EventEnvelope`]. [`EnvelopeValidator::validate`] is pure and total: it
//! never performs I/O and returns either `Ok(())` or an [`EnvelopeError`]
//! naming the first constraint that failed.
//!
//! # Partition-key invariant
//!
//! The value found by resolving `partition_key_path` must equal the top-level
//! `partition_key`. Ops events resolve against `envelope.source_service`;
//! domain and analytics events resolve against a field inside `data`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Path used by ops events, whose shard key is the producing service.
pub const ENVELOPE_SOURCE_SERVICE_PATH: &str = "envelope.source_service";

/// Schema version stamped on envelopes built by the chassis.
pub const DEFAULT_SCHEMA_VERSION: &str = "1.0";

// =============================================================================
// EventClass
// =============================================================================

/// Closed set of event classes. Drives routing, partition-key path and DLQ
/// topic selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventClass {
    Domain,
    Analytics,
    Ops,
}

impl EventClass {
    pub const ALL: [EventClass; 3] = [EventClass::Domain, EventClass::Analytics, EventClass::Ops];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventClass::Domain => "domain",
            EventClass::Analytics => "analytics",
            EventClass::Ops => "ops",
        }
    }

    /// Topic that dead letters of this class are published to.
    pub fn dlq_topic(&self) -> String {
        format!("dlq.{}", self.as_str())
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventClass {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventClass::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| EnvelopeError::UnknownEventClass(s.to_string()))
    }
}

// =============================================================================
// PartitionKeyPath
// =============================================================================

/// Parsed form of the `partition_key_path` wire field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionKeyPath {
    /// `envelope.source_service`
    SourceService,
    /// `data.<field>[.<field>...]`
    Data(Vec<String>),
}

impl PartitionKeyPath {
    pub fn data_field(field: &str) -> Self {
        PartitionKeyPath::Data(field.split('.').map(str::to_string).collect())
    }

    /// Resolve this path against an envelope. Strings resolve verbatim,
    /// numbers and booleans by their JSON rendering; anything else (objects,
    /// arrays, null, missing) does not resolve.
    pub fn resolve(&self, envelope: &EventEnvelope) -> Option<String> {
        match self {
            PartitionKeyPath::SourceService => Some(envelope.source_service.clone()),
            PartitionKeyPath::Data(segments) => {
                let mut current = &envelope.data;
                for segment in segments {
                    current = current.as_object()?.get(segment)?;
                }
                match current {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    Value::Bool(b) => Some(b.to_string()),
                    _ => None,
                }
            }
        }
    }
}

impl FromStr for PartitionKeyPath {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == ENVELOPE_SOURCE_SERVICE_PATH {
            return Ok(PartitionKeyPath::SourceService);
        }
        let Some(rest) = s.strip_prefix("data.") else {
            return Err(EnvelopeError::InvalidPartitionKeyPath {
                path: s.to_string(),
                reason: "must be envelope.source_service or data.<field>",
            });
        };
        let segments: Vec<String> = rest.split('.').map(str::to_string).collect();
        if segments.iter().any(|seg| seg.trim().is_empty()) {
            return Err(EnvelopeError::InvalidPartitionKeyPath {
                path: s.to_string(),
                reason: "empty field selector",
            });
        }
        Ok(PartitionKeyPath::Data(segments))
    }
}

impl fmt::Display for PartitionKeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKeyPath::SourceService => f.write_str(ENVELOPE_SOURCE_SERVICE_PATH),
            PartitionKeyPath::Data(segments) => write!(f, "data.{}", segments.join(".")),
        }
    }
}

// =============================================================================
// EventEnvelope
// =============================================================================

/// Wire-format wrapper around an event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub event_type: String,
    pub event_class: EventClass,
    pub occurred_at: DateTime<Utc>,
    pub partition_key_path: String,
    pub partition_key: String,
    pub source_service: String,
    pub trace_id: String,
    pub schema_version: String,
    pub data: Value,
}

impl EventEnvelope {
    /// Build a domain event whose partition key is `data.<key_field>`.
    ///
    /// The partition key is resolved from `data` so the result always
    /// satisfies the partition-key invariant when the field is present.
    pub fn domain(
        event_type: impl Into<String>,
        key_field: &str,
        data: Value,
        source_service: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self::keyed_by_data(EventClass::Domain, event_type, key_field, data, source_service, trace_id)
    }

    /// Build an analytics event whose partition key is `data.<key_field>`.
    pub fn analytics(
        event_type: impl Into<String>,
        key_field: &str,
        data: Value,
        source_service: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self::keyed_by_data(
            EventClass::Analytics,
            event_type,
            key_field,
            data,
            source_service,
            trace_id,
        )
    }

    /// Build an ops event partitioned by the producing service.
    pub fn ops(
        event_type: impl Into<String>,
        data: Value,
        source_service: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        let source_service = source_service.into();
        Self {
            event_id: new_event_id(),
            event_type: event_type.into(),
            event_class: EventClass::Ops,
            occurred_at: Utc::now(),
            partition_key_path: ENVELOPE_SOURCE_SERVICE_PATH.to_string(),
            partition_key: source_service.clone(),
            source_service,
            trace_id: trace_id.into(),
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            data,
        }
    }

    fn keyed_by_data(
        event_class: EventClass,
        event_type: impl Into<String>,
        key_field: &str,
        data: Value,
        source_service: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        let path = PartitionKeyPath::data_field(key_field);
        let mut envelope = Self {
            event_id: new_event_id(),
            event_type: event_type.into(),
            event_class,
            occurred_at: Utc::now(),
            partition_key_path: path.to_string(),
            partition_key: String::new(),
            source_service: source_service.into(),
            trace_id: trace_id.into(),
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            data,
        };
        envelope.partition_key = path.resolve(&envelope).unwrap_or_default();
        envelope
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    pub fn with_occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }

    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = version.into();
        self
    }

    /// Decode an envelope from its JSON wire form.
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        serde_json::from_value(value).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    pub fn to_value(&self) -> Value {
        // Derived Serialize over owned strings and a Value cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn new_event_id() -> String {
    Uuid::now_v7().to_string()
}

// =============================================================================
// Errors
// =============================================================================

/// The constraint an envelope failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("required field {0} is empty")]
    MissingField(&'static str),

    #[error("unknown event class: {0}")]
    UnknownEventClass(String),

    #[error("event_type {0:?} is not a canonical identifier")]
    NonCanonicalEventType(String),

    #[error("event_type {event_type} is not registered for class {class}")]
    UnregisteredEventType { class: EventClass, event_type: String },

    #[error("occurred_at must be a non-zero instant")]
    ZeroOccurredAt,

    #[error("data payload must not be empty")]
    EmptyData,

    #[error("invalid partition_key_path {path:?}: {reason}")]
    InvalidPartitionKeyPath { path: String, reason: &'static str },

    #[error("partition-key invariant violated: {path} does not resolve to a scalar value")]
    PartitionKeyUnresolved { path: String },

    #[error(
        "partition-key invariant violated: {path} resolves to {resolved:?} but partition_key is {partition_key:?}"
    )]
    PartitionKeyMismatch {
        path: String,
        resolved: String,
        partition_key: String,
    },
}

// =============================================================================
// Validator
// =============================================================================

/// Per-class registry of canonical event types.
///
/// A class with no registered types accepts any canonical identifier.
#[derive(Debug, Clone, Default)]
pub struct EventCatalog {
    types: HashMap<EventClass, HashSet<String>>,
}

impl EventCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, class: EventClass, event_type: impl Into<String>) -> Self {
        self.types.entry(class).or_default().insert(event_type.into());
        self
    }

    pub fn is_registered(&self, class: EventClass, event_type: &str) -> bool {
        match self.types.get(&class) {
            Some(types) if !types.is_empty() => types.contains(event_type),
            _ => true,
        }
    }
}

/// Enforces envelope invariants. Cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeValidator {
    catalog: EventCatalog,
}

impl EnvelopeValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: EventCatalog) -> Self {
        Self { catalog }
    }

    pub fn validate(&self, envelope: &EventEnvelope) -> Result<(), EnvelopeError> {
        require_non_empty("event_id", &envelope.event_id)?;
        require_non_empty("event_type", &envelope.event_type)?;
        require_non_empty("source_service", &envelope.source_service)?;
        require_non_empty("trace_id", &envelope.trace_id)?;
        require_non_empty("schema_version", &envelope.schema_version)?;
        require_non_empty("partition_key_path", &envelope.partition_key_path)?;
        require_non_empty("partition_key", &envelope.partition_key)?;

        if !is_canonical_event_type(&envelope.event_type) {
            return Err(EnvelopeError::NonCanonicalEventType(
                envelope.event_type.clone(),
            ));
        }
        if !self
            .catalog
            .is_registered(envelope.event_class, &envelope.event_type)
        {
            return Err(EnvelopeError::UnregisteredEventType {
                class: envelope.event_class,
                event_type: envelope.event_type.clone(),
            });
        }

        if envelope.occurred_at.timestamp() == 0 && envelope.occurred_at.timestamp_subsec_nanos() == 0 {
            return Err(EnvelopeError::ZeroOccurredAt);
        }

        if is_empty_payload(&envelope.data) {
            return Err(EnvelopeError::EmptyData);
        }

        let path: PartitionKeyPath = envelope.partition_key_path.parse()?;
        match (envelope.event_class, &path) {
            (EventClass::Ops, PartitionKeyPath::SourceService) => {}
            (EventClass::Ops, PartitionKeyPath::Data(_)) => {
                return Err(EnvelopeError::InvalidPartitionKeyPath {
                    path: envelope.partition_key_path.clone(),
                    reason: "ops events must be keyed by envelope.source_service",
                });
            }
            (_, PartitionKeyPath::Data(_)) => {}
            (_, PartitionKeyPath::SourceService) => {
                return Err(EnvelopeError::InvalidPartitionKeyPath {
                    path: envelope.partition_key_path.clone(),
                    reason: "domain and analytics events must be keyed by a data field",
                });
            }
        }

        let resolved =
            path.resolve(envelope)
                .ok_or_else(|| EnvelopeError::PartitionKeyUnresolved {
                    path: envelope.partition_key_path.clone(),
                })?;
        if resolved != envelope.partition_key {
            return Err(EnvelopeError::PartitionKeyMismatch {
                path: envelope.partition_key_path.clone(),
                resolved,
                partition_key: envelope.partition_key.clone(),
            });
        }

        Ok(())
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), EnvelopeError> {
    if value.trim().is_empty() {
        Err(EnvelopeError::MissingField(field))
    } else {
        Ok(())
    }
}

/// `segment.segment[...]` where each segment is lower-case `[a-z0-9_]` and
/// starts with a letter.
fn is_canonical_event_type(event_type: &str) -> bool {
    let segments: Vec<&str> = event_type.split('.').collect();
    segments.len() >= 2
        && segments.iter().all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
                && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        })
}

fn is_empty_payload(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn payout_paid() -> EventEnvelope {
        EventEnvelope::domain(
            "payout.paid",
            "payout_id",
            json!({"payout_id": "p1", "amount_cents": 1200}),
            "svc",
            "t1",
        )
        .with_event_id("e1")
    }

    #[test]
    fn test_domain_builder_is_valid() {
        let env = payout_paid();
        assert_eq!(env.partition_key_path, "data.payout_id");
        assert_eq!(env.partition_key, "p1");
        assert_ok!(EnvelopeValidator::new().validate(&env));
    }

    #[test]
    fn test_ops_builder_is_valid() {
        let env = EventEnvelope::ops("idempotency.conflict", json!({"key": "k1"}), "svc", "t1");
        assert_eq!(env.partition_key, "svc");
        assert_ok!(EnvelopeValidator::new().validate(&env));
    }

    #[test]
    fn test_partition_key_mismatch() {
        let mut env = payout_paid();
        env.partition_key = "p2".into();
        let err = assert_err!(EnvelopeValidator::new().validate(&env));
        assert!(matches!(err, EnvelopeError::PartitionKeyMismatch { .. }));
        assert!(err.to_string().contains("partition-key invariant"));
    }

    #[test]
    fn test_partition_key_missing_field() {
        let mut env = payout_paid();
        env.partition_key_path = "data.creator_id".into();
        let err = assert_err!(EnvelopeValidator::new().validate(&env));
        assert!(matches!(err, EnvelopeError::PartitionKeyUnresolved { .. }));
    }

    #[test]
    fn test_nested_data_path() {
        let mut env = payout_paid();
        env.data = json!({"payout": {"id": 42}});
        env.partition_key_path = "data.payout.id".into();
        env.partition_key = "42".into();
        assert_ok!(EnvelopeValidator::new().validate(&env));
    }

    #[test]
    fn test_required_fields() {
        let validator = EnvelopeValidator::new();

        let mut env = payout_paid();
        env.event_id = "".into();
        assert_eq!(validator.validate(&env), Err(EnvelopeError::MissingField("event_id")));

        let mut env = payout_paid();
        env.trace_id = " ".into();
        assert_eq!(validator.validate(&env), Err(EnvelopeError::MissingField("trace_id")));

        let mut env = payout_paid();
        env.schema_version = "".into();
        assert_eq!(
            validator.validate(&env),
            Err(EnvelopeError::MissingField("schema_version"))
        );

        let mut env = payout_paid();
        env.data = json!({});
        assert_eq!(validator.validate(&env), Err(EnvelopeError::EmptyData));

        let mut env = payout_paid();
        env.occurred_at = DateTime::<Utc>::UNIX_EPOCH;
        assert_eq!(validator.validate(&env), Err(EnvelopeError::ZeroOccurredAt));
    }

    #[test]
    fn test_class_path_pairing() {
        let validator = EnvelopeValidator::new();

        let mut env = payout_paid();
        env.partition_key_path = ENVELOPE_SOURCE_SERVICE_PATH.into();
        env.partition_key = "svc".into();
        assert!(matches!(
            validator.validate(&env),
            Err(EnvelopeError::InvalidPartitionKeyPath { .. })
        ));

        let mut env = EventEnvelope::ops("alert.triggered", json!({"alert_id": "a"}), "svc", "t");
        env.partition_key_path = "data.alert_id".into();
        env.partition_key = "a".into();
        assert!(matches!(
            validator.validate(&env),
            Err(EnvelopeError::InvalidPartitionKeyPath { .. })
        ));
    }

    #[test]
    fn test_event_type_shape() {
        let validator = EnvelopeValidator::new();
        for bad in ["payout", "Payout.Paid", "payout..paid", "payout.paid!", "1payout.paid"] {
            let mut env = payout_paid();
            env.event_type = bad.into();
            assert!(
                matches!(validator.validate(&env), Err(EnvelopeError::NonCanonicalEventType(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_catalog_restricts_registered_classes() {
        let catalog = EventCatalog::new().register(EventClass::Domain, "payout.paid");
        let validator = EnvelopeValidator::with_catalog(catalog);
        assert_eq!(validator.validate(&payout_paid()), Ok(()));

        let mut env = payout_paid();
        env.event_type = "payout.reversed".into();
        assert!(matches!(
            validator.validate(&env),
            Err(EnvelopeError::UnregisteredEventType { .. })
        ));

        // Ops has nothing registered, so any canonical type passes.
        let ops = EventEnvelope::ops("alert.triggered", json!({"a": 1}), "svc", "t");
        assert_eq!(validator.validate(&ops), Ok(()));
    }

    #[test]
    fn test_wire_format_uses_snake_case_class() {
        let value = payout_paid().to_value();
        assert_eq!(value["event_class"], "domain");
        let decoded = EventEnvelope::from_value(value).unwrap();
        assert_eq!(decoded, payout_paid_with_same_time(&decoded));
    }

    fn payout_paid_with_same_time(other: &EventEnvelope) -> EventEnvelope {
        payout_paid().with_occurred_at(other.occurred_at)
    }

    #[test]
    fn test_unknown_class_is_malformed() {
        let mut value = payout_paid().to_value();
        value["event_class"] = json!("billing");
        assert!(matches!(
            EventEnvelope::from_value(value),
            Err(EnvelopeError::Malformed(_))
        ));
    }
}
