//! Request principal: bearer subject plus declared role.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChassisError;

/// Roles recognised across the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Auditor,
    Sre,
    System,
    Creator,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Admin,
        Role::Auditor,
        Role::Sre,
        Role::System,
        Role::Creator,
        Role::Viewer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Auditor => "auditor",
            Role::Sre => "sre",
            Role::System => "system",
            Role::Creator => "creator",
            Role::Viewer => "viewer",
        }
    }

    /// Parse a header value, falling back to `default` for blank or unknown
    /// roles. Matching is case-insensitive.
    pub fn parse_or(raw: Option<&str>, default: Role) -> Role {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse().ok())
            .unwrap_or(default)
    }

    /// Roles allowed to query the audit log.
    pub fn can_read_audit(&self) -> bool {
        matches!(self, Role::Admin | Role::Auditor | Role::Sre | Role::System)
    }
}

impl FromStr for Role {
    type Err = ChassisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == lowered)
            .ok_or_else(|| ChassisError::InvalidInput(format!("unknown role: {s}")))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The principal of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub subject_id: String,
    pub role: Role,
}

impl Actor {
    /// Build an actor, rejecting an empty subject.
    pub fn new(subject_id: impl Into<String>, role: Role) -> Result<Self, ChassisError> {
        let subject_id = subject_id.into();
        if subject_id.trim().is_empty() {
            return Err(ChassisError::Unauthorized);
        }
        Ok(Self { subject_id, role })
    }

    /// The chassis' own identity for background work.
    pub fn system(service: impl Into<String>) -> Self {
        Self {
            subject_id: service.into(),
            role: Role::System,
        }
    }

    pub fn require_audit_reader(&self) -> Result<(), ChassisError> {
        if self.role.can_read_audit() {
            Ok(())
        } else {
            Err(ChassisError::Forbidden(format!(
                "role {} may not read the audit log",
                self.role
            )))
        }
    }
}
