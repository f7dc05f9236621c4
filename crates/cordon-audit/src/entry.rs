//! Audit entry types.
//!
//! One entry is written for every capability check, granted or denied.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a capability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditDecision {
    /// The operation was allowed.
    Granted,
    /// The operation was refused.
    Denied,
}

impl fmt::Display for AuditDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted => f.write_str("GRANTED"),
            Self::Denied => f.write_str("DENIED"),
        }
    }
}

/// A single, immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry identifier.
    pub id: Uuid,
    /// When the check happened.
    pub timestamp: DateTime<Utc>,
    /// The required capability string as passed to the checker.
    pub capability: String,
    /// Resource component of the request.
    pub resource: String,
    /// Operation component of the request.
    pub operation: String,
    /// Path component of the request.
    pub path: String,
    /// The capability that decided the outcome, if one matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,
    /// Depth of the context that was current during the check.
    #[serde(default)]
    pub context_depth: usize,
    /// The decision.
    pub decision: AuditDecision,
}

impl AuditEntry {
    /// Create an entry stamped with the current time.
    #[must_use]
    pub fn new(
        capability: impl Into<String>,
        resource: impl Into<String>,
        operation: impl Into<String>,
        path: impl Into<String>,
        decision: AuditDecision,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            capability: capability.into(),
            resource: resource.into(),
            operation: operation.into(),
            path: path.into(),
            matched: None,
            context_depth: 0,
            decision,
        }
    }

    /// Attach the deciding capability.
    #[must_use]
    pub fn with_matched(mut self, matched: impl Into<String>) -> Self {
        self.matched = Some(matched.into());
        self
    }

    /// Attach the context depth.
    #[must_use]
    pub fn with_context_depth(mut self, depth: usize) -> Self {
        self.context_depth = depth;
        self
    }

    /// Whether the check was denied.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        self.decision == AuditDecision::Denied
    }
}

impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.timestamp.to_rfc3339(),
            self.decision,
            self.capability
        )?;
        if let Some(matched) = &self.matched {
            write!(f, " (by {matched})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_creation() {
        let entry = AuditEntry::new(
            "file:read:/data/a",
            "file",
            "read",
            "/data/a",
            AuditDecision::Granted,
        )
        .with_matched("file:read:/data/**")
        .with_context_depth(2);

        assert!(!entry.is_denied());
        assert_eq!(entry.matched.as_deref(), Some("file:read:/data/**"));
        assert_eq!(entry.context_depth, 2);
        assert!(entry.to_string().ends_with("GRANTED file:read:/data/a (by file:read:/data/**)"));
    }

    #[test]
    fn test_decision_serialization() {
        let json = serde_json::to_string(&AuditDecision::Denied).unwrap();
        assert_eq!(json, "\"DENIED\"");

        let entry =
            AuditEntry::new("net:connect:x/1", "net", "connect", "x/1", AuditDecision::Denied);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["decision"], "DENIED");
        assert!(value.get("matched").is_none());

        let back: AuditEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }
}
