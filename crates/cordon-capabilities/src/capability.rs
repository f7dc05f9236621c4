//! Capability values and their textual grammar.
//!
//! The persisted form is `resource:operation:pattern`, optionally prefixed
//! with `!` for an explicit denial:
//!
//! - `file:read:/data/**` - read anything under `/data`
//! - `net:connect:api.example.com/**` - connect to one host on any port
//! - `!file:write:**` - never write files
//! - `*:*:**` - everything
//!
//! Only the first two `:` separate fields, so the pattern may itself contain
//! `:`. Resource and operation are either `*` or a plain token.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CapabilityError, CapabilityResult};
use crate::pattern::Pattern;

/// The wildcard resource/operation token.
pub const WILDCARD: &str = "*";

const NEGATION: char = '!';
const FIELD_SEPARATOR: char = ':';

/// One immutable grant or denial.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Capability {
    resource: String,
    operation: String,
    pattern: Pattern,
    negated: bool,
}

impl Capability {
    /// Build a grant from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::MalformedCapability`] if a token or the
    /// pattern is invalid.
    pub fn new(
        resource: impl Into<String>,
        operation: impl Into<String>,
        pattern: impl Into<String>,
    ) -> CapabilityResult<Self> {
        let resource = resource.into();
        let operation = operation.into();
        let pattern = pattern.into();
        let text = format!("{resource}:{operation}:{pattern}");
        validate_token(&text, "resource", &resource)?;
        validate_token(&text, "operation", &operation)?;
        let pattern = Pattern::parse(pattern)
            .map_err(|e| CapabilityError::malformed(&text, reason_of(&e)))?;

        Ok(Self {
            resource,
            operation,
            pattern,
            negated: false,
        })
    }

    /// Build an explicit denial from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::MalformedCapability`] if a token or the
    /// pattern is invalid.
    pub fn deny(
        resource: impl Into<String>,
        operation: impl Into<String>,
        pattern: impl Into<String>,
    ) -> CapabilityResult<Self> {
        Ok(Self::new(resource, operation, pattern)?.into_negated())
    }

    /// Parse the `[!]resource:operation:pattern` form.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::MalformedCapability`] if the string does
    /// not follow the grammar.
    pub fn parse(input: &str) -> CapabilityResult<Self> {
        let (negated, body) = match input.strip_prefix(NEGATION) {
            Some(rest) => (true, rest),
            None => (false, input),
        };

        let mut fields = body.splitn(3, FIELD_SEPARATOR);
        let (Some(resource), Some(operation), Some(pattern)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(CapabilityError::malformed(
                input,
                "expected `resource:operation:pattern`",
            ));
        };

        let capability = Self::new(resource, operation, pattern)
            .map_err(|e| CapabilityError::malformed(input, reason_of(&e)))?;
        Ok(if negated {
            capability.into_negated()
        } else {
            capability
        })
    }

    /// The `*:*:**` capability.
    #[must_use]
    pub fn everything() -> Self {
        Self {
            resource: WILDCARD.to_string(),
            operation: WILDCARD.to_string(),
            pattern: Pattern::everything(),
            negated: false,
        }
    }

    fn into_negated(mut self) -> Self {
        self.negated = true;
        self
    }

    /// Resource token (may be `*`).
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Operation token (may be `*`).
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Path pattern.
    #[must_use]
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Whether this is an explicit denial.
    #[must_use]
    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Identity used for de-duplication, ignoring negation.
    #[must_use]
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.resource, &self.operation, self.pattern.as_str())
    }

    /// Whether resource and operation cover a concrete pair.
    #[must_use]
    pub fn applies_to(&self, resource: &str, operation: &str) -> bool {
        token_covers(&self.resource, resource) && token_covers(&self.operation, operation)
    }

    /// Whether this capability (grant or denial) matches a resolved request.
    #[must_use]
    pub fn matches(&self, request: &CapabilityRequest) -> bool {
        self.applies_to(&request.resource, &request.operation)
            && self.pattern.matches(&request.path)
    }

    /// Whether this capability's authority contains `other`'s.
    ///
    /// Negation is not considered; callers compare grants with grants.
    #[must_use]
    pub fn subsumes(&self, other: &Self) -> bool {
        token_covers(&self.resource, &other.resource)
            && token_covers(&self.operation, &other.operation)
            && self.pattern.subsumes(&other.pattern)
    }
}

fn token_covers(ours: &str, theirs: &str) -> bool {
    ours == WILDCARD || ours == theirs
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn validate_token(input: &str, field: &str, token: &str) -> CapabilityResult<()> {
    if token == WILDCARD {
        return Ok(());
    }
    if token.is_empty() {
        return Err(CapabilityError::malformed(input, format!("empty {field}")));
    }
    if !token.chars().all(is_token_char) {
        return Err(CapabilityError::malformed(
            input,
            format!("{field} `{token}` must be `*` or [A-Za-z0-9_.-]+"),
        ));
    }
    Ok(())
}

fn reason_of(error: &CapabilityError) -> String {
    match error {
        CapabilityError::MalformedCapability { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("!")?;
        }
        write!(f, "{}:{}:{}", self.resource, self.operation, self.pattern)
    }
}

impl std::str::FromStr for Capability {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Capability {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// A fully resolved `resource:operation:path` string describing one attempted
/// operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRequest {
    resource: String,
    operation: String,
    path: String,
}

impl CapabilityRequest {
    /// Parse a required capability.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::MalformedCapability`] if the string is not a
    /// concrete triple (no `!`, no wildcard resource or operation).
    pub fn parse(required: &str) -> CapabilityResult<Self> {
        if required.starts_with(NEGATION) {
            return Err(CapabilityError::malformed(
                required,
                "a required capability cannot be negated",
            ));
        }
        let mut fields = required.splitn(3, FIELD_SEPARATOR);
        let (Some(resource), Some(operation), Some(path)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(CapabilityError::malformed(
                required,
                "expected `resource:operation:path`",
            ));
        };
        for (field, token) in [("resource", resource), ("operation", operation)] {
            if token == WILDCARD {
                return Err(CapabilityError::malformed(
                    required,
                    format!("{field} must be concrete"),
                ));
            }
            validate_token(required, field, token)?;
        }

        Ok(Self {
            resource: resource.to_string(),
            operation: operation.to_string(),
            path: path.to_string(),
        })
    }

    /// Requested resource.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Requested operation.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Requested path (subject).
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for CapabilityRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.resource, self.operation, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grant_and_denial() {
        let grant = Capability::parse("file:read:/data/**").unwrap();
        assert_eq!(grant.resource(), "file");
        assert_eq!(grant.operation(), "read");
        assert_eq!(grant.pattern().as_str(), "/data/**");
        assert!(!grant.is_negated());

        let denial = Capability::parse("!file:write:**").unwrap();
        assert!(denial.is_negated());
        assert_eq!(denial.to_string(), "!file:write:**");
    }

    #[test]
    fn test_pattern_may_contain_colons() {
        let cap = Capability::parse("net:connect:db.local:5432").unwrap();
        assert_eq!(cap.pattern().as_str(), "db.local:5432");
    }

    #[test]
    fn test_malformed_capabilities() {
        for input in [
            "file:read",
            "file",
            ":read:/x",
            "file::/x",
            "fi le:read:/x",
            "file:read:/a/[0-9",
            "file:read:/a/**/b/**",
            "!!file:read:/x",
        ] {
            let err = Capability::parse(input).unwrap_err();
            assert!(
                matches!(
                    err,
                    CapabilityError::MalformedCapability { input: ref i, .. } if i == input
                ),
                "{input}: {err}"
            );
        }
    }

    #[test]
    fn test_everything_subsumes_all() {
        let all = Capability::parse("*:*:**").unwrap();
        assert_eq!(all, Capability::everything());
        for other in ["file:read:/data/**", "net:connect:x/443", "db:query:", "a:b:[0-9]/*"] {
            assert!(all.subsumes(&Capability::parse(other).unwrap()));
        }
    }

    #[test]
    fn test_capability_subsumption_respects_tokens() {
        let parent = Capability::parse("file:*:/data/**").unwrap();
        assert!(parent.subsumes(&Capability::parse("file:read:/data/a").unwrap()));
        assert!(!parent.subsumes(&Capability::parse("net:read:/data/a").unwrap()));
        assert!(!parent.subsumes(&Capability::parse("*:read:/data/a").unwrap()));
    }

    #[test]
    fn test_request_parsing() {
        let request = CapabilityRequest::parse("file:read:/data/a.txt").unwrap();
        assert_eq!(request.resource(), "file");
        assert_eq!(request.path(), "/data/a.txt");
        assert_eq!(request.to_string(), "file:read:/data/a.txt");

        assert!(CapabilityRequest::parse("*:read:/x").is_err());
        assert!(CapabilityRequest::parse("file:*:/x").is_err());
        assert!(CapabilityRequest::parse("!file:read:/x").is_err());
        assert!(CapabilityRequest::parse("file:read").is_err());
    }

    #[test]
    fn test_matches_request() {
        let cap = Capability::parse("file:read:/data/**").unwrap();
        let ok = CapabilityRequest::parse("file:read:/data/sub/a.txt").unwrap();
        let wrong_op = CapabilityRequest::parse("file:write:/data/sub/a.txt").unwrap();
        let outside = CapabilityRequest::parse("file:read:/etc/passwd").unwrap();
        let escape = CapabilityRequest::parse("file:read:/data/../etc/passwd").unwrap();
        assert!(cap.matches(&ok));
        assert!(!cap.matches(&wrong_op));
        assert!(!cap.matches(&outside));
        assert!(!cap.matches(&escape));
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let cap = Capability::parse("!net:*:evil.example/**").unwrap();
        let json = serde_json::to_string(&cap).unwrap();
        assert_eq!(json, "\"!net:*:evil.example/**\"");
        let back: Capability = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cap);
    }
}
