//! Threat categories, severities and findings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AnalyzerError;

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Informational; heuristic.
    Low,
    /// Likely problem; heuristic.
    Medium,
    /// Structural violation.
    High,
    /// Structural violation that hands code execution to the program.
    Critical,
}

impl Severity {
    /// Score penalty for one finding of this severity.
    #[must_use]
    pub fn penalty(self) -> u8 {
        match self {
            Self::Low => 5,
            Self::Medium => 10,
            Self::High => 20,
            Self::Critical => 40,
        }
    }

    /// Whether findings of this severity are violations rather than warnings.
    #[must_use]
    pub fn is_violation(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl FromStr for Severity {
    type Err = AnalyzerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(AnalyzerError::UnknownSeverity(s.to_string())),
        }
    }
}

/// Category of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    /// Evaluating strings as code.
    DynamicCodeExecution,
    /// Reaching into interpreter internals.
    ReflectiveAccess,
    /// Building a shell command from concatenated text.
    CommandInjection,
    /// Building a query from concatenated text.
    SqlInjection,
    /// Literal path with a parent-directory segment.
    PathTraversal,
    /// Importing a module that bypasses the sandbox's object model.
    DangerousImport,
}

impl ThreatType {
    /// Every threat type, in rule-table order.
    pub const ALL: [Self; 6] = [
        Self::DynamicCodeExecution,
        Self::ReflectiveAccess,
        Self::CommandInjection,
        Self::SqlInjection,
        Self::PathTraversal,
        Self::DangerousImport,
    ];

    /// Severity assigned by the rule table.
    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            Self::DynamicCodeExecution => Severity::Critical,
            Self::ReflectiveAccess | Self::CommandInjection => Severity::High,
            Self::SqlInjection | Self::PathTraversal => Severity::Medium,
            Self::DangerousImport => Severity::Low,
        }
    }

    /// Canonical snake-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DynamicCodeExecution => "dynamic_code_execution",
            Self::ReflectiveAccess => "reflective_access",
            Self::CommandInjection => "command_injection",
            Self::SqlInjection => "sql_injection",
            Self::PathTraversal => "path_traversal",
            Self::DangerousImport => "dangerous_import",
        }
    }
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreatType {
    type Err = AnalyzerError;

    /// Accepts `sql_injection`, `SqlInjection` or `SQL_INJECTION`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL
            .into_iter()
            .find(|threat| threat.as_str().replace('_', "") == folded)
            .ok_or_else(|| AnalyzerError::UnknownThreatType(s.to_string()))
    }
}

/// One finding produced by the analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFinding {
    /// Category.
    pub threat_type: ThreatType,
    /// Severity.
    pub severity: Severity,
    /// One-based line.
    pub line: u32,
    /// Zero-based column.
    pub column: u32,
    /// Human-readable explanation.
    pub description: String,
}

impl SecurityFinding {
    /// Create a finding with the rule table's severity.
    #[must_use]
    pub fn new(
        threat_type: ThreatType,
        line: u32,
        column: u32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            threat_type,
            severity: threat_type.severity(),
            line,
            column,
            description: description.into(),
        }
    }

    pub(crate) fn sort_key(&self) -> (u32, u32, ThreatType) {
        (self.line, self.column, self.threat_type)
    }
}

impl fmt::Display for SecurityFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} [{}] {}: {}",
            self.line, self.column, self.severity, self.threat_type, self.description
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order_and_penalty() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::Critical.penalty(), 40);
        assert_eq!(Severity::Low.penalty(), 5);
        assert!(Severity::High.is_violation());
        assert!(!Severity::Medium.is_violation());
        assert_eq!("critical".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn test_threat_type_names() {
        for threat in ThreatType::ALL {
            assert_eq!(threat.as_str().parse::<ThreatType>().unwrap(), threat);
        }
        assert_eq!("SqlInjection".parse::<ThreatType>().unwrap(), ThreatType::SqlInjection);
        assert_eq!(
            "PATH_TRAVERSAL".parse::<ThreatType>().unwrap(),
            ThreatType::PathTraversal
        );
        assert!("xss".parse::<ThreatType>().is_err());
    }

    #[test]
    fn test_finding_serialization() {
        let finding = SecurityFinding::new(ThreatType::DynamicCodeExecution, 3, 4, "call to eval");
        let value = serde_json::to_value(&finding).unwrap();
        assert_eq!(value["threat_type"], "dynamic_code_execution");
        assert_eq!(value["severity"], "CRITICAL");
        assert_eq!(finding.to_string(), "3:4 [CRITICAL] dynamic_code_execution: call to eval");
    }
}
