//! Gating policy applied to analysis reports.
//!
//! The analyzer only describes a program. This module turns a report into an
//! accept/reject decision before execution.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SecurityViolationError;
use crate::report::SecurityReport;
use crate::threat::Severity;

/// Thresholds a program must meet to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisPolicy {
    /// Highest severity tolerated. Findings above it reject the program.
    pub max_severity: Severity,
    /// Lowest acceptable score.
    pub min_score: u8,
}

impl Default for AnalysisPolicy {
    /// Tolerates warnings, rejects any violation.
    fn default() -> Self {
        Self {
            max_severity: Severity::Medium,
            min_score: 0,
        }
    }
}

impl AnalysisPolicy {
    /// Reject anything with a finding at all.
    #[must_use]
    pub fn zero_tolerance() -> Self {
        Self {
            max_severity: Severity::Low,
            min_score: 100,
        }
    }

    /// Decide whether `report` may proceed.
    ///
    /// # Errors
    ///
    /// Returns a [`SecurityViolationError`] listing every finding of the
    /// report if a finding exceeds `max_severity` or the score is below
    /// `min_score`.
    pub fn enforce(&self, report: &SecurityReport) -> Result<(), SecurityViolationError> {
        let over_severity = report
            .findings
            .iter()
            .filter(|f| f.severity > self.max_severity)
            .count();

        let reason = if over_severity > 0 {
            format!("{over_severity} finding(s) above {}", self.max_severity)
        } else if report.score < self.min_score {
            format!("score {} below minimum {}", report.score, self.min_score)
        } else {
            return Ok(());
        };

        warn!(%reason, score = report.score, "Program rejected by analysis policy");
        Err(SecurityViolationError {
            reason,
            score: report.score,
            findings: report.findings.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threat::{SecurityFinding, ThreatType};

    fn report(threats: &[(ThreatType, u32)]) -> SecurityReport {
        SecurityReport::new(
            threats
                .iter()
                .map(|&(t, line)| SecurityFinding::new(t, line, 0, "x"))
                .collect(),
            0,
            1,
        )
    }

    #[test]
    fn test_default_allows_warnings() {
        let policy = AnalysisPolicy::default();
        assert!(policy
            .enforce(&report(&[(ThreatType::SqlInjection, 1), (ThreatType::DangerousImport, 2)]))
            .is_ok());
    }

    #[test]
    fn test_default_rejects_violations_with_all_findings() {
        let policy = AnalysisPolicy::default();
        let err = policy
            .enforce(&report(&[
                (ThreatType::DangerousImport, 1),
                (ThreatType::DynamicCodeExecution, 4),
                (ThreatType::ReflectiveAccess, 9),
            ]))
            .unwrap_err();
        assert_eq!(err.findings.len(), 3);
        let message = err.to_string();
        assert!(message.starts_with("program rejected: 2 finding(s) above MEDIUM"));
        assert!(message.contains("4:0 [CRITICAL] dynamic_code_execution"));
        assert!(message.contains("9:0 [HIGH] reflective_access"));
        assert!(message.contains("1:0 [LOW] dangerous_import"));
    }

    #[test]
    fn test_min_score() {
        let policy = AnalysisPolicy {
            max_severity: Severity::Critical,
            min_score: 70,
        };
        assert!(policy.enforce(&report(&[(ThreatType::ReflectiveAccess, 1)])).is_ok());
        let err = policy
            .enforce(&report(&[(ThreatType::DynamicCodeExecution, 1)]))
            .unwrap_err();
        assert_eq!(err.score, 60);
        assert!(err.reason.contains("below minimum 70"));
    }

    #[test]
    fn test_zero_tolerance() {
        assert!(AnalysisPolicy::zero_tolerance().enforce(&report(&[])).is_ok());
        assert!(AnalysisPolicy::zero_tolerance()
            .enforce(&report(&[(ThreatType::DangerousImport, 1)]))
            .is_err());
    }
}
