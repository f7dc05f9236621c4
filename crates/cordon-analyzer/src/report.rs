//! Analysis reports and scoring.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::threat::{SecurityFinding, Severity};

/// Score of a program with no findings.
pub const MAX_SCORE: u8 = 100;

/// Compute the score for a set of findings.
///
/// Starts at [`MAX_SCORE`] and subtracts each finding's severity penalty,
/// stopping at zero.
#[must_use]
pub fn score(findings: &[SecurityFinding]) -> u8 {
    findings
        .iter()
        .fold(MAX_SCORE, |acc, finding| acc.saturating_sub(finding.severity.penalty()))
}

/// Result of analyzing one program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityReport {
    /// Findings sorted by line, column and threat type.
    pub findings: Vec<SecurityFinding>,
    /// Derived score, 0 to 100.
    pub score: u8,
    /// Findings removed by exemptions.
    pub suppressed: usize,
    /// Nodes visited during the pass.
    pub nodes_visited: usize,
}

impl SecurityReport {
    pub(crate) fn new(
        mut findings: Vec<SecurityFinding>,
        suppressed: usize,
        nodes_visited: usize,
    ) -> Self {
        findings.sort_by_key(SecurityFinding::sort_key);
        let score = score(&findings);
        Self {
            findings,
            score,
            suppressed,
            nodes_visited,
        }
    }

    /// Whether any finding is HIGH or CRITICAL.
    #[must_use]
    pub fn has_violations(&self) -> bool {
        self.findings.iter().any(|f| f.severity.is_violation())
    }

    /// HIGH and CRITICAL findings.
    pub fn violations(&self) -> impl Iterator<Item = &SecurityFinding> {
        self.findings.iter().filter(|f| f.severity.is_violation())
    }

    /// LOW and MEDIUM findings.
    pub fn warnings(&self) -> impl Iterator<Item = &SecurityFinding> {
        self.findings.iter().filter(|f| !f.severity.is_violation())
    }

    /// Highest severity present.
    #[must_use]
    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }

    /// Whether the report has no findings.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

impl fmt::Display for SecurityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "score {}/{MAX_SCORE}, {} finding(s), {} suppressed",
            self.score,
            self.findings.len(),
            self.suppressed
        )?;
        for finding in &self.findings {
            write!(f, "\n  {finding}")?;
        }
        Ok(())
    }
}
