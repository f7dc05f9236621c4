//! Analyzer error types.
//!
//! Analysis itself never fails. These errors cover malformed input handed to
//! the analyzer and the rejection raised by the policy layer.

use std::fmt;

use thiserror::Error;

use crate::threat::SecurityFinding;

/// Errors from parsing analyzer inputs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalyzerError {
    /// A program tree could not be decoded.
    #[error("invalid program tree: {0}")]
    InvalidTree(String),

    /// Unknown threat type name.
    #[error("unknown threat type: {0}")]
    UnknownThreatType(String),

    /// Unknown severity name.
    #[error("unknown severity: {0}")]
    UnknownSeverity(String),

    /// Unknown strictness name.
    #[error("unknown strictness: {0} (expected permissive, standard or strict)")]
    UnknownStrictness(String),

    /// An exemption string could not be parsed.
    #[error("invalid exemption `{input}`: {reason}")]
    InvalidExemption {
        /// The offending input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Result type for analyzer inputs.
pub type AnalyzerResult<T> = Result<T, AnalyzerError>;

/// A program rejected by an [`AnalysisPolicy`](crate::AnalysisPolicy).
///
/// Carries every finding of the report, not just the first offending one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityViolationError {
    /// Why the policy rejected the program.
    pub reason: String,
    /// Report score.
    pub score: u8,
    /// All findings of the report.
    pub findings: Vec<SecurityFinding>,
}

impl fmt::Display for SecurityViolationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "program rejected: {} (score {}, {} finding(s))",
            self.reason,
            self.score,
            self.findings.len()
        )?;
        for finding in &self.findings {
            write!(f, "\n  {finding}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SecurityViolationError {}
