//! The analysis pass and its options.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AnalyzerError, AnalyzerResult};
use crate::report::SecurityReport;
use crate::rules;
use crate::threat::{SecurityFinding, Severity, ThreatType};
use crate::tree::ProgramTree;

/// How strictly findings are reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// LOW findings are omitted.
    Permissive,
    /// Every finding is reported; exemptions apply.
    #[default]
    Standard,
    /// Every finding is reported; exemptions are ignored.
    Strict,
}

impl FromStr for Strictness {
    type Err = AnalyzerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "permissive" => Ok(Self::Permissive),
            "standard" => Ok(Self::Standard),
            "strict" => Ok(Self::Strict),
            _ => Err(AnalyzerError::UnknownStrictness(s.to_string())),
        }
    }
}

/// Caller-supplied suppression of a heuristic finding.
///
/// Written as `threat_type`, `threat_type:line` or `threat_type:start-end`.
/// Only LOW and MEDIUM findings can be exempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exemption {
    threat_type: ThreatType,
    lines: Option<RangeInclusive<u32>>,
}

impl Exemption {
    /// Exempt a threat type everywhere.
    #[must_use]
    pub fn anywhere(threat_type: ThreatType) -> Self {
        Self {
            threat_type,
            lines: None,
        }
    }

    /// Exempt a threat type on an inclusive line range.
    #[must_use]
    pub fn on_lines(threat_type: ThreatType, lines: RangeInclusive<u32>) -> Self {
        Self {
            threat_type,
            lines: Some(lines),
        }
    }

    /// Parse the textual form.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyzerError::InvalidExemption`] or
    /// [`AnalyzerError::UnknownThreatType`].
    pub fn parse(input: &str) -> AnalyzerResult<Self> {
        let invalid = |reason: &str| AnalyzerError::InvalidExemption {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        let parse_line = |text: &str| {
            text.trim()
                .parse::<u32>()
                .map_err(|_| invalid("line numbers must be non-negative integers"))
        };

        let (threat, lines) = match input.split_once(':') {
            None => (input, None),
            Some((threat, range)) => {
                let lines = match range.split_once('-') {
                    None => {
                        let line = parse_line(range)?;
                        line..=line
                    },
                    Some((start, end)) => {
                        let (start, end) = (parse_line(start)?, parse_line(end)?);
                        if start > end {
                            return Err(invalid("line range is reversed"));
                        }
                        start..=end
                    },
                };
                (threat, Some(lines))
            },
        };

        Ok(Self {
            threat_type: threat.trim().parse()?,
            lines,
        })
    }

    /// Whether this exemption covers `finding`.
    #[must_use]
    pub fn covers(&self, finding: &SecurityFinding) -> bool {
        !finding.severity.is_violation()
            && finding.threat_type == self.threat_type
            && self
                .lines
                .as_ref()
                .is_none_or(|lines| lines.contains(&finding.line))
    }
}

impl fmt::Display for Exemption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.threat_type)?;
        match &self.lines {
            Some(lines) if lines.start() == lines.end() => write!(f, ":{}", lines.start()),
            Some(lines) => write!(f, ":{}-{}", lines.start(), lines.end()),
            None => Ok(()),
        }
    }
}

impl FromStr for Exemption {
    type Err = AnalyzerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Options for an [`Analyzer`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzerOptions {
    /// Reporting strictness.
    pub strictness: Strictness,
    /// Suppressions for heuristic findings.
    pub exemptions: Vec<Exemption>,
}

impl AnalyzerOptions {
    /// Set the strictness.
    #[must_use]
    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    /// Add an exemption.
    #[must_use]
    pub fn with_exemption(mut self, exemption: Exemption) -> Self {
        self.exemptions.push(exemption);
        self
    }

    /// Parse and add textual exemptions.
    ///
    /// # Errors
    ///
    /// Returns the first exemption that does not parse.
    pub fn with_exemption_strs<I, S>(mut self, exemptions: I) -> AnalyzerResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for text in exemptions {
            self.exemptions.push(Exemption::parse(text.as_ref())?);
        }
        Ok(self)
    }
}

/// Static threat analyzer.
///
/// Holds only its options, so one analyzer can serve concurrent callers.
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    options: AnalyzerOptions,
}

impl Analyzer {
    /// Create an analyzer.
    #[must_use]
    pub fn new(options: AnalyzerOptions) -> Self {
        Self { options }
    }

    /// The analyzer's options.
    #[must_use]
    pub fn options(&self) -> &AnalyzerOptions {
        &self.options
    }

    /// Analyze a program tree in a single pass.
    ///
    /// Never fails: the report is always complete. Deciding what to do with
    /// it is up to the caller.
    #[must_use]
    pub fn analyze(&self, tree: &ProgramTree) -> SecurityReport {
        let mut raw = Vec::new();
        let mut nodes_visited: usize = 0;
        for node in tree.walk() {
            nodes_visited = nodes_visited.saturating_add(1);
            rules::evaluate(node, &mut raw);
        }

        let mut suppressed: usize = 0;
        let findings: Vec<_> = raw
            .into_iter()
            .filter(|finding| {
                !(self.options.strictness == Strictness::Permissive
                    && finding.severity == Severity::Low)
            })
            .filter(|finding| {
                let exempt = self.options.strictness != Strictness::Strict
                    && self.options.exemptions.iter().any(|e| e.covers(finding));
                if exempt {
                    suppressed = suppressed.saturating_add(1);
                }
                !exempt
            })
            .collect();

        let report = SecurityReport::new(findings, suppressed, nodes_visited);
        debug!(
            source = tree.source_name.as_deref().unwrap_or("<unnamed>"),
            nodes = nodes_visited,
            findings = report.findings.len(),
            suppressed,
            score = report.score,
            "Static analysis complete"
        );
        report
    }
}

/// Analyze with default options.
#[must_use]
pub fn analyze(tree: &ProgramTree) -> SecurityReport {
    Analyzer::default().analyze(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Node;

    fn sample() -> ProgramTree {
        ProgramTree::new(Node::module([
            Node::import("pickle", 1, 0),
            Node::call(
                Node::name("eval", 3, 4),
                [Node::name("payload", 3, 9)],
                3,
                4,
            ),
            Node::call(
                Node::attribute(Node::name("cur", 5, 0), "execute", 5, 0),
                [Node::binary(
                    "+",
                    Node::string("SELECT * FROM t WHERE n=", 5, 12),
                    Node::name("n", 5, 40),
                    5,
                    12,
                )],
                5,
                0,
            ),
            Node::string("../../secrets", 7, 8),
        ]))
    }

    #[test]
    fn test_standard_reports_everything() {
        let report = analyze(&sample());
        let threats: Vec<_> = report.findings.iter().map(|f| f.threat_type).collect();
        assert_eq!(
            threats,
            vec![
                ThreatType::DangerousImport,
                ThreatType::DynamicCodeExecution,
                ThreatType::SqlInjection,
                ThreatType::PathTraversal,
            ]
        );
        assert_eq!(report.score, 35);
        assert!(report.has_violations());
        assert_eq!(report.nodes_visited, 12);
        assert_eq!(report.suppressed, 0);
    }

    #[test]
    fn test_permissive_omits_low() {
        let analyzer =
            Analyzer::new(AnalyzerOptions::default().with_strictness(Strictness::Permissive));
        let report = analyzer.analyze(&sample());
        assert!(
            report
                .findings
                .iter()
                .all(|f| f.threat_type != ThreatType::DangerousImport)
        );
        assert_eq!(report.findings.len(), 3);
    }

    #[test]
    fn test_exemptions_suppress_warnings_only() {
        let options = AnalyzerOptions::default()
            .with_exemption_strs([
                "sql_injection:5",
                "path_traversal:1-3",
                "dynamic_code_execution",
            ])
            .unwrap();
        let report = Analyzer::new(options).analyze(&sample());
        let threats: Vec<_> = report.findings.iter().map(|f| f.threat_type).collect();
        assert_eq!(
            threats,
            vec![
                ThreatType::DangerousImport,
                ThreatType::DynamicCodeExecution,
                ThreatType::PathTraversal,
            ]
        );
        assert_eq!(report.suppressed, 1);
    }

    #[test]
    fn test_strict_ignores_exemptions() {
        let options = AnalyzerOptions::default()
            .with_strictness(Strictness::Strict)
            .with_exemption(Exemption::anywhere(ThreatType::SqlInjection));
        let report = Analyzer::new(options).analyze(&sample());
        assert_eq!(report.findings.len(), 4);
        assert_eq!(report.suppressed, 0);
    }

    #[test]
    fn test_deterministic_output() {
        let a = serde_json::to_string(&analyze(&sample())).unwrap();
        let b = serde_json::to_string(&analyze(&sample())).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_clean_program() {
        let tree = ProgramTree::new(Node::module([Node::call(
            Node::name("print", 1, 0),
            [Node::string("hello", 1, 6)],
            1,
            0,
        )]));
        let report = analyze(&tree);
        assert!(report.is_clean());
        assert_eq!(report.score, 100);
        assert!(!report.has_violations());
    }

    #[test]
    fn test_exemption_parsing() {
        assert_eq!(
            Exemption::parse("sql_injection").unwrap(),
            Exemption::anywhere(ThreatType::SqlInjection)
        );
        assert_eq!(
            Exemption::parse("PathTraversal:12").unwrap(),
            Exemption::on_lines(ThreatType::PathTraversal, 12..=12)
        );
        assert_eq!(
            Exemption::parse("dangerous_import:3-9").unwrap().to_string(),
            "dangerous_import:3-9"
        );
        for bad in ["sql_injection:", "sql_injection:9-3", "sql_injection:x", "nope:1"] {
            assert!(Exemption::parse(bad).is_err(), "{bad} should be rejected");
        }
    }
}
