//! Cordon Analyzer - static threat analysis for untrusted programs.
//!
//! The analyzer walks a parsed [`ProgramTree`] once and matches node shapes
//! against a fixed rule table. It never executes the program and never fails;
//! the caller decides what to do with the [`SecurityReport`], typically
//! through an [`AnalysisPolicy`].
//!
//! | Threat | Severity |
//! |---|---|
//! | dynamic code execution | CRITICAL |
//! | reflective access | HIGH |
//! | command injection | HIGH |
//! | SQL injection | MEDIUM |
//! | path traversal | MEDIUM |
//! | dangerous import | LOW |
//!
//! Rules are purely syntactic. Values flowing through variables are not
//! tracked.
//!
//! # Example
//!
//! ```
//! use cordon_analyzer::{AnalysisPolicy, Node, ProgramTree, ThreatType, analyze};
//!
//! let tree = ProgramTree::new(Node::module([Node::call(
//!     Node::name("eval", 2, 0),
//!     [Node::name("user_input", 2, 5)],
//!     2,
//!     0,
//! )]));
//!
//! let report = analyze(&tree);
//! assert_eq!(report.findings[0].threat_type, ThreatType::DynamicCodeExecution);
//! assert_eq!(report.score, 60);
//! assert!(AnalysisPolicy::default().enforce(&report).is_err());
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod analyzer;
mod error;
mod policy;
mod report;
mod rules;
mod threat;
mod tree;

pub use analyzer::{Analyzer, AnalyzerOptions, Exemption, Strictness, analyze};
pub use error::{AnalyzerError, AnalyzerResult, SecurityViolationError};
pub use policy::AnalysisPolicy;
pub use report::{MAX_SCORE, SecurityReport, score};
pub use threat::{SecurityFinding, Severity, ThreatType};
pub use tree::{Node, NodeKind, ProgramTree, Walk};
