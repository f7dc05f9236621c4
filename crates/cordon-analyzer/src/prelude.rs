//! Prelude module - commonly used types for convenient import.
//!
//! Use `use cordon_analyzer::prelude::*;` to import all essential types.

// Errors
pub use crate::{AnalyzerError, AnalyzerResult, SecurityViolationError};

// Program trees
pub use crate::{Node, NodeKind, ProgramTree};

// Analysis
pub use crate::{Analyzer, AnalyzerOptions, Exemption, Strictness, analyze};

// Reports and policy
pub use crate::{AnalysisPolicy, SecurityFinding, SecurityReport, Severity, ThreatType};
