//! Prelude module - commonly used types for convenient import.
//!
//! Use `use cordon_audit::prelude::*;` to import all essential types.

// Errors
pub use crate::{AuditError, AuditResult};

// Entries and log
pub use crate::{AuditDecision, AuditEntry, AuditLog};

// Persistence
pub use crate::{AuditSinkHandle, spawn_jsonl_sink};
