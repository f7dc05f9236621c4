//! Cordon Audit - append-only record of capability decisions.
//!
//! This crate provides:
//! - [`AuditEntry`] records, one per capability check
//! - A cloneable in-memory [`AuditLog`] with lazy, restartable reads
//! - An optional background JSON-lines sink so persistence never blocks a check
//!
//! # Example
//!
//! ```
//! use cordon_audit::{AuditDecision, AuditEntry, AuditLog};
//!
//! let log = AuditLog::new();
//! log.record(AuditEntry::new(
//!     "file:read:/data/report.csv",
//!     "file",
//!     "read",
//!     "/data/report.csv",
//!     AuditDecision::Granted,
//! ));
//!
//! assert_eq!(log.entries().count(), 1);
//! assert_eq!(log.denied_count(), 0);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod entry;
mod error;
mod log;
mod sink;

pub use entry::{AuditDecision, AuditEntry};
pub use error::{AuditError, AuditResult};
pub use log::{AuditEntries, AuditLog};
pub use sink::{AuditSinkHandle, load_jsonl, spawn_jsonl_sink};
