//! Cordon Capabilities - capability model and runtime checks for embedded
//! scripts.
//!
//! This crate provides:
//! - Capabilities written as `resource:operation:pattern`, with `!` for denials
//! - A segment pattern matcher with exact structural subsumption
//! - Immutable, scoped capability contexts that can only narrow their parent
//! - A checker that resolves concrete requests and audits every decision
//! - A task-local ambient checker and a registry of checked bridge operations
//!
//! # Security Model
//!
//! - Absence of a matching grant is a denial.
//! - A matching denial wins over any grant, however specific.
//! - A nested scope may add grants only if the enclosing scope already holds
//!   something that subsumes them; denials can always be added.
//! - Subjects containing a `..` segment never match any pattern.
//!
//! # Example
//!
//! ```
//! use cordon_audit::AuditLog;
//! use cordon_capabilities::{CapabilityChecker, CapabilitySet};
//!
//! let defaults =
//!     CapabilitySet::parse(["file:read:/data/**", "!file:read:/data/secret/**"]).unwrap();
//! let mut checker = CapabilityChecker::new(defaults, AuditLog::new());
//!
//! assert!(checker.check("file:read:/data/report.csv").is_ok());
//! assert!(checker.check("file:read:/data/secret/key").is_err());
//!
//! // Widening is refused; narrowing is always allowed.
//! assert!(checker.push(CapabilitySet::parse(["file:write:/data/**"]).unwrap()).is_err());
//! let handle = checker.push(CapabilitySet::parse(["!file:read:/data/**"]).unwrap()).unwrap();
//! assert!(checker.check("file:read:/data/report.csv").is_err());
//! checker.pop(handle).unwrap();
//!
//! assert_eq!(checker.audit().len(), 3);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod ambient;
pub mod pattern;
pub mod prelude;

mod capability;
mod checker;
mod context;
mod error;
mod registry;
mod set;

pub use capability::{Capability, CapabilityRequest, WILDCARD};
pub use checker::CapabilityChecker;
pub use context::{CapabilityContext, ContextHandle, ContextId, ContextStack, Resolution};
pub use error::{BridgeError, CapabilityError, CapabilityResult};
pub use pattern::Pattern;
pub use registry::{BridgeArgs, BridgeRegistry, CapabilityTemplate};
pub use set::CapabilitySet;
