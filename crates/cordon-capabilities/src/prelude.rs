//! Prelude module - commonly used types for convenient import.
//!
//! Use `use cordon_capabilities::prelude::*;` to import all essential types.
//!
//! # Example
//!
//! ```rust
//! use cordon_audit::AuditLog;
//! use cordon_capabilities::prelude::*;
//!
//! let checker = CapabilityChecker::new(
//!     CapabilitySet::parse(["net:connect:api.example.com/443"]).unwrap(),
//!     AuditLog::new(),
//! );
//! assert!(checker.check("net:connect:api.example.com/443").is_ok());
//! assert!(checker.check("net:connect:evil.example/443").unwrap_err().is_denied());
//! ```

// Errors
pub use crate::{BridgeError, CapabilityError, CapabilityResult};

// Capabilities and patterns
pub use crate::{Capability, CapabilityRequest, CapabilitySet, Pattern};

// Contexts and checking
pub use crate::{CapabilityChecker, CapabilityContext, ContextHandle, ContextStack};

// Bridge operations
pub use crate::{BridgeArgs, BridgeRegistry};
