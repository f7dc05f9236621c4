//! Commonly used types for convenient import.
//!
//! ```rust
//! use cordon_config::prelude::*;
//! ```

// Errors
pub use crate::{ConfigError, ConfigResult};

// Sections
pub use crate::{AnalyzerSection, CapabilitiesSection, Config, LoggingSection, SandboxSection};
