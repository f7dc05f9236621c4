//! Prelude module - commonly used types for convenient import.
//!
//! Use `use cordon_sandbox::prelude::*;` to import all essential types.

// Errors
pub use crate::{ResourceLimit, SandboxError, SandboxResult};

// Configuration
pub use crate::{FilesystemPolicy, NetworkPolicy, SandboxConfig, WorkerCommand};

// Supervision
pub use crate::{
    CompiledUnit, ResourceUsage, SandboxManager, SandboxOutput, SandboxRun, SandboxState,
};

// Worker side
pub use crate::worker::{ExecutionContext, ExecutionError, Executor};
