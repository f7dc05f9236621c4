//! Cordon Sandbox - process-isolated execution of untrusted programs.
//!
//! A [`SandboxManager`] runs each compiled program in a fresh worker
//! process. The child receives only the capabilities in its
//! [`SandboxConfig`], narrowed by the filesystem and network policies, and
//! builds its own root checker from them. On Linux the same policies are
//! also enforced with Landlock, and memory and CPU are bounded with
//! `setrlimit`. A wall-clock watchdog kills the worker on timeout.
//!
//! The worker side lives in [`worker`]: a host links its interpreter in as
//! an [`Executor`](worker::Executor) and calls [`worker::serve`]. The
//! bundled `cordon-worker` binary serves the reference [`probe`] executor.
//!
//! # Example
//!
//! ```rust,no_run
//! use cordon_capabilities::CapabilitySet;
//! use cordon_sandbox::probe::{self, ProbeStep};
//! use cordon_sandbox::{FilesystemPolicy, SandboxConfig, SandboxManager, WorkerCommand};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let unit = probe::compile("report", &[
//!     ProbeStep::Check { capability: "file:read:/data/report.csv".into() },
//!     ProbeStep::Emit { text: "ok".into() },
//! ])?;
//!
//! let config = SandboxConfig::new(
//!     WorkerCommand::new("/usr/local/bin/cordon-worker"),
//!     CapabilitySet::parse(["file:read:/data/**"])?,
//! )
//! .with_filesystem_policy(FilesystemPolicy::ReadOnly { paths: vec!["/data".into()] });
//!
//! let output = SandboxManager::new().run(&unit, &config).await?;
//! assert_eq!(output.text(), "ok");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;
pub mod probe;
pub mod protocol;
pub mod worker;

mod config;
mod error;
mod manager;
mod platform;

pub use config::{
    DEFAULT_CPU_TIME_LIMIT, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_MEMORY_LIMIT_BYTES,
    DEFAULT_WALL_CLOCK_TIMEOUT, FILE_RESOURCE, FilesystemPolicy, NET_RESOURCE, NetworkPolicy,
    SandboxConfig, WorkerCommand,
};
pub use error::{ResourceLimit, SandboxError, SandboxResult};
pub use manager::{SandboxManager, SandboxOutput, SandboxRun, SandboxState, WORKER_LOG_ENV};
pub use protocol::{CompiledUnit, ResourceUsage};
