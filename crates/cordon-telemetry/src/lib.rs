//! Cordon Telemetry - logging for the Cordon script security engine.
//!
//! Every Cordon crate logs through [`tracing`]. This crate installs the
//! global subscriber for binaries: the host embedding the engine and the
//! sandbox worker process. Libraries never call it themselves.
//!
//! # Example
//!
//! ```rust,no_run
//! use cordon_telemetry::{LogConfig, LogFormat, LogTarget, setup_logging};
//!
//! # fn main() -> Result<(), cordon_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Json)
//!     .with_target(LogTarget::Stderr)
//!     .with_directive("cordon_sandbox=debug");
//!
//! setup_logging(&config)?;
//! tracing::info!("Engine started");
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

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};
