//! Structured configuration surface for Cordon.
//!
//! A single [`Config`] gathers the default capability set, named capability
//! profiles, analyzer options, sandbox limits and logging. File discovery and
//! parsing belong to the host: deserialize a [`Config`] from any serde
//! format, call [`Config::validate`], then convert sections into domain
//! types.
//!
//! # Example
//!
//! ```rust,no_run
//! use cordon_config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! config.validate()?;
//!
//! let root = config.default_capabilities()?;
//! let options = config.analyzer_options()?;
//! println!("{} root capabilities, {:?} analysis", root.len(), options.strictness);
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

mod bridge;
mod error;
mod types;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use types::{AnalyzerSection, CapabilitiesSection, Config, LoggingSection, SandboxSection};
pub use validate::validate;
