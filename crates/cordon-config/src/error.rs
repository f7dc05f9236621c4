//! Configuration error types.

use cordon_analyzer::AnalyzerError;
use cordon_capabilities::CapabilityError;
use cordon_sandbox::SandboxError;
use thiserror::Error;

/// Errors raised while validating or converting a [`Config`](crate::Config).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value outside its accepted range.
    #[error("invalid value for {field}: {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A capability string does not parse.
    #[error("invalid capability in {field}: {source}")]
    Capability {
        /// Dotted path of the offending list.
        field: String,
        /// Parse failure.
        #[source]
        source: CapabilityError,
    },

    /// An analyzer exemption does not parse.
    #[error("invalid exemption in {field}: {source}")]
    Exemption {
        /// Dotted path of the offending list.
        field: String,
        /// Parse failure.
        #[source]
        source: AnalyzerError,
    },

    /// The sandbox section does not describe a usable sandbox.
    #[error("invalid sandbox configuration: {0}")]
    Sandbox(#[from] SandboxError),

    /// No profile with this name is configured.
    #[error("unknown capability profile: {0}")]
    UnknownProfile(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
