//! Configuration validation.
//!
//! Checks that every capability string and exemption parses, that limits are
//! non-zero and that the isolation policies are well formed.

use cordon_analyzer::Exemption;
use cordon_capabilities::CapabilitySet;

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_capabilities(config)?;
    validate_analyzer(config)?;
    validate_sandbox(config)?;
    validate_logging(config)?;
    Ok(())
}

pub(crate) fn parse_set(field: &str, strings: &[String]) -> ConfigResult<CapabilitySet> {
    CapabilitySet::parse(strings).map_err(|source| ConfigError::Capability {
        field: field.to_owned(),
        source,
    })
}

fn validate_capabilities(config: &Config) -> ConfigResult<()> {
    let c = &config.capabilities;
    parse_set("capabilities.default", &c.default)?;

    for (name, strings) in &c.profiles {
        if name.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: "capabilities.profiles".to_owned(),
                message: "profile names must not be empty".to_owned(),
            });
        }
        parse_set(&format!("capabilities.profiles.{name}"), strings)?;
    }
    Ok(())
}

fn validate_analyzer(config: &Config) -> ConfigResult<()> {
    for text in &config.analyzer.exemptions {
        Exemption::parse(text).map_err(|source| ConfigError::Exemption {
            field: "analyzer.exemptions".to_owned(),
            source,
        })?;
    }
    Ok(())
}

fn validate_sandbox(config: &Config) -> ConfigResult<()> {
    let s = &config.sandbox;
    let non_zero = [
        ("sandbox.memory_limit_bytes", s.memory_limit_bytes == 0),
        ("sandbox.cpu_time_limit_secs", s.cpu_time_limit_secs == 0),
        ("sandbox.wall_clock_timeout_secs", s.wall_clock_timeout_secs == 0),
        ("sandbox.max_output_bytes", s.max_output_bytes == 0),
    ];
    if let Some((field, _)) = non_zero.iter().find(|(_, zero)| *zero) {
        return Err(ConfigError::ValidationError {
            field: (*field).to_owned(),
            message: "must be greater than zero".to_owned(),
        });
    }

    if let Some(worker) = &s.worker
        && worker.program.as_os_str().is_empty()
    {
        return Err(ConfigError::ValidationError {
            field: "sandbox.worker.program".to_owned(),
            message: "worker program must not be empty".to_owned(),
        });
    }

    s.filesystem.validate()?;
    s.network.validate()?;
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    if !VALID_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::ValidationError {
            field: "logging.level".to_owned(),
            message: format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                VALID_LEVELS.join(", ")
            ),
        });
    }
    Ok(())
}
