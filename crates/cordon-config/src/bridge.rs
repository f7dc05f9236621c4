//! Conversion from configuration sections into domain types.

use std::time::Duration;

use cordon_analyzer::AnalyzerOptions;
use cordon_capabilities::CapabilitySet;
use cordon_sandbox::SandboxConfig;
use cordon_telemetry::LogConfig;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;
use crate::validate::{self, parse_set};

impl Config {
    /// Validate this configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self) -> ConfigResult<()> {
        validate::validate(self)
    }

    /// The root capability set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Capability`] if a string does not parse.
    pub fn default_capabilities(&self) -> ConfigResult<CapabilitySet> {
        parse_set("capabilities.default", &self.capabilities.default)
    }

    /// The capability set of the named profile.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownProfile`] if no such profile exists, or
    /// [`ConfigError::Capability`] if one of its strings does not parse.
    pub fn profile(&self, name: &str) -> ConfigResult<CapabilitySet> {
        let strings = self
            .capabilities
            .profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_owned()))?;
        let set = parse_set(&format!("capabilities.profiles.{name}"), strings)?;
        debug!(profile = name, capabilities = set.len(), "Resolved capability profile");
        Ok(set)
    }

    /// Names of the configured profiles, sorted.
    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.capabilities.profiles.keys().map(String::as_str)
    }

    /// Options for the static analyzer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Exemption`] if an exemption does not parse.
    pub fn analyzer_options(&self) -> ConfigResult<AnalyzerOptions> {
        AnalyzerOptions::default()
            .with_strictness(self.analyzer.strictness)
            .with_exemption_strs(&self.analyzer.exemptions)
            .map_err(|source| ConfigError::Exemption {
                field: "analyzer.exemptions".to_owned(),
                source,
            })
    }

    /// A sandbox configuration running programs with `capability_set`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if no worker is configured and
    /// [`ConfigError::Sandbox`] if the resulting config is invalid.
    pub fn sandbox_config(&self, capability_set: CapabilitySet) -> ConfigResult<SandboxConfig> {
        let s = &self.sandbox;
        let worker = s.worker.clone().ok_or_else(|| ConfigError::ValidationError {
            field: "sandbox.worker".to_owned(),
            message: "no worker program configured".to_owned(),
        })?;

        let config = SandboxConfig::new(worker, capability_set)
            .with_memory_limit(s.memory_limit_bytes)
            .with_cpu_time_limit(Duration::from_secs(s.cpu_time_limit_secs))
            .with_wall_clock_timeout(Duration::from_secs(s.wall_clock_timeout_secs))
            .with_max_output_bytes(s.max_output_bytes)
            .with_filesystem_policy(s.filesystem.clone())
            .with_network_policy(s.network.clone());
        config.validate()?;
        Ok(config)
    }

    /// Logging setup for host binaries.
    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        self.logging
            .directives
            .iter()
            .fold(
                LogConfig::new(self.logging.level.as_str()).with_format(self.logging.format),
                |config, directive| config.with_directive(directive.as_str()),
            )
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use cordon_analyzer::Strictness;
    use cordon_sandbox::{FilesystemPolicy, NetworkPolicy};
    use cordon_telemetry::LogFormat;

    use super::*;

    fn config() -> Config {
        let mut config = Config::default();
        config.capabilities.default = vec!["env:read:*".to_owned()];
        config.capabilities.profiles.insert(
            "reports".to_owned(),
            vec![
                "file:read:/data/reports/**".to_owned(),
                "!file:read:/data/reports/private/**".to_owned(),
            ],
        );
        config
    }

    #[test]
    fn test_default_capabilities() {
        let set = config().default_capabilities().unwrap();
        assert_eq!(set.to_strings(), vec!["env:read:*".to_owned()]);
    }

    #[test]
    fn test_profile_lookup() {
        let config = config();
        let set = config.profile("reports").unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(config.profile_names().collect::<Vec<_>>(), vec!["reports"]);
        assert!(matches!(
            config.profile("admin"),
            Err(ConfigError::UnknownProfile(name)) if name == "admin"
        ));
    }

    #[test]
    fn test_analyzer_options() {
        let mut config = config();
        config.analyzer.strictness = Strictness::Permissive;
        config.analyzer.exemptions = vec!["path_traversal:3-5".to_owned()];
        let options = config.analyzer_options().unwrap();
        assert_eq!(options.strictness, Strictness::Permissive);
        assert_eq!(options.exemptions.len(), 1);
    }

    #[test]
    fn test_sandbox_config_requires_worker() {
        let err = config().sandbox_config(CapabilitySet::new()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ValidationError { ref field, .. } if field == "sandbox.worker"
        ));
    }

    #[test]
    fn test_sandbox_config_carries_limits() {
        let mut config = config();
        config.sandbox = config.sandbox.with_worker("/usr/libexec/cordon-worker");
        config.sandbox.cpu_time_limit_secs = 2;
        config.sandbox.wall_clock_timeout_secs = 5;
        config.sandbox.filesystem = FilesystemPolicy::ReadOnly {
            paths: vec![PathBuf::from("/data")],
        };
        config.sandbox.network = NetworkPolicy::AllowHosts(vec!["api.example.com".to_owned()]);

        let set = config.profile("reports").unwrap();
        let sandbox = config.sandbox_config(set).unwrap();
        assert_eq!(sandbox.cpu_time_limit, Duration::from_secs(2));
        assert_eq!(sandbox.wall_clock_timeout, Duration::from_secs(5));
        assert_eq!(sandbox.capability_set.len(), 2);
        assert_eq!(sandbox.worker.program, PathBuf::from("/usr/libexec/cordon-worker"));
    }

    #[test]
    fn test_log_config() {
        let mut config = Config::default();
        config.logging.level = "debug".to_owned();
        config.logging.format = LogFormat::Json;
        config.logging.directives = vec!["cordon_sandbox=trace".to_owned()];
        let log = config.log_config();
        assert_eq!(log.level, "debug");
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.directives, vec!["cordon_sandbox=trace".to_owned()]);
    }
}
