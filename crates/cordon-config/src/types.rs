//! Configuration sections.
//!
//! Every section implements [`Default`], so an empty document, or a bare
//! `[section]` header, yields a working configuration. The defaults grant
//! nothing and confine everything.

use std::collections::BTreeMap;
use std::path::PathBuf;

use cordon_analyzer::Strictness;
use cordon_sandbox::{
    DEFAULT_CPU_TIME_LIMIT, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_MEMORY_LIMIT_BYTES,
    DEFAULT_WALL_CLOCK_TIMEOUT, FilesystemPolicy, NetworkPolicy, WorkerCommand,
};
use cordon_telemetry::LogFormat;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration for the security core.
///
/// Hosts load this from whatever format they use; this crate only checks
/// and converts it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default and named capability sets.
    pub capabilities: CapabilitiesSection,
    /// Static analyzer options.
    pub analyzer: AnalyzerSection,
    /// Sandbox limits and isolation policies.
    pub sandbox: SandboxSection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// CapabilitiesSection
// ---------------------------------------------------------------------------

/// Capability strings, as written by the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitiesSection {
    /// Root capability set given to every program.
    pub default: Vec<String>,
    /// Named sets a host can select per program.
    pub profiles: BTreeMap<String, Vec<String>>,
}

// ---------------------------------------------------------------------------
// AnalyzerSection
// ---------------------------------------------------------------------------

/// Static analyzer settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerSection {
    /// `"permissive"`, `"standard"` or `"strict"`.
    pub strictness: Strictness,
    /// Exemptions such as `"path_traversal:12"` or `"dangerous_import"`.
    pub exemptions: Vec<String>,
}

// ---------------------------------------------------------------------------
// SandboxSection
// ---------------------------------------------------------------------------

/// Sandbox resource limits and isolation policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    /// Memory ceiling for the worker process.
    pub memory_limit_bytes: u64,
    /// Processor time the worker may consume.
    pub cpu_time_limit_secs: u64,
    /// Wall-clock time before the worker is killed.
    pub wall_clock_timeout_secs: u64,
    /// Largest output returned to the caller.
    pub max_output_bytes: usize,
    /// Filesystem access, e.g. `{ mode = "read_only", paths = ["/data"] }`.
    pub filesystem: FilesystemPolicy,
    /// Network access, e.g. `{ mode = "allow_hosts", hosts = ["api.example.com"] }`.
    pub network: NetworkPolicy,
    /// Worker command. Required before a sandbox can be built.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerCommand>,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            cpu_time_limit_secs: DEFAULT_CPU_TIME_LIMIT.as_secs(),
            wall_clock_timeout_secs: DEFAULT_WALL_CLOCK_TIMEOUT.as_secs(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            filesystem: FilesystemPolicy::Deny,
            network: NetworkPolicy::Deny,
            worker: None,
        }
    }
}

impl SandboxSection {
    /// Use `program` as the worker.
    #[must_use]
    pub fn with_worker(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker = Some(WorkerCommand::new(program));
        self
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: LogFormat,
    /// Per-crate tracing directives (e.g. `["cordon_sandbox=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Compact,
            directives: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.sandbox.memory_limit_bytes, 268_435_456);
        assert_eq!(config.sandbox.cpu_time_limit_secs, 10);
        assert_eq!(config.sandbox.wall_clock_timeout_secs, 30);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_full_document_shape() {
        let config: Config = toml::from_str(
            r#"
            [capabilities]
            default = ["env:read:*", "!env:read:AWS_SECRET_ACCESS_KEY"]

            [capabilities.profiles]
            reports = ["file:read:/data/reports/**"]
            fetcher = ["net:connect:api.example.com/443"]

            [analyzer]
            strictness = "strict"
            exemptions = ["dangerous_import", "path_traversal:10-12"]

            [sandbox]
            memory_limit_bytes = 67108864
            cpu_time_limit_secs = 2
            filesystem = { mode = "read_write", read = ["/data"], write = ["/tmp/out"] }
            network = { mode = "allow_hosts", hosts = ["api.example.com"] }
            worker = { program = "/usr/libexec/cordon-worker", args = ["--quiet"] }

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.capabilities.default.len(), 2);
        assert_eq!(config.capabilities.profiles.len(), 2);
        assert_eq!(config.analyzer.strictness, Strictness::Strict);
        assert_eq!(config.sandbox.memory_limit_bytes, 67_108_864);
        assert_eq!(config.sandbox.wall_clock_timeout_secs, 30);
        assert_eq!(
            config.sandbox.filesystem,
            FilesystemPolicy::ReadWrite {
                read: vec![PathBuf::from("/data")],
                write: vec![PathBuf::from("/tmp/out")],
            }
        );
        assert_eq!(
            config.sandbox.network,
            NetworkPolicy::AllowHosts(vec!["api.example.com".to_owned()])
        );
        assert_eq!(
            config.sandbox.worker,
            Some(WorkerCommand::new("/usr/libexec/cordon-worker").with_arg("--quiet"))
        );
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = Config::default();
        config.capabilities.default = vec!["file:read:/data/**".to_owned()];
        config.sandbox = SandboxSection::default().with_worker("/opt/cordon/worker");
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
