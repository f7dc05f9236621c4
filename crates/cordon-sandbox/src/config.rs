//! Sandbox configuration and capability narrowing.
//!
//! The filesystem and network policies are applied twice: once here, by
//! rewriting the capability set handed to the child so its checks fail fast,
//! and once at the OS level before the worker starts.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use cordon_capabilities::{Capability, CapabilityError, CapabilitySet, WILDCARD};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SandboxError, SandboxResult};

/// Resource token for filesystem capabilities.
pub const FILE_RESOURCE: &str = "file";

/// Resource token for network capabilities.
pub const NET_RESOURCE: &str = "net";

/// Default data segment limit (256 MiB).
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 268_435_456;

/// Default processor time limit.
pub const DEFAULT_CPU_TIME_LIMIT: Duration = Duration::from_secs(10);

/// Default wall-clock timeout.
pub const DEFAULT_WALL_CLOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on program output (1 MiB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1_048_576;

const READ_ONLY_DENIED_OPERATIONS: &[&str] = &["write", "create", "delete"];

/// Filesystem access granted to the child.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum FilesystemPolicy {
    /// No filesystem capabilities at all.
    #[default]
    Deny,
    /// Read access beneath `paths`; writes are denied everywhere.
    ReadOnly {
        /// Absolute directory roots.
        paths: Vec<PathBuf>,
    },
    /// Read access beneath `read`, full access beneath `write`.
    ReadWrite {
        /// Absolute read-only roots.
        read: Vec<PathBuf>,
        /// Absolute read-write roots.
        write: Vec<PathBuf>,
    },
}

impl FilesystemPolicy {
    /// Roots the child may read beneath, including write roots.
    pub fn read_roots(&self) -> impl Iterator<Item = &Path> {
        let (read, write): (&[PathBuf], &[PathBuf]) = match self {
            Self::Deny => (&[], &[]),
            Self::ReadOnly { paths } => (paths, &[]),
            Self::ReadWrite { read, write } => (read, write),
        };
        read.iter().chain(write).map(PathBuf::as_path)
    }

    /// Roots the child may write beneath.
    #[must_use]
    pub fn write_roots(&self) -> &[PathBuf] {
        match self {
            Self::ReadWrite { write, .. } => write,
            Self::Deny | Self::ReadOnly { .. } => &[],
        }
    }

    /// Check that every root is an absolute, literal path.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidConfig`] naming the first bad root.
    pub fn validate(&self) -> SandboxResult<()> {
        self.bounds().map(drop)
    }

    /// Grants bounding every file capability the child may keep.
    fn bounds(&self) -> SandboxResult<Vec<Capability>> {
        let mut bounds = Vec::new();
        match self {
            Self::Deny => {},
            Self::ReadOnly { paths } => {
                for root in paths {
                    bounds.push(bound(FILE_RESOURCE, WILDCARD, &root_pattern(root)?)?);
                }
            },
            Self::ReadWrite { read, write } => {
                for root in read {
                    bounds.push(bound(FILE_RESOURCE, "read", &root_pattern(root)?)?);
                }
                for root in write {
                    bounds.push(bound(FILE_RESOURCE, WILDCARD, &root_pattern(root)?)?);
                }
            },
        }
        Ok(bounds)
    }

    fn denials(&self) -> SandboxResult<Vec<Capability>> {
        match self {
            Self::Deny => Ok(vec![denial(FILE_RESOURCE, WILDCARD)?]),
            Self::ReadOnly { .. } => READ_ONLY_DENIED_OPERATIONS
                .iter()
                .map(|op| denial(FILE_RESOURCE, op))
                .collect(),
            Self::ReadWrite { .. } => Ok(Vec::new()),
        }
    }
}

/// Network access granted to the child.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "hosts")]
pub enum NetworkPolicy {
    /// No network capabilities; outbound TCP is also blocked by the OS
    /// where supported.
    #[default]
    Deny,
    /// `net` grants are kept only when they fall under one of these hosts.
    AllowHosts(Vec<String>),
}

impl NetworkPolicy {
    /// Check that every allowed host is a plain host name.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidConfig`] naming the first bad host.
    pub fn validate(&self) -> SandboxResult<()> {
        self.bounds().map(drop)
    }

    fn bounds(&self) -> SandboxResult<Vec<Capability>> {
        match self {
            Self::Deny => Ok(Vec::new()),
            Self::AllowHosts(hosts) => hosts
                .iter()
                .map(|host| {
                    if host.is_empty() || host.contains(['/', '*', '[', ']']) {
                        return Err(SandboxError::InvalidConfig(format!(
                            "allowed host `{host}` must be a plain host name"
                        )));
                    }
                    bound(NET_RESOURCE, WILDCARD, &format!("{host}/**"))
                })
                .collect(),
        }
    }

    fn denials(&self) -> SandboxResult<Vec<Capability>> {
        match self {
            Self::Deny => Ok(vec![denial(NET_RESOURCE, WILDCARD)?]),
            Self::AllowHosts(_) => Ok(Vec::new()),
        }
    }
}

/// Command line of the worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    /// Worker executable.
    pub program: PathBuf,
    /// Arguments passed to it.
    #[serde(default)]
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Run `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Everything needed to run one program in isolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Capabilities granted to the child before policy narrowing.
    pub capability_set: CapabilitySet,
    /// Data segment limit in bytes.
    pub memory_limit_bytes: u64,
    /// Processor time limit, rounded up to whole seconds.
    pub cpu_time_limit: Duration,
    /// Wall-clock watchdog.
    pub wall_clock_timeout: Duration,
    /// Output beyond this many bytes is truncated.
    pub max_output_bytes: usize,
    /// Filesystem access.
    pub filesystem_policy: FilesystemPolicy,
    /// Network access.
    pub network_policy: NetworkPolicy,
    /// Worker process to launch.
    pub worker: WorkerCommand,
}

impl SandboxConfig {
    /// A config with default limits and deny-all policies.
    #[must_use]
    pub fn new(worker: WorkerCommand, capability_set: CapabilitySet) -> Self {
        Self {
            capability_set,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            cpu_time_limit: DEFAULT_CPU_TIME_LIMIT,
            wall_clock_timeout: DEFAULT_WALL_CLOCK_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            filesystem_policy: FilesystemPolicy::default(),
            network_policy: NetworkPolicy::default(),
            worker,
        }
    }

    /// Set the memory limit.
    #[must_use]
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    /// Set the processor time limit.
    #[must_use]
    pub fn with_cpu_time_limit(mut self, limit: Duration) -> Self {
        self.cpu_time_limit = limit;
        self
    }

    /// Set the wall-clock timeout.
    #[must_use]
    pub fn with_wall_clock_timeout(mut self, timeout: Duration) -> Self {
        self.wall_clock_timeout = timeout;
        self
    }

    /// Set the output cap.
    #[must_use]
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Set the filesystem policy.
    #[must_use]
    pub fn with_filesystem_policy(mut self, policy: FilesystemPolicy) -> Self {
        self.filesystem_policy = policy;
        self
    }

    /// Set the network policy.
    #[must_use]
    pub fn with_network_policy(mut self, policy: NetworkPolicy) -> Self {
        self.network_policy = policy;
        self
    }

    /// CPU limit in whole seconds, at least one.
    #[must_use]
    pub fn cpu_seconds(&self) -> u64 {
        self.cpu_time_limit
            .as_secs()
            .saturating_add(u64::from(self.cpu_time_limit.subsec_nanos() > 0))
            .max(1)
    }

    /// Check limits, the worker command and policy roots.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> SandboxResult<()> {
        let invalid = |msg: &str| Err(SandboxError::InvalidConfig(msg.to_string()));
        if self.memory_limit_bytes == 0 {
            return invalid("memory limit must be non-zero");
        }
        if self.cpu_time_limit.is_zero() {
            return invalid("cpu time limit must be non-zero");
        }
        if self.wall_clock_timeout.is_zero() {
            return invalid("wall-clock timeout must be non-zero");
        }
        if self.max_output_bytes == 0 {
            return invalid("max output bytes must be non-zero");
        }
        if self.worker.program.as_os_str().is_empty() {
            return invalid("worker program must be set");
        }
        self.filesystem_policy.validate()?;
        self.network_policy.validate()
    }

    /// The capability set the child actually receives.
    ///
    /// Denials are kept as given. File and network grants outside the
    /// policies are dropped, and the policies' own denials are added.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidConfig`] if the config is invalid, or
    /// if a grant with a wildcard resource would slip past a policy that
    /// allows some access.
    pub fn child_capabilities(&self) -> SandboxResult<CapabilitySet> {
        self.validate()?;
        let file_bounds = self.filesystem_policy.bounds()?;
        let net_bounds = self.network_policy.bounds()?;
        let locked_down = self.filesystem_policy == FilesystemPolicy::Deny
            && self.network_policy == NetworkPolicy::Deny;

        let mut narrowed = CapabilitySet::new();
        for capability in &self.capability_set {
            if !capability.is_negated() {
                let bounds = match capability.resource() {
                    WILDCARD if !locked_down => {
                        return Err(SandboxError::InvalidConfig(format!(
                            "grant `{capability}` has a wildcard resource; \
                             name the resource when a filesystem or network policy allows access"
                        )));
                    },
                    FILE_RESOURCE => Some(&file_bounds),
                    NET_RESOURCE => Some(&net_bounds),
                    _ => None,
                };
                if bounds.is_some_and(|b| !b.iter().any(|bound| bound.subsumes(capability))) {
                    debug!(%capability, "Dropping grant outside sandbox policy");
                    continue;
                }
            }
            narrowed.insert(capability.clone()).map_err(invalid_set)?;
        }

        for capability in self
            .filesystem_policy
            .denials()?
            .into_iter()
            .chain(self.network_policy.denials()?)
        {
            narrowed.insert(capability).map_err(invalid_set)?;
        }
        Ok(narrowed)
    }
}

fn invalid_set(e: CapabilityError) -> SandboxError {
    SandboxError::InvalidConfig(e.to_string())
}

fn bound(resource: &str, operation: &str, pattern: &str) -> SandboxResult<Capability> {
    Capability::new(resource, operation, pattern).map_err(invalid_set)
}

fn denial(resource: &str, operation: &str) -> SandboxResult<Capability> {
    Capability::deny(resource, operation, "**").map_err(invalid_set)
}

/// `<root>/**` for an absolute, glob-free root.
fn root_pattern(root: &Path) -> SandboxResult<String> {
    let invalid = |reason: &str| {
        SandboxError::InvalidConfig(format!("policy root {}: {reason}", root.display()))
    };
    let text = root.to_str().ok_or_else(|| invalid("not valid UTF-8"))?;
    if !root.is_absolute() {
        return Err(invalid("must be absolute"));
    }
    if text.contains(['*', '[', ']']) {
        return Err(invalid("must not contain glob characters"));
    }
    if root.components().any(|c| c == Component::ParentDir) {
        return Err(invalid("must not contain `..`"));
    }
    Ok(format!("{}/**", text.trim_end_matches('/')))
}
