//! OS-level confinement applied to the worker between fork and exec.
//!
//! Linux gets Landlock filesystem rules, a Landlock TCP deny when the
//! network policy is `Deny`, resource limits and a parent-death signal.
//! Other Unix platforms get resource limits only. The capability layer
//! inside the worker applies on every platform.

#![allow(unsafe_code)]

use std::path::{Path, PathBuf};

use tokio::process::Command;
#[cfg(not(target_os = "linux"))]
use tracing::warn;

use crate::config::{NetworkPolicy, SandboxConfig};

/// Directories the dynamic loader needs to start the worker.
const SYSTEM_LIBRARY_PATHS: &[&str] = &[
    "/lib",
    "/lib64",
    "/usr/lib",
    "/usr/lib64",
    "/usr/local/lib",
];

/// `RLIMIT_NOFILE` for the worker.
const MAX_OPEN_FILES: u64 = 64;

/// Limits installed with `setrlimit` in the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChildLimits {
    pub(crate) memory_bytes: u64,
    pub(crate) cpu_seconds: u64,
    pub(crate) open_files: u64,
}

impl ChildLimits {
    pub(crate) fn from_config(config: &SandboxConfig) -> Self {
        Self {
            memory_bytes: config.memory_limit_bytes,
            cpu_seconds: config.cpu_seconds(),
            open_files: MAX_OPEN_FILES,
        }
    }
}

/// One Landlock path rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LandlockPathRule {
    pub(crate) path: PathBuf,
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl LandlockPathRule {
    fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read: true,
            write: false,
        }
    }
}

/// Paths the worker may touch: system libraries, its own directory and the
/// filesystem policy roots. Missing system paths are left out.
pub(crate) fn landlock_rules(config: &SandboxConfig) -> Vec<LandlockPathRule> {
    let mut rules: Vec<LandlockPathRule> = SYSTEM_LIBRARY_PATHS
        .iter()
        .map(Path::new)
        .filter(|p| p.exists())
        .map(LandlockPathRule::read_only)
        .collect();

    if let Some(dir) = config.worker.program.parent().filter(|d| !d.as_os_str().is_empty()) {
        rules.push(LandlockPathRule::read_only(dir));
    }

    let policy = &config.filesystem_policy;
    let writable = policy.write_roots();
    for root in policy.read_roots() {
        rules.push(LandlockPathRule {
            path: root.to_path_buf(),
            read: true,
            write: writable.iter().any(|w| w == root),
        });
    }
    rules
}

#[cfg(target_os = "linux")]
pub(crate) struct PreparedLandlockRules {
    /// Pre-opened `(PathFd, read, write)` tuples.
    rules: Vec<(landlock::PathFd, bool, bool)>,
    deny_tcp: bool,
}

/// Open every rule path in the parent, before `fork()`.
///
/// Paths that cannot be opened are skipped.
#[cfg(target_os = "linux")]
pub(crate) fn prepare_landlock_rules(
    rules: &[LandlockPathRule],
    deny_tcp: bool,
) -> PreparedLandlockRules {
    use landlock::PathFd;

    let rules = rules
        .iter()
        .filter(|rule| rule.read || rule.write)
        .filter_map(|rule| {
            PathFd::new(&rule.path)
                .ok()
                .map(|fd| (fd, rule.read, rule.write))
        })
        .collect();

    PreparedLandlockRules { rules, deny_tcp }
}

/// Build and enforce the ruleset in the child, inside `pre_exec`.
///
/// A kernel without Landlock leaves the ruleset unenforced, which is not an
/// error: the capability layer and resource limits still apply.
#[cfg(target_os = "linux")]
pub(crate) fn enforce_landlock_rules(prepared: PreparedLandlockRules) -> Result<(), String> {
    use landlock::{
        ABI, Access, AccessFs, AccessNet, CompatLevel, Compatible, PathBeneath, Ruleset,
        RulesetAttr, RulesetCreatedAttr,
    };

    let abi = ABI::V5;

    let mut ruleset = Ruleset::default()
        .set_compatibility(CompatLevel::BestEffort)
        .handle_access(AccessFs::from_all(abi))
        .map_err(|e| format!("failed to create Landlock ruleset: {e}"))?;
    if prepared.deny_tcp {
        // Handled with no rules: every bind and connect is refused.
        ruleset = ruleset
            .handle_access(AccessNet::from_all(abi))
            .map_err(|e| format!("failed to create Landlock ruleset: {e}"))?;
    }
    let mut ruleset = ruleset
        .create()
        .map_err(|e| format!("failed to create Landlock ruleset: {e}"))?;

    for (fd, read, write) in prepared.rules {
        let access = match (read, write) {
            (true, true) => AccessFs::from_all(abi),
            (true, false) => AccessFs::from_read(abi),
            (false, true) => AccessFs::from_write(abi),
            (false, false) => continue,
        };
        ruleset = ruleset
            .add_rule(PathBeneath::new(fd, access))
            .map_err(|e| format!("failed to add Landlock rule: {e}"))?;
    }

    ruleset
        .restrict_self()
        .map_err(|e| format!("failed to enforce Landlock ruleset: {e}"))?;
    Ok(())
}

/// Install resource limits in the child, inside `pre_exec`.
///
/// The CPU hard limit sits one second above the soft limit so the kernel
/// delivers `SIGXCPU` before `SIGKILL`.
#[cfg(unix)]
pub(crate) fn apply_resource_limits(limits: &ChildLimits) -> Result<(), std::io::Error> {
    use nix::sys::resource::{Resource, setrlimit};

    setrlimit(Resource::RLIMIT_DATA, limits.memory_bytes, limits.memory_bytes)?;
    setrlimit(
        Resource::RLIMIT_CPU,
        limits.cpu_seconds,
        limits.cpu_seconds.saturating_add(1),
    )?;
    setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
    setrlimit(Resource::RLIMIT_NOFILE, limits.open_files, limits.open_files)?;
    Ok(())
}

/// Attach OS-level confinement to the worker command.
#[cfg(target_os = "linux")]
pub(crate) fn confine(cmd: &mut Command, config: &SandboxConfig) {
    use nix::sys::prctl;
    use nix::sys::signal::Signal;

    let deny_tcp = config.network_policy == NetworkPolicy::Deny;
    let mut prepared = Some(prepare_landlock_rules(&landlock_rules(config), deny_tcp));
    let limits = ChildLimits::from_config(config);

    // SAFETY: the closure runs between fork and exec. It only issues
    // prctl, setrlimit and Landlock syscalls on descriptors opened before
    // the fork, and does not touch locks held by other parent threads.
    unsafe {
        cmd.pre_exec(move || {
            prctl::set_pdeathsig(Signal::SIGKILL).map_err(std::io::Error::from)?;
            apply_resource_limits(&limits)?;
            let rules = prepared
                .take()
                .ok_or_else(|| std::io::Error::other("pre_exec called more than once"))?;
            enforce_landlock_rules(rules)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::PermissionDenied, e))?;
            Ok(())
        });
    }
}

/// Attach OS-level confinement to the worker command.
#[cfg(all(unix, not(target_os = "linux")))]
pub(crate) fn confine(cmd: &mut Command, config: &SandboxConfig) {
    let limits = ChildLimits::from_config(config);
    if config.network_policy == NetworkPolicy::Deny || !landlock_rules(config).is_empty() {
        warn!(
            "Filesystem and network confinement unavailable on this platform; \
             capability checks and resource limits only"
        );
    }

    // SAFETY: the closure only issues setrlimit syscalls.
    unsafe {
        cmd.pre_exec(move || apply_resource_limits(&limits));
    }
}

/// Attach OS-level confinement to the worker command.
#[cfg(not(unix))]
pub(crate) fn confine(_cmd: &mut Command, _config: &SandboxConfig) {
    warn!("No OS-level confinement on this platform; capability checks only");
}
