//! Parent-side supervision of sandboxed runs.
//!
//! Each run is one worker process, one request and one response. The
//! manager owns the watchdog and the child's lifetime: every path out of
//! [`SandboxRun::wait`] leaves the child reaped.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SandboxConfig;
use crate::error::{ResourceLimit, SandboxError, SandboxResult};
use crate::platform;
use crate::protocol::{
    CompiledUnit, MAX_REQUEST_FRAME_BYTES, ResourceKind, ResourceUsage, WorkerOutcome,
    WorkerRequest, WorkerResponse, read_frame, response_frame_limit, write_frame,
};

/// Environment variable forwarded to the worker to set its log level.
pub const WORKER_LOG_ENV: &str = "CORDON_WORKER_LOG";

/// Printed by the Rust runtime when an allocation fails and the process
/// aborts.
const ALLOC_FAILURE_MARKER: &str = "memory allocation of";

/// Bytes of worker stderr kept for diagnostics.
const STDERR_TAIL_BYTES: usize = 8192;

/// How long to wait for a worker to exit once it has answered.
const REAP_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of one sandboxed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SandboxState {
    /// Configured, no process yet.
    Created,
    /// Worker process started.
    Spawned,
    /// Request delivered, program executing.
    Running,
    /// The program ran to the end, successfully or with a program error.
    Completed,
    /// The wall-clock watchdog fired.
    TimedOut,
    /// The memory limit was hit.
    MemoryExceeded,
    /// The CPU limit was hit.
    CpuExceeded,
    /// The worker died or broke the protocol.
    Crashed,
    /// The host cancelled the run.
    Cancelled,
}

impl SandboxState {
    /// Whether no further transition can happen.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Created | Self::Spawned | Self::Running)
    }
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Spawned => "spawned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::MemoryExceeded => "memory_exceeded",
            Self::CpuExceeded => "cpu_exceeded",
            Self::Crashed => "crashed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Output of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxOutput {
    /// Program output, at most `max_output_bytes`.
    pub output: Vec<u8>,
    /// Whether output was cut off.
    pub truncated: bool,
    /// Resource use reported by the worker.
    pub usage: ResourceUsage,
    /// Wall-clock time from spawn to exit.
    pub elapsed: Duration,
}

impl SandboxOutput {
    /// Output decoded as UTF-8, lossily.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }
}

/// Limits captured from the config at spawn time.
#[derive(Debug, Clone, Copy)]
struct RunLimits {
    wall_clock_timeout: Duration,
    memory_bytes: u64,
    cpu_seconds: u64,
    max_output_bytes: usize,
}

impl RunLimits {
    fn exceeded(self, kind: ResourceKind) -> (SandboxState, SandboxError) {
        match kind {
            ResourceKind::Memory => (
                SandboxState::MemoryExceeded,
                SandboxError::ResourceExceeded {
                    limit: ResourceLimit::Memory {
                        bytes: self.memory_bytes,
                    },
                },
            ),
            ResourceKind::CpuTime => (
                SandboxState::CpuExceeded,
                SandboxError::ResourceExceeded {
                    limit: ResourceLimit::CpuTime {
                        seconds: self.cpu_seconds,
                    },
                },
            ),
        }
    }
}

type ActiveSet = Arc<Mutex<HashSet<u32>>>;

/// Removes a pid from the active set when the run is dropped.
#[derive(Debug)]
struct ActiveGuard {
    active: ActiveSet,
    pid: u32,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.pid);
    }
}

/// Launches and tracks sandboxed runs.
///
/// Cloning is cheap; clones share the set of active runs.
#[derive(Debug, Clone, Default)]
pub struct SandboxManager {
    active: ActiveSet,
}

impl SandboxManager {
    /// Create a manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `unit` to a terminal state.
    ///
    /// # Errors
    ///
    /// Returns a [`SandboxError`] for every outcome other than a clean
    /// completion.
    pub async fn run(
        &self,
        unit: &CompiledUnit,
        config: &SandboxConfig,
    ) -> SandboxResult<SandboxOutput> {
        self.spawn(unit, config)?.wait().await
    }

    /// Start a worker for `unit` without waiting for it.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidConfig`] for a bad config and
    /// [`SandboxError::Spawn`] if the worker cannot be started.
    pub fn spawn(&self, unit: &CompiledUnit, config: &SandboxConfig) -> SandboxResult<SandboxRun> {
        let capabilities = config.child_capabilities()?;
        let request = WorkerRequest {
            unit: unit.clone(),
            capabilities,
            max_output_bytes: config.max_output_bytes,
        };

        let (state, _) = watch::channel(SandboxState::Created);

        let mut cmd = Command::new(&config.worker.program);
        cmd.args(&config.worker.args)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Ok(level) = std::env::var(WORKER_LOG_ENV) {
            cmd.env(WORKER_LOG_ENV, level);
        }
        platform::confine(&mut cmd, config);

        let child = cmd.spawn().map_err(SandboxError::Spawn)?;
        let pid = child
            .id()
            .ok_or_else(|| SandboxError::crashed("worker exited before it could be tracked"))?;
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pid);
        state.send_replace(SandboxState::Spawned);

        info!(
            pid,
            unit = %unit.name,
            capabilities = request.capabilities.len(),
            "Sandbox worker spawned"
        );

        Ok(SandboxRun {
            pid,
            child,
            request,
            limits: RunLimits {
                wall_clock_timeout: config.wall_clock_timeout,
                memory_bytes: config.memory_limit_bytes,
                cpu_seconds: config.cpu_seconds(),
                max_output_bytes: config.max_output_bytes,
            },
            state,
            cancel: CancellationToken::new(),
            started: Instant::now(),
            _active: ActiveGuard {
                active: Arc::clone(&self.active),
                pid,
            },
        })
    }

    /// Pids of runs that have been spawned and not yet dropped.
    #[must_use]
    pub fn active_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        pids.sort_unstable();
        pids
    }

    /// Number of active runs.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

enum Exchange {
    Answered(SandboxResult<WorkerResponse>),
    TimedOut,
    Cancelled,
}

/// One live worker.
///
/// Dropping a run without waiting kills the worker.
#[derive(Debug)]
pub struct SandboxRun {
    pid: u32,
    child: Child,
    request: WorkerRequest,
    limits: RunLimits,
    state: watch::Sender<SandboxState>,
    cancel: CancellationToken,
    started: Instant,
    _active: ActiveGuard,
}

impl SandboxRun {
    /// Worker process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SandboxState {
        *self.state.borrow()
    }

    /// Follow state changes, including the terminal one.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SandboxState> {
        self.state.subscribe()
    }

    /// Token that cancels this run when triggered.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Deliver the program, then wait for a terminal state.
    ///
    /// # Errors
    ///
    /// - [`SandboxError::Timeout`] when the watchdog fires.
    /// - [`SandboxError::ResourceExceeded`] when a limit is hit.
    /// - [`SandboxError::ChannelOverflow`] when the response is oversized.
    /// - [`SandboxError::ProgramFailed`] when the program reports an error.
    /// - [`SandboxError::Cancelled`] when the cancel token fires.
    /// - [`SandboxError::Crashed`] for anything else.
    pub async fn wait(mut self) -> SandboxResult<SandboxOutput> {
        let (Some(mut stdin), Some(mut stdout), Some(stderr)) = (
            self.child.stdin.take(),
            self.child.stdout.take(),
            self.child.stderr.take(),
        ) else {
            self.kill().await;
            return self.finish(
                SandboxState::Crashed,
                Err(SandboxError::crashed("worker pipes unavailable")),
            );
        };
        let stderr_tail = tokio::spawn(read_tail(stderr, STDERR_TAIL_BYTES));

        let frame_limit = response_frame_limit(self.limits.max_output_bytes);
        let remaining = self
            .limits
            .wall_clock_timeout
            .saturating_sub(self.started.elapsed());

        let exchange = {
            let state = &self.state;
            let request = &self.request;
            async move {
                write_frame(&mut stdin, request, MAX_REQUEST_FRAME_BYTES).await?;
                drop(stdin);
                state.send_replace(SandboxState::Running);
                read_frame::<_, WorkerResponse>(&mut stdout, frame_limit).await
            }
        };

        let exchanged = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Exchange::Cancelled,
            result = timeout(remaining, exchange) => match result {
                Ok(answer) => Exchange::Answered(answer),
                Err(_) => Exchange::TimedOut,
            },
        };

        match exchanged {
            Exchange::Cancelled => {
                self.kill().await;
                self.finish(SandboxState::Cancelled, Err(SandboxError::Cancelled))
            },
            Exchange::TimedOut => {
                self.kill().await;
                let after = self.limits.wall_clock_timeout;
                self.finish(SandboxState::TimedOut, Err(SandboxError::Timeout { after }))
            },
            Exchange::Answered(Err(overflow @ SandboxError::ChannelOverflow { .. })) => {
                self.kill().await;
                self.finish(SandboxState::Crashed, Err(overflow))
            },
            Exchange::Answered(Ok(response)) => {
                let status = self.reap().await;
                self.accept(response, status)
            },
            Exchange::Answered(Err(protocol)) => {
                debug!(pid = self.pid, error = %protocol, "Worker channel failed");
                let status = self.reap().await;
                let stderr = collect_tail(stderr_tail).await;
                let (state, error) = self.classify_exit(status, &stderr);
                self.finish(state, Err(error))
            },
        }
    }

    fn accept(
        &self,
        response: WorkerResponse,
        status: Option<ExitStatus>,
    ) -> SandboxResult<SandboxOutput> {
        match status {
            Some(status) if status.success() => {},
            Some(status) => {
                return self.finish(
                    SandboxState::Crashed,
                    Err(SandboxError::crashed(format!(
                        "worker answered but exited with {status}"
                    ))),
                );
            },
            None => {
                return self.finish(
                    SandboxState::Crashed,
                    Err(SandboxError::crashed("worker answered but did not exit")),
                );
            },
        }

        match response.outcome {
            WorkerOutcome::Completed {
                mut output,
                mut truncated,
            } => {
                if output.len() > self.limits.max_output_bytes {
                    output.truncate(self.limits.max_output_bytes);
                    truncated = true;
                }
                self.finish(
                    SandboxState::Completed,
                    Ok(SandboxOutput {
                        output,
                        truncated,
                        usage: response.usage,
                        elapsed: self.started.elapsed(),
                    }),
                )
            },
            WorkerOutcome::Failed { message } => self.finish(
                SandboxState::Completed,
                Err(SandboxError::ProgramFailed { message }),
            ),
            WorkerOutcome::ResourceExceeded { limit } => {
                let (state, error) = self.limits.exceeded(limit);
                self.finish(state, Err(error))
            },
        }
    }

    /// Map a worker that died without answering to a terminal state.
    fn classify_exit(
        &self,
        status: Option<ExitStatus>,
        stderr: &str,
    ) -> (SandboxState, SandboxError) {
        let Some(status) = status else {
            return (
                SandboxState::Crashed,
                SandboxError::crashed("worker broke the protocol and had to be killed"),
            );
        };

        if stderr.contains(ALLOC_FAILURE_MARKER) {
            return self.limits.exceeded(ResourceKind::Memory);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;

            if let Some(signal) = status.signal() {
                if signal == nix::sys::signal::Signal::SIGXCPU as i32 {
                    return self.limits.exceeded(ResourceKind::CpuTime);
                }
                let name = nix::sys::signal::Signal::try_from(signal)
                    .map_or_else(|_| signal.to_string(), |s| s.as_str().to_string());
                return (
                    SandboxState::Crashed,
                    SandboxError::crashed(format!(
                        "worker killed by {name}{}",
                        stderr_suffix(stderr)
                    )),
                );
            }
        }

        (
            SandboxState::Crashed,
            SandboxError::crashed(format!(
                "worker exited with {status} without answering{}",
                stderr_suffix(stderr)
            )),
        )
    }

    /// Wait for the worker to exit, killing it if it lingers.
    async fn reap(&mut self) -> Option<ExitStatus> {
        match timeout(REAP_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!(pid = self.pid, error = %e, "Failed to wait for sandbox worker");
                self.kill().await;
                None
            },
            Err(_) => {
                warn!(pid = self.pid, "Sandbox worker did not exit after answering");
                self.kill().await;
                None
            },
        }
    }

    /// Kill and reap the worker.
    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(pid = self.pid, error = %e, "Failed to kill sandbox worker");
        }
    }

    fn finish<T>(&self, state: SandboxState, result: SandboxResult<T>) -> SandboxResult<T> {
        self.state.send_replace(state);
        let elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &result {
            Ok(_) => info!(pid = self.pid, %state, elapsed_ms, "Sandboxed run finished"),
            Err(e) => warn!(pid = self.pid, %state, elapsed_ms, error = %e, "Sandboxed run failed"),
        }
        result
    }
}

async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, keep: usize) -> Vec<u8> {
    let mut tail = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                let excess = tail.len().saturating_sub(keep);
                if excess > 0 {
                    tail.drain(..excess);
                }
            },
        }
    }
    tail
}

async fn collect_tail(task: tokio::task::JoinHandle<Vec<u8>>) -> String {
    match timeout(Duration::from_secs(1), task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        _ => String::new(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}
