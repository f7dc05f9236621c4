//! Child-side runtime.
//!
//! The worker reads one [`WorkerRequest`], installs a fresh root checker
//! built only from the request's capabilities, runs the program through an
//! [`Executor`] and answers with one [`WorkerResponse`]. Nothing from the
//! parent's capability stack crosses the process boundary.

use std::io::{self, Read, Write};

use cordon_audit::AuditLog;
use cordon_capabilities::{
    CapabilityChecker, CapabilityError, CapabilityResult, CapabilitySet, ambient,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::SandboxResult;
use crate::protocol::{
    CompiledUnit, MAX_REQUEST_FRAME_BYTES, ResourceKind, ResourceUsage, WorkerOutcome,
    WorkerRequest, WorkerResponse, read_frame_sync, response_frame_limit, write_frame_sync,
};

/// Why a program stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The program raised an error, including a denied capability.
    #[error("{0}")]
    Failed(String),

    /// The program hit a limit it could observe itself.
    #[error("resource exhausted: {0:?}")]
    ResourceExceeded(ResourceKind),
}

impl From<CapabilityError> for ExecutionError {
    fn from(e: CapabilityError) -> Self {
        Self::Failed(e.to_string())
    }
}

/// Runs compiled programs inside the worker.
pub trait Executor {
    /// Execute `unit` to completion.
    ///
    /// The root checker is installed as the ambient checker for the whole
    /// call, so bridge code may use [`ambient::check`] directly.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecutionError`] if the program fails.
    fn execute(
        &mut self,
        unit: &CompiledUnit,
        ctx: &mut ExecutionContext,
    ) -> Result<(), ExecutionError>;
}

/// Output buffer that stops growing at a fixed size.
///
/// Writes past the limit are accepted and dropped, and the buffer is
/// flagged as truncated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundedOutput {
    buf: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl BoundedOutput {
    /// Create a buffer holding at most `limit` bytes.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Bytes kept so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Whether any write was cut off.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// The kept bytes and the truncation flag.
    #[must_use]
    pub fn into_parts(self) -> (Vec<u8>, bool) {
        (self.buf, self.truncated)
    }
}

impl Write for BoundedOutput {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = self.limit.saturating_sub(self.buf.len());
        let kept = data.len().min(room);
        self.buf.extend_from_slice(&data[..kept]);
        if kept < data.len() {
            self.truncated = true;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// What an [`Executor`] can reach while running a program.
#[derive(Debug)]
pub struct ExecutionContext {
    output: BoundedOutput,
    audit: AuditLog,
}

impl ExecutionContext {
    fn new(max_output_bytes: usize, audit: AuditLog) -> Self {
        Self {
            output: BoundedOutput::new(max_output_bytes),
            audit,
        }
    }

    /// Check `required` against the worker's root checker.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Denied`] if the capability is not granted.
    pub fn check(&self, required: &str) -> CapabilityResult<()> {
        ambient::check(required)
    }

    /// Run `f` inside a narrower capability scope. Scopes `f` leaves open
    /// are discarded with it.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::ScopeExceeded`] if `requested` would widen
    /// the current scope.
    pub fn with_scope<T>(
        &mut self,
        requested: CapabilitySet,
        f: impl FnOnce(&mut Self) -> T,
    ) -> CapabilityResult<T> {
        ambient::with_scope(requested, || f(self))
    }

    /// The program's output buffer.
    pub fn output(&mut self) -> &mut BoundedOutput {
        &mut self.output
    }

    /// Capability decisions made so far in this worker.
    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }
}

/// Run one request to completion.
pub fn handle<E: Executor + ?Sized>(request: WorkerRequest, executor: &mut E) -> WorkerResponse {
    let audit = AuditLog::new();
    let checker = CapabilityChecker::new(request.capabilities, audit.clone());
    let mut ctx = ExecutionContext::new(request.max_output_bytes, audit);
    let unit = request.unit;

    let result = ambient::sync_run_with(checker, || executor.execute(&unit, &mut ctx));

    let mut usage = measure_usage();
    usage.checks = u64::try_from(ctx.audit.len()).unwrap_or(u64::MAX);
    usage.denied = u64::try_from(ctx.audit.denied_count()).unwrap_or(u64::MAX);

    let outcome = match result {
        Ok(()) => {
            let (output, truncated) = ctx.output.into_parts();
            WorkerOutcome::Completed { output, truncated }
        },
        Err(ExecutionError::Failed(message)) => WorkerOutcome::Failed { message },
        Err(ExecutionError::ResourceExceeded(limit)) => WorkerOutcome::ResourceExceeded { limit },
    };
    debug!(unit = %unit.name, checks = usage.checks, denied = usage.denied, "Program finished");
    WorkerResponse { outcome, usage }
}

/// Serve one request over arbitrary streams.
///
/// # Errors
///
/// Returns a [`SandboxError`](crate::SandboxError) if the request cannot be
/// read or the response cannot be written.
pub fn serve_io<R, W, E>(reader: &mut R, writer: &mut W, executor: &mut E) -> SandboxResult<()>
where
    R: Read,
    W: Write,
    E: Executor + ?Sized,
{
    let request: WorkerRequest = read_frame_sync(reader, MAX_REQUEST_FRAME_BYTES)?;
    info!(
        unit = %request.unit.name,
        capabilities = request.capabilities.len(),
        "Worker received program"
    );
    let limit = response_frame_limit(request.max_output_bytes);
    let response = handle(request, executor);
    write_frame_sync(writer, &response, limit)
}

/// Serve one request over stdin and stdout.
///
/// # Errors
///
/// See [`serve_io`].
pub fn serve<E: Executor + ?Sized>(executor: &mut E) -> SandboxResult<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve_io(&mut stdin.lock(), &mut stdout.lock(), executor)
}

#[cfg(unix)]
fn measure_usage() -> ResourceUsage {
    use nix::sys::resource::{UsageWho, getrusage};
    use nix::sys::time::TimeValLike;

    let Ok(usage) = getrusage(UsageWho::RUSAGE_SELF) else {
        return ResourceUsage::default();
    };
    let cpu_ms = usage
        .user_time()
        .num_milliseconds()
        .saturating_add(usage.system_time().num_milliseconds());
    let max_rss = u64::try_from(usage.max_rss()).unwrap_or(0);

    ResourceUsage {
        cpu_time_ms: u64::try_from(cpu_ms).unwrap_or(0),
        // Linux reports kilobytes, macOS bytes.
        max_rss_bytes: if cfg!(target_os = "macos") {
            max_rss
        } else {
            max_rss.saturating_mul(1024)
        },
        ..ResourceUsage::default()
    }
}

#[cfg(not(unix))]
fn measure_usage() -> ResourceUsage {
    ResourceUsage::default()
}
