//! Sandbox error types.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A resource limit enforced on the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ResourceLimit {
    /// Data segment size in bytes.
    Memory {
        /// Configured limit.
        bytes: u64,
    },
    /// Processor time.
    CpuTime {
        /// Configured limit in whole seconds.
        seconds: u64,
    },
}

impl fmt::Display for ResourceLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory { bytes } => write!(f, "memory limit of {bytes} bytes"),
            Self::CpuTime { seconds } => write!(f, "cpu time limit of {seconds}s"),
        }
    }
}

/// Errors from sandboxed execution.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The wall-clock watchdog fired and the child was killed.
    #[error("sandboxed program timed out after {after:?}")]
    Timeout {
        /// The configured wall-clock timeout.
        after: Duration,
    },

    /// The child hit an OS-enforced resource limit.
    #[error("sandboxed program exceeded its {limit}")]
    ResourceExceeded {
        /// The limit that was hit.
        limit: ResourceLimit,
    },

    /// The child crashed or broke the channel protocol.
    #[error("sandboxed program crashed: {reason}")]
    Crashed {
        /// What went wrong.
        reason: String,
    },

    /// A frame on the channel declared a length above the limit.
    #[error("channel frame of {declared} bytes exceeds limit of {limit} bytes")]
    ChannelOverflow {
        /// Maximum accepted frame size.
        limit: usize,
        /// Size the frame declared.
        declared: usize,
    },

    /// The program ran to completion but reported an error.
    #[error("sandboxed program failed: {message}")]
    ProgramFailed {
        /// Error reported by the worker.
        message: String,
    },

    /// The run was cancelled by the host.
    #[error("sandboxed run was cancelled")]
    Cancelled,

    /// The sandbox configuration is unusable.
    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),

    /// The worker process could not be started.
    #[error("failed to spawn sandbox worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// Channel I/O failed.
    #[error("sandbox channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    pub(crate) fn crashed(reason: impl Into<String>) -> Self {
        Self::Crashed {
            reason: reason.into(),
        }
    }

    /// Whether the error came from an exhausted limit rather than a fault.
    #[must_use]
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::ResourceExceeded { .. } | Self::ChannelOverflow { .. }
        )
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = Result<T, SandboxError>;
