//! Reference executor used by the bundled `cordon-worker` binary.
//!
//! A probe program is a JSON array of steps. It has no language of its own;
//! it exists so a host can drive every sandbox outcome (output, denial,
//! memory and CPU exhaustion, timeouts, crashes) without embedding a real
//! interpreter. The `raw_read` and `raw_connect` steps go straight to the OS
//! with no capability check, standing in for an interpreter that escapes its
//! bridge, so the OS-level confinement can be observed on its own.
//!
//! ```json
//! [
//!   {"op": "check", "capability": "file:read:/data/report.csv"},
//!   {"op": "emit", "text": "ok\n"}
//! ]
//! ```

use std::io::Write;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::protocol::{CompiledUnit, ResourceKind};
use crate::worker::{ExecutionContext, ExecutionError, Executor};

/// Byte stride used to touch freshly allocated memory.
const PAGE_STRIDE: usize = 4096;

/// One probe instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ProbeStep {
    /// Append text to the output.
    Emit {
        /// Text to append.
        text: String,
    },
    /// Require a capability; a denial fails the program.
    Check {
        /// Required capability, `resource:operation:path`.
        capability: String,
    },
    /// Allocate, touch and hold memory until the program ends.
    Allocate {
        /// Bytes to allocate.
        bytes: usize,
    },
    /// Burn processor time.
    Spin {
        /// Wall-clock milliseconds to spin for.
        millis: u64,
    },
    /// Sleep without using processor time.
    Sleep {
        /// Milliseconds to sleep.
        millis: u64,
    },
    /// Read a file and emit its contents without any capability check.
    RawRead {
        /// File to read.
        path: String,
    },
    /// Open a TCP connection without any capability check.
    RawConnect {
        /// `host:port` to connect to.
        address: String,
    },
    /// Exit the worker immediately without answering.
    Exit {
        /// Process exit code.
        code: i32,
    },
    /// Abort the worker.
    Abort,
}

/// Build a probe program.
///
/// # Errors
///
/// Returns an error if the steps cannot be serialized.
pub fn compile(name: &str, steps: &[ProbeStep]) -> serde_json::Result<CompiledUnit> {
    Ok(CompiledUnit::new(name, serde_json::to_vec(steps)?))
}

/// Executor interpreting [`ProbeStep`] programs.
#[derive(Debug, Default)]
pub struct ProbeExecutor {
    held: Vec<Vec<u8>>,
}

impl ProbeExecutor {
    /// Create an executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently held by `allocate` steps.
    #[must_use]
    pub fn held_bytes(&self) -> usize {
        self.held.iter().map(Vec::len).fold(0, usize::saturating_add)
    }

    fn step(&mut self, step: ProbeStep, ctx: &mut ExecutionContext) -> Result<(), ExecutionError> {
        match step {
            ProbeStep::Emit { text } => ctx
                .output()
                .write_all(text.as_bytes())
                .map_err(|e| ExecutionError::Failed(e.to_string())),
            ProbeStep::Check { capability } => Ok(ctx.check(&capability)?),
            ProbeStep::Allocate { bytes } => {
                let mut block: Vec<u8> = Vec::new();
                block
                    .try_reserve_exact(bytes)
                    .map_err(|_| ExecutionError::ResourceExceeded(ResourceKind::Memory))?;
                block.resize(bytes, 0);
                for byte in block.iter_mut().step_by(PAGE_STRIDE) {
                    *byte = 1;
                }
                self.held.push(block);
                Ok(())
            },
            ProbeStep::Spin { millis } => {
                let start = Instant::now();
                let budget = Duration::from_millis(millis);
                let mut counter: u64 = 0;
                while start.elapsed() < budget {
                    counter = std::hint::black_box(counter.wrapping_add(1));
                }
                Ok(())
            },
            ProbeStep::Sleep { millis } => {
                std::thread::sleep(Duration::from_millis(millis));
                Ok(())
            },
            ProbeStep::RawRead { path } => {
                let contents = std::fs::read(&path)
                    .map_err(|e| ExecutionError::Failed(format!("read {path}: {e}")))?;
                ctx.output()
                    .write_all(&contents)
                    .map_err(|e| ExecutionError::Failed(e.to_string()))
            },
            ProbeStep::RawConnect { address } => TcpStream::connect(&address)
                .map(drop)
                .map_err(|e| ExecutionError::Failed(format!("connect {address}: {e}"))),
            ProbeStep::Exit { code } => std::process::exit(code),
            ProbeStep::Abort => std::process::abort(),
        }
    }
}

impl Executor for ProbeExecutor {
    fn execute(
        &mut self,
        unit: &CompiledUnit,
        ctx: &mut ExecutionContext,
    ) -> Result<(), ExecutionError> {
        let steps: Vec<ProbeStep> = serde_json::from_slice(&unit.payload)
            .map_err(|e| ExecutionError::Failed(format!("invalid probe program: {e}")))?;
        for step in steps {
            self.step(step, ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{WorkerOutcome, WorkerRequest};
    use crate::worker::handle;
    use cordon_capabilities::CapabilitySet;

    fn run(steps: &[ProbeStep], caps: &[&str]) -> (WorkerOutcome, ProbeExecutor) {
        let request = WorkerRequest {
            unit: compile("probe", steps).unwrap(),
            capabilities: CapabilitySet::parse(caps).unwrap(),
            max_output_bytes: 1024,
        };
        let mut exec = ProbeExecutor::new();
        let response = handle(request, &mut exec);
        (response.outcome, exec)
    }

    #[test]
    fn test_step_json_shape() {
        let steps: Vec<ProbeStep> = serde_json::from_str(
            r#"[{"op":"emit","text":"hi"},{"op":"allocate","bytes":16},{"op":"abort"}]"#,
        )
        .unwrap();
        assert_eq!(
            steps,
            vec![
                ProbeStep::Emit { text: "hi".into() },
                ProbeStep::Allocate { bytes: 16 },
                ProbeStep::Abort,
            ]
        );
    }

    #[test]
    fn test_emit_and_check() {
        let (outcome, _) = run(
            &[
                ProbeStep::Check {
                    capability: "env:read:HOME".into(),
                },
                ProbeStep::Emit { text: "done".into() },
            ],
            &["env:read:*"],
        );
        assert_eq!(
            outcome,
            WorkerOutcome::Completed {
                output: b"done".to_vec(),
                truncated: false,
            }
        );
    }

    #[test]
    fn test_denied_check_stops_program() {
        let (outcome, _) = run(
            &[
                ProbeStep::Check {
                    capability: "file:write:/etc/passwd".into(),
                },
                ProbeStep::Emit {
                    text: "unreachable".into(),
                },
            ],
            &["file:read:**"],
        );
        assert!(matches!(outcome, WorkerOutcome::Failed { .. }));
    }

    #[test]
    fn test_allocation_is_held() {
        let (outcome, exec) = run(&[ProbeStep::Allocate { bytes: 10_000 }], &[]);
        assert!(matches!(outcome, WorkerOutcome::Completed { .. }));
        assert_eq!(exec.held_bytes(), 10_000);
    }

    #[test]
    fn test_impossible_allocation_reports_memory() {
        let (outcome, _) = run(&[ProbeStep::Allocate { bytes: usize::MAX }], &[]);
        assert_eq!(
            outcome,
            WorkerOutcome::ResourceExceeded {
                limit: ResourceKind::Memory,
            }
        );
    }

    #[test]
    fn test_raw_read_skips_capability_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "unchecked").unwrap();

        let (outcome, _) = run(
            &[ProbeStep::RawRead {
                path: path.display().to_string(),
            }],
            &[],
        );
        assert_eq!(
            outcome,
            WorkerOutcome::Completed {
                output: b"unchecked".to_vec(),
                truncated: false,
            }
        );

        let (missing, _) = run(
            &[ProbeStep::RawRead {
                path: dir.path().join("absent").display().to_string(),
            }],
            &[],
        );
        let WorkerOutcome::Failed { message } = missing else {
            panic!("expected failure");
        };
        assert!(message.starts_with("read "));
    }

    #[test]
    fn test_invalid_program() {
        let request = WorkerRequest {
            unit: CompiledUnit::new("bad", b"{not json".to_vec()),
            capabilities: CapabilitySet::new(),
            max_output_bytes: 16,
        };
        let response = handle(request, &mut ProbeExecutor::new());
        let WorkerOutcome::Failed { message } = response.outcome else {
            panic!("expected failure");
        };
        assert!(message.starts_with("invalid probe program"));
    }
}
