//! Sandbox worker process.
//!
//! Reads one program from stdin, runs it with the probe executor and writes
//! the response to stdout. Logs go to stderr; stdout carries only frames.

use anyhow::Context;
use cordon_sandbox::WORKER_LOG_ENV;
use cordon_sandbox::probe::ProbeExecutor;
use cordon_sandbox::worker;
use cordon_telemetry::{LogConfig, LogTarget, setup_logging};

fn main() -> anyhow::Result<()> {
    let level = std::env::var(WORKER_LOG_ENV).unwrap_or_else(|_| "warn".to_string());
    setup_logging(
        &LogConfig::new(level)
            .with_target(LogTarget::Stderr)
            .without_ansi(),
    )
    .context("failed to set up worker logging")?;

    worker::serve(&mut ProbeExecutor::new()).context("sandbox worker failed")?;
    Ok(())
}
