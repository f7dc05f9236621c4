//! Background JSON-lines sink.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::entry::AuditEntry;
use crate::error::{AuditError, AuditResult};

/// Handle to a running sink task.
#[derive(Debug)]
pub struct AuditSinkHandle {
    path: PathBuf,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<AuditResult<u64>>,
}

impl AuditSinkHandle {
    /// File the sink writes to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write everything queued so far, flush, and stop the task.
    ///
    /// Returns the number of entries written over the sink's lifetime.
    ///
    /// # Errors
    ///
    /// Returns the task's I/O error, or [`AuditError::SinkTaskFailed`] if the
    /// task panicked.
    pub async fn shutdown(self) -> AuditResult<u64> {
        // The task may already have stopped because every sender was dropped.
        let _ = self.shutdown.send(());
        let written = self
            .task
            .await
            .map_err(|e| AuditError::SinkTaskFailed(e.to_string()))??;
        info!(path = %self.path.display(), written, "Audit sink stopped");
        Ok(written)
    }
}

/// Open `path` for appending and spawn a task writing forwarded entries to it.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if the file cannot be opened.
pub fn spawn_jsonl_sink(
    path: impl AsRef<Path>,
) -> AuditResult<(mpsc::UnboundedSender<Arc<AuditEntry>>, AuditSinkHandle)> {
    let path = path.as_ref().to_path_buf();
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let writer = BufWriter::new(File::from_std(file));

    let (tx, rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(run_sink(rx, writer, shutdown_rx));

    debug!(path = %path.display(), "Spawned audit sink");
    Ok((
        tx,
        AuditSinkHandle {
            path,
            shutdown: shutdown_tx,
            task,
        },
    ))
}

async fn run_sink(
    mut rx: mpsc::UnboundedReceiver<Arc<AuditEntry>>,
    mut writer: BufWriter<File>,
    mut shutdown: oneshot::Receiver<()>,
) -> AuditResult<u64> {
    let mut written: u64 = 0;
    loop {
        tokio::select! {
            biased;
            entry = rx.recv() => {
                let Some(entry) = entry else { break };
                write_line(&mut writer, &entry).await?;
                written = written.saturating_add(1);
                if rx.is_empty() {
                    writer.flush().await?;
                }
            },
            _ = &mut shutdown => {
                while let Ok(entry) = rx.try_recv() {
                    write_line(&mut writer, &entry).await?;
                    written = written.saturating_add(1);
                }
                break;
            },
        }
    }
    writer.flush().await?;
    Ok(written)
}

async fn write_line(writer: &mut BufWriter<File>, entry: &AuditEntry) -> AuditResult<()> {
    let mut line = serde_json::to_vec(entry)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}

/// Read back a JSON-lines audit file. Blank lines are skipped.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a line does not decode.
pub fn load_jsonl(path: impl AsRef<Path>) -> AuditResult<Vec<AuditEntry>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| AuditError::CorruptRecord {
                line: index.saturating_add(1),
                reason: e.to_string(),
            })
        })
        .collect()
}
