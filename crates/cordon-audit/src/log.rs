//! Audit log - append-only record of capability decisions.
//!
//! Appends go to memory first. When a sink is attached, each entry is also
//! queued on an unbounded channel so disk I/O never runs on the caller's
//! path.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::entry::AuditEntry;
use crate::error::AuditResult;
use crate::sink::{AuditSinkHandle, spawn_jsonl_sink};

/// Entries and the denied tally, updated together under one lock.
#[derive(Debug, Default)]
struct Records {
    entries: Vec<Arc<AuditEntry>>,
    denied: usize,
}

#[derive(Debug, Default)]
struct Inner {
    records: RwLock<Records>,
    forward: Option<mpsc::UnboundedSender<Arc<AuditEntry>>>,
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, Records> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared handle to an audit log.
///
/// Cloning is cheap; all clones append to the same log.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    inner: Arc<Inner>,
}

impl AuditLog {
    /// Create an in-memory audit log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log that also forwards every entry to `forward`.
    #[must_use]
    pub fn forwarding(forward: mpsc::UnboundedSender<Arc<AuditEntry>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                forward: Some(forward),
                ..Inner::default()
            }),
        }
    }

    /// Create a log persisted as JSON lines at `path`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened for appending.
    pub fn with_jsonl_sink(path: impl AsRef<Path>) -> AuditResult<(Self, AuditSinkHandle)> {
        let (tx, handle) = spawn_jsonl_sink(path)?;
        Ok((Self::forwarding(tx), handle))
    }

    /// Append an entry. Never fails and never blocks on I/O.
    ///
    /// The sink receives entries in the same order as the in-memory log.
    pub fn record(&self, entry: AuditEntry) {
        let entry = Arc::new(entry);
        let forwarded = {
            let mut records = self
                .inner
                .records
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            records.entries.push(Arc::clone(&entry));
            if entry.is_denied() {
                records.denied = records.denied.saturating_add(1);
            }
            self.inner
                .forward
                .as_ref()
                .is_none_or(|forward| forward.send(Arc::clone(&entry)).is_ok())
        };

        if !forwarded {
            warn!(entry_id = %entry.id, "Audit sink closed; entry kept in memory only");
        }

        debug!(
            entry_id = %entry.id,
            decision = %entry.decision,
            capability = %entry.capability,
            "Recorded audit entry"
        );
    }

    /// Iterate over the entries present now.
    ///
    /// Entries appended after this call are not yielded. Calling again starts
    /// a fresh read from the first entry.
    #[must_use]
    pub fn entries(&self) -> AuditEntries {
        AuditEntries {
            inner: Arc::clone(&self.inner),
            next: 0,
            end: self.len(),
        }
    }

    /// Most recent entry.
    #[must_use]
    pub fn last(&self) -> Option<Arc<AuditEntry>> {
        self.inner.read().entries.last().cloned()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of denied entries.
    #[must_use]
    pub fn denied_count(&self) -> usize {
        self.inner.read().denied
    }

    /// Number of granted entries.
    #[must_use]
    pub fn granted_count(&self) -> usize {
        let records = self.inner.read();
        records.entries.len().saturating_sub(records.denied)
    }
}

/// Lazy, bounded iterator over an [`AuditLog`].
#[derive(Debug)]
pub struct AuditEntries {
    inner: Arc<Inner>,
    next: usize,
    end: usize,
}

impl Iterator for AuditEntries {
    type Item = Arc<AuditEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let entry = self.inner.read().entries.get(self.next).cloned()?;
        self.next = self.next.saturating_add(1);
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for AuditEntries {}
