//! Runtime capability checks.
//!
//! [`CapabilityChecker`] pairs a task's [`ContextStack`] with the caller's
//! [`AuditLog`]. Every call to [`check`](CapabilityChecker::check) appends
//! exactly one audit entry, whatever the outcome.

use std::sync::Arc;

use cordon_audit::{AuditDecision, AuditEntry, AuditLog};
use tracing::debug;

use crate::capability::CapabilityRequest;
use crate::context::{CapabilityContext, ContextHandle, ContextStack, Resolution};
use crate::error::{CapabilityError, CapabilityResult};
use crate::set::CapabilitySet;

/// Checks required capabilities against the current context.
#[derive(Debug, Clone)]
pub struct CapabilityChecker {
    stack: ContextStack,
    audit: AuditLog,
}

impl CapabilityChecker {
    /// Create a checker whose root context holds `defaults`.
    #[must_use]
    pub fn new(defaults: CapabilitySet, audit: AuditLog) -> Self {
        Self {
            stack: ContextStack::new(defaults),
            audit,
        }
    }

    /// Create a checker on a shared root frame.
    #[must_use]
    pub fn with_root(root: Arc<CapabilityContext>, audit: AuditLog) -> Self {
        Self {
            stack: ContextStack::with_root(root),
            audit,
        }
    }

    /// Check whether `required` is allowed in the current context.
    ///
    /// `required` is a concrete `resource:operation:path` string. A matching
    /// denial always wins; with no matching grant the request is denied.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Denied`] with a snapshot of the effective
    /// set, or [`CapabilityError::MalformedCapability`] if `required` does not
    /// parse. Both outcomes are audited as denials.
    pub fn check(&self, required: &str) -> CapabilityResult<()> {
        let context = self.stack.current();

        let request = match CapabilityRequest::parse(required) {
            Ok(request) => request,
            Err(e) => {
                let (resource, operation, path) = split_best_effort(required);
                self.audit.record(
                    AuditEntry::new(required, resource, operation, path, AuditDecision::Denied)
                        .with_context_depth(context.depth()),
                );
                return Err(e);
            },
        };

        let resolution = context.resolve(&request);
        let decision = if resolution.is_granted() {
            AuditDecision::Granted
        } else {
            AuditDecision::Denied
        };

        let mut entry = AuditEntry::new(
            required,
            request.resource(),
            request.operation(),
            request.path(),
            decision,
        )
        .with_context_depth(context.depth());
        if let Some(by) = resolution.decided_by() {
            entry = entry.with_matched(by.to_string());
        }
        self.audit.record(entry);

        match resolution {
            Resolution::Granted { by } => {
                debug!(required, granted_by = %by, "Capability granted");
                Ok(())
            },
            Resolution::Denied { by } => {
                debug!(
                    required,
                    denied_by = by.map(ToString::to_string).as_deref().unwrap_or("<default>"),
                    "Capability denied"
                );
                Err(CapabilityError::Denied {
                    required: required.to_string(),
                    available: context.effective().clone(),
                })
            },
        }
    }

    /// Whether `required` would be allowed. Does not audit.
    #[must_use]
    pub fn allows(&self, required: &str) -> bool {
        CapabilityRequest::parse(required)
            .is_ok_and(|request| self.stack.current().resolve(&request).is_granted())
    }

    /// Push a nested scope. See [`ContextStack::push`].
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::ScopeExceeded`] if `requested` would widen
    /// the current scope.
    pub fn push(&mut self, requested: CapabilitySet) -> CapabilityResult<ContextHandle> {
        self.stack.push(requested)
    }

    /// Pop a nested scope. See [`ContextStack::pop`].
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::StackViolation`] if `handle` is not on top.
    pub fn pop(&mut self, handle: ContextHandle) -> CapabilityResult<()> {
        self.stack.pop(handle)
    }

    /// Run `f` in a nested scope. See [`ContextStack::scoped`].
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::ScopeExceeded`] if the scope cannot be
    /// pushed.
    pub fn scoped<T>(
        &mut self,
        requested: CapabilitySet,
        f: impl FnOnce(&mut Self) -> T,
    ) -> CapabilityResult<T> {
        let before = self.stack.depth();
        let _handle = self.stack.push(requested)?;
        let output = f(self);
        self.unwind_to(before);
        Ok(output)
    }

    /// Drop every scope above `depth`.
    pub(crate) fn unwind_to(&mut self, depth: usize) {
        self.stack.unwind_to(depth);
    }

    /// The context currently in force.
    #[must_use]
    pub fn current(&self) -> &CapabilityContext {
        self.stack.current()
    }

    /// Number of pushed scopes above the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    /// The audit log this checker records into.
    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }
}

fn split_best_effort(required: &str) -> (&str, &str, &str) {
    let mut fields = required.splitn(3, ':');
    (
        fields.next().unwrap_or_default(),
        fields.next().unwrap_or_default(),
        fields.next().unwrap_or_default(),
    )
}
