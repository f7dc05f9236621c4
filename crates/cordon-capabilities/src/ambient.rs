//! Task-local ambient checker.
//!
//! Bridge functions deep inside an embedded program's call graph rarely have
//! a checker in hand. [`run_with`] installs one for the duration of a future,
//! and the free functions here resolve against it. Each task gets its own
//! checker, so stacks are never shared between concurrent runs.
//!
//! Without an installed checker every check is denied.

use std::cell::RefCell;
use std::future::Future;

use tracing::warn;

use crate::checker::CapabilityChecker;
use crate::context::ContextHandle;
use crate::error::{CapabilityError, CapabilityResult};
use crate::set::CapabilitySet;

tokio::task_local! {
    static CURRENT: RefCell<CapabilityChecker>;
}

/// Run `future` with `checker` as the task's ambient checker.
pub async fn run_with<F>(checker: CapabilityChecker, future: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(RefCell::new(checker), future).await
}

/// Run a synchronous closure with `checker` installed.
pub fn sync_run_with<T>(checker: CapabilityChecker, f: impl FnOnce() -> T) -> T {
    CURRENT.sync_scope(RefCell::new(checker), f)
}

/// Whether an ambient checker is installed on this task.
#[must_use]
pub fn is_installed() -> bool {
    CURRENT.try_with(|_| ()).is_ok()
}

/// Check `required` against the ambient checker.
///
/// # Errors
///
/// Returns [`CapabilityError::Denied`] when the check fails or no checker is
/// installed, and [`CapabilityError::MalformedCapability`] for a bad request.
pub fn check(required: &str) -> CapabilityResult<()> {
    CURRENT
        .try_with(|checker| checker.borrow().check(required))
        .unwrap_or_else(|_| {
            warn!(required, "Capability check with no ambient checker installed");
            Err(CapabilityError::Denied {
                required: required.to_string(),
                available: CapabilitySet::new(),
            })
        })
}

/// Push a nested scope on the ambient checker.
///
/// # Errors
///
/// Returns [`CapabilityError::ScopeExceeded`] if the scope would widen the
/// current one or no checker is installed.
pub fn push(requested: CapabilitySet) -> CapabilityResult<ContextHandle> {
    let first = requested.iter().next().map(ToString::to_string);
    CURRENT
        .try_with(move |checker| checker.borrow_mut().push(requested))
        .unwrap_or_else(|_| {
            Err(CapabilityError::ScopeExceeded {
                capability: first.unwrap_or_default(),
                reason: "no ambient capability checker is installed".to_string(),
            })
        })
}

/// Pop a nested scope from the ambient checker.
///
/// # Errors
///
/// Returns [`CapabilityError::StackViolation`] if `handle` is not on top or
/// no checker is installed.
pub fn pop(handle: ContextHandle) -> CapabilityResult<()> {
    let found = handle.id().to_string();
    CURRENT
        .try_with(move |checker| checker.borrow_mut().pop(handle))
        .unwrap_or_else(|_| {
            Err(CapabilityError::StackViolation {
                expected: "an ambient capability checker".to_string(),
                found,
            })
        })
}

/// Run `f` inside a nested ambient scope.
///
/// The checker is not borrowed while `f` runs, so `f` may call [`check`].
/// On return the stack is unwound to where it was before the push, so
/// frames `f` left open are discarded with the scope, as in
/// [`ContextStack::scoped`](crate::ContextStack::scoped).
///
/// # Errors
///
/// Returns [`CapabilityError::ScopeExceeded`] if the scope cannot be pushed
/// or no checker is installed; `f` is not called in that case.
pub fn with_scope<T>(requested: CapabilitySet, f: impl FnOnce() -> T) -> CapabilityResult<T> {
    let depth = with_checker(CapabilityChecker::depth);
    let _handle = push(requested)?;
    let output = f();
    if let Some(depth) = depth {
        let _ = CURRENT.try_with(|checker| checker.borrow_mut().unwind_to(depth));
    }
    Ok(output)
}

/// Read the ambient checker, if any.
pub fn with_checker<T>(f: impl FnOnce(&CapabilityChecker) -> T) -> Option<T> {
    CURRENT.try_with(|checker| f(&*checker.borrow())).ok()
}
