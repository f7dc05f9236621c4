//! Scoped capability contexts and the per-task context stack.
//!
//! A [`CapabilityContext`] is an immutable frame. Its effective set is computed
//! once, when it is derived from its parent, and never changes afterwards. A
//! child may only narrow what its parent allows: every grant it introduces must
//! be subsumed by a grant the parent already holds. Denials are always
//! accepted.
//!
//! A [`ContextStack`] owns the frames of one logical task. Frames are reference
//! counted so that a root built from the process defaults can be shared by
//! many stacks at once.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, error};

use crate::capability::{Capability, CapabilityRequest};
use crate::error::{CapabilityError, CapabilityResult};
use crate::set::CapabilitySet;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a context frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Outcome of resolving a request against an effective set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// A grant matched and no denial did.
    Granted {
        /// The first matching grant.
        by: &'a Capability,
    },
    /// A denial matched, or nothing matched at all.
    Denied {
        /// The matching denial, `None` for the default deny.
        by: Option<&'a Capability>,
    },
}

impl Resolution<'_> {
    /// Whether the request was granted.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }

    /// The capability that decided the outcome, if any.
    #[must_use]
    pub fn decided_by(&self) -> Option<&Capability> {
        match *self {
            Self::Granted { by } => Some(by),
            Self::Denied { by } => by,
        }
    }
}

/// One immutable frame of a capability stack.
#[derive(Debug)]
pub struct CapabilityContext {
    id: ContextId,
    depth: usize,
    own: CapabilitySet,
    effective: CapabilitySet,
    parent: Option<Weak<CapabilityContext>>,
}

impl CapabilityContext {
    /// Build a root frame from the statically configured defaults.
    #[must_use]
    pub fn root(defaults: CapabilitySet) -> Arc<Self> {
        Arc::new(Self {
            id: ContextId::next(),
            depth: 0,
            effective: defaults.clone(),
            own: defaults,
            parent: None,
        })
    }

    /// Derive a child frame.
    ///
    /// Every grant in `requested` must be subsumed by a grant in the parent's
    /// effective set, and must not re-grant a triple the parent explicitly
    /// denies. The check covers the whole set before anything is built, so a
    /// failure leaves no partial frame behind.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::ScopeExceeded`] naming the first offending
    /// grant.
    pub fn derive(parent: &Arc<Self>, requested: CapabilitySet) -> CapabilityResult<Arc<Self>> {
        for grant in requested.grants() {
            if let Some(denial) = parent.effective.denial_of(grant) {
                return Err(CapabilityError::ScopeExceeded {
                    capability: grant.to_string(),
                    reason: format!("the enclosing scope explicitly denies `{denial}`"),
                });
            }
            if !parent.effective.covers(grant) {
                return Err(CapabilityError::ScopeExceeded {
                    capability: grant.to_string(),
                    reason: "no capability in the enclosing scope subsumes it".to_string(),
                });
            }
        }

        let effective = parent.effective.scoped_union(&requested);
        Ok(Arc::new(Self {
            id: ContextId::next(),
            depth: parent.depth.saturating_add(1),
            own: requested,
            effective,
            parent: Some(Arc::downgrade(parent)),
        }))
    }

    /// Frame identifier.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Nesting depth; the root is 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether this is a root frame.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Capabilities introduced by this frame.
    #[must_use]
    pub fn own(&self) -> &CapabilitySet {
        &self.own
    }

    /// Capabilities in force while this frame is current.
    #[must_use]
    pub fn effective(&self) -> &CapabilitySet {
        &self.effective
    }

    /// The parent frame, if it is still alive.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<Self>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Resolve a concrete request against the effective set.
    ///
    /// Any matching denial wins, wherever it sits in the set. Otherwise the
    /// first matching grant allows the request. No match is a denial.
    #[must_use]
    pub fn resolve(&self, request: &CapabilityRequest) -> Resolution<'_> {
        let mut granted_by = None;
        for capability in &self.effective {
            if !capability.matches(request) {
                continue;
            }
            if capability.is_negated() {
                return Resolution::Denied {
                    by: Some(capability),
                };
            }
            granted_by.get_or_insert(capability);
        }
        match granted_by {
            Some(by) => Resolution::Granted { by },
            None => Resolution::Denied { by: None },
        }
    }
}

/// Proof of a successful push, consumed by [`ContextStack::pop`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a pushed context must be popped with its handle"]
pub struct ContextHandle {
    id: ContextId,
    depth: usize,
}

impl ContextHandle {
    /// Identifier of the pushed frame.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Depth of the pushed frame.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Stack of capability frames owned by a single task.
#[derive(Debug, Clone)]
pub struct ContextStack {
    root: Arc<CapabilityContext>,
    frames: Vec<Arc<CapabilityContext>>,
}

impl ContextStack {
    /// Create a stack whose root holds `defaults`.
    #[must_use]
    pub fn new(defaults: CapabilitySet) -> Self {
        Self::with_root(CapabilityContext::root(defaults))
    }

    /// Create a stack on top of an existing, possibly shared, root frame.
    #[must_use]
    pub fn with_root(root: Arc<CapabilityContext>) -> Self {
        Self {
            root,
            frames: Vec::new(),
        }
    }

    /// The frame currently in force.
    #[must_use]
    pub fn current(&self) -> &CapabilityContext {
        self.frames.last().unwrap_or(&self.root)
    }

    /// The frame currently in force, shared.
    #[must_use]
    pub fn current_arc(&self) -> Arc<CapabilityContext> {
        Arc::clone(self.frames.last().unwrap_or(&self.root))
    }

    /// Number of pushed frames above the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Push a nested scope.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::ScopeExceeded`] if `requested` would widen
    /// the current scope. The stack is unchanged on error.
    pub fn push(&mut self, requested: CapabilitySet) -> CapabilityResult<ContextHandle> {
        let parent = self.current_arc();
        let child = CapabilityContext::derive(&parent, requested)?;
        let handle = ContextHandle {
            id: child.id,
            depth: child.depth,
        };
        debug!(
            context = %child.id,
            depth = child.depth,
            own = %child.own,
            "Pushed capability context"
        );
        self.frames.push(child);
        Ok(handle)
    }

    /// Pop the frame identified by `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::StackViolation`] if `handle` is not the top
    /// of the stack. The stack is unchanged on error.
    pub fn pop(&mut self, handle: ContextHandle) -> CapabilityResult<()> {
        let Some(top) = self.frames.last() else {
            error!(found = %handle.id, "Attempted to pop the root capability context");
            return Err(CapabilityError::StackViolation {
                expected: format!("{} (root, cannot be popped)", self.root.id),
                found: handle.id.to_string(),
            });
        };
        if top.id != handle.id {
            error!(
                expected = %top.id,
                found = %handle.id,
                "Capability context popped out of order"
            );
            return Err(CapabilityError::StackViolation {
                expected: top.id.to_string(),
                found: handle.id.to_string(),
            });
        }
        self.frames.pop();
        debug!(context = %handle.id, depth = handle.depth, "Popped capability context");
        Ok(())
    }

    /// Run `f` inside a nested scope, popping it afterwards.
    ///
    /// Frames that `f` pushed and did not pop are discarded along with the
    /// scope.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::ScopeExceeded`] if the scope cannot be
    /// pushed; `f` is not called in that case.
    pub fn scoped<T>(
        &mut self,
        requested: CapabilitySet,
        f: impl FnOnce(&mut Self) -> T,
    ) -> CapabilityResult<T> {
        let before = self.frames.len();
        let _handle = self.push(requested)?;
        let output = f(self);
        self.unwind_to(before);
        Ok(output)
    }

    /// Drop every frame above `depth`, the scope's own frame included.
    pub(crate) fn unwind_to(&mut self, depth: usize) {
        let open = self.frames.len().saturating_sub(depth);
        if open > 1 {
            error!(
                leaked = open.saturating_sub(1),
                "Discarding capability contexts left open inside a scope"
            );
        }
        self.frames.truncate(depth);
    }
}
