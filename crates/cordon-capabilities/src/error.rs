//! Capability-related error types.

use thiserror::Error;

use crate::set::CapabilitySet;

/// Errors produced while building, scoping or checking capabilities.
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    /// A capability string or pattern could not be parsed.
    #[error("malformed capability `{input}`: {reason}")]
    MalformedCapability {
        /// The offending input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A pushed context asked for authority its parent does not hold.
    #[error("capability `{capability}` exceeds the enclosing scope: {reason}")]
    ScopeExceeded {
        /// The capability that would widen the scope.
        capability: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The requested operation is not permitted by the active context.
    #[error("capability denied: {required} (available: [{available}])")]
    Denied {
        /// The fully resolved capability that was required.
        required: String,
        /// Snapshot of the effective set at the time of the check.
        available: CapabilitySet,
    },

    /// A context was popped out of LIFO order, or the root was popped.
    #[error("context stack violation: expected to pop {expected}, found {found}")]
    StackViolation {
        /// The frame on top of the stack.
        expected: String,
        /// The frame the caller tried to pop.
        found: String,
    },
}

impl CapabilityError {
    pub(crate) fn malformed(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedCapability {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Whether this is a [`CapabilityError::Denied`] outcome.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }
}

/// Result type for capability operations.
pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Errors raised when invoking a registered bridge operation.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No operation is registered under this identifier.
    #[error("unknown bridge operation: {0}")]
    UnknownOperation(String),

    /// An operation with this identifier is already registered.
    #[error("bridge operation already registered: {0}")]
    DuplicateOperation(String),

    /// A template placeholder had no matching argument.
    #[error("bridge operation {operation} is missing argument `{argument}`")]
    MissingArgument {
        /// The operation being invoked.
        operation: String,
        /// The placeholder without a value.
        argument: String,
    },

    /// The capability check failed.
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// The handler itself reported a failure.
    #[error("bridge operation {operation} failed: {message}")]
    Handler {
        /// The operation that failed.
        operation: String,
        /// Handler-provided message.
        message: String,
    },
}
