//! Registry of host bridge operations.
//!
//! Each operation is registered under a stable identifier with the
//! capability it requires, written as a template such as
//! `file:read:{path}`. Invoking an operation renders the template from the
//! call's arguments, checks it, and only then runs the handler.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::ambient;
use crate::checker::CapabilityChecker;
use crate::error::{BridgeError, CapabilityError, CapabilityResult};

/// Arguments passed to a bridge operation.
pub type BridgeArgs = Map<String, Value>;

type Handler = Box<dyn Fn(&BridgeArgs) -> Result<Value, String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Text(String),
    Arg(String),
}

/// A required-capability template.
///
/// Resource and operation are fixed tokens; the pattern part may contain
/// `{name}` placeholders filled from the call arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityTemplate {
    source: String,
    prefix: String,
    pieces: Vec<Piece>,
}

impl CapabilityTemplate {
    /// Parse a template.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::MalformedCapability`] if resource or
    /// operation is missing, a wildcard, or contains a placeholder, or if a
    /// brace is unbalanced.
    pub fn parse(source: &str) -> CapabilityResult<Self> {
        let malformed = |reason: &str| CapabilityError::malformed(source, reason);

        let mut fields = source.splitn(3, ':');
        let (Some(resource), Some(operation), Some(pattern)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed("expected `resource:operation:pattern`"));
        };
        for token in [resource, operation] {
            if token.is_empty()
                || !token
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            {
                return Err(malformed("resource and operation must be concrete tokens"));
            }
        }

        let mut pieces = Vec::new();
        let mut rest = pattern;
        while !rest.is_empty() {
            match rest.find(['{', '}']) {
                None => {
                    pieces.push(Piece::Text(rest.to_string()));
                    break;
                },
                Some(index) if rest[index..].starts_with('}') => {
                    return Err(malformed("unmatched `}` in template"));
                },
                Some(index) => {
                    if index > 0 {
                        pieces.push(Piece::Text(rest[..index].to_string()));
                    }
                    let after = &rest[index..][1..];
                    let Some(close) = after.find('}') else {
                        return Err(malformed("unterminated `{` in template"));
                    };
                    let name = &after[..close];
                    if name.is_empty() || name.contains('{') {
                        return Err(malformed("placeholder names must be non-empty"));
                    }
                    pieces.push(Piece::Arg(name.to_string()));
                    rest = &after[close..][1..];
                },
            }
        }

        Ok(Self {
            source: source.to_string(),
            prefix: format!("{resource}:{operation}:"),
            pieces,
        })
    }

    /// Names of the placeholders, in order.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.pieces.iter().filter_map(|piece| match piece {
            Piece::Arg(name) => Some(name.as_str()),
            Piece::Text(_) => None,
        })
    }

    /// Render the concrete required capability for one call.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MissingArgument`] if a placeholder has no
    /// string, number or boolean argument.
    pub fn render(&self, operation: &str, args: &BridgeArgs) -> Result<String, BridgeError> {
        let mut rendered = self.prefix.clone();
        for piece in &self.pieces {
            match piece {
                Piece::Text(text) => rendered.push_str(text),
                Piece::Arg(name) => match args.get(name) {
                    Some(Value::String(value)) => rendered.push_str(value),
                    Some(value @ (Value::Number(_) | Value::Bool(_))) => {
                        rendered.push_str(&value.to_string());
                    },
                    _ => {
                        return Err(BridgeError::MissingArgument {
                            operation: operation.to_string(),
                            argument: name.clone(),
                        });
                    },
                },
            }
        }
        Ok(rendered)
    }
}

impl fmt::Display for CapabilityTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

struct BridgeOperation {
    template: CapabilityTemplate,
    handler: Handler,
}

/// Maps operation identifiers to capability-checked handlers.
#[derive(Default)]
pub struct BridgeRegistry {
    operations: HashMap<String, BridgeOperation>,
}

impl fmt::Debug for BridgeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.operations.keys().collect();
        ids.sort();
        f.debug_struct("BridgeRegistry")
            .field("operations", &ids)
            .finish()
    }
}

impl BridgeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DuplicateOperation`] if `id` is taken, or
    /// [`BridgeError::Capability`] if the template is malformed.
    pub fn register<F>(
        &mut self,
        id: impl Into<String>,
        template: &str,
        handler: F,
    ) -> Result<(), BridgeError>
    where
        F: Fn(&BridgeArgs) -> Result<Value, String> + Send + Sync + 'static,
    {
        let id = id.into();
        if self.operations.contains_key(&id) {
            return Err(BridgeError::DuplicateOperation(id));
        }
        let template = CapabilityTemplate::parse(template)?;
        debug!(operation = %id, template = %template, "Registered bridge operation");
        self.operations.insert(
            id,
            BridgeOperation {
                template,
                handler: Box::new(handler),
            },
        );
        Ok(())
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.operations.contains_key(id)
    }

    /// Registered identifiers, sorted.
    #[must_use]
    pub fn operation_ids(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.operations.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// The concrete capability a call would require.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownOperation`] or
    /// [`BridgeError::MissingArgument`].
    pub fn required_capability(&self, id: &str, args: &BridgeArgs) -> Result<String, BridgeError> {
        self.operation(id)?.template.render(id, args)
    }

    /// Check and run an operation against an explicit checker.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the operation is unknown, an argument is
    /// missing, the capability is denied, or the handler fails. The handler
    /// does not run unless the check passed.
    pub fn invoke(
        &self,
        checker: &CapabilityChecker,
        id: &str,
        args: &BridgeArgs,
    ) -> Result<Value, BridgeError> {
        self.invoke_with(id, args, |required| checker.check(required))
    }

    /// Check and run an operation against the task's ambient checker.
    ///
    /// # Errors
    ///
    /// See [`invoke`](Self::invoke). With no ambient checker installed every
    /// call is denied.
    pub fn invoke_ambient(&self, id: &str, args: &BridgeArgs) -> Result<Value, BridgeError> {
        self.invoke_with(id, args, ambient::check)
    }

    fn invoke_with(
        &self,
        id: &str,
        args: &BridgeArgs,
        check: impl FnOnce(&str) -> CapabilityResult<()>,
    ) -> Result<Value, BridgeError> {
        let operation = self.operation(id)?;
        let required = operation.template.render(id, args)?;
        check(&required)?;
        (operation.handler)(args).map_err(|message| {
            warn!(operation = %id, %message, "Bridge operation failed");
            BridgeError::Handler {
                operation: id.to_string(),
                message,
            }
        })
    }

    fn operation(&self, id: &str) -> Result<&BridgeOperation, BridgeError> {
        self.operations
            .get(id)
            .ok_or_else(|| BridgeError::UnknownOperation(id.to_string()))
    }
}
