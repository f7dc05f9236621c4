//! The fixed rule table.
//!
//! Each rule inspects one node and, at most, its immediate children. There is
//! no data-flow tracking: `cmd = "ls " + arg; os.system(cmd)` is not flagged,
//! only `os.system("ls " + arg)` is.

use crate::threat::{SecurityFinding, ThreatType};
use crate::tree::{Node, NodeKind};

const DYNAMIC_CODE_CALLS: &[&str] = &["eval", "exec", "compile", "execfile", "__import__"];

const BUILTIN_NAMESPACES: &[&str] = &["builtins", "__builtins__"];

const REFLECTIVE_ATTRIBUTES: &[&str] = &[
    "__class__",
    "__dict__",
    "__globals__",
    "__closure__",
    "__code__",
    "__subclasses__",
    "__bases__",
    "__mro__",
    "__builtins__",
    "f_globals",
    "f_locals",
    "gi_frame",
];

const REFLECTIVE_CALLS: &[&str] = &["globals", "locals", "vars"];

const ATTRIBUTE_ACCESSORS: &[&str] = &["getattr", "setattr", "delattr", "hasattr"];

const COMMAND_MODULES: &[&str] = &["os", "subprocess", "commands", "pty", "posix"];

const COMMAND_SINKS: &[&str] = &[
    "system",
    "popen",
    "Popen",
    "run",
    "call",
    "check_output",
    "check_call",
    "spawn",
];

/// Command sinks specific enough to flag without a module qualifier.
const BARE_COMMAND_SINKS: &[&str] = &["system", "popen", "Popen", "check_output", "check_call"];

const SQL_SINKS: &[&str] = &["execute", "executemany", "executescript", "raw", "query"];

const DANGEROUS_MODULES: &[&str] = &["ctypes", "marshal", "pickle"];

/// Resolved callee of a call node.
struct Callee<'a> {
    qualifier: Option<&'a str>,
    name: &'a str,
}

fn callee_of(call: &Node) -> Option<Callee<'_>> {
    let callee = call.callee()?;
    match &callee.kind {
        NodeKind::Name { id } => Some(Callee {
            qualifier: None,
            name: id,
        }),
        NodeKind::Attribute { attr } => Some(Callee {
            qualifier: Some(callee.object().and_then(Node::as_name).unwrap_or("<expr>")),
            name: attr,
        }),
        _ => None,
    }
}

/// Run every rule against `node`, appending findings to `out`.
pub(crate) fn evaluate(node: &Node, out: &mut Vec<SecurityFinding>) {
    match &node.kind {
        NodeKind::Call => evaluate_call(node, out),
        NodeKind::Attribute { attr } => {
            if REFLECTIVE_ATTRIBUTES.contains(&attr.as_str()) {
                out.push(SecurityFinding::new(
                    ThreatType::ReflectiveAccess,
                    node.line,
                    node.column,
                    format!("access to interpreter internals via `.{attr}`"),
                ));
            }
        },
        NodeKind::Str { value } => {
            if has_parent_segment(value) {
                out.push(SecurityFinding::new(
                    ThreatType::PathTraversal,
                    node.line,
                    node.column,
                    format!("path literal `{value}` contains a parent-directory segment"),
                ));
            }
        },
        NodeKind::Import { module } => {
            let top = module.split('.').next().unwrap_or_default();
            if DANGEROUS_MODULES.contains(&top) {
                out.push(SecurityFinding::new(
                    ThreatType::DangerousImport,
                    node.line,
                    node.column,
                    format!("import of `{module}`"),
                ));
            }
        },
        NodeKind::Module
        | NodeKind::Name { .. }
        | NodeKind::BinaryOp { .. }
        | NodeKind::FormattedString
        | NodeKind::Other { .. } => {},
    }
}

fn evaluate_call(call: &Node, out: &mut Vec<SecurityFinding>) {
    let Some(Callee { qualifier, name }) = callee_of(call) else {
        return;
    };

    let builtin = qualifier.is_none_or(|q| BUILTIN_NAMESPACES.contains(&q));
    if builtin && DYNAMIC_CODE_CALLS.contains(&name) {
        out.push(SecurityFinding::new(
            ThreatType::DynamicCodeExecution,
            call.line,
            call.column,
            format!("call to `{name}` evaluates data as code"),
        ));
    }

    if qualifier.is_none() && REFLECTIVE_CALLS.contains(&name) {
        out.push(SecurityFinding::new(
            ThreatType::ReflectiveAccess,
            call.line,
            call.column,
            format!("call to `{name}()` exposes a namespace"),
        ));
    }

    if builtin && ATTRIBUTE_ACCESSORS.contains(&name) {
        let target = call.args().get(1).and_then(Node::as_str);
        if let Some(attr) = target.filter(|a| REFLECTIVE_ATTRIBUTES.contains(a)) {
            out.push(SecurityFinding::new(
                ThreatType::ReflectiveAccess,
                call.line,
                call.column,
                format!("`{name}` reaches interpreter internals via `{attr}`"),
            ));
        }
    }

    let command_sink = match qualifier {
        Some(module) => COMMAND_MODULES.contains(&module) && COMMAND_SINKS.contains(&name),
        None => BARE_COMMAND_SINKS.contains(&name),
    };
    if command_sink && call.args().iter().any(is_dynamic_string) {
        out.push(SecurityFinding::new(
            ThreatType::CommandInjection,
            call.line,
            call.column,
            format!(
                "command passed to `{}` is built from concatenated text",
                display_callee(qualifier, name)
            ),
        ));
    }

    if SQL_SINKS.contains(&name) && call.args().first().is_some_and(is_dynamic_string) {
        out.push(SecurityFinding::new(
            ThreatType::SqlInjection,
            call.line,
            call.column,
            format!(
                "query passed to `{}` is built from concatenated text",
                display_callee(qualifier, name)
            ),
        ));
    }
}

fn display_callee(qualifier: Option<&str>, name: &str) -> String {
    match qualifier {
        Some(q) => format!("{q}.{name}"),
        None => name.to_string(),
    }
}

/// Whether `node` builds a string from parts at runtime.
///
/// Covers `+`/`%` with a string operand (through nested operators), formatted
/// strings, and `"...".format(...)`.
fn is_dynamic_string(node: &Node) -> bool {
    match &node.kind {
        NodeKind::FormattedString => true,
        NodeKind::BinaryOp { op } if op == "+" || op == "%" => {
            let mut pending: Vec<&Node> = node.children.iter().collect();
            while let Some(operand) = pending.pop() {
                match &operand.kind {
                    NodeKind::Str { .. } | NodeKind::FormattedString => return true,
                    NodeKind::BinaryOp { op } if op == "+" || op == "%" => {
                        pending.extend(operand.children.iter());
                    },
                    _ => {},
                }
            }
            false
        },
        NodeKind::Call => node.callee().is_some_and(|callee| {
            matches!(&callee.kind, NodeKind::Attribute { attr } if attr == "format")
                && callee
                    .object()
                    .is_some_and(|object| matches!(object.kind, NodeKind::Str { .. }))
        }),
        _ => false,
    }
}

fn has_parent_segment(value: &str) -> bool {
    value.split(['/', '\\']).any(|segment| segment == "..")
}
