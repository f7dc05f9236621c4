//! Program tree consumed by the analyzer.
//!
//! The tree is produced by an external parser. Node kinds cover only the
//! shapes the rules look at; everything else is [`NodeKind::Other`] and is
//! still walked.
//!
//! Child conventions:
//! - [`NodeKind::Attribute`]: `children[0]` is the object.
//! - [`NodeKind::Call`]: `children[0]` is the callee, the rest are arguments.
//! - [`NodeKind::BinaryOp`]: `children[0]` and `children[1]` are the operands.
//! - [`NodeKind::FormattedString`]: children are the interpolated parts.

use serde::{Deserialize, Serialize};

use crate::error::{AnalyzerError, AnalyzerResult};

/// Syntactic kind of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Root of a compilation unit.
    Module,
    /// Identifier reference.
    Name {
        /// Identifier.
        id: String,
    },
    /// Attribute access `object.attr`.
    Attribute {
        /// Attribute name.
        attr: String,
    },
    /// Function or method call.
    Call,
    /// String literal.
    Str {
        /// Literal value.
        value: String,
    },
    /// Binary operation.
    BinaryOp {
        /// Operator token, e.g. `+`.
        op: String,
    },
    /// Interpolated string literal.
    FormattedString,
    /// Import of a module.
    Import {
        /// Dotted module path.
        module: String,
    },
    /// Any other construct.
    Other {
        /// Parser-specific label.
        label: String,
    },
}

/// A node with its source position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node kind.
    #[serde(flatten)]
    pub kind: NodeKind,
    /// One-based line.
    #[serde(default)]
    pub line: u32,
    /// Zero-based column.
    #[serde(default)]
    pub column: u32,
    /// Child nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    /// Create a leaf node.
    #[must_use]
    pub fn new(kind: NodeKind, line: u32, column: u32) -> Self {
        Self {
            kind,
            line,
            column,
            children: Vec::new(),
        }
    }

    /// Append a child.
    #[must_use]
    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// Append children.
    #[must_use]
    pub fn with_children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }

    /// A module containing `body`.
    #[must_use]
    pub fn module(body: impl IntoIterator<Item = Node>) -> Self {
        Self::new(NodeKind::Module, 1, 0).with_children(body)
    }

    /// An identifier.
    #[must_use]
    pub fn name(id: impl Into<String>, line: u32, column: u32) -> Self {
        Self::new(NodeKind::Name { id: id.into() }, line, column)
    }

    /// `object.attr`.
    #[must_use]
    pub fn attribute(object: Node, attr: impl Into<String>, line: u32, column: u32) -> Self {
        Self::new(NodeKind::Attribute { attr: attr.into() }, line, column).with_child(object)
    }

    /// `callee(args...)`.
    #[must_use]
    pub fn call(
        callee: Node,
        args: impl IntoIterator<Item = Node>,
        line: u32,
        column: u32,
    ) -> Self {
        Self::new(NodeKind::Call, line, column)
            .with_child(callee)
            .with_children(args)
    }

    /// A string literal.
    #[must_use]
    pub fn string(value: impl Into<String>, line: u32, column: u32) -> Self {
        Self::new(NodeKind::Str { value: value.into() }, line, column)
    }

    /// `left op right`.
    #[must_use]
    pub fn binary(op: impl Into<String>, left: Node, right: Node, line: u32, column: u32) -> Self {
        Self::new(NodeKind::BinaryOp { op: op.into() }, line, column)
            .with_child(left)
            .with_child(right)
    }

    /// An interpolated string built from `parts`.
    #[must_use]
    pub fn formatted(parts: impl IntoIterator<Item = Node>, line: u32, column: u32) -> Self {
        Self::new(NodeKind::FormattedString, line, column).with_children(parts)
    }

    /// `import module`.
    #[must_use]
    pub fn import(module: impl Into<String>, line: u32, column: u32) -> Self {
        Self::new(
            NodeKind::Import {
                module: module.into(),
            },
            line,
            column,
        )
    }

    /// Any other construct.
    #[must_use]
    pub fn other(label: impl Into<String>, line: u32, column: u32) -> Self {
        Self::new(
            NodeKind::Other {
                label: label.into(),
            },
            line,
            column,
        )
    }

    /// Callee of a call node.
    #[must_use]
    pub fn callee(&self) -> Option<&Node> {
        match self.kind {
            NodeKind::Call => self.children.first(),
            _ => None,
        }
    }

    /// Arguments of a call node; empty for other kinds.
    #[must_use]
    pub fn args(&self) -> &[Node] {
        match self.kind {
            NodeKind::Call => self.children.get(1..).unwrap_or_default(),
            _ => &[],
        }
    }

    /// Object of an attribute node.
    #[must_use]
    pub fn object(&self) -> Option<&Node> {
        match self.kind {
            NodeKind::Attribute { .. } => self.children.first(),
            _ => None,
        }
    }

    /// Identifier if this is a name node.
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Name { id } => Some(id),
            _ => None,
        }
    }

    /// Value if this is a string literal.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Str { value } => Some(value),
            _ => None,
        }
    }

    /// Pre-order traversal of this node and its descendants.
    #[must_use]
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }
}

/// Depth-first pre-order iterator over a tree.
///
/// Uses an explicit stack, so deeply nested input cannot overflow the call
/// stack.
#[derive(Debug)]
pub struct Walk<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// A parsed program, as handed over by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramTree {
    /// Where the program came from, for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    /// Root node, normally a [`NodeKind::Module`].
    pub root: Node,
}

impl ProgramTree {
    /// Wrap a root node.
    #[must_use]
    pub fn new(root: Node) -> Self {
        Self {
            source_name: None,
            root,
        }
    }

    /// Attach a source name.
    #[must_use]
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }

    /// Decode a tree from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyzerError::InvalidTree`] if the JSON does not describe a
    /// tree.
    pub fn from_json(json: &str) -> AnalyzerResult<Self> {
        serde_json::from_str(json).map_err(|e| AnalyzerError::InvalidTree(e.to_string()))
    }

    /// Pre-order traversal of every node.
    #[must_use]
    pub fn walk(&self) -> Walk<'_> {
        self.root.walk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_is_preorder() {
        let tree = ProgramTree::new(Node::module([
            Node::call(
                Node::name("print", 1, 0),
                [Node::string("a", 1, 6)],
                1,
                0,
            ),
            Node::import("os", 2, 0),
        ]));

        let kinds: Vec<_> = tree
            .walk()
            .map(|n| match &n.kind {
                NodeKind::Module => "module".to_string(),
                NodeKind::Call => "call".to_string(),
                NodeKind::Name { id } => format!("name:{id}"),
                NodeKind::Str { value } => format!("str:{value}"),
                NodeKind::Import { module } => format!("import:{module}"),
                other => format!("{other:?}"),
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["module", "call", "name:print", "str:a", "import:os"]
        );
    }

    #[test]
    fn test_walk_handles_deep_nesting() {
        let mut node = Node::name("x", 1, 0);
        for _ in 0..100_000 {
            node = Node::new(NodeKind::Other { label: "paren".into() }, 1, 0).with_child(node);
        }
        assert_eq!(node.walk().count(), 100_001);
        // Release iteratively; the derived drop would recurse.
        let mut stack = vec![node];
        while let Some(mut n) = stack.pop() {
            stack.append(&mut n.children);
        }
    }

    #[test]
    fn test_call_accessors() {
        let call = Node::call(
            Node::attribute(Node::name("os", 3, 0), "system", 3, 0),
            [Node::string("ls", 3, 10)],
            3,
            0,
        );
        let callee = call.callee().unwrap();
        assert_eq!(callee.object().and_then(Node::as_name), Some("os"));
        assert_eq!(call.args().len(), 1);
        assert_eq!(call.args()[0].as_str(), Some("ls"));
        assert!(Node::name("x", 1, 0).args().is_empty());
    }

    #[test]
    fn test_json_round_trip() {
        let json = r#"{
            "source_name": "job.py",
            "root": {"type": "module", "line": 1, "children": [
                {"type": "call", "line": 2, "column": 4, "children": [
                    {"type": "name", "id": "eval", "line": 2, "column": 4},
                    {"type": "str", "value": "1+1", "line": 2, "column": 9}
                ]}
            ]}
        }"#;
        let tree = ProgramTree::from_json(json).unwrap();
        assert_eq!(tree.source_name.as_deref(), Some("job.py"));
        assert_eq!(tree.walk().count(), 4);

        let encoded = serde_json::to_string(&tree).unwrap();
        assert_eq!(ProgramTree::from_json(&encoded).unwrap(), tree);

        assert!(matches!(
            ProgramTree::from_json(r#"{"root": {"type": "lambda"}}"#),
            Err(AnalyzerError::InvalidTree(_))
        ));
    }
}
