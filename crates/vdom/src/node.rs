//! Immutable element trees produced by a render.
//!
//! A `Node` is either a typed element (`kind() == Some(..)`) or a text leaf
//! (`kind() == None`) carrying its scalar under [`TEXT_VALUE`]. Builders
//! consume `self`, so a node never changes after it has been handed to the
//! differ; a new render produces a new tree.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Attribute under which text leaves carry their scalar.
pub const TEXT_VALUE: &str = "value";

/// Scalar attribute value.
///
/// Equality is strict: different variants never compare equal, and floats
/// compare by bit pattern, so `NaN` equals itself and `0.0` differs from
/// `-0.0`. Diffing a tree against itself is therefore always empty.
#[derive(Clone, Debug)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
}

impl PartialEq for AttrValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AttrValue::Null, AttrValue::Null) => true,
            (AttrValue::Bool(a), AttrValue::Bool(b)) => a == b,
            (AttrValue::Int(a), AttrValue::Int(b)) => a == b,
            (AttrValue::Float(a), AttrValue::Float(b)) => a.to_bits() == b.to_bits(),
            (AttrValue::Str(a), AttrValue::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for AttrValue {}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Null => f.write_str("null"),
            AttrValue::Bool(v) => write!(f, "{v}"),
            AttrValue::Int(v) => write!(f, "{v}"),
            AttrValue::Float(v) => write!(f, "{v:?}"),
            AttrValue::Str(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(Arc::from(value))
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(Arc::from(value))
    }
}

impl From<Arc<str>> for AttrValue {
    fn from(value: Arc<str>) -> Self {
        AttrValue::Str(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::Int(i64::from(value))
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

/// Attributes are kept sorted by name so diffs are deterministic.
pub type Attributes = BTreeMap<Arc<str>, AttrValue>;

/// Why a node cannot be reconciled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeError {
    EmptyType,
    InvalidType(Arc<str>),
    EmptyKey,
    InvalidAttributeName(Arc<str>),
    TextWithChildren,
    MissingTextValue,
    UnexpectedTextAttribute(Arc<str>),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::EmptyType => f.write_str("element type is empty"),
            NodeError::InvalidType(kind) => write!(f, "element type {kind:?} is not an identifier"),
            NodeError::EmptyKey => f.write_str("key is empty"),
            NodeError::InvalidAttributeName(name) => {
                write!(f, "attribute name {name:?} is not an identifier")
            }
            NodeError::TextWithChildren => f.write_str("text node has children"),
            NodeError::MissingTextValue => {
                write!(f, "text node has no `{TEXT_VALUE}` attribute")
            }
            NodeError::UnexpectedTextAttribute(name) => {
                write!(f, "text node carries attribute {name:?}")
            }
        }
    }
}

impl std::error::Error for NodeError {}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    kind: Option<Arc<str>>,
    key: Option<Arc<str>>,
    attributes: Attributes,
    children: Vec<Arc<Node>>,
}

impl Node {
    pub fn element(kind: impl Into<Arc<str>>) -> Self {
        Self {
            kind: Some(kind.into()),
            key: None,
            attributes: Attributes::new(),
            children: Vec::new(),
        }
    }

    pub fn text(value: impl Into<AttrValue>) -> Self {
        let mut attributes = Attributes::new();
        attributes.insert(Arc::from(TEXT_VALUE), value.into());
        Self {
            kind: None,
            key: None,
            attributes,
            children: Vec::new(),
        }
    }

    /// Assemble a node without checks; malformed input surfaces when diffed.
    pub fn from_parts(
        kind: Option<Arc<str>>,
        key: Option<Arc<str>>,
        attributes: Attributes,
        children: Vec<Node>,
    ) -> Self {
        Self {
            kind,
            key,
            attributes,
            children: children.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_attr(mut self, name: impl Into<Arc<str>>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(Arc::new(child));
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children.into_iter().map(Arc::new));
        self
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    pub fn children(&self) -> &[Arc<Node>] {
        &self.children
    }

    pub fn is_text(&self) -> bool {
        self.kind.is_none()
    }

    pub fn text_value(&self) -> Option<&AttrValue> {
        if self.is_text() {
            self.attributes.get(TEXT_VALUE)
        } else {
            None
        }
    }

    /// Same node without its children; what a target receives on create.
    pub fn shallow(&self) -> Node {
        Self {
            kind: self.kind.clone(),
            key: self.key.clone(),
            attributes: self.attributes.clone(),
            children: Vec::new(),
        }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(|child| child.subtree_len())
            .sum::<usize>()
    }

    /// Shallow well-formedness check (children are checked when visited).
    pub fn validate(&self) -> Result<(), NodeError> {
        if let Some(key) = &self.key {
            if key.is_empty() {
                return Err(NodeError::EmptyKey);
            }
        }
        match &self.kind {
            Some(kind) => {
                if kind.is_empty() {
                    return Err(NodeError::EmptyType);
                }
                if !is_identifier(kind) {
                    return Err(NodeError::InvalidType(Arc::clone(kind)));
                }
                for name in self.attributes.keys() {
                    if !is_identifier(name) {
                        return Err(NodeError::InvalidAttributeName(Arc::clone(name)));
                    }
                }
            }
            None => {
                if !self.children.is_empty() {
                    return Err(NodeError::TextWithChildren);
                }
                if let Some(name) = self.attributes.keys().find(|name| &***name != TEXT_VALUE) {
                    return Err(NodeError::UnexpectedTextAttribute(Arc::clone(name)));
                }
                if !self.attributes.contains_key(TEXT_VALUE) {
                    return Err(NodeError::MissingTextValue);
                }
            }
        }
        Ok(())
    }
}

fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|ch| !ch.is_whitespace() && !ch.is_control() && ch != '"' && ch != '=')
}
