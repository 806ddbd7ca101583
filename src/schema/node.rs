use std::collections::BTreeMap;

use serde_json::Value;

/// JSON primitive types a leaf node can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    String,
    Number,
    Integer,
    Boolean,
    Null,
}

impl PrimitiveType {
    /// Standard JSON-Schema type keyword.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Null => "null",
        }
    }

    pub(crate) fn of_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(_) => Some(Self::String),
            Value::Bool(_) => Some(Self::Boolean),
            Value::Null => Some(Self::Null),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self::Integer),
            Value::Number(_) => Some(Self::Number),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

/// Canonical description of one position in a schema tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    pub kind: NodeKind,
    pub description: Option<String>,
}

/// Structural kind of a [`SchemaNode`].
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Primitive(PrimitiveType),
    Array {
        element: Box<SchemaNode>,
        min_items: Option<usize>,
        max_items: Option<usize>,
    },
    /// Field names are unique within one object.
    Object { fields: Vec<FieldNode> },
    /// Optional marker outside an object field position.
    Optional(Box<SchemaNode>),
    Nullable(Box<SchemaNode>),
    Enum(Vec<String>),
    Literal {
        value: Value,
        primitive: PrimitiveType,
    },
    Union(Vec<SchemaNode>),
    DiscriminatedUnion {
        discriminator: String,
        variants: Vec<SchemaNode>,
    },
    /// Back-reference to an entry of [`IntrospectedSchema::definitions`].
    Reference(String),
}

/// One object field; `optional` records whether the field was wrapped in an optional marker.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldNode {
    pub name: String,
    pub optional: bool,
    pub node: SchemaNode,
}

/// Output of [`crate::schema::introspect`].
#[derive(Debug, Clone, PartialEq)]
pub struct IntrospectedSchema {
    pub root: SchemaNode,
    pub definitions: BTreeMap<String, SchemaNode>,
}

impl SchemaNode {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            description: None,
        }
    }

    pub fn primitive(primitive: PrimitiveType) -> Self {
        Self::new(NodeKind::Primitive(primitive))
    }

    pub(crate) fn with_description(mut self, description: Option<String>) -> Self {
        if description.is_some() {
            self.description = description;
        }
        self
    }

    /// Visits this node and every descendant, without following references.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a SchemaNode)) {
        visit(self);
        match &self.kind {
            NodeKind::Primitive(_) | NodeKind::Enum(_) | NodeKind::Literal { .. } => {}
            NodeKind::Reference(_) => {}
            NodeKind::Array { element, .. } => element.walk(visit),
            NodeKind::Object { fields } => {
                for field in fields {
                    field.node.walk(visit);
                }
            }
            NodeKind::Optional(inner) | NodeKind::Nullable(inner) => inner.walk(visit),
            NodeKind::Union(variants) | NodeKind::DiscriminatedUnion { variants, .. } => {
                for variant in variants {
                    variant.walk(visit);
                }
            }
        }
    }
}

impl IntrospectedSchema {
    /// Follows a chain of root references to the node that actually carries a shape.
    pub fn resolve<'a>(&'a self, node: &'a SchemaNode) -> &'a SchemaNode {
        let mut current = node;
        let mut hops = 0;
        while let NodeKind::Reference(name) = &current.kind {
            match self.definitions.get(name) {
                Some(next) if hops < self.definitions.len() => {
                    current = next;
                    hops += 1;
                }
                _ => break,
            }
        }
        current
    }

    /// Whether the root resolves to an object node.
    pub fn root_is_object(&self) -> bool {
        matches!(self.resolve(&self.root).kind, NodeKind::Object { .. })
    }
}
