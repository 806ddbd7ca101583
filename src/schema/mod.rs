//! Abstract validation schemas and their translation into backend JSON-Schema dialects.
//!
//! A [`Schema`] describes the expected shape of a structured answer or of tool arguments
//! without committing to any backend. [`introspect`] turns it into a canonical
//! [`SchemaNode`] tree, and a [`SchemaCompiler`] renders that tree in one of the three
//! dialects understood by the supported providers.

use schemars::JsonSchema;
use serde_json::Value;
use thiserror::Error;

pub mod compiler;
mod introspect;
mod node;
pub mod validate;

pub use compiler::{
    CompileTarget, CompiledSchema, Dialect, NativeCompiler, SchemaCompiler, StrictCompiler,
    ToolInputCompiler,
};
pub use introspect::introspect;
pub use node::{FieldNode, IntrospectedSchema, NodeKind, PrimitiveType, SchemaNode};

/// Failures raised while introspecting or compiling a schema.
///
/// These are always detected before any network traffic and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The schema uses a construct with no canonical node representation.
    #[error("unsupported schema construct `{kind}` at {path}")]
    UnsupportedConstruct { kind: String, path: String },
    /// A lazy back-reference points at a name that was never defined.
    #[error("unresolved schema reference `{name}`")]
    UnresolvedReference { name: String },
    /// The target dialect cannot express the node found at `path`.
    #[error("cannot compile schema for the {dialect} dialect at {path}: {message}")]
    Compilation {
        dialect: &'static str,
        path: String,
        message: String,
    },
}

/// Length constraint attached to an array schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthCheck {
    Min(usize),
    Max(usize),
    Exact(usize),
}

/// Abstract, backend-independent description of a data shape.
///
/// Schemas are built with the constructor functions and refined with the chaining
/// combinators:
///
/// ```
/// use tessera_llm::schema::Schema;
///
/// let person = Schema::object([
///     ("name", Schema::string().describe("Full name")),
///     ("nickname", Schema::string().optional()),
///     ("tags", Schema::array(Schema::string()).max_items(5)),
/// ]);
/// assert!(matches!(person, Schema::Object(_)));
/// ```
///
/// Recursive shapes are declared with [`Schema::named`] and referenced from inside with
/// [`Schema::lazy`]:
///
/// ```
/// use tessera_llm::schema::Schema;
///
/// let tree = Schema::named(
///     "Node",
///     Schema::object([
///         ("label", Schema::string()),
///         ("children", Schema::array(Schema::lazy("Node"))),
///     ]),
/// );
/// # let _ = tree;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    String,
    Number,
    Integer,
    Boolean,
    Null,
    Array {
        element: Box<Schema>,
        checks: Vec<LengthCheck>,
    },
    /// Ordered list of named fields.
    Object(Vec<(String, Schema)>),
    Optional(Box<Schema>),
    Nullable(Box<Schema>),
    Described {
        inner: Box<Schema>,
        description: String,
    },
    Enum(Vec<String>),
    Literal(Value),
    Union(Vec<Schema>),
    DiscriminatedUnion {
        discriminator: String,
        variants: Vec<Schema>,
    },
    /// Definition target for [`Schema::Lazy`] back-references.
    Named {
        name: String,
        inner: Box<Schema>,
    },
    Lazy(String),
    Tuple(Vec<Schema>),
    Intersection(Vec<Schema>),
    Record(Box<Schema>),
    /// Pre-built JSON-Schema document.
    Json(Value),
}

impl Schema {
    pub fn string() -> Self {
        Self::String
    }

    pub fn number() -> Self {
        Self::Number
    }

    pub fn integer() -> Self {
        Self::Integer
    }

    pub fn boolean() -> Self {
        Self::Boolean
    }

    pub fn null() -> Self {
        Self::Null
    }

    pub fn array(element: Schema) -> Self {
        Self::Array {
            element: Box::new(element),
            checks: Vec::new(),
        }
    }

    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Schema)>,
        K: Into<String>,
    {
        Self::Object(
            fields
                .into_iter()
                .map(|(name, schema)| (name.into(), schema))
                .collect(),
        )
    }

    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum(values.into_iter().map(Into::into).collect())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn union(variants: impl IntoIterator<Item = Schema>) -> Self {
        Self::Union(variants.into_iter().collect())
    }

    pub fn discriminated_union(
        discriminator: impl Into<String>,
        variants: impl IntoIterator<Item = Schema>,
    ) -> Self {
        Self::DiscriminatedUnion {
            discriminator: discriminator.into(),
            variants: variants.into_iter().collect(),
        }
    }

    pub fn named(name: impl Into<String>, inner: Schema) -> Self {
        Self::Named {
            name: name.into(),
            inner: Box::new(inner),
        }
    }

    pub fn lazy(name: impl Into<String>) -> Self {
        Self::Lazy(name.into())
    }

    pub fn json(document: Value) -> Self {
        Self::Json(document)
    }

    /// Derives the schema of a Rust type through `schemars`.
    ///
    /// ```
    /// use schemars::JsonSchema;
    /// use tessera_llm::schema::Schema;
    ///
    /// #[derive(JsonSchema)]
    /// #[allow(dead_code)]
    /// struct City {
    ///     name: String,
    ///     population: u64,
    /// }
    ///
    /// assert!(matches!(Schema::from_type::<City>(), Schema::Json(_)));
    /// ```
    pub fn from_type<T: JsonSchema>() -> Self {
        let root = schemars::schema_for!(T);
        Self::Json(serde_json::to_value(root).unwrap_or(Value::Null))
    }

    pub fn optional(self) -> Self {
        Self::Optional(Box::new(self))
    }

    pub fn nullable(self) -> Self {
        Self::Nullable(Box::new(self))
    }

    pub fn describe(self, description: impl Into<String>) -> Self {
        Self::Described {
            inner: Box::new(self),
            description: description.into(),
        }
    }

    /// Adds a minimum length check. Has no effect on non-array schemas.
    pub fn min_items(self, min: usize) -> Self {
        self.with_check(LengthCheck::Min(min))
    }

    /// Adds a maximum length check. Has no effect on non-array schemas.
    pub fn max_items(self, max: usize) -> Self {
        self.with_check(LengthCheck::Max(max))
    }

    /// Pins the array length. Has no effect on non-array schemas.
    pub fn length(self, exact: usize) -> Self {
        self.with_check(LengthCheck::Exact(exact))
    }

    fn with_check(self, check: LengthCheck) -> Self {
        match self {
            Self::Array {
                element,
                mut checks,
            } => {
                checks.push(check);
                Self::Array { element, checks }
            }
            Self::Described { inner, description } => Self::Described {
                inner: Box::new(inner.with_check(check)),
                description,
            },
            other => other,
        }
    }
}
