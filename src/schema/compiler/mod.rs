//! Per-dialect renderers turning a [`SchemaNode`] tree into a backend JSON-Schema document.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value, json};

use super::node::{IntrospectedSchema, SchemaNode};
use super::{Schema, SchemaError, introspect};

mod native;
mod strict;
mod tool_input;

pub use native::NativeCompiler;
pub use strict::StrictCompiler;
pub use tool_input::ToolInputCompiler;

/// Property used to push a non-object root one level down.
pub const WRAPPER_PROPERTY: &str = "value";

/// Where the compiled document will be placed in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileTarget {
    /// Native structured-output directive (`response_format`, `responseSchema`).
    ResponseSchema,
    /// Parameters of a tool / function declaration.
    ToolInput,
}

/// JSON-Schema profile accepted by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `additionalProperties:false`, every field required, optionality as nullability.
    Strict,
    /// Plain JSON Schema with a real `required` list.
    ToolInput,
    /// Tool-input output with upper-cased type names and no references.
    Native,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::ToolInput => "tool-input",
            Self::Native => "native",
        }
    }

    /// Compiler implementing this dialect.
    pub fn compiler(self) -> &'static dyn SchemaCompiler {
        match self {
            Self::Strict => &StrictCompiler,
            Self::ToolInput => &ToolInputCompiler,
            Self::Native => &NativeCompiler,
        }
    }
}

/// Result of compiling one schema.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSchema {
    /// Document sent on the wire.
    pub schema: Value,
    /// Standard JSON-Schema document for the unwrapped payload, used for validation.
    pub validation: Value,
    /// Whether the payload sits under [`WRAPPER_PROPERTY`].
    pub wrapped: bool,
}

/// Renders introspected schemas in one backend dialect.
pub trait SchemaCompiler: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Compiles an introspected schema.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Compilation`] when the tree uses a construct the dialect
    /// cannot express.
    fn compile(
        &self,
        schema: &IntrospectedSchema,
        target: CompileTarget,
    ) -> Result<CompiledSchema, SchemaError>;

    /// Introspects then compiles an abstract schema.
    fn compile_schema(
        &self,
        schema: &Schema,
        target: CompileTarget,
    ) -> Result<CompiledSchema, SchemaError> {
        let introspected = introspect(schema)?;
        self.compile(&introspected, target)
    }
}

/// Adds `description` to a compiled node when the source node carries one.
pub(crate) fn describe(mut value: Value, node: &SchemaNode) -> Value {
    if let (Some(description), Some(map)) = (&node.description, value.as_object_mut()) {
        map.insert("description".to_string(), Value::String(description.clone()));
    }
    value
}

pub(crate) fn null_schema() -> Value {
    json!({ "type": "null" })
}

pub(crate) fn reference(name: &str) -> Value {
    json!({ "$ref": format!("#/$defs/{name}") })
}

pub(crate) fn array_schema(items: Value, min_items: Option<usize>, max_items: Option<usize>) -> Value {
    let mut map = Map::new();
    map.insert("type".to_string(), json!("array"));
    map.insert("items".to_string(), items);
    if let Some(min) = min_items {
        map.insert("minItems".to_string(), json!(min));
    }
    if let Some(max) = max_items {
        map.insert("maxItems".to_string(), json!(max));
    }
    Value::Object(map)
}

/// Compiles every definition reachable from `referenced`, following references found
/// inside definitions until the set is closed.
pub(crate) fn compile_definitions<F>(
    schema: &IntrospectedSchema,
    mut referenced: BTreeSet<String>,
    mut compile: F,
) -> Result<BTreeMap<String, Value>, SchemaError>
where
    F: FnMut(&SchemaNode, &str, &mut BTreeSet<String>) -> Result<Value, SchemaError>,
{
    let mut compiled = BTreeMap::new();
    while let Some(name) = referenced.pop_first() {
        if compiled.contains_key(&name) {
            continue;
        }
        let node = schema
            .definitions
            .get(&name)
            .ok_or_else(|| SchemaError::UnresolvedReference { name: name.clone() })?;
        let mut found = BTreeSet::new();
        let value = compile(node, &format!("#/$defs/{name}"), &mut found)?;
        compiled.insert(name, value);
        referenced.extend(found.into_iter().filter(|name| !compiled.contains_key(name)));
    }
    Ok(compiled)
}

/// Inserts a `$defs` table at the top of a document.
pub(crate) fn with_definitions(mut document: Value, definitions: &BTreeMap<String, Value>) -> Value {
    if definitions.is_empty() {
        return document;
    }
    if let Some(map) = document.as_object_mut() {
        let table: Map<String, Value> = definitions
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        map.insert("$defs".to_string(), Value::Object(table));
    }
    document
}

/// Wraps a payload schema inside a single required `value` property.
pub(crate) fn wrap_value(root: Value, closed: bool) -> Value {
    let mut map = Map::new();
    map.insert("type".to_string(), json!("object"));
    let mut properties = Map::new();
    properties.insert(WRAPPER_PROPERTY.to_string(), root);
    map.insert("properties".to_string(), Value::Object(properties));
    map.insert("required".to_string(), json!([WRAPPER_PROPERTY]));
    if closed {
        map.insert("additionalProperties".to_string(), Value::Bool(false));
    }
    Value::Object(map)
}
