use std::collections::BTreeSet;

use serde_json::{Map, Value, json};

use crate::schema::SchemaError;
use crate::schema::node::{IntrospectedSchema, NodeKind, SchemaNode};

use super::{
    CompileTarget, CompiledSchema, Dialect, SchemaCompiler, array_schema, compile_definitions,
    describe, null_schema, reference, with_definitions, wrap_value,
};

/// Compiler for the tool-input dialect used by Anthropic tool definitions.
///
/// Optionality is native (`required` lists only mandatory fields) and unions are
/// emitted as `anyOf` / `oneOf` without restriction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolInputCompiler;

impl SchemaCompiler for ToolInputCompiler {
    fn dialect(&self) -> Dialect {
        Dialect::ToolInput
    }

    fn compile(
        &self,
        schema: &IntrospectedSchema,
        target: CompileTarget,
    ) -> Result<CompiledSchema, SchemaError> {
        let mut emitter = Emitter::referencing(schema);
        let root = emitter.emit(&schema.root, "$")?;
        let refs = std::mem::take(&mut emitter.refs);
        let definitions = compile_definitions(schema, refs, |node, path, found| {
            let mut nested = Emitter::referencing(schema);
            let value = nested.emit(node, path)?;
            found.extend(nested.refs);
            Ok(value)
        })?;
        let wrapped = target == CompileTarget::ToolInput && !schema.root_is_object();
        let wire = if wrapped {
            wrap_value(root.clone(), false)
        } else {
            root.clone()
        };
        Ok(CompiledSchema {
            schema: with_definitions(wire, &definitions),
            validation: with_definitions(root, &definitions),
            wrapped,
        })
    }
}

/// Renders nodes in the tool-input shape, either referencing definitions through
/// `$defs` or inlining them.
pub(super) struct Emitter<'a> {
    schema: &'a IntrospectedSchema,
    pub(super) refs: BTreeSet<String>,
    inline: bool,
    expanding: Vec<String>,
}

impl<'a> Emitter<'a> {
    pub(super) fn referencing(schema: &'a IntrospectedSchema) -> Self {
        Self {
            schema,
            refs: BTreeSet::new(),
            inline: false,
            expanding: Vec::new(),
        }
    }

    /// Inlines every reference; a reference back into a definition currently being
    /// expanded is a recursion error for `dialect`.
    pub(super) fn inlining(schema: &'a IntrospectedSchema) -> Self {
        Self {
            inline: true,
            ..Self::referencing(schema)
        }
    }

    pub(super) fn emit(&mut self, node: &SchemaNode, path: &str) -> Result<Value, SchemaError> {
        let value = match &node.kind {
            NodeKind::Primitive(primitive) => json!({ "type": primitive.as_str() }),
            NodeKind::Array {
                element,
                min_items,
                max_items,
            } => array_schema(
                self.emit(element, &format!("{path}[]"))?,
                *min_items,
                *max_items,
            ),
            NodeKind::Object { fields } => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for field in fields {
                    let child = self.emit(&field.node, &format!("{path}.{}", field.name))?;
                    properties.insert(field.name.clone(), child);
                    if !field.optional {
                        required.push(Value::String(field.name.clone()));
                    }
                }
                let mut map = Map::new();
                map.insert("type".to_string(), json!("object"));
                map.insert("properties".to_string(), Value::Object(properties));
                if !required.is_empty() {
                    map.insert("required".to_string(), Value::Array(required));
                }
                Value::Object(map)
            }
            NodeKind::Optional(inner) => self.emit(inner, path)?,
            NodeKind::Nullable(inner) => json!({ "anyOf": [self.emit(inner, path)?, null_schema()] }),
            NodeKind::Enum(values) => json!({ "type": "string", "enum": values }),
            NodeKind::Literal { value, primitive } => {
                json!({ "type": primitive.as_str(), "enum": [value] })
            }
            NodeKind::Union(variants) => json!({ "anyOf": self.variants(variants, path)? }),
            NodeKind::DiscriminatedUnion { variants, .. } => {
                json!({ "oneOf": self.variants(variants, path)? })
            }
            NodeKind::Reference(name) if self.inline => self.expand(name, path)?,
            NodeKind::Reference(name) => {
                self.refs.insert(name.clone());
                reference(name)
            }
        };
        Ok(describe(value, node))
    }

    fn variants(&mut self, variants: &[SchemaNode], path: &str) -> Result<Vec<Value>, SchemaError> {
        variants
            .iter()
            .enumerate()
            .map(|(idx, variant)| self.emit(variant, &format!("{path}|{idx}")))
            .collect()
    }

    fn expand(&mut self, name: &str, path: &str) -> Result<Value, SchemaError> {
        if self.expanding.iter().any(|open| open == name) {
            return Err(SchemaError::Compilation {
                dialect: Dialect::Native.name(),
                path: path.to_string(),
                message: format!(
                    "recursive reference to `{name}` cannot be expressed without $ref support"
                ),
            });
        }
        let definition = self
            .schema
            .definitions
            .get(name)
            .ok_or_else(|| SchemaError::UnresolvedReference {
                name: name.to_string(),
            })?;
        self.expanding.push(name.to_string());
        let value = self.emit(definition, path);
        self.expanding.pop();
        value
    }
}
