use std::collections::BTreeSet;

use serde_json::{Map, Value, json};

use crate::schema::SchemaError;
use crate::schema::node::{IntrospectedSchema, NodeKind, SchemaNode};

use super::{
    CompileTarget, CompiledSchema, Dialect, SchemaCompiler, array_schema, compile_definitions,
    describe, null_schema, reference, with_definitions, wrap_value,
};

/// Compiler for the strict dialect used by OpenAI structured outputs.
///
/// Every object is closed and lists all of its fields as required; optional fields are
/// encoded as nullable instead. Unions cannot be expressed, except at the root of a tool
/// input where they are pushed under the `value` wrapper.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictCompiler;

impl SchemaCompiler for StrictCompiler {
    fn dialect(&self) -> Dialect {
        Dialect::Strict
    }

    fn compile(
        &self,
        schema: &IntrospectedSchema,
        target: CompileTarget,
    ) -> Result<CompiledSchema, SchemaError> {
        let mut refs = BTreeSet::new();
        let root = match (&schema.root.kind, target) {
            (
                NodeKind::Union(variants) | NodeKind::DiscriminatedUnion { variants, .. },
                CompileTarget::ToolInput,
            ) => {
                let members = variants
                    .iter()
                    .enumerate()
                    .map(|(idx, variant)| emit(variant, &format!("$|{idx}"), &mut refs))
                    .collect::<Result<Vec<_>, _>>()?;
                describe(json!({ "anyOf": members }), &schema.root)
            }
            _ => emit(&schema.root, "$", &mut refs)?,
        };
        let definitions = compile_definitions(schema, refs, emit)?;
        let wrapped = !schema.root_is_object();
        let wire = if wrapped {
            wrap_value(root.clone(), true)
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

fn emit(node: &SchemaNode, path: &str, refs: &mut BTreeSet<String>) -> Result<Value, SchemaError> {
    let value = match &node.kind {
        NodeKind::Primitive(primitive) => json!({ "type": primitive.as_str() }),
        NodeKind::Array {
            element,
            min_items,
            max_items,
        } => array_schema(emit(element, &format!("{path}[]"), refs)?, *min_items, *max_items),
        NodeKind::Object { fields } => {
            let mut properties = Map::new();
            let mut required = Vec::with_capacity(fields.len());
            for field in fields {
                let child = emit(&field.node, &format!("{path}.{}", field.name), refs)?;
                let child = if field.optional { or_null(child) } else { child };
                properties.insert(field.name.clone(), child);
                required.push(Value::String(field.name.clone()));
            }
            json!({
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false
            })
        }
        NodeKind::Optional(inner) | NodeKind::Nullable(inner) => or_null(emit(inner, path, refs)?),
        NodeKind::Enum(values) => json!({ "type": "string", "enum": values }),
        NodeKind::Literal { value, primitive } => {
            json!({ "type": primitive.as_str(), "enum": [value] })
        }
        NodeKind::Union(_) | NodeKind::DiscriminatedUnion { .. } => {
            return Err(SchemaError::Compilation {
                dialect: Dialect::Strict.name(),
                path: path.to_string(),
                message: "union types are not supported; refactor the union into a single flat \
                          object whose variant-specific fields are nullable"
                    .to_string(),
            });
        }
        NodeKind::Reference(name) => {
            refs.insert(name.clone());
            reference(name)
        }
    };
    Ok(describe(value, node))
}

fn or_null(value: Value) -> Value {
    json!({ "anyOf": [value, null_schema()] })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    fn compile(schema: &Schema, target: CompileTarget) -> Result<CompiledSchema, SchemaError> {
        StrictCompiler.compile_schema(schema, target)
    }

    #[test]
    fn objects_are_closed_and_fully_required() {
        let compiled = compile(
            &Schema::object([
                ("id", Schema::string()),
                ("score", Schema::number().optional()),
            ]),
            CompileTarget::ResponseSchema,
        )
        .expect("compile");
        assert!(!compiled.wrapped);
        assert_eq!(
            compiled.schema,
            json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "score": { "anyOf": [{ "type": "number" }, { "type": "null" }] }
                },
                "required": ["id", "score"],
                "additionalProperties": false
            })
        );
    }

    #[test]
    fn optional_nullable_doubles_the_any_of() {
        let compiled = compile(
            &Schema::object([("alias", Schema::string().nullable().optional())]),
            CompileTarget::ResponseSchema,
        )
        .expect("compile");
        assert_eq!(
            compiled.schema["properties"]["alias"],
            json!({
                "anyOf": [
                    { "anyOf": [{ "type": "string" }, { "type": "null" }] },
                    { "type": "null" }
                ]
            })
        );
    }

    #[test]
    fn nested_union_is_rejected_with_refactor_hint() {
        let err = compile(
            &Schema::object([(
                "shape",
                Schema::union([Schema::string(), Schema::number()]),
            )]),
            CompileTarget::ToolInput,
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("union"), "{message}");
        assert!(message.contains("refactor"), "{message}");
        assert!(message.contains("$.shape"), "{message}");
    }

    #[test]
    fn root_union_is_wrapped_for_tool_input_only() {
        let union = Schema::union([
            Schema::object([("a", Schema::string())]),
            Schema::object([("b", Schema::integer())]),
        ]);

        let err = compile(&union, CompileTarget::ResponseSchema).unwrap_err();
        assert!(matches!(err, SchemaError::Compilation { .. }));

        let compiled = compile(&union, CompileTarget::ToolInput).expect("compile");
        assert!(compiled.wrapped);
        assert_eq!(compiled.schema["required"], json!(["value"]));
        assert_eq!(compiled.schema["additionalProperties"], json!(false));
        let members = compiled.schema["properties"]["value"]["anyOf"]
            .as_array()
            .expect("anyOf");
        assert_eq!(members.len(), 2);
        assert_eq!(compiled.validation["anyOf"], json!(members));
    }

    #[test]
    fn recursion_goes_through_defs() {
        let tree = Schema::named(
            "Node",
            Schema::object([
                ("label", Schema::string()),
                ("children", Schema::array(Schema::lazy("Node"))),
            ]),
        );
        let compiled = compile(&tree, CompileTarget::ResponseSchema).expect("compile");
        assert_eq!(
            compiled.schema["properties"]["children"]["items"],
            json!({ "$ref": "#/$defs/Node" })
        );
        assert_eq!(
            compiled.schema["$defs"]["Node"]["additionalProperties"],
            json!(false)
        );
        assert!(compiled.validation.get("$defs").is_some());
    }

    #[test]
    fn enums_literals_and_descriptions() {
        let compiled = compile(
            &Schema::object([
                ("mode", Schema::enumeration(["fast", "slow"]).describe("speed")),
                ("version", Schema::literal(2)),
            ]),
            CompileTarget::ResponseSchema,
        )
        .expect("compile");
        assert_eq!(
            compiled.schema["properties"]["mode"],
            json!({ "type": "string", "enum": ["fast", "slow"], "description": "speed" })
        );
        assert_eq!(
            compiled.schema["properties"]["version"],
            json!({ "type": "integer", "enum": [2] })
        );
    }
}
