use serde_json::Value;

use crate::schema::SchemaError;
use crate::schema::node::IntrospectedSchema;

use super::tool_input::Emitter;
use super::{CompileTarget, CompiledSchema, Dialect, SchemaCompiler, wrap_value};

/// Compiler for the native Gemini dialect.
///
/// Output is the tool-input document with every definition inlined and the type
/// keywords upper-cased (`STRING`, `OBJECT`, ...). Recursive schemas are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCompiler;

impl SchemaCompiler for NativeCompiler {
    fn dialect(&self) -> Dialect {
        Dialect::Native
    }

    fn compile(
        &self,
        schema: &IntrospectedSchema,
        target: CompileTarget,
    ) -> Result<CompiledSchema, SchemaError> {
        let root = Emitter::inlining(schema).emit(&schema.root, "$")?;
        let wrapped = target == CompileTarget::ToolInput && !schema.root_is_object();
        let mut wire = if wrapped {
            wrap_value(root.clone(), false)
        } else {
            root.clone()
        };
        uppercase_types(&mut wire);
        Ok(CompiledSchema {
            schema: wire,
            validation: root,
            wrapped,
        })
    }
}

/// Upper-cases every `type` keyword; property maps are walked but property names are
/// left alone because their values are objects, not strings.
fn uppercase_types(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                match child {
                    Value::String(kind) if key == "type" => *kind = kind.to_ascii_uppercase(),
                    other => uppercase_types(other),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(uppercase_types),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use serde_json::json;

    #[test]
    fn type_names_are_upper_cased() {
        let compiled = NativeCompiler
            .compile_schema(
                &Schema::object([
                    ("type", Schema::enumeration(["a", "b"])),
                    ("count", Schema::integer().optional()),
                    ("flags", Schema::array(Schema::boolean())),
                ]),
                CompileTarget::ResponseSchema,
            )
            .expect("compile");
        assert_eq!(
            compiled.schema,
            json!({
                "type": "OBJECT",
                "properties": {
                    "type": { "type": "STRING", "enum": ["a", "b"] },
                    "count": { "type": "INTEGER" },
                    "flags": { "type": "ARRAY", "items": { "type": "BOOLEAN" } }
                },
                "required": ["type", "flags"]
            })
        );
        assert_eq!(compiled.validation["type"], json!("object"));
    }

    #[test]
    fn recursion_is_rejected() {
        let tree = Schema::named(
            "Node",
            Schema::object([("children", Schema::array(Schema::lazy("Node")))]),
        );
        let err = NativeCompiler
            .compile_schema(&tree, CompileTarget::ResponseSchema)
            .unwrap_err();
        match err {
            SchemaError::Compilation { dialect, .. } => assert_eq!(dialect, "native"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_recursive_references_are_inlined() {
        let document = json!({
            "type": "object",
            "properties": { "home": { "$ref": "#/$defs/Address" } },
            "required": ["home"],
            "$defs": {
                "Address": {
                    "type": "object",
                    "properties": { "street": { "type": "string" } },
                    "required": ["street"]
                }
            }
        });
        let compiled = NativeCompiler
            .compile_schema(&Schema::json(document), CompileTarget::ResponseSchema)
            .expect("compile");
        assert_eq!(
            compiled.schema["properties"]["home"]["properties"]["street"],
            json!({ "type": "STRING" })
        );
    }
}
