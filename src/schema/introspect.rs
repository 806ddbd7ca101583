use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use super::node::{FieldNode, IntrospectedSchema, NodeKind, PrimitiveType, SchemaNode};
use super::{LengthCheck, Schema, SchemaError};

/// Definition name used when a JSON-Schema document refers to itself through `"#"`.
const ROOT_DEFINITION: &str = "root";

/// Walks an abstract schema and returns its canonical node tree.
///
/// Named definitions are collected into [`IntrospectedSchema::definitions`]; lazy
/// back-references become [`NodeKind::Reference`] nodes. The introspector reports
/// whether each object field was optional but leaves required-ness to the compilers.
///
/// # Errors
///
/// Returns [`SchemaError::UnsupportedConstruct`] for tuples, intersections, records and
/// JSON-Schema shapes with no canonical node, and [`SchemaError::UnresolvedReference`]
/// when a lazy name is never defined.
///
/// # Examples
///
/// ```
/// use tessera_llm::schema::{introspect, NodeKind, Schema};
///
/// let doc = introspect(&Schema::object([("age", Schema::integer().optional())])).unwrap();
/// let NodeKind::Object { fields } = &doc.root.kind else { unreachable!() };
/// assert!(fields[0].optional);
/// ```
pub fn introspect(schema: &Schema) -> Result<IntrospectedSchema, SchemaError> {
    let mut walker = Introspector::default();
    let root = walker.schema(schema, "$")?;
    walker.finish(root)
}

#[derive(Default)]
struct Introspector {
    definitions: BTreeMap<String, SchemaNode>,
    visiting: BTreeSet<String>,
}

impl Introspector {
    fn finish(self, root: SchemaNode) -> Result<IntrospectedSchema, SchemaError> {
        let mut missing = None;
        let mut check = |node: &SchemaNode| {
            if let NodeKind::Reference(name) = &node.kind {
                if missing.is_none() && !self.definitions.contains_key(name) {
                    missing = Some(name.clone());
                }
            }
        };
        root.walk(&mut check);
        for definition in self.definitions.values() {
            definition.walk(&mut check);
        }
        if let Some(name) = missing {
            return Err(SchemaError::UnresolvedReference { name });
        }
        Ok(IntrospectedSchema {
            root,
            definitions: self.definitions,
        })
    }

    fn schema(&mut self, schema: &Schema, path: &str) -> Result<SchemaNode, SchemaError> {
        let node = match schema {
            Schema::String => SchemaNode::primitive(PrimitiveType::String),
            Schema::Number => SchemaNode::primitive(PrimitiveType::Number),
            Schema::Integer => SchemaNode::primitive(PrimitiveType::Integer),
            Schema::Boolean => SchemaNode::primitive(PrimitiveType::Boolean),
            Schema::Null => SchemaNode::primitive(PrimitiveType::Null),
            Schema::Array { element, checks } => {
                let element = self.schema(element, &format!("{path}[]"))?;
                let (min_items, max_items) = aggregate_checks(checks);
                SchemaNode::new(NodeKind::Array {
                    element: Box::new(element),
                    min_items,
                    max_items,
                })
            }
            Schema::Object(fields) => self.object(fields, path)?,
            Schema::Optional(inner) => {
                SchemaNode::new(NodeKind::Optional(Box::new(self.schema(inner, path)?)))
            }
            Schema::Nullable(inner) => {
                SchemaNode::new(NodeKind::Nullable(Box::new(self.schema(inner, path)?)))
            }
            Schema::Described { inner, description } => self
                .schema(inner, path)?
                .with_description(Some(description.clone())),
            Schema::Enum(values) => {
                if values.is_empty() {
                    return Err(unsupported("empty enum", path));
                }
                SchemaNode::new(NodeKind::Enum(values.clone()))
            }
            Schema::Literal(value) => literal(value, path)?,
            Schema::Union(variants) => {
                SchemaNode::new(NodeKind::Union(self.variants(variants, path)?))
            }
            Schema::DiscriminatedUnion {
                discriminator,
                variants,
            } => {
                let variants = self.variants(variants, path)?;
                for (idx, variant) in variants.iter().enumerate() {
                    if !has_literal_tag(variant, discriminator) {
                        return Err(unsupported(
                            format!("discriminated union variant without literal `{discriminator}`"),
                            &format!("{path}|{idx}"),
                        ));
                    }
                }
                SchemaNode::new(NodeKind::DiscriminatedUnion {
                    discriminator: discriminator.clone(),
                    variants,
                })
            }
            Schema::Named { name, inner } => {
                self.visiting.insert(name.clone());
                let node = self.schema(inner, path);
                self.visiting.remove(name);
                let node = node?;
                self.definitions.insert(name.clone(), node.clone());
                node
            }
            Schema::Lazy(name) => SchemaNode::new(NodeKind::Reference(name.clone())),
            Schema::Tuple(_) => return Err(unsupported("tuple", path)),
            Schema::Intersection(_) => return Err(unsupported("intersection", path)),
            Schema::Record(_) => return Err(unsupported("record", path)),
            Schema::Json(document) => {
                let mut saw_root_ref = false;
                let node = self.json(document, document, path, &mut saw_root_ref)?;
                if saw_root_ref {
                    self.definitions
                        .insert(ROOT_DEFINITION.to_string(), node.clone());
                }
                node
            }
        };
        Ok(node)
    }

    fn object(&mut self, fields: &[(String, Schema)], path: &str) -> Result<SchemaNode, SchemaError> {
        let mut seen = BTreeSet::new();
        let mut nodes = Vec::with_capacity(fields.len());
        for (name, schema) in fields {
            if !seen.insert(name.as_str()) {
                return Err(unsupported(format!("duplicate field `{name}`"), path));
            }
            let (optional, nullable, inner, description) = split_optional(schema);
            let mut node = self.schema(inner, &format!("{path}.{name}"))?;
            if nullable {
                node = SchemaNode::new(NodeKind::Nullable(Box::new(node)));
            }
            let node = node.with_description(description);
            nodes.push(FieldNode {
                name: name.clone(),
                optional,
                node,
            });
        }
        Ok(SchemaNode::new(NodeKind::Object { fields: nodes }))
    }

    fn variants(&mut self, variants: &[Schema], path: &str) -> Result<Vec<SchemaNode>, SchemaError> {
        if variants.is_empty() {
            return Err(unsupported("empty union", path));
        }
        variants
            .iter()
            .enumerate()
            .map(|(idx, variant)| self.schema(variant, &format!("{path}|{idx}")))
            .collect()
    }

    fn json(
        &mut self,
        value: &Value,
        document: &Value,
        path: &str,
        saw_root_ref: &mut bool,
    ) -> Result<SchemaNode, SchemaError> {
        let Some(obj) = value.as_object() else {
            return Err(unsupported("non-object JSON schema", path));
        };
        let description = obj
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(reference) = obj.get("$ref") {
            let reference = reference
                .as_str()
                .ok_or_else(|| unsupported("non-string $ref", path))?;
            let name = self.json_reference(reference, document, path, saw_root_ref)?;
            return Ok(SchemaNode::new(NodeKind::Reference(name)).with_description(description));
        }

        if let Some(value) = obj.get("const") {
            return Ok(literal(value, path)?.with_description(description));
        }

        if let Some(values) = obj.get("enum") {
            return Ok(json_enum(values, path)?.with_description(description));
        }

        for (keyword, discriminated) in [("anyOf", false), ("oneOf", true)] {
            if let Some(members) = obj.get(keyword) {
                let members = members
                    .as_array()
                    .filter(|members| !members.is_empty())
                    .ok_or_else(|| unsupported(format!("malformed {keyword}"), path))?;
                let node = self.json_union(members, document, path, discriminated, saw_root_ref)?;
                return Ok(node.with_description(description));
            }
        }

        if let Some(members) = obj.get("allOf") {
            return match members.as_array().map(Vec::as_slice) {
                Some([single]) => Ok(self
                    .json(single, document, path, saw_root_ref)?
                    .with_description(description)),
                _ => Err(unsupported("allOf", path)),
            };
        }

        let types: Vec<&str> = match obj.get("type") {
            Some(Value::String(kind)) => vec![kind.as_str()],
            Some(Value::Array(kinds)) => kinds.iter().filter_map(Value::as_str).collect(),
            Some(_) => return Err(unsupported("malformed type keyword", path)),
            None if obj.contains_key("properties") => vec!["object"],
            None if obj.contains_key("items") => vec!["array"],
            None => return Err(unsupported("unconstrained schema", path)),
        };

        let nullable = types.len() > 1 && types.contains(&"null");
        let concrete: Vec<&str> = types.iter().copied().filter(|kind| *kind != "null").collect();
        let node = match concrete.as_slice() {
            [] => SchemaNode::primitive(PrimitiveType::Null),
            [kind] => self.json_typed(kind, obj, document, path, saw_root_ref)?,
            _ => return Err(unsupported("multi-type schema", path)),
        };
        let node = if nullable {
            SchemaNode::new(NodeKind::Nullable(Box::new(node)))
        } else {
            node
        };
        Ok(node.with_description(description))
    }

    fn json_typed(
        &mut self,
        kind: &str,
        obj: &Map<String, Value>,
        document: &Value,
        path: &str,
        saw_root_ref: &mut bool,
    ) -> Result<SchemaNode, SchemaError> {
        let node = match kind {
            "string" => SchemaNode::primitive(PrimitiveType::String),
            "number" => SchemaNode::primitive(PrimitiveType::Number),
            "integer" => SchemaNode::primitive(PrimitiveType::Integer),
            "boolean" => SchemaNode::primitive(PrimitiveType::Boolean),
            "null" => SchemaNode::primitive(PrimitiveType::Null),
            "array" => {
                let items = match obj.get("items") {
                    Some(items @ Value::Object(_)) => items,
                    Some(Value::Array(_)) => return Err(unsupported("tuple", path)),
                    _ => return Err(unsupported("array without items", path)),
                };
                let element = self.json(items, document, &format!("{path}[]"), saw_root_ref)?;
                SchemaNode::new(NodeKind::Array {
                    element: Box::new(element),
                    min_items: obj.get("minItems").and_then(Value::as_u64).map(|n| n as usize),
                    max_items: obj.get("maxItems").and_then(Value::as_u64).map(|n| n as usize),
                })
            }
            "object" => {
                let properties = obj.get("properties").and_then(Value::as_object);
                if properties.is_none()
                    && matches!(obj.get("additionalProperties"), Some(Value::Object(_)))
                {
                    return Err(unsupported("record", path));
                }
                let required: BTreeSet<&str> = obj
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|names| names.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                let mut fields = Vec::new();
                for (name, schema) in properties.into_iter().flatten() {
                    let node = self.json(schema, document, &format!("{path}.{name}"), saw_root_ref)?;
                    fields.push(FieldNode {
                        name: name.clone(),
                        optional: !required.contains(name.as_str()),
                        node,
                    });
                }
                SchemaNode::new(NodeKind::Object { fields })
            }
            other => return Err(unsupported(format!("type `{other}`"), path)),
        };
        Ok(node)
    }

    fn json_union(
        &mut self,
        members: &[Value],
        document: &Value,
        path: &str,
        discriminated: bool,
        saw_root_ref: &mut bool,
    ) -> Result<SchemaNode, SchemaError> {
        if let [first, second] = members {
            let null_position = [first, second].iter().position(|member| is_null_schema(member));
            if let Some(position) = null_position {
                let other = if position == 0 { second } else { first };
                let inner = self.json(other, document, path, saw_root_ref)?;
                return Ok(SchemaNode::new(NodeKind::Nullable(Box::new(inner))));
            }
        }
        let variants = members
            .iter()
            .enumerate()
            .map(|(idx, member)| self.json(member, document, &format!("{path}|{idx}"), saw_root_ref))
            .collect::<Result<Vec<_>, _>>()?;
        if discriminated {
            if let Some(discriminator) = find_discriminator(&variants) {
                return Ok(SchemaNode::new(NodeKind::DiscriminatedUnion {
                    discriminator,
                    variants,
                }));
            }
        }
        Ok(SchemaNode::new(NodeKind::Union(variants)))
    }

    fn json_reference(
        &mut self,
        reference: &str,
        document: &Value,
        path: &str,
        saw_root_ref: &mut bool,
    ) -> Result<String, SchemaError> {
        if reference == "#" {
            *saw_root_ref = true;
            return Ok(ROOT_DEFINITION.to_string());
        }
        let (table, name) = reference
            .strip_prefix("#/$defs/")
            .map(|name| ("$defs", name))
            .or_else(|| {
                reference
                    .strip_prefix("#/definitions/")
                    .map(|name| ("definitions", name))
            })
            .ok_or_else(|| unsupported(format!("external reference `{reference}`"), path))?;
        let name = name.to_string();
        if self.definitions.contains_key(&name) || self.visiting.contains(&name) {
            return Ok(name);
        }
        let target = document
            .get(table)
            .and_then(|defs| defs.get(&name))
            .ok_or_else(|| SchemaError::UnresolvedReference { name: name.clone() })?;
        self.visiting.insert(name.clone());
        let node = self.json(target, document, &format!("#/{table}/{name}"), saw_root_ref);
        self.visiting.remove(&name);
        self.definitions.insert(name.clone(), node?);
        Ok(name)
    }
}

fn unsupported(kind: impl Into<String>, path: &str) -> SchemaError {
    SchemaError::UnsupportedConstruct {
        kind: kind.into(),
        path: path.to_string(),
    }
}

fn aggregate_checks(checks: &[LengthCheck]) -> (Option<usize>, Option<usize>) {
    let mut min: Option<usize> = None;
    let mut max: Option<usize> = None;
    for check in checks {
        match *check {
            LengthCheck::Min(n) => min = Some(min.map_or(n, |m| m.max(n))),
            LengthCheck::Max(n) => max = Some(max.map_or(n, |m| m.min(n))),
            LengthCheck::Exact(n) => {
                min = Some(min.map_or(n, |m| m.max(n)));
                max = Some(max.map_or(n, |m| m.min(n)));
            }
        }
    }
    (min, max)
}

/// Peels optional, nullable and description wrappers off a field schema, in any order.
fn split_optional(schema: &Schema) -> (bool, bool, &Schema, Option<String>) {
    let mut optional = false;
    let mut nullable = false;
    let mut description = None;
    let mut current = schema;
    loop {
        match current {
            Schema::Optional(inner) => {
                optional = true;
                current = inner;
            }
            Schema::Nullable(inner) => {
                nullable = true;
                current = inner;
            }
            Schema::Described {
                inner,
                description: text,
            } => {
                description.get_or_insert_with(|| text.clone());
                current = inner;
            }
            _ => return (optional, nullable, current, description),
        }
    }
}

fn literal(value: &Value, path: &str) -> Result<SchemaNode, SchemaError> {
    let primitive =
        PrimitiveType::of_value(value).ok_or_else(|| unsupported("non-scalar literal", path))?;
    Ok(SchemaNode::new(NodeKind::Literal {
        value: value.clone(),
        primitive,
    }))
}

fn json_enum(values: &Value, path: &str) -> Result<SchemaNode, SchemaError> {
    let values = values
        .as_array()
        .filter(|values| !values.is_empty())
        .ok_or_else(|| unsupported("empty enum", path))?;
    if let [single] = values.as_slice() {
        if !single.is_string() {
            return literal(single, path);
        }
    }
    let has_null = values.iter().any(Value::is_null);
    let strings: Option<Vec<String>> = values
        .iter()
        .filter(|value| !value.is_null())
        .map(|value| value.as_str().map(str::to_string))
        .collect();
    match strings {
        Some(strings) if !strings.is_empty() => {
            let node = SchemaNode::new(NodeKind::Enum(strings));
            Ok(if has_null {
                SchemaNode::new(NodeKind::Nullable(Box::new(node)))
            } else {
                node
            })
        }
        _ => Err(unsupported("enum with non-string values", path)),
    }
}

fn is_null_schema(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str) == Some("null")
        || value.get("const").is_some_and(Value::is_null)
}

fn has_literal_tag(variant: &SchemaNode, discriminator: &str) -> bool {
    match &variant.kind {
        NodeKind::Object { fields } => fields.iter().any(|field| {
            field.name == discriminator
                && !field.optional
                && matches!(
                    &field.node.kind,
                    NodeKind::Literal { .. } | NodeKind::Enum(_)
                )
        }),
        _ => false,
    }
}

/// Finds a field that every variant pins to a literal value.
fn find_discriminator(variants: &[SchemaNode]) -> Option<String> {
    let NodeKind::Object { fields } = &variants.first()?.kind else {
        return None;
    };
    fields
        .iter()
        .map(|field| field.name.clone())
        .find(|name| variants.iter().all(|variant| has_literal_tag(variant, name)))
}
