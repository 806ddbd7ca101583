//! Payload validation against compiled schemas.

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

/// Validates `instance` against a standard JSON-Schema document.
///
/// Returns the collected violation messages joined with `; ` on failure.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use tessera_llm::schema::validate::validate;
///
/// let schema = json!({ "type": "object", "required": ["id"] });
/// assert!(validate(&schema, &json!({ "id": 1 })).is_ok());
/// assert!(validate(&schema, &json!({})).is_err());
/// ```
pub fn validate(schema: &Value, instance: &Value) -> Result<(), String> {
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map_err(|err| format!("invalid validation schema: {err}"))?;
    let result = compiled.validate(instance);
    match result {
        Ok(()) => Ok(()),
        Err(errors) => {
            let messages: Vec<String> = errors
                .map(|err| {
                    let location = err.instance_path.to_string();
                    if location.is_empty() {
                        err.to_string()
                    } else {
                        format!("{location}: {err}")
                    }
                })
                .collect();
            Err(messages.join("; "))
        }
    }
}
