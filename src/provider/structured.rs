//! Structured-output conventions shared by the request and response transformers.

use serde_json::Value;

use crate::schema::CompiledSchema;
use crate::schema::compiler::WRAPPER_PROPERTY;
use crate::schema::validate::validate;
use crate::types::{Content, ToolCall};

/// Name of the implicit tool synthesized for structured output.
pub const SYNTHETIC_TOOL_NAME: &str = "structured_output";

/// Where the structured payload will be found in the backend's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputConvention {
    /// Arguments of the implicit tool call named `name`.
    ToolCall { name: String, unwrap_value: bool },
    /// JSON text in the message body.
    MessageText { unwrap_value: bool },
}

/// Calling-convention metadata recorded by the request transformer and consumed by the
/// response side.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredPlan {
    pub convention: OutputConvention,
    /// Standard JSON-Schema document the unwrapped payload must satisfy.
    pub validation: Value,
}

impl StructuredPlan {
    pub(crate) fn tool_call(compiled: &CompiledSchema) -> Self {
        Self {
            convention: OutputConvention::ToolCall {
                name: SYNTHETIC_TOOL_NAME.to_string(),
                unwrap_value: compiled.wrapped,
            },
            validation: compiled.validation.clone(),
        }
    }

    pub(crate) fn message_text(compiled: &CompiledSchema) -> Self {
        Self {
            convention: OutputConvention::MessageText {
                unwrap_value: compiled.wrapped,
            },
            validation: compiled.validation.clone(),
        }
    }
}

/// Locates, unwraps and validates the structured payload.
///
/// The implicit tool call is removed from `tool_calls` whether or not its payload is
/// valid. Any failure degrades to text: the message text when present, otherwise the
/// raw payload.
pub(crate) fn extract_structured(
    plan: &StructuredPlan,
    text: &str,
    tool_calls: &mut Vec<ToolCall>,
) -> Content {
    let (candidate, unwrap_value) = match &plan.convention {
        OutputConvention::ToolCall { name, unwrap_value } => {
            match tool_calls.iter().position(|call| &call.name == name) {
                Some(idx) => (Some(tool_calls.remove(idx).arguments), *unwrap_value),
                None => (None, *unwrap_value),
            }
        }
        OutputConvention::MessageText { unwrap_value } => (parse_json_text(text), *unwrap_value),
    };

    let Some(payload) = candidate else {
        tracing::warn!("structured payload missing from response, falling back to text");
        return Content::Text(text.to_string());
    };
    let raw = payload_text(&payload);

    match accept(payload, unwrap_value, &plan.validation) {
        Ok(value) => Content::Structured(value),
        Err(reason) => {
            tracing::warn!(%reason, "structured payload rejected, falling back to text");
            if text.trim().is_empty() {
                Content::Text(raw)
            } else {
                Content::Text(text.to_string())
            }
        }
    }
}

fn accept(payload: Value, unwrap_value: bool, validation: &Value) -> Result<Value, String> {
    let payload = match payload {
        Value::String(raw) => serde_json::from_str(&raw)
            .map_err(|err| format!("arguments are not valid JSON: {err}"))?,
        other => other,
    };
    let payload = if unwrap_value {
        match payload {
            Value::Object(mut map) => map
                .remove(WRAPPER_PROPERTY)
                .ok_or_else(|| format!("missing `{WRAPPER_PROPERTY}` wrapper property"))?,
            _ => return Err(format!("expected an object with a `{WRAPPER_PROPERTY}` property")),
        }
    } else {
        payload
    };
    validate(validation, &payload)?;
    Ok(payload)
}

fn parse_json_text(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).ok()
}

fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}
