use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::LLMError;
use crate::provider::structured::{StructuredPlan, extract_structured};
use crate::types::{ChatResponse, Content, FinishReason, ProviderMetadata, TokenUsage, ToolCall};

use super::types::{AnthropicMessageResponse, AnthropicUsage};

/// Converts a non-streaming Anthropic response into the shared response shape.
pub(crate) fn map_response(
    resp: AnthropicMessageResponse,
    plan: Option<&StructuredPlan>,
    provider: &'static str,
    endpoint: String,
    request_id: Option<String>,
) -> Result<ChatResponse, LLMError> {
    let raw = serde_json::to_value(&resp).ok();

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for (idx, block) in resp.content.into_iter().enumerate() {
        match block.kind.as_str() {
            "text" => {
                if let Some(part) = block.text {
                    text.push_str(&part);
                }
            }
            "tool_use" => tool_calls.push(ToolCall {
                id: block.id.unwrap_or_else(|| format!("call_{idx}")),
                name: block.name.unwrap_or_default(),
                arguments: block
                    .input
                    .unwrap_or_else(|| Value::Object(Default::default())),
            }),
            // thinking and redacted_thinking blocks carry no answer text.
            _ => {}
        }
    }

    let content = match plan {
        Some(plan) => extract_structured(plan, &text, &mut tool_calls),
        None => Content::Text(text),
    };

    let mut extras = BTreeMap::new();
    if let Some(sequence) = resp.stop_sequence {
        extras.insert("stop_sequence".to_string(), Value::String(sequence));
    }

    Ok(ChatResponse {
        content,
        usage: resp.usage.map(convert_usage).unwrap_or_default(),
        model: resp.model,
        finish_reason: resp.stop_reason.as_deref().map(convert_finish_reason),
        tool_calls,
        provider: ProviderMetadata {
            provider: provider.to_string(),
            request_id: request_id.or(resp.id),
            endpoint: Some(endpoint),
            raw,
            extras,
        },
    })
}

pub(crate) fn convert_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        "refusal" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

/// Cache reads and writes are billed as input, so they are folded into `input_tokens`
/// and also reported separately in `details`.
pub(crate) fn convert_usage(usage: AnthropicUsage) -> TokenUsage {
    let cache_creation = usage.cache_creation_input_tokens.unwrap_or(0);
    let cache_read = usage.cache_read_input_tokens.unwrap_or(0);
    let mut details = BTreeMap::new();
    if let Some(value) = usage.cache_creation_input_tokens {
        details.insert("cache_creation_input_tokens".to_string(), value);
    }
    if let Some(value) = usage.cache_read_input_tokens {
        details.insert("cache_read_input_tokens".to_string(), value);
    }
    TokenUsage::from_counts(
        usage.input_tokens.unwrap_or(0) + cache_creation + cache_read,
        usage.output_tokens.unwrap_or(0),
        details,
    )
}
