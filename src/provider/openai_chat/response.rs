use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::LLMError;
use crate::provider::structured::{StructuredPlan, extract_structured};
use crate::types::{ChatResponse, Content, FinishReason, ProviderMetadata, TokenUsage, ToolCall};

use super::types::{OpenAiChatResponse, OpenAiMessageContent, OpenAiToolCallResponse, OpenAiUsage};

/// 将 `choices[0].message` 映射为统一响应
pub(crate) fn map_response(
    resp: OpenAiChatResponse,
    plan: Option<&StructuredPlan>,
    provider: &'static str,
    endpoint: String,
    request_id: Option<String>,
) -> Result<ChatResponse, LLMError> {
    let raw = serde_json::to_value(&resp).ok();
    let choice = resp
        .choices
        .into_iter()
        .min_by_key(|choice| choice.index)
        .ok_or_else(|| LLMError::provider(provider, "response contained no choices"))?;

    let mut extras = BTreeMap::new();
    if let Some(fingerprint) = resp.system_fingerprint {
        extras.insert("system_fingerprint".to_string(), Value::String(fingerprint));
    }

    let (text, mut tool_calls) = match choice.message {
        Some(message) => {
            if let Some(refusal) = message.refusal {
                extras.insert("refusal".to_string(), Value::String(refusal));
            }
            let text = match message.content {
                None => String::new(),
                Some(OpenAiMessageContent::Text(text)) => text,
                Some(OpenAiMessageContent::Parts(parts)) => parts
                    .into_iter()
                    .filter(|part| part.kind == "text")
                    .filter_map(|part| part.text)
                    .collect(),
            };
            let calls = message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .enumerate()
                .map(|(idx, call)| convert_tool_call(idx, call))
                .collect::<Vec<_>>();
            (text, calls)
        }
        None => (String::new(), Vec::new()),
    };

    let content = match plan {
        Some(plan) => extract_structured(plan, &text, &mut tool_calls),
        None => Content::Text(text),
    };

    Ok(ChatResponse {
        content,
        usage: resp.usage.map(convert_usage).unwrap_or_default(),
        model: resp.model,
        finish_reason: choice.finish_reason.as_deref().map(convert_finish_reason),
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
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

pub(crate) fn convert_usage(usage: OpenAiUsage) -> TokenUsage {
    let mut details = BTreeMap::new();
    if let Some(cached) = usage.prompt_tokens_details.and_then(|d| d.cached_tokens) {
        details.insert("cached_tokens".to_string(), cached);
    }
    if let Some(reasoning) = usage
        .completion_tokens_details
        .and_then(|d| d.reasoning_tokens)
    {
        details.insert("reasoning_tokens".to_string(), reasoning);
    }
    TokenUsage::from_counts(usage.prompt_tokens, usage.completion_tokens, details)
}

/// 解析工具参数字符串 空字符串视为空对象 非法 JSON 保留原文
pub(crate) fn parse_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| Value::String(arguments.to_string()))
}

fn convert_tool_call(idx: usize, call: OpenAiToolCallResponse) -> ToolCall {
    let (name, arguments) = match call.function {
        Some(function) => (
            function.name.unwrap_or_default(),
            function.arguments.unwrap_or_default(),
        ),
        None => (String::new(), String::new()),
    };
    ToolCall {
        id: call.id.unwrap_or_else(|| format!("call_{idx}")),
        name,
        arguments: parse_arguments(&arguments),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::structured::{OutputConvention, SYNTHETIC_TOOL_NAME};
    use serde_json::json;

    fn parse(value: Value) -> OpenAiChatResponse {
        serde_json::from_value(value).expect("wire response")
    }

    #[test]
    fn text_usage_and_tool_calls_are_mapped() {
        let resp = parse(json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Checking.",
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": { "name": "get_weather", "arguments": "{\"city\":\"Oslo\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {
                "prompt_tokens": 20,
                "completion_tokens": 9,
                "total_tokens": 29,
                "prompt_tokens_details": { "cached_tokens": 4 },
                "completion_tokens_details": { "reasoning_tokens": 2 }
            }
        }));
        let response = map_response(resp, None, "openai_chat", "e".into(), None).expect("map");

        assert_eq!(response.text(), Some("Checking."));
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(response.tool_calls[0].arguments, json!({ "city": "Oslo" }));
        assert_eq!(response.usage.total_tokens, 29);
        assert_eq!(response.usage.details.get("cached_tokens"), Some(&4));
        assert_eq!(response.provider.request_id.as_deref(), Some("chatcmpl-1"));
        assert!(response.provider.raw.is_some());
    }

    #[test]
    fn implicit_tool_payload_becomes_structured_content() {
        let plan = StructuredPlan {
            convention: OutputConvention::ToolCall {
                name: SYNTHETIC_TOOL_NAME.to_string(),
                unwrap_value: true,
            },
            validation: json!({ "type": "array", "items": { "type": "integer" } }),
        };
        let resp = parse(json!({
            "choices": [{
                "index": 0,
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "structured_output", "arguments": "{\"value\":[1,2,3]}" }
                    }]
                },
                "finish_reason": "stop"
            }]
        }));
        let response = map_response(resp, Some(&plan), "openai_chat", "e".into(), None).expect("map");
        assert_eq!(response.structured(), Some(&json!([1, 2, 3])));
        assert!(response.tool_calls.is_empty());
    }

    #[test]
    fn empty_choices_is_a_provider_error() {
        let resp = parse(json!({ "choices": [] }));
        assert!(matches!(
            map_response(resp, None, "openai_chat", "e".into(), None),
            Err(LLMError::Provider { .. })
        ));
    }
}
