use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::LLMError;
use crate::provider::structured::{StructuredPlan, extract_structured};
use crate::types::{ChatResponse, Content, FinishReason, ProviderMetadata, TokenUsage, ToolCall};

use super::types::{GeminiGenerateContentResponse, GeminiPart, GeminiUsageMetadata};

/// 将 Gemini GenerateContentResponse 映射为统一的 ChatResponse
///
/// 只读取 `candidates[0]`；提示词被拦截时没有候选，返回空文本与 ContentFilter。
pub(crate) fn map_response(
    resp: GeminiGenerateContentResponse,
    plan: Option<&StructuredPlan>,
    provider: &'static str,
    endpoint: String,
) -> Result<ChatResponse, LLMError> {
    let raw = serde_json::to_value(&resp).ok();
    let mut extras = BTreeMap::new();

    let block_reason = resp
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason);
    let candidate = resp
        .candidates
        .into_iter()
        .min_by_key(|candidate| candidate.index.unwrap_or_default());

    let (text, mut tool_calls, finish_reason) = match (candidate, block_reason) {
        (Some(candidate), _) => {
            let mut text = String::new();
            let mut calls = Vec::new();
            if let Some(content) = candidate.content {
                collect_parts(content.parts, 0, &mut text, &mut calls);
            }
            if let Some(ratings) = candidate.extra.get("safetyRatings") {
                extras.insert("safety_ratings".to_string(), ratings.clone());
            }
            (
                text,
                calls,
                candidate.finish_reason.as_deref().map(convert_finish_reason),
            )
        }
        (None, Some(reason)) => {
            extras.insert("block_reason".to_string(), Value::String(reason));
            (String::new(), Vec::new(), Some(FinishReason::ContentFilter))
        }
        (None, None) => {
            return Err(LLMError::provider(
                provider,
                "response contained no candidates",
            ));
        }
    };

    let content = match plan {
        Some(plan) => extract_structured(plan, &text, &mut tool_calls),
        None => Content::Text(text),
    };

    Ok(ChatResponse {
        content,
        usage: resp.usage_metadata.map(convert_usage).unwrap_or_default(),
        model: resp.model_version,
        finish_reason,
        tool_calls,
        provider: ProviderMetadata {
            provider: provider.to_string(),
            request_id: resp.response_id,
            endpoint: Some(endpoint),
            raw,
            extras,
        },
    })
}

/// 追加文本与函数调用 thought 部分被跳过；缺失的调用 id 按出现顺序生成 `call_{i}`
/// `first_index` 为此前已见到的调用数量
pub(crate) fn collect_parts(
    parts: Vec<GeminiPart>,
    first_index: usize,
    text: &mut String,
    calls: &mut Vec<ToolCall>,
) {
    for part in parts {
        if part.thought == Some(true) {
            continue;
        }
        if let Some(call) = part.function_call {
            let id = call
                .id
                .unwrap_or_else(|| format!("call_{}", first_index + calls.len()));
            calls.push(ToolCall {
                id,
                name: call.name,
                arguments: call
                    .args
                    .unwrap_or_else(|| Value::Object(Default::default())),
            });
        } else if let Some(fragment) = part.text {
            text.push_str(&fragment);
        }
    }
}

pub(crate) fn convert_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
        | "IMAGE_SAFETY" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

/// Thinking tokens are billed as output; tool-use prompt tokens as input.
pub(crate) fn convert_usage(usage: GeminiUsageMetadata) -> TokenUsage {
    let mut details = BTreeMap::new();
    if let Some(cached) = usage.cached_content_token_count {
        details.insert("cached_content_tokens".to_string(), cached);
    }
    if let Some(thoughts) = usage.thoughts_token_count {
        details.insert("thoughts_tokens".to_string(), thoughts);
    }
    if let Some(tool_prompt) = usage.tool_use_prompt_token_count {
        details.insert("tool_use_prompt_tokens".to_string(), tool_prompt);
    }
    TokenUsage::from_counts(
        usage.prompt_token_count.unwrap_or(0) + usage.tool_use_prompt_token_count.unwrap_or(0),
        usage.candidates_token_count.unwrap_or(0) + usage.thoughts_token_count.unwrap_or(0),
        details,
    )
}
