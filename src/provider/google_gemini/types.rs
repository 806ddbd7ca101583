use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// GenerateContentResponse 顶层结构（非流式与流式 chunk 共用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GeminiGenerateContentResponse {
    /// 候选回答列表
    #[serde(default)]
    pub(crate) candidates: Vec<GeminiCandidate>,
    /// 与内容过滤相关的提示反馈
    #[serde(default, rename = "promptFeedback")]
    pub(crate) prompt_feedback: Option<GeminiPromptFeedback>,
    #[serde(default, rename = "usageMetadata")]
    pub(crate) usage_metadata: Option<GeminiUsageMetadata>,
    /// 实际使用的模型版本
    #[serde(default, rename = "modelVersion")]
    pub(crate) model_version: Option<String>,
    #[serde(default, rename = "responseId")]
    pub(crate) response_id: Option<String>,
    /// 流中的错误帧
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<Value>,
    #[serde(flatten)]
    pub(crate) extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GeminiPromptFeedback {
    #[serde(default, rename = "blockReason")]
    pub(crate) block_reason: Option<String>,
    #[serde(flatten)]
    pub(crate) extra: HashMap<String, Value>,
}

/// 单个候选回答
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GeminiCandidate {
    #[serde(default)]
    pub(crate) content: Option<GeminiContent>,
    #[serde(default, rename = "finishReason")]
    pub(crate) finish_reason: Option<String>,
    #[serde(default)]
    pub(crate) index: Option<usize>,
    /// 其它字段透传，例如 safetyRatings / citationMetadata 等
    #[serde(flatten)]
    pub(crate) extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GeminiContent {
    #[serde(default)]
    pub(crate) parts: Vec<GeminiPart>,
    #[serde(default)]
    pub(crate) role: Option<String>,
}

/// Content.part，多模态内容单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GeminiPart {
    #[serde(default)]
    pub(crate) text: Option<String>,
    /// 思考摘要 不计入回答文本
    #[serde(default)]
    pub(crate) thought: Option<bool>,
    #[serde(default, rename = "functionCall", alias = "function_call")]
    pub(crate) function_call: Option<GeminiFunctionCall>,
    #[serde(flatten)]
    pub(crate) extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GeminiFunctionCall {
    #[serde(default)]
    pub(crate) id: Option<String>,
    pub(crate) name: String,
    /// 函数参数，JSON 对象
    #[serde(default)]
    pub(crate) args: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct GeminiUsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    pub(crate) prompt_token_count: Option<u64>,
    #[serde(rename = "cachedContentTokenCount", default)]
    pub(crate) cached_content_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount", default)]
    pub(crate) candidates_token_count: Option<u64>,
    #[serde(rename = "toolUsePromptTokenCount", default)]
    pub(crate) tool_use_prompt_token_count: Option<u64>,
    #[serde(rename = "thoughtsTokenCount", default)]
    pub(crate) thoughts_token_count: Option<u64>,
}

/// `GET /v1beta/models` 列表
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GeminiModelList {
    #[serde(default)]
    pub(crate) models: Vec<GeminiModel>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GeminiModel {
    pub(crate) name: String,
    #[serde(default, rename = "displayName")]
    pub(crate) display_name: Option<String>,
    #[serde(default)]
    pub(crate) description: Option<String>,
}
