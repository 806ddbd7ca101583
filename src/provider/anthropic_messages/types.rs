use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Non-streaming response payload returned by Anthropic Messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AnthropicMessageResponse {
    /// Some compatibility layers omit the `id`, so keep it optional.
    #[serde(default)]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) model: Option<String>,
    /// Ordered list of content blocks.
    #[serde(default)]
    pub(crate) content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
    #[serde(default)]
    pub(crate) stop_sequence: Option<String>,
    #[serde(default)]
    pub(crate) usage: Option<AnthropicUsage>,
    /// Additional future fields forwarded to `ProviderMetadata::raw`.
    #[serde(flatten)]
    pub(crate) extra: HashMap<String, Value>,
}

/// Single content block: text, tool_use, thinking and so on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AnthropicContentBlock {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) text: Option<String>,
    #[serde(default)]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) name: Option<String>,
    #[serde(default)]
    pub(crate) input: Option<Value>,
    #[serde(flatten)]
    pub(crate) extra: HashMap<String, Value>,
}

/// Usage counters returned by Anthropic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct AnthropicUsage {
    #[serde(default)]
    pub(crate) input_tokens: Option<u64>,
    #[serde(default)]
    pub(crate) output_tokens: Option<u64>,
    #[serde(default)]
    pub(crate) cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    pub(crate) cache_read_input_tokens: Option<u64>,
}

/// One SSE event. The `type` field selects which of the optional members are present.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicStreamEvent {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) message: Option<AnthropicMessageResponse>,
    #[serde(default)]
    pub(crate) index: Option<usize>,
    #[serde(default)]
    pub(crate) content_block: Option<AnthropicContentBlock>,
    #[serde(default)]
    pub(crate) delta: Option<AnthropicStreamDelta>,
    #[serde(default)]
    pub(crate) usage: Option<AnthropicUsage>,
    #[serde(default)]
    pub(crate) error: Option<Value>,
}

/// Payload of `content_block_delta` and `message_delta` events.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicStreamDelta {
    #[serde(default, rename = "type")]
    pub(crate) kind: Option<String>,
    #[serde(default)]
    pub(crate) text: Option<String>,
    #[serde(default)]
    pub(crate) partial_json: Option<String>,
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
}

/// `GET /v1/models` listing.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicModelList {
    #[serde(default)]
    pub(crate) data: Vec<AnthropicModel>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicModel {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) display_name: Option<String>,
}
