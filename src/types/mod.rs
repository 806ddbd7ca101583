//! Shared data structures modeling chat requests and responses.
//!
//! These types normalize provider-specific payloads so the rest of the crate can stay
//! agnostic of individual API differences.

use std::collections::{BTreeMap, HashMap};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LLMError;
use crate::provider::retry::RetryConfig;
use crate::schema::Schema;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Normalized chat message shared across providers.
///
/// # Examples
///
/// ```
/// use tessera_llm::types::{ContentPart, ImageSource, Message, MessageContent, Role};
///
/// let msg = Message::user_parts(vec![
///     ContentPart::text("Describe this image"),
///     ContentPart::Image(ImageSource::Url { url: "https://example.com/img.png".into() }),
/// ]);
/// assert_eq!(msg.role, Role::User);
/// assert!(matches!(msg.content, MessageContent::Parts(ref parts) if parts.len() == 2));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }

    fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Concatenates the textual parts of the message.
    pub fn plain_text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image(_) => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// Message body: a plain string or an ordered list of multimodal parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// Multimodal content unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image(ImageSource),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Source for an image input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    /// Public URL accessible by the provider.
    Url { url: String },
    /// Base64-encoded inline payload.
    Base64 { data: String, mime_type: String },
}

/// Sampling and routing options shared by every backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    /// Overrides the model configured on the provider for this call.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Tool-choice policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    Required,
    None,
    Tool { name: String },
}

/// Declarative tool description sent to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Schema,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Schema) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Normalized chat request.
///
/// `stream` is not a field: the entry point ([`crate::client::LLMClient::chat`] or
/// [`crate::client::LLMClient::stream`]) decides it.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub options: ChatOptions,
    /// Requests a structured answer validated against this schema.
    pub schema: Option<Schema>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    /// Backend-specific body fields, merged into the wire body without validation.
    pub features: HashMap<String, Value>,
    /// Replaces the client-level retry configuration for this call.
    pub retry: Option<RetryConfig>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.options.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.options.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_feature(mut self, key: impl Into<String>, value: Value) -> Self {
        self.features.insert(key.into(), value);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub(crate) fn ensure_messages(&self) -> Result<(), LLMError> {
        if self.messages.is_empty() {
            return Err(LLMError::Validation {
                message: "at least one message is required".to_string(),
            });
        }
        Ok(())
    }
}

/// Tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Answer body: free text, or a payload that passed schema validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Content {
    Text(String),
    Structured(Value),
}

/// Normalized stop reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

/// Token accounting; `total_tokens` is the sum of every category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// Backend-specific sub-counts (cached, reasoning, tool prompt...).
    #[serde(default)]
    pub details: BTreeMap<String, u64>,
}

impl TokenUsage {
    pub(crate) fn from_counts(input: u64, output: u64, details: BTreeMap<String, u64>) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
            details,
        }
    }
}

/// Provider bookkeeping attached to each response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub provider: String,
    pub request_id: Option<String>,
    pub endpoint: Option<String>,
    /// Raw wire payload (non-streaming responses only).
    pub raw: Option<Value>,
    /// Backend-specific fields without a normalized home.
    #[serde(default)]
    pub extras: BTreeMap<String, Value>,
}

/// Normalized chat response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: Content,
    pub usage: TokenUsage,
    pub model: Option<String>,
    pub finish_reason: Option<FinishReason>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub provider: ProviderMetadata,
}

impl ChatResponse {
    /// Text body, or `None` for structured content.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Content::Text(text) => Some(text),
            Content::Structured(_) => None,
        }
    }

    /// Validated payload, or `None` when the response degraded to text.
    pub fn structured(&self) -> Option<&Value> {
        match &self.content {
            Content::Structured(value) => Some(value),
            Content::Text(_) => None,
        }
    }

    /// Deserializes the structured payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Validation`] when the response carries text or the payload does
    /// not match `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, LLMError> {
        let value = self.structured().ok_or_else(|| LLMError::Validation {
            message: "response does not carry structured content".to_string(),
        })?;
        serde_json::from_value(value.clone()).map_err(|err| LLMError::Validation {
            message: format!("structured content does not match target type: {err}"),
        })
    }
}

/// Entry returned by `list_models`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_reads_structured_payload() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct City {
            name: String,
        }

        let response = ChatResponse {
            content: Content::Structured(json!({ "name": "Oslo" })),
            usage: TokenUsage::default(),
            model: None,
            finish_reason: None,
            tool_calls: Vec::new(),
            provider: ProviderMetadata::default(),
        };
        assert_eq!(
            response.parse::<City>().expect("parse"),
            City {
                name: "Oslo".into()
            }
        );
        assert!(response.text().is_none());
    }

    #[test]
    fn parse_rejects_text_content() {
        let response = ChatResponse {
            content: Content::Text("hi".into()),
            usage: TokenUsage::default(),
            model: None,
            finish_reason: None,
            tool_calls: Vec::new(),
            provider: ProviderMetadata::default(),
        };
        assert!(matches!(
            response.parse::<Value>(),
            Err(LLMError::Validation { .. })
        ));
    }

    #[test]
    fn usage_total_sums_categories() {
        let usage = TokenUsage::from_counts(7, 5, BTreeMap::from([("cached".into(), 2)]));
        assert_eq!(usage.total_tokens, 12);
    }

    #[test]
    fn plain_text_skips_images() {
        let message = Message::user_parts(vec![
            ContentPart::text("a"),
            ContentPart::Image(ImageSource::Url {
                url: "https://example.com/x.png".into(),
            }),
            ContentPart::text("b"),
        ]);
        assert_eq!(message.plain_text(), "ab");
    }
}
