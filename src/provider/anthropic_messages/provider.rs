use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::LLMError;
use crate::http::{
    DynHttpTransport, HttpRequest, HttpResponse, post_json_stream_with_headers,
    post_json_with_headers,
};
use crate::provider::retry::retry_after_from_headers;
use crate::provider::stream::ChatStream;
use crate::provider::{LLMProvider, PreparedRequest, request_id_from_headers};
use crate::schema::Dialect;
use crate::stream::collect_stream_text;
use crate::types::{ChatRequest, ChatResponse, ModelInfo};

use super::error::parse_anthropic_error;
use super::request::{DEFAULT_MAX_TOKENS, build_anthropic_body};
use super::response::map_response;
use super::stream::AnthropicReconciler;
use super::types::{AnthropicMessageResponse, AnthropicModelList};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_VERSION: &str = "2023-06-01";
const REQUEST_ID_HEADERS: &[&str] = &["request-id", "x-request-id"];

/// Anthropic Messages Provider（兼容 Claude Messages API）
pub struct AnthropicMessagesProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) version: String,
    pub(crate) beta: Option<String>,
    pub(crate) model: String,
    pub(crate) max_tokens: u32,
}

impl AnthropicMessagesProvider {
    /// 使用默认 base_url 与 anthropic-version 创建 Provider
    pub fn new(
        transport: DynHttpTransport,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            version: DEFAULT_VERSION.to_string(),
            beta: None,
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// 自定义 base_url，便于接入代理或兼容层
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// 自定义 Anthropic API 版本（anthropic-version）
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 设置 anthropic-beta 头，支持逗号分隔的 beta 列表
    pub fn with_beta(mut self, beta: impl Into<String>) -> Self {
        self.beta = Some(beta.into());
        self
    }

    /// 请求未指定 max_tokens 时使用的默认值（该字段为 API 必填）
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn api_url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/{path}")
        } else {
            format!("{base}/v1/{path}")
        }
    }

    pub(crate) fn endpoint(&self) -> String {
        self.api_url("messages")
    }

    pub(crate) fn models_endpoint(&self) -> String {
        self.api_url("models")
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("x-api-key".to_string(), self.api_key.clone());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers.insert("anthropic-version".to_string(), self.version.clone());
        if let Some(beta) = &self.beta {
            headers.insert("anthropic-beta".to_string(), beta.clone());
        }
        headers
    }

    fn ensure_success(&self, response: HttpResponse) -> Result<(String, Option<String>), LLMError> {
        let HttpResponse {
            status,
            headers,
            body,
        } = response;
        if !(200..300).contains(&status) {
            return Err(parse_anthropic_error(
                status,
                &String::from_utf8_lossy(&body),
                retry_after_from_headers(&headers),
            ));
        }
        let text = String::from_utf8(body).map_err(|err| LLMError::Provider {
            provider: self.name(),
            message: format!("Anthropic response is not valid UTF-8: {err}"),
        })?;
        Ok((text, request_id_from_headers(&headers, REQUEST_ID_HEADERS)))
    }

    fn try_parse<T: DeserializeOwned>(&self, text: &str) -> Result<T, LLMError> {
        serde_json::from_str(text).map_err(|err| LLMError::Provider {
            provider: self.name(),
            message: format!("failed to parse Anthropic response: {err}"),
        })
    }
}

#[async_trait]
impl LLMProvider for AnthropicMessagesProvider {
    fn prepare(&self, request: &ChatRequest, stream: bool) -> Result<PreparedRequest, LLMError> {
        let model = request
            .options
            .model
            .clone()
            .unwrap_or_else(|| self.model.clone());
        let (body, plan) = build_anthropic_body(request, &model, self.max_tokens, stream)?;
        Ok(PreparedRequest {
            body,
            model,
            plan,
            stream,
        })
    }

    async fn send(&self, prepared: &PreparedRequest) -> Result<ChatResponse, LLMError> {
        tracing::debug!(provider = self.name(), model = %prepared.model, "sending chat request");
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            self.build_headers(),
            &prepared.body,
        )
        .await?;
        let (text, request_id) = self.ensure_success(response)?;
        let parsed: AnthropicMessageResponse = self.try_parse(&text)?;
        map_response(
            parsed,
            prepared.plan.as_ref(),
            self.name(),
            self.endpoint(),
            request_id,
        )
    }

    async fn send_stream(&self, prepared: &PreparedRequest) -> Result<ChatStream, LLMError> {
        tracing::debug!(provider = self.name(), model = %prepared.model, "opening chat stream");
        let mut headers = self.build_headers();
        headers.insert("Accept".to_string(), "text/event-stream".to_string());
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            headers,
            &prepared.body,
        )
        .await?;
        if !(200..300).contains(&response.status) {
            let retry_after = retry_after_from_headers(&response.headers);
            let text = collect_stream_text(response.body).await?;
            return Err(parse_anthropic_error(response.status, &text, retry_after));
        }
        Ok(ChatStream::new(
            response.body,
            Box::new(AnthropicReconciler::default()),
            prepared.plan.clone(),
            self.name(),
            self.endpoint(),
            request_id_from_headers(&response.headers, REQUEST_ID_HEADERS),
        ))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LLMError> {
        let request = HttpRequest::get(self.models_endpoint()).with_headers(self.build_headers());
        let response = self.transport.send(request).await?;
        let (text, _) = self.ensure_success(response)?;
        let list: AnthropicModelList = self.try_parse(&text)?;
        Ok(list
            .data
            .into_iter()
            .map(|model| ModelInfo {
                name: model.display_name.unwrap_or_else(|| model.id.clone()),
                id: model.id,
                description: None,
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "anthropic_messages"
    }

    fn dialect(&self) -> Dialect {
        Dialect::ToolInput
    }
}
