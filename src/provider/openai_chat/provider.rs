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

use super::error::parse_openai_error;
use super::request::build_openai_body;
use super::response::map_response;
use super::stream::OpenAiReconciler;
use super::types::{OpenAiChatResponse, OpenAiModelList};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const REQUEST_ID_HEADERS: &[&str] = &["x-request-id"];

/// OpenAI Chat Completions Provider
pub struct OpenAiChatProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) organization: Option<String>,
    pub(crate) project: Option<String>,
    pub(crate) model: String,
}

impl OpenAiChatProvider {
    /// 创建带默认 base_url 的 Provider 模型必须显式指定
    pub fn new(
        transport: DynHttpTransport,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            organization: None,
            project: None,
            model: model.into(),
        }
    }

    /// 自定义 base_url
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// 配置组织 ID
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// 配置项目 ID
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
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
        self.api_url("chat/completions")
    }

    pub(crate) fn models_endpoint(&self) -> String {
        self.api_url("models")
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", self.api_key),
        );
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
        if let Some(org) = &self.organization {
            headers.insert("OpenAI-Organization".to_string(), org.clone());
        }
        if let Some(project) = &self.project {
            headers.insert("OpenAI-Project".to_string(), project.clone());
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
            return Err(parse_openai_error(
                status,
                &String::from_utf8_lossy(&body),
                retry_after_from_headers(&headers),
            ));
        }
        let text = String::from_utf8(body).map_err(|err| LLMError::Provider {
            provider: self.name(),
            message: format!("OpenAI response is not valid UTF-8: {err}"),
        })?;
        Ok((text, request_id_from_headers(&headers, REQUEST_ID_HEADERS)))
    }

    fn try_parse<T: DeserializeOwned>(&self, text: &str) -> Result<T, LLMError> {
        serde_json::from_str(text).map_err(|err| LLMError::Provider {
            provider: self.name(),
            message: format!("failed to parse OpenAI response: {err}"),
        })
    }
}

#[async_trait]
impl LLMProvider for OpenAiChatProvider {
    fn prepare(&self, request: &ChatRequest, stream: bool) -> Result<PreparedRequest, LLMError> {
        let model = request
            .options
            .model
            .clone()
            .unwrap_or_else(|| self.model.clone());
        let (body, plan) = build_openai_body(request, &model, stream)?;
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
        let parsed: OpenAiChatResponse = self.try_parse(&text)?;
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
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            self.build_headers(),
            &prepared.body,
        )
        .await?;
        if !(200..300).contains(&response.status) {
            let retry_after = retry_after_from_headers(&response.headers);
            let text = collect_stream_text(response.body).await?;
            return Err(parse_openai_error(response.status, &text, retry_after));
        }
        Ok(ChatStream::new(
            response.body,
            Box::new(OpenAiReconciler::default()),
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
        let list: OpenAiModelList = self.try_parse(&text)?;
        Ok(list
            .data
            .into_iter()
            .map(|model| ModelInfo {
                name: model.id.clone(),
                id: model.id,
                description: model.owned_by.map(|owner| format!("owned by {owner}")),
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "openai_chat"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Strict
    }
}
