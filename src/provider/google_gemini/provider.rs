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
use crate::provider::{LLMProvider, PreparedRequest};
use crate::schema::Dialect;
use crate::stream::collect_stream_text;
use crate::types::{ChatRequest, ChatResponse, ModelInfo};

use super::error::parse_gemini_error;
use super::request::build_gemini_body;
use super::response::map_response;
use super::stream::GeminiReconciler;
use super::types::{GeminiGenerateContentResponse, GeminiModelList};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini GenerateContent provider implementation.
///
/// The API key travels in the `key` query parameter. Endpoints recorded in response
/// metadata never include it.
pub struct GoogleGeminiProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) model: String,
}

impl GoogleGeminiProvider {
    /// Creates a provider that targets the default Google Generative Language endpoint.
    pub fn new(
        transport: DynHttpTransport,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Overrides the base URL, making it easier to point at proxies or compatibility layers.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn api_url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1beta") {
            format!("{base}/{path}")
        } else {
            format!("{base}/v1beta/{path}")
        }
    }

    /// Builds the non-streaming endpoint URL for GenerateContent.
    pub(crate) fn endpoint(&self, model: &str) -> String {
        self.api_url(&format!("{}:generateContent", normalize_model(model)))
    }

    /// Builds the streaming endpoint URL (SSE) for GenerateContent.
    pub(crate) fn stream_endpoint(&self, model: &str) -> String {
        self.api_url(&format!(
            "{}:streamGenerateContent?alt=sse",
            normalize_model(model)
        ))
    }

    pub(crate) fn models_endpoint(&self) -> String {
        self.api_url("models")
    }

    fn with_key(&self, url: &str) -> String {
        let separator = if url.contains('?') { '&' } else { '?' };
        format!("{url}{separator}key={}", self.api_key)
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers
    }

    fn ensure_success(&self, response: HttpResponse) -> Result<String, LLMError> {
        let HttpResponse {
            status,
            headers,
            body,
        } = response;
        if !(200..300).contains(&status) {
            return Err(parse_gemini_error(
                status,
                &String::from_utf8_lossy(&body),
                retry_after_from_headers(&headers),
            ));
        }
        let text = String::from_utf8(body).map_err(|err| LLMError::Provider {
            provider: self.name(),
            message: format!("Gemini response is not valid UTF-8: {err}"),
        })?;
        Ok(text)
    }

    fn try_parse<T: DeserializeOwned>(&self, text: &str) -> Result<T, LLMError> {
        serde_json::from_str(text).map_err(|err| LLMError::Provider {
            provider: self.name(),
            message: format!("failed to parse Gemini response: {err}"),
        })
    }
}

fn normalize_model(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

#[async_trait]
impl LLMProvider for GoogleGeminiProvider {
    fn prepare(&self, request: &ChatRequest, stream: bool) -> Result<PreparedRequest, LLMError> {
        let model = request
            .options
            .model
            .clone()
            .unwrap_or_else(|| self.model.clone());
        let (body, plan) = build_gemini_body(request)?;
        Ok(PreparedRequest {
            body,
            model,
            plan,
            stream,
        })
    }

    async fn send(&self, prepared: &PreparedRequest) -> Result<ChatResponse, LLMError> {
        tracing::debug!(provider = self.name(), model = %prepared.model, "sending chat request");
        let endpoint = self.endpoint(&prepared.model);
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.with_key(&endpoint),
            self.build_headers(),
            &prepared.body,
        )
        .await?;
        let text = self.ensure_success(response)?;
        let parsed: GeminiGenerateContentResponse = self.try_parse(&text)?;
        map_response(parsed, prepared.plan.as_ref(), self.name(), endpoint)
    }

    async fn send_stream(&self, prepared: &PreparedRequest) -> Result<ChatStream, LLMError> {
        tracing::debug!(provider = self.name(), model = %prepared.model, "opening chat stream");
        let endpoint = self.stream_endpoint(&prepared.model);
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.with_key(&endpoint),
            self.build_headers(),
            &prepared.body,
        )
        .await?;
        if !(200..300).contains(&response.status) {
            let retry_after = retry_after_from_headers(&response.headers);
            let text = collect_stream_text(response.body).await?;
            return Err(parse_gemini_error(response.status, &text, retry_after));
        }
        Ok(ChatStream::new(
            response.body,
            Box::new(GeminiReconciler::default()),
            prepared.plan.clone(),
            self.name(),
            endpoint,
            None,
        ))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LLMError> {
        let request = HttpRequest::get(self.with_key(&self.models_endpoint()))
            .with_headers(self.build_headers());
        let response = self.transport.send(request).await?;
        let text = self.ensure_success(response)?;
        let list: GeminiModelList = self.try_parse(&text)?;
        Ok(list
            .models
            .into_iter()
            .map(|model| {
                let id = model
                    .name
                    .strip_prefix("models/")
                    .unwrap_or(&model.name)
                    .to_string();
                ModelInfo {
                    name: model.display_name.unwrap_or_else(|| id.clone()),
                    id,
                    description: model.description,
                }
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "google_gemini"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Native
    }
}
