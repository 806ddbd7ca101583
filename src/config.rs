use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::LLMClient;
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::provider::DynProvider;
use crate::provider::anthropic_messages::AnthropicMessagesProvider;
use crate::provider::google_gemini::GoogleGeminiProvider;
use crate::provider::openai_chat::OpenAiChatProvider;
use crate::provider::retry::RetryConfig;

/// 模型配置 描述一个可调用后端
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ProviderKind,
    pub credential: Credential,
    /// 必填 不内置任何默认模型
    pub model: String,
    pub base_url: Option<String>,
    /// 默认重试策略 缺省时使用 [`RetryConfig::default`]
    #[serde(default)]
    pub retry: Option<RetrySettings>,
    /// 附加设置 例如 organization / project / version / beta / max_tokens
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

/// 供应商类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAiChat,
    AnthropicMessages,
    GoogleGemini,
}

/// 鉴权信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// 简单 API Key
    ApiKey { key: String },
    /// Bearer Token
    Bearer { token: String },
    /// 未配置凭证 构建时报错
    None,
}

/// 可序列化的重试设置 以毫秒表示时长
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_retries: defaults.max_retries,
            initial_delay_ms: defaults.initial_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            jitter: defaults.jitter,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        RetryConfig::default()
            .with_max_retries(settings.max_retries)
            .with_initial_delay(Duration::from_millis(settings.initial_delay_ms))
            .with_max_delay(Duration::from_millis(settings.max_delay_ms))
            .with_jitter(settings.jitter)
    }
}

/// 根据模型配置构建 LLMClient
pub fn build_client(config: &ModelConfig, transport: DynHttpTransport) -> Result<LLMClient, LLMError> {
    let provider = build_provider(config, transport)?;
    let retry = config
        .retry
        .as_ref()
        .map(RetryConfig::from)
        .unwrap_or_default();
    Ok(LLMClient::new(provider).with_retry(retry))
}

/// 根据模型配置构建 Provider
pub fn build_provider(
    config: &ModelConfig,
    transport: DynHttpTransport,
) -> Result<DynProvider, LLMError> {
    if config.model.trim().is_empty() {
        return Err(LLMError::InvalidConfig {
            field: "model".to_string(),
            reason: "a model identifier is required".to_string(),
        });
    }
    let name = match config.provider {
        ProviderKind::OpenAiChat => "openai_chat",
        ProviderKind::AnthropicMessages => "anthropic_messages",
        ProviderKind::GoogleGemini => "google_gemini",
    };
    let api_key = extract_api_key(&config.credential, name)?;

    let provider: DynProvider = match config.provider {
        ProviderKind::OpenAiChat => {
            let mut provider = OpenAiChatProvider::new(transport, api_key, config.model.clone());
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(Value::String(org)) = config.extra.get("organization") {
                provider = provider.with_organization(org.clone());
            }
            if let Some(Value::String(project)) = config.extra.get("project") {
                provider = provider.with_project(project.clone());
            }
            Arc::new(provider)
        }
        ProviderKind::AnthropicMessages => {
            let mut provider =
                AnthropicMessagesProvider::new(transport, api_key, config.model.clone());
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(Value::String(version)) = config.extra.get("version") {
                provider = provider.with_version(version.clone());
            }
            if let Some(Value::String(beta)) = config.extra.get("beta") {
                provider = provider.with_beta(beta.clone());
            }
            if let Some(max_tokens) = config.extra.get("max_tokens") {
                let max_tokens = max_tokens
                    .as_u64()
                    .filter(|value| *value > 0)
                    .and_then(|value| u32::try_from(value).ok())
                    .ok_or_else(|| LLMError::InvalidConfig {
                        field: "extra.max_tokens".to_string(),
                        reason: "expected a positive integer".to_string(),
                    })?;
                provider = provider.with_max_tokens(max_tokens);
            }
            Arc::new(provider)
        }
        ProviderKind::GoogleGemini => {
            let mut provider = GoogleGeminiProvider::new(transport, api_key, config.model.clone());
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            Arc::new(provider)
        }
    };
    tracing::debug!(provider = name, model = %config.model, "provider configured");
    Ok(provider)
}

fn extract_api_key(credential: &Credential, provider: &'static str) -> Result<String, LLMError> {
    let key = match credential {
        Credential::ApiKey { key } => key,
        Credential::Bearer { token } => token,
        Credential::None => {
            return Err(LLMError::InvalidConfig {
                field: "credential".to_string(),
                reason: format!("provider {provider} requires a credential"),
            });
        }
    };
    if key.trim().is_empty() {
        return Err(LLMError::InvalidConfig {
            field: "credential".to_string(),
            reason: format!("provider {provider} was given an empty key"),
        });
    }
    Ok(key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::reqwest::default_dyn_transport;
    use serde_json::json;

    fn config(provider: ProviderKind, credential: Credential) -> ModelConfig {
        ModelConfig {
            provider,
            credential,
            model: "test-model".to_string(),
            base_url: None,
            retry: None,
            extra: HashMap::new(),
        }
    }

    /// 验证所有 ProviderKind 分支都可以被构建
    #[test]
    fn every_provider_kind_builds() {
        let transport = default_dyn_transport().expect("transport");
        for (kind, name) in [
            (ProviderKind::OpenAiChat, "openai_chat"),
            (ProviderKind::AnthropicMessages, "anthropic_messages"),
            (ProviderKind::GoogleGemini, "google_gemini"),
        ] {
            let provider = build_provider(
                &config(kind, Credential::ApiKey { key: "k".to_string() }),
                transport.clone(),
            )
            .expect("provider");
            assert_eq!(provider.name(), name);
        }
    }

    #[test]
    fn missing_credential_is_rejected() {
        let transport = default_dyn_transport().expect("transport");
        let err = match build_client(&config(ProviderKind::OpenAiChat, Credential::None), transport) {
            Ok(_) => panic!("expected config error"),
            Err(err) => err,
        };
        match err {
            LLMError::InvalidConfig { field, reason } => {
                assert_eq!(field, "credential");
                assert!(reason.contains("openai_chat"), "unexpected reason: {reason}");
            }
            other => panic!("unexpected error type: {other:?}"),
        }
    }

    #[test]
    fn empty_model_is_rejected() {
        let transport = default_dyn_transport().expect("transport");
        let mut cfg = config(
            ProviderKind::GoogleGemini,
            Credential::Bearer {
                token: "t".to_string(),
            },
        );
        cfg.model = " ".to_string();
        assert!(matches!(
            build_provider(&cfg, transport),
            Err(LLMError::InvalidConfig { ref field, .. }) if field == "model"
        ));
    }

    #[test]
    fn max_tokens_must_be_positive() {
        let transport = default_dyn_transport().expect("transport");
        let mut cfg = config(
            ProviderKind::AnthropicMessages,
            Credential::ApiKey { key: "k".to_string() },
        );
        for bad in [json!(0), json!(-1), json!("1024")] {
            cfg.extra.insert("max_tokens".to_string(), bad);
            assert!(matches!(
                build_provider(&cfg, transport.clone()),
                Err(LLMError::InvalidConfig { ref field, .. }) if field == "extra.max_tokens"
            ));
        }
        cfg.extra.insert("max_tokens".to_string(), json!(1));
        assert!(build_provider(&cfg, transport).is_ok());
    }

    #[test]
    fn retry_settings_deserialize_with_defaults() {
        let cfg: ModelConfig = serde_json::from_value(json!({
            "provider": "anthropic_messages",
            "credential": { "type": "api_key", "key": "sk-ant" },
            "model": "claude-sonnet-4-5",
            "base_url": null,
            "retry": { "max_retries": 5 }
        }))
        .expect("config");
        let settings = cfg.retry.expect("retry");
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.initial_delay_ms, 500);

        let client = build_client(
            &ModelConfig {
                retry: Some(settings),
                ..cfg
            },
            default_dyn_transport().expect("transport"),
        )
        .expect("client");
        assert_eq!(client.retry_config().max_retries, 5);
        assert_eq!(client.retry_config().max_delay, Duration::from_secs(30));
    }
}
