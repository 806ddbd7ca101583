use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::LLMError;

/// 解析 OpenAI 错误响应 `{"error": {"message", "type", "code"}}`
pub(crate) fn parse_openai_error(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> LLMError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<InnerError>,
    }
    #[derive(Deserialize)]
    struct InnerError {
        message: Option<String>,
        code: Option<Value>,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
        .map(|error| {
            let message = error.message.unwrap_or_else(|| "unknown error".to_string());
            match error.code {
                Some(Value::String(code)) => format!("{message} ({code})"),
                Some(Value::Null) | None => message,
                Some(code) => format!("{message} ({code})"),
            }
        })
        .unwrap_or_else(|| body.to_string());
    LLMError::backend("openai_chat", status, message, retry_after)
}
