use std::time::Duration;

use serde::Deserialize;

use crate::error::LLMError;

/// Parses error responses returned by the Anthropic Messages API.
///
/// The envelope is `{"type": "error", "error": {"type": ..., "message": ...}}`; the error
/// type is appended to the message so callers can tell `overloaded_error` from others.
pub(crate) fn parse_anthropic_error(
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
        r#type: Option<String>,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
        .map(|error| {
            let message = error.message.unwrap_or_else(|| "unknown error".to_string());
            match error.r#type {
                Some(kind) => format!("{message} ({kind})"),
                None => message,
            }
        })
        // Fallback: if the payload cannot be parsed, surface the raw body.
        .unwrap_or_else(|| body.to_string());
    LLMError::backend("anthropic_messages", status, message, retry_after)
}
