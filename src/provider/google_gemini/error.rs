use std::time::Duration;

use serde::Deserialize;

use crate::error::LLMError;

/// Parses error responses returned by Google Gemini.
///
/// The envelope is `{"error": {"code", "message", "status"}}`. Streaming endpoints may
/// wrap it in a one-element array, which is accepted too.
pub(crate) fn parse_gemini_error(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> LLMError {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Envelope {
        Single(ErrorBody),
        Batch(Vec<ErrorBody>),
    }

    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<InnerError>,
    }

    #[derive(Deserialize)]
    struct InnerError {
        message: Option<String>,
        status: Option<String>,
    }

    let inner = match serde_json::from_str::<Envelope>(body) {
        Ok(Envelope::Single(parsed)) => parsed.error,
        Ok(Envelope::Batch(batch)) => batch.into_iter().find_map(|parsed| parsed.error),
        Err(_) => None,
    };
    let message = inner
        .map(|error| {
            let message = error.message.unwrap_or_else(|| "unknown error".to_string());
            match error.status.filter(|text| !text.is_empty()) {
                Some(status_text) => format!("{message} ({status_text})"),
                None => message,
            }
        })
        // Fallback: if the payload cannot be parsed, return the raw body.
        .unwrap_or_else(|| body.to_string());
    LLMError::backend("google_gemini", status, message, retry_after)
}
