use std::time::Duration;

use thiserror::Error;

use crate::schema::SchemaError;

/// Aggregates every failure mode exposed by the unified LLM client.
///
/// Callers can match on the variant to decide whether to retry, surface the message, or
/// inspect the per-call entries returned by [`crate::client::LLMClient::execute_tools`].
#[derive(Debug, Error)]
pub enum LLMError {
    /// No response was received from the backend (DNS, connect, TLS, body read...).
    #[error("transport error: {message}")]
    Transport { message: String },
    /// The backend answered with a non-2xx status.
    #[error("{provider} returned status {status}: {message}")]
    Backend {
        /// Name of the provider, such as `openai_chat`.
        provider: &'static str,
        /// HTTP status code of the failed exchange.
        status: u16,
        /// Message extracted from the backend's error envelope, or the raw body.
        message: String,
        /// Wait duration suggested by the `Retry-After` header.
        retry_after: Option<Duration>,
    },
    /// The abstract schema cannot be expressed in the target dialect.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// A tool call referenced a name that is not registered.
    #[error("tool not found: {name}")]
    ToolNotFound { name: String },
    /// A registered tool rejected its arguments or failed while running.
    #[error("tool {name} failed: {message}")]
    ToolExecution { name: String, message: String },
    /// Signals validation failures in the request payload.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// Raised when building or validating configuration fails.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Name of the configuration field that failed validation.
        field: String,
        /// Additional context explaining why the field is invalid.
        reason: String,
    },
    /// The stream was consumed past a failure or terminated abnormally.
    #[error("stream closed unexpectedly: {message}")]
    StreamClosed { message: String },
    /// A success response that could not be interpreted.
    #[error("provider {provider} error: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },
}

impl LLMError {
    /// Creates an [`LLMError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use tessera_llm::error::LLMError;
    ///
    /// let err = LLMError::transport("dns lookup failed");
    /// assert!(matches!(err, LLMError::Transport { .. }));
    /// assert!(err.is_retryable());
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Provider`] with the given provider name and message.
    ///
    /// # Examples
    ///
    /// ```
    /// use tessera_llm::error::LLMError;
    ///
    /// let err = LLMError::provider("openai_chat", "bad JSON payload");
    /// assert!(matches!(err, LLMError::Provider { provider: "openai_chat", .. }));
    /// ```
    pub fn provider<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Backend`] for a non-2xx exchange.
    pub fn backend<T: Into<String>>(
        provider: &'static str,
        status: u16,
        message: T,
        retry_after: Option<Duration>,
    ) -> Self {
        Self::Backend {
            provider,
            status,
            message: message.into(),
            retry_after,
        }
    }

    /// HTTP status carried by a backend error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Backend { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Delay requested by the backend through `Retry-After`.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Backend { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Returns `true` for failures worth another attempt: throttling (429), server
    /// errors (5xx) and transport failures where no response arrived.
    ///
    /// # Examples
    ///
    /// ```
    /// use tessera_llm::error::LLMError;
    ///
    /// assert!(LLMError::backend("anthropic_messages", 529, "overloaded", None).is_retryable());
    /// assert!(!LLMError::backend("anthropic_messages", 400, "bad request", None).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Backend { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}
