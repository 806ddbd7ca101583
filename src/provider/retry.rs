//! Bounded retries with exponential backoff around backend calls.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::LLMError;

/// Observer invoked before each retry with `(attempt, error, delay)`.
pub type RetryObserver = Arc<dyn Fn(u32, &LLMError, Duration) + Send + Sync>;

/// Retry settings for one call or a whole client.
///
/// A per-call configuration replaces the client default entirely; the two are never
/// merged.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tessera_llm::provider::retry::RetryConfig;
///
/// let config = RetryConfig::default()
///     .with_max_retries(3)
///     .with_initial_delay(Duration::from_millis(10))
///     .with_jitter(false);
/// assert_eq!(config.delay_for(3), Duration::from_millis(40));
/// assert_eq!(RetryConfig::none().max_retries, 0);
/// ```
#[derive(Clone)]
pub struct RetryConfig {
    /// Number of retries after the first attempt; `0` disables retrying.
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Upper bound for the computed backoff.
    pub max_delay: Duration,
    /// Randomizes each delay within `[delay / 2, delay]`.
    pub jitter: bool,
    pub on_retry: Option<RetryObserver>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryConfig {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(u32, &LLMError, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// Un-jittered backoff before retry number `attempt` (1-based):
    /// `initial_delay * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let high = delay.as_secs_f64();
        Duration::from_secs_f64(rand::thread_rng().gen_range(high / 2.0..=high))
    }
}

/// Executes an operation under a [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `operation` until it succeeds, fails with a terminal error, or the retry
    /// budget is spent. The last error is returned unchanged.
    ///
    /// A backend `Retry-After` value replaces the computed delay.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, LLMError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LLMError>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = err.retry_after().unwrap_or_else(|| {
                        self.config.jittered(self.config.delay_for(attempt))
                    });
                    tracing::warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying request"
                    );
                    if let Some(observer) = &self.config.on_retry {
                        observer(attempt, &err, delay);
                    }
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Extracts the `Retry-After` header (in seconds) if present.
///
/// HTTP-date values are ignored because vendors primarily use the numeric form.
pub(crate) fn retry_after_from_headers(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn throttled() -> LLMError {
        LLMError::backend("openai_chat", 429, "rate limited", None)
    }

    #[tokio::test]
    async fn retries_throttling_until_success() {
        let calls = AtomicU32::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observed = Arc::clone(&seen);
        let policy = RetryPolicy::new(
            RetryConfig::default()
                .with_max_retries(2)
                .with_initial_delay(Duration::from_millis(10))
                .with_observer(move |attempt, _, delay| {
                    observed.lock().expect("lock").push((attempt, delay));
                }),
        );

        let result = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err(throttled()) } else { Ok("done") } }
            })
            .await;

        assert_eq!(result.expect("success"), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let seen = seen.lock().expect("lock");
        assert_eq!(seen.iter().map(|(a, _)| *a).collect::<Vec<_>>(), vec![1, 2]);
        assert!(seen[0].1 <= Duration::from_millis(10));
        assert!(seen[1].1 >= Duration::from_millis(10) && seen[1].1 <= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(RetryConfig::default().with_max_retries(5));
        let result: Result<(), _> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LLMError::backend("openai_chat", 400, "bad field", None)) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result {
            Err(LLMError::Backend {
                status, message, ..
            }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad field");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_budget_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(
            RetryConfig::default()
                .with_max_retries(1)
                .with_initial_delay(Duration::from_millis(1)),
        );
        let result: Result<(), _> = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(LLMError::backend("google_gemini", 503, format!("try {n}"), None)) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(result, Err(LLMError::Backend { message, .. }) if message == "try 1"));
    }

    #[tokio::test]
    async fn retry_after_overrides_backoff() {
        let delays = Arc::new(Mutex::new(Vec::new()));
        let observed = Arc::clone(&delays);
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(
            RetryConfig::default()
                .with_max_retries(1)
                .with_initial_delay(Duration::from_secs(60))
                .with_observer(move |_, _, delay| observed.lock().expect("lock").push(delay)),
        );
        let result = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(LLMError::backend(
                            "anthropic_messages",
                            429,
                            "slow down",
                            Some(Duration::ZERO),
                        ))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.expect("success"), 1);
        assert_eq!(*delays.lock().expect("lock"), vec![Duration::ZERO]);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = RetryConfig::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(250));
        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(250));
        assert_eq!(config.delay_for(40), Duration::from_millis(250));
    }

    #[test]
    fn retry_after_header_is_case_insensitive() {
        let headers = HashMap::from([("Retry-After".to_string(), " 7 ".to_string())]);
        assert_eq!(
            retry_after_from_headers(&headers),
            Some(Duration::from_secs(7))
        );
        let dated = HashMap::from([(
            "retry-after".to_string(),
            "Wed, 21 Oct 2015 07:28:00 GMT".to_string(),
        )]);
        assert_eq!(retry_after_from_headers(&dated), None);
    }
}
