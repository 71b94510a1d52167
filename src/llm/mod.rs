//! Provider-agnostic chat completion with bounded retry and per-call
//! timeout. Providers are stateless; concurrent calls run in parallel.

mod anthropic;
mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::{LlmConfig, RetryConfig};
use crate::error::{MentorError, MentorResult};
use crate::types::{ChatMessage, TokenUsage};

/// Per-call completion options.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: usize,
}

impl From<&LlmConfig> for CompletionOptions {
    fn from(config: &LlmConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// A completed chat turn.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

/// Abstract chat-completion capability.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> MentorResult<Completion>;
}

/// Wraps a provider with timeout and a bounded-retry policy: transient
/// failures (timeout, 5xx, rate-limit) back off exponentially with jitter
/// up to the configured attempts; auth and other permanent errors fail
/// fast.
pub struct LlmClient {
    provider: Arc<dyn ChatProvider>,
    retry: RetryConfig,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn ChatProvider>, retry: RetryConfig, timeout: Duration) -> Self {
        Self {
            provider,
            retry,
            timeout,
        }
    }

    /// Build the configured provider. Unknown names fall back to OpenAI.
    pub fn from_config(llm: &LlmConfig, retry: &RetryConfig, api_key: impl Into<String>) -> Self {
        let provider: Arc<dyn ChatProvider> = match llm.provider.as_str() {
            "anthropic" => Arc::new(AnthropicProvider::new(api_key)),
            _ => Arc::new(OpenAiProvider::new(api_key)),
        };
        Self::new(provider, retry.clone(), Duration::from_secs(llm.timeout_s))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> MentorResult<Completion> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome =
                tokio::time::timeout(self.timeout, self.provider.complete(messages, options))
                    .await;
            let error = match outcome {
                Ok(Ok(completion)) => return Ok(completion),
                Ok(Err(e)) if e.is_transient() => e,
                Ok(Err(e)) => return Err(e),
                Err(_) => MentorError::LlmTransient(format!(
                    "completion timed out after {}s",
                    self.timeout.as_secs()
                )),
            };

            if attempt >= max_attempts {
                return Err(MentorError::RetriesExhausted {
                    attempts: attempt,
                    last_error: error.to_string(),
                });
            }

            let delay = retry_delay(self.retry.base_delay_ms, attempt);
            warn!(
                provider = self.provider.name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient LLM failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Exponential backoff capped at 10 s, plus 0–50 % jitter derived from the
/// clock's sub-second nanos.
fn retry_delay(base_delay_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let exponential = base_delay_ms.saturating_mul(1u64 << exponent);
    let capped = exponential.min(10_000);
    let jitter_max = capped / 2;
    let jitter = if jitter_max == 0 {
        0
    } else {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64)
            .unwrap_or(0);
        nanos % (jitter_max + 1)
    };
    Duration::from_millis(capped + jitter)
}

/// Map an HTTP status from a provider into the crate's error taxonomy.
pub(crate) fn status_to_error(provider: &str, status: u16, body: &str) -> MentorError {
    match status {
        401 | 403 => MentorError::Auth(format!("{provider}: {status}: {body}")),
        429 => MentorError::RateLimited {
            provider: provider.to_string(),
            retry_after_ms: 5000,
        },
        408 | 500..=599 => {
            MentorError::LlmTransient(format!("{provider}: {status}: {body}"))
        }
        _ => MentorError::LlmFatal(format!("{provider}: {status}: {body}")),
    }
}

/// Map a reqwest transport error: timeouts and connection failures are
/// retryable, anything else is surfaced as-is.
pub(crate) fn transport_error(provider: &str, error: reqwest::Error) -> MentorError {
    if error.is_timeout() || error.is_connect() {
        MentorError::LlmTransient(format!("{provider}: {error}"))
    } else {
        MentorError::Http(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Provider that fails `failures` times before succeeding.
    struct FlakyProvider {
        failures: u32,
        calls: AtomicU32,
        error: fn() -> MentorError,
    }

    impl FlakyProvider {
        fn new(failures: u32, error: fn() -> MentorError) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                error,
            }
        }
    }

    #[async_trait]
    impl ChatProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _options: &CompletionOptions,
        ) -> MentorResult<Completion> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err((self.error)())
            } else {
                Ok(Completion {
                    content: "ok".into(),
                    usage: TokenUsage::new(1, 1),
                })
            }
        }
    }

    fn options() -> CompletionOptions {
        CompletionOptions {
            model: "test".into(),
            temperature: 0.0,
            max_tokens: 100,
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let provider = Arc::new(FlakyProvider::new(2, || {
            MentorError::LlmTransient("503".into())
        }));
        let client = LlmClient::new(provider.clone(), fast_retry(), Duration::from_secs(5));

        let completion = client.complete(&[ChatMessage::user("hi")], &options()).await;
        assert_eq!(completion.unwrap().content, "ok");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_retries_on_persistent_transient() {
        let provider = Arc::new(FlakyProvider::new(10, || {
            MentorError::LlmTransient("503".into())
        }));
        let client = LlmClient::new(provider.clone(), fast_retry(), Duration::from_secs(5));

        let result = client.complete(&[ChatMessage::user("hi")], &options()).await;
        assert!(matches!(
            result,
            Err(MentorError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fails_fast_on_auth_error() {
        let provider = Arc::new(FlakyProvider::new(10, || {
            MentorError::Auth("invalid key".into())
        }));
        let client = LlmClient::new(provider.clone(), fast_retry(), Duration::from_secs(5));

        let result = client.complete(&[ChatMessage::user("hi")], &options()).await;
        assert!(matches!(result, Err(MentorError::Auth(_))));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limit_is_retried() {
        let provider = Arc::new(FlakyProvider::new(1, || MentorError::RateLimited {
            provider: "flaky".into(),
            retry_after_ms: 1,
        }));
        let client = LlmClient::new(provider.clone(), fast_retry(), Duration::from_secs(5));

        let result = client.complete(&[ChatMessage::user("hi")], &options()).await;
        assert!(result.is_ok());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        let d1 = retry_delay(500, 1).as_millis() as u64;
        let d2 = retry_delay(500, 2).as_millis() as u64;
        let d4 = retry_delay(500, 20).as_millis() as u64;

        // base ≤ delay ≤ base·2^(n-1) · 1.5
        assert!((500..=750).contains(&d1));
        assert!((1000..=1500).contains(&d2));
        // capped at 10s + 50% jitter
        assert!((10_000..=15_000).contains(&d4));

        assert_eq!(retry_delay(0, 1), Duration::ZERO);
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_to_error("openai", 401, ""),
            MentorError::Auth(_)
        ));
        assert!(matches!(
            status_to_error("openai", 429, ""),
            MentorError::RateLimited { .. }
        ));
        assert!(matches!(
            status_to_error("openai", 503, ""),
            MentorError::LlmTransient(_)
        ));
        assert!(matches!(
            status_to_error("openai", 400, ""),
            MentorError::LlmFatal(_)
        ));
        assert!(status_to_error("openai", 500, "").is_transient());
        assert!(!status_to_error("openai", 404, "").is_transient());
    }
}
