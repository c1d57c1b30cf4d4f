//! Per-slide text generation through an external chat-completions service.
//!
//! Every attempt, retries included, goes through the shared [`RateLimiter`].
//! Retryable failures back off exponentially (`base * 2^(attempt-1)`) on the
//! injected [`Clock`]; anything else fails the slide at once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::error::ServiceError;
use crate::ratelimit::{Clock, RateLimiter};

/// Returned in place of an explanation when the service answers without
/// any choices.
pub const EMPTY_SLIDE: &str = "(Empty slide)";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The external generation service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatCompletionsGenerator {
    client: Client,
    url: String,
    model: String,
    api_key: SecretString,
    timeout_secs: u64,
}

impl ChatCompletionsGenerator {
    pub fn new(config: &GenerationConfig, api_key: SecretString) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.timeout())
            .build()
            .map_err(|e| ServiceError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.endpoint.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn from_config(config: &GenerationConfig) -> crate::error::Result<Self> {
        let api_key = config.api_key()?;
        Ok(Self::new(config, api_key)?)
    }

    fn classify(&self, err: reqwest::Error) -> ServiceError {
        if err.is_timeout() {
            ServiceError::Timeout {
                secs: self.timeout_secs,
            }
        } else {
            ServiceError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionsGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => ServiceError::RateLimited,
                401 | 403 => ServiceError::Unauthorized {
                    status: status.as_u16(),
                },
                code => ServiceError::Http { status: code, body },
            });
        }

        let body = response.text().await.map_err(|e| self.classify(e))?;
        parse_chat_response(&body)
    }
}

fn parse_chat_response(body: &str) -> Result<String, ServiceError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ServiceError::MalformedResponse(e.to_string()))?;

    match parsed.choices.into_iter().next() {
        Some(choice) => Ok(choice
            .message
            .content
            .map(|c| c.trim().to_string())
            .unwrap_or_default()),
        None => Ok(EMPTY_SLIDE.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            base_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }
}

/// Turns slide text into explanations: prompt building, rate limiting,
/// retries and per-document concurrency.
#[derive(Clone)]
pub struct SlideExplainer {
    generator: Arc<dyn TextGenerator>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    prompt_prefix: String,
}

impl SlideExplainer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        prompt_prefix: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            limiter,
            clock,
            policy,
            prompt_prefix: prompt_prefix.into(),
        }
    }

    pub fn prompt_for(&self, slide_text: &str) -> String {
        format!("{}{}", self.prompt_prefix, slide_text)
    }

    /// Explains one slide. `slide` is 1-based and only used for reporting.
    pub async fn explain_slide(&self, slide: usize, text: &str) -> Result<String, ServiceError> {
        let prompt = self.prompt_for(text);
        let attempts = self.policy.max_retries.saturating_add(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = self.policy.backoff(attempt);
                warn!(
                    slide,
                    retry = attempt,
                    max_retries = self.policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Retrying slide generation"
                );
                self.clock.sleep(backoff).await;
            }

            self.limiter.acquire().await;
            match self.generator.generate(&prompt).await {
                Ok(text) => {
                    debug!(slide, attempt = attempt + 1, "Slide explained");
                    return Ok(text);
                }
                Err(e) if e.is_retryable() => {
                    warn!(slide, attempt = attempt + 1, error = %e, "Slide generation failed");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(ServiceError::Exhausted {
            slide,
            attempts,
            last: Box::new(last_err.unwrap_or(ServiceError::RateLimited)),
        })
    }

    /// Explains every slide of a document, keeping slide order.
    ///
    /// Up to one window's budget of slides are in flight at once; the first
    /// slide that fails for good fails the whole document.
    pub async fn explain_all(&self, slides: &[String]) -> Result<Vec<String>, ServiceError> {
        let concurrency = (self.limiter.limit() as usize).max(1);

        let mut explained: Vec<(usize, String)> = stream::iter(slides.iter().enumerate())
            .map(|(index, text)| async move {
                let explanation = self.explain_slide(index + 1, text).await?;
                Ok::<_, ServiceError>((index, explanation))
            })
            .buffer_unordered(concurrency)
            .try_collect()
            .await?;

        explained.sort_by_key(|(index, _)| *index);
        Ok(explained.into_iter().map(|(_, text)| text).collect())
    }
}
