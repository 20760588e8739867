//! Language-model interaction: the completion seam and the semantic normalizer.
//!
//! [`CompletionClient`] is the narrow interface the pipeline needs from a
//! model provider: one request in, one text answer out, with failures
//! classified into [`ServiceErrorKind`]. [`LlmCompletionClient`] adapts any
//! `edgequake_llm` provider to it; tests substitute canned clients.
//!
//! All prompt wording lives in [`crate::prompts`] and all response
//! validation in [`crate::pipeline::schema`], so this module only deals with
//! request assembly, timeouts and retries.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors are transient and frequent under concurrent load.
//! Exponential backoff (`retry_backoff_ms * 2^(attempt-1)`) with 500 ms base
//! and 3 retries waits 500 ms → 1 s → 2 s. Authentication failures and
//! rejected requests are returned immediately: repeating them cannot help.

use crate::config::NormalizerConfig;
use crate::error::{DocumentError, ServiceError, ServiceErrorKind};
use crate::output::{InvoiceFields, PreExtractedFields};
use crate::pipeline::normalize::truncate_chars;
use crate::pipeline::schema;
use crate::prompts;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Normalizer requests use fully deterministic decoding.
pub const NORMALIZER_TEMPERATURE: f32 = 0.0;

/// One model request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    /// Page images for vision requests; empty for text-only requests.
    pub images: Vec<ImageData>,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// The model's answer.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A model service the pipeline can send requests to.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Provider/model label used in logs.
    fn name(&self) -> &str;

    /// Send one request. Must not retry internally.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ServiceError>;
}

/// [`CompletionClient`] backed by an `edgequake_llm` provider.
pub struct LlmCompletionClient {
    provider: Arc<dyn LLMProvider>,
    name: String,
}

impl LlmCompletionClient {
    pub fn new(provider: Arc<dyn LLMProvider>, name: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
        }
    }
}

#[async_trait]
impl CompletionClient for LlmCompletionClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ServiceError> {
        let user = if request.images.is_empty() {
            ChatMessage::user(&request.user)
        } else {
            ChatMessage::user_with_images(&request.user, request.images.clone())
        };
        let messages = vec![ChatMessage::system(&request.system), user];

        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ServiceError::classify(format!("{}", e)))?;

        Ok(Completion {
            content: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

/// Retry policy shared by the normalizer and the vision OCR engine.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
}

impl From<&NormalizerConfig> for RetryPolicy {
    fn from(c: &NormalizerConfig) -> Self {
        Self {
            max_retries: c.max_retries,
            backoff_ms: c.retry_backoff_ms,
            timeout_secs: c.timeout_secs,
        }
    }
}

/// Send `request`, retrying transient failures and timeouts.
///
/// Returns the completion and the number of retries used, or a
/// [`DocumentError::Service`] carrying the last failure.
pub async fn call_with_retry(
    client: &dyn CompletionClient,
    request: &CompletionRequest,
    policy: RetryPolicy,
    label: &str,
) -> Result<(Completion, u32), DocumentError> {
    let mut last = ServiceError::new(ServiceErrorKind::Transient, "no attempt made");

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = backoff_delay_ms(policy.backoff_ms, attempt);
            warn!(
                "{}: retry {}/{} after {}ms",
                label, attempt, policy.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let outcome = timeout(
            Duration::from_secs(policy.timeout_secs),
            client.complete(request),
        )
        .await
        .unwrap_or_else(|_| {
            Err(ServiceError::new(
                ServiceErrorKind::Timeout,
                format!("no response within {}s", policy.timeout_secs),
            ))
        });

        match outcome {
            Ok(completion) => return Ok((completion, attempt)),
            Err(e) => {
                warn!("{}: attempt {} failed: {}", label, attempt + 1, e);
                let retryable = e.kind.is_retryable();
                last = e;
                if !retryable {
                    return Err(service_failure(last, attempt + 1));
                }
            }
        }
    }

    Err(service_failure(last, policy.max_retries + 1))
}

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF_MS: u64 = 60_000;

/// `base * 2^(attempt-1)`, saturating, capped at [`MAX_BACKOFF_MS`].
fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    2u64.checked_pow(attempt.saturating_sub(1))
        .map_or(u64::MAX, |factor| base_ms.saturating_mul(factor))
        .min(MAX_BACKOFF_MS)
}

fn service_failure(e: ServiceError, attempts: u32) -> DocumentError {
    DocumentError::Service {
        kind: e.kind,
        attempts,
        detail: e.message,
    }
}

/// What one successful normalization produced.
#[derive(Debug, Clone)]
pub struct NormalizedOutcome {
    pub fields: InvoiceFields,
    pub retries: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Turns normalized invoice text plus regex hints into the four fields.
///
/// Everything it needs is passed in at construction; it reads no globals.
#[derive(Clone)]
pub struct SemanticNormalizer {
    client: Arc<dyn CompletionClient>,
    config: NormalizerConfig,
}

impl SemanticNormalizer {
    pub fn new(client: Arc<dyn CompletionClient>, config: NormalizerConfig) -> Self {
        Self { client, config }
    }

    /// Build the single request for `text`; exposed for inspection in tests.
    pub fn build_request(
        &self,
        text: &str,
        hints: &PreExtractedFields,
    ) -> Result<CompletionRequest, DocumentError> {
        let hints_json = serde_json::to_string(hints)
            .map_err(|e| DocumentError::parse(format!("cannot encode hints: {e}"), ""))?;
        let excerpt = truncate_chars(text, self.config.max_text_chars);

        Ok(CompletionRequest {
            system: prompts::normalizer_system_prompt(self.config.date_order),
            user: prompts::build_user_prompt(excerpt, &hints_json),
            images: Vec::new(),
            temperature: NORMALIZER_TEMPERATURE,
            max_tokens: self.config.max_tokens,
        })
    }

    /// One model round-trip for one document.
    pub async fn normalize(
        &self,
        text: &str,
        hints: &PreExtractedFields,
        label: &str,
    ) -> Result<NormalizedOutcome, DocumentError> {
        let request = self.build_request(text, hints)?;
        let (completion, retries) =
            call_with_retry(self.client.as_ref(), &request, (&self.config).into(), label).await?;

        debug!(
            "{}: {} input tokens, {} output tokens via {}",
            label,
            completion.input_tokens,
            completion.output_tokens,
            self.client.name()
        );

        let fields = schema::parse_response(
            &completion.content,
            self.config.date_order,
            self.config.missing_field_policy,
        )
        .inspect_err(|e| {
            warn!(
                "{}: {} (raw response: {:?})",
                label,
                e,
                truncate_chars(&completion.content, 500)
            )
        })?;

        Ok(NormalizedOutcome {
            fields,
            retries,
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
        })
    }
}
