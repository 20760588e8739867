//! Configuration types for invoice batch normalization.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The language-model settings live in the
//! nested [`NormalizerConfig`] so the semantic normalizer receives everything
//! it needs at construction time; nothing is read from the environment until
//! a batch actually starts.

use crate::error::InvoiceError;
use crate::pipeline::llm::CompletionClient;
use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::pdf::PdfBackend;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default model for the semantic normalizer.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Maximum characters of normalized text sent to the model.
pub const DEFAULT_MAX_TEXT_CHARS: usize = 6000;

/// Largest accepted [`NormalizerConfig::max_retries`].
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Configuration for one batch invocation.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_invoice::{FailurePolicy, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .concurrency(8)
///     .model("gpt-4.1-mini")
///     .failure_policy(FailurePolicy::Placeholder)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rasterisation DPI for the OCR fallback. Range: 72–600. Default: 300.
    ///
    /// OCR engines are tuned for 300 DPI scans; lower values lose small print
    /// such as VAT numbers and footers.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 4000.
    ///
    /// An A4 page at 300 DPI is 2480 × 3508 px; the cap only bites on
    /// oversized pages and keeps a single rasterisation below ~64 MB.
    pub max_rendered_pixels: u32,

    /// Number of documents processed at the same time. Default: 4.
    pub concurrency: usize,

    /// Number of documents allowed in the rasterise + OCR stage at once. Default: 2.
    ///
    /// Page bitmaps at 300 DPI are large; this bounds peak memory
    /// independently of `concurrency`.
    pub ocr_concurrency: usize,

    /// Timeout in seconds for reading the text layer or rasterising a document. Default: 120.
    pub acquisition_timeout_secs: u64,

    /// What happens when text acquisition fails for a document. Default: Degrade.
    pub acquisition_policy: AcquisitionPolicy,

    /// What happens to a document that fails any stage. Default: Skip.
    pub failure_policy: FailurePolicy,

    /// OCR fallback settings.
    pub ocr: OcrConfig,

    /// Semantic normalizer (language model) settings.
    pub normalizer: NormalizerConfig,

    /// Pre-constructed completion client. Takes precedence over every
    /// provider setting in [`NormalizerConfig`].
    pub client: Option<Arc<dyn CompletionClient>>,

    /// Pre-constructed OCR engine. Takes precedence over [`OcrConfig::backend`].
    pub ocr_engine: Option<Arc<dyn OcrEngine>>,

    /// Pre-constructed PDF backend. Defaults to pdfium.
    pub pdf_backend: Option<Arc<dyn PdfBackend>>,

    /// Receives per-document progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_rendered_pixels: 4000,
            concurrency: 4,
            ocr_concurrency: 2,
            acquisition_timeout_secs: 120,
            acquisition_policy: AcquisitionPolicy::default(),
            failure_policy: FailurePolicy::default(),
            ocr: OcrConfig::default(),
            normalizer: NormalizerConfig::default(),
            client: None,
            ocr_engine: None,
            pdf_backend: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("ocr_concurrency", &self.ocr_concurrency)
            .field("acquisition_timeout_secs", &self.acquisition_timeout_secs)
            .field("acquisition_policy", &self.acquisition_policy)
            .field("failure_policy", &self.failure_policy)
            .field("ocr", &self.ocr)
            .field("normalizer", &self.normalizer)
            .field("client", &self.client.as_ref().map(|_| "<dyn CompletionClient>"))
            .field("ocr_engine", &self.ocr_engine.as_ref().map(|_| "<dyn OcrEngine>"))
            .field("pdf_backend", &self.pdf_backend.as_ref().map(|_| "<dyn PdfBackend>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn ocr_concurrency(mut self, n: usize) -> Self {
        self.config.ocr_concurrency = n;
        self
    }

    pub fn acquisition_timeout_secs(mut self, secs: u64) -> Self {
        self.config.acquisition_timeout_secs = secs;
        self
    }

    pub fn acquisition_policy(mut self, policy: AcquisitionPolicy) -> Self {
        self.config.acquisition_policy = policy;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn ocr(mut self, ocr: OcrConfig) -> Self {
        self.config.ocr = ocr;
        self
    }

    pub fn ocr_backend(mut self, backend: OcrBackend) -> Self {
        self.config.ocr.backend = backend;
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr.timeout_secs = secs;
        self
    }

    pub fn normalizer(mut self, normalizer: NormalizerConfig) -> Self {
        self.config.normalizer = normalizer;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.normalizer.api_key = Some(key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.normalizer.model_name = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.normalizer.provider_name = Some(name.into());
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.normalizer.timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.normalizer.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.normalizer.retry_backoff_ms = ms;
        self
    }

    pub fn date_order(mut self, order: DateOrder) -> Self {
        self.config.normalizer.date_order = order;
        self
    }

    pub fn missing_field_policy(mut self, policy: MissingFieldPolicy) -> Self {
        self.config.normalizer.missing_field_policy = policy;
        self
    }

    pub fn client(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.config.client = Some(client);
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.config.ocr_engine = Some(engine);
        self
    }

    pub fn pdf_backend(mut self, backend: Arc<dyn PdfBackend>) -> Self {
        self.config.pdf_backend = Some(backend);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, InvoiceError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(InvoiceError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(InvoiceError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.ocr_concurrency == 0 {
            return Err(InvoiceError::InvalidConfig(
                "OCR concurrency must be ≥ 1".into(),
            ));
        }
        if c.normalizer.max_text_chars == 0 {
            return Err(InvoiceError::InvalidConfig(
                "max_text_chars must be ≥ 1".into(),
            ));
        }
        if c.normalizer.max_retries > MAX_RETRIES_LIMIT {
            return Err(InvoiceError::InvalidConfig(format!(
                "max_retries must be ≤ {}, got {}",
                MAX_RETRIES_LIMIT, c.normalizer.max_retries
            )));
        }
        if c.normalizer.timeout_secs == 0 || c.ocr.timeout_secs == 0 || c.acquisition_timeout_secs == 0 {
            return Err(InvoiceError::InvalidConfig(
                "Timeouts must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Settings for the language-model stage, passed to the normalizer at construction.
#[derive(Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Explicit OpenAI API key. When unset the provider reads its usual env var.
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,

    /// Model identifier. Default: [`DEFAULT_MODEL`].
    pub model_name: Option<String>,

    /// Provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Per-request timeout in seconds. Default: 60.
    pub timeout_secs: u64,

    /// Retries after the first attempt for transient failures. Range: 0–10. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Maximum tokens the model may generate. Default: 512.
    ///
    /// The answer is a four-field JSON object; anything longer is a
    /// contract violation anyway.
    pub max_tokens: usize,

    /// Characters of normalized text sent with the request. Default: 6000.
    pub max_text_chars: usize,

    /// How ambiguous numeric dates such as `12/05/2024` are read. Default: DayFirst.
    pub date_order: DateOrder,

    /// What to do when the response omits one of the four fields. Default: Substitute.
    pub missing_field_policy: MissingFieldPolicy,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model_name: None,
            provider_name: None,
            timeout_secs: 60,
            max_retries: 3,
            retry_backoff_ms: 500,
            max_tokens: 512,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
            date_order: DateOrder::default(),
            missing_field_policy: MissingFieldPolicy::default(),
        }
    }
}

impl fmt::Debug for NormalizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormalizerConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model_name", &self.model_name)
            .field("provider_name", &self.provider_name)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("max_tokens", &self.max_tokens)
            .field("max_text_chars", &self.max_text_chars)
            .field("date_order", &self.date_order)
            .field("missing_field_policy", &self.missing_field_policy)
            .finish()
    }
}

impl NormalizerConfig {
    /// The model to request, falling back to [`DEFAULT_MODEL`].
    pub fn model(&self) -> &str {
        self.model_name.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// OCR fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Which engine recognises rasterised pages. Default: Tesseract.
    pub backend: OcrBackend,

    /// Path to the tesseract binary. Default: "tesseract" (from PATH).
    pub tesseract_path: String,

    /// Tesseract language pack(s), e.g. "eng" or "spa+eng". Default: "eng+spa".
    pub language: String,

    /// Per-page OCR timeout in seconds. Default: 90.
    pub timeout_secs: u64,

    /// Vision model for [`OcrBackend::Vision`]. None reuses the normalizer model.
    pub vision_model: Option<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            backend: OcrBackend::default(),
            tesseract_path: "tesseract".to_string(),
            language: "eng+spa".to_string(),
            timeout_secs: 90,
            vision_model: None,
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Engine used to read pages that have no text layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OcrBackend {
    /// Local `tesseract` CLI. (default)
    #[default]
    Tesseract,
    /// Vision-capable language model reading the page image.
    Vision,
}

/// Batch-level handling of a document that failed any stage.
///
/// Exactly one policy applies to the whole batch.
///
/// | Policy | Table | Result |
/// |--------|-------|--------|
/// | Skip | no row for the document | `Ok`, failure listed in the report |
/// | Placeholder | blank row tagged with the file name | `Ok`, failure listed in the report |
/// | Abort | nothing written | `Err(BatchAborted)` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Drop the row and report the failure. (default)
    #[default]
    Skip,
    /// Emit a row with empty Supplier/Date/Total/VAT.
    Placeholder,
    /// Fail the whole batch at the first failed document in input order.
    Abort,
}

/// Handling of text-acquisition errors inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AcquisitionPolicy {
    /// Continue with empty (or partial) text and mark the document degraded. (default)
    #[default]
    Degrade,
    /// Fail the document with an acquisition error.
    Strict,
}

/// Handling of a model response that omits one of the four fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MissingFieldPolicy {
    /// Use an empty string for the missing field. (default)
    #[default]
    Substitute,
    /// Fail the document with a normalization parse error.
    Reject,
}

/// Reading order for ambiguous numeric dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DateOrder {
    /// `12/05/2024` is 12 May 2024. (default)
    #[default]
    DayFirst,
    /// `12/05/2024` is 5 December 2024.
    MonthFirst,
}

impl DateOrder {
    /// Human-readable form used in prompts.
    pub fn describe(self) -> &'static str {
        match self {
            DateOrder::DayFirst => "day/month/year (DD/MM/YYYY)",
            DateOrder::MonthFirst => "month/day/year (MM/DD/YYYY)",
        }
    }
}
