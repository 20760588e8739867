//! Batch entry points: many invoice PDFs in, one table out.
//!
//! Each document runs the full pipeline independently (acquire → normalize
//! → pre-extract → semantic normalize), with up to `concurrency` documents
//! in flight. A failure inside one document becomes a [`DocumentError`] on
//! that document's [`DocumentResult`]; the [`FailurePolicy`] then decides
//! whether it is skipped, written as a placeholder row, or aborts the batch.
//!
//! Results are consumed in input order, so the table's row order always
//! matches the order of the documents handed in, whatever order they
//! finished in.

use crate::config::{FailurePolicy, OcrBackend, PipelineConfig, DEFAULT_MODEL};
use crate::error::{DocumentError, InvoiceError};
use crate::output::{
    BatchArtifact, BatchOutput, BatchStats, DocumentResult, InvoiceRecord,
};
use crate::pipeline::acquire::{acquire_text, Acquirer, TextSource};
use crate::pipeline::extract::pre_extract;
use crate::pipeline::input::{display_name, Document};
use crate::pipeline::llm::{CompletionClient, LlmCompletionClient, SemanticNormalizer};
use crate::pipeline::normalize::normalize_whitespace;
use crate::pipeline::ocr::{OcrEngine, TesseractOcr, VisionOcr};
use crate::pipeline::pdf::{PdfBackend, PdfiumBackend};
use crate::table::ResultTable;
use edgequake_llm::{LLMProvider, OpenAIProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Normalize a batch of invoices into one in-memory table.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(BatchOutput)` when at least one document produced a record, even if
/// others failed (check `output.stats.failed` or `output.failures()`).
///
/// # Errors
/// Returns `Err(InvoiceError)` only for fatal errors:
/// - empty batch, no model provider, no pdfium library
/// - a document failed under [`FailurePolicy::Abort`]
/// - every document failed
pub async fn process_batch(
    documents: &[Document],
    config: &PipelineConfig,
) -> Result<BatchOutput, InvoiceError> {
    let items = documents.iter().cloned().map(BatchItem::Ready).collect();
    run_batch(items, config).await
}

/// Validate `paths` and normalize them as one batch.
///
/// A path that is missing or not a PDF does not fail the call: it becomes an
/// acquisition failure for that document and the failure policy applies.
pub async fn process_paths<P: AsRef<Path>>(
    paths: &[P],
    config: &PipelineConfig,
) -> Result<BatchOutput, InvoiceError> {
    let items = paths
        .iter()
        .map(|p| match Document::from_path(p) {
            Ok(doc) => BatchItem::Ready(doc),
            Err(error) => BatchItem::Invalid {
                file_name: display_name(p.as_ref()),
                error,
            },
        })
        .collect();
    run_batch(items, config).await
}

/// Normalize a batch and write the table to `output_path`.
///
/// The write is atomic (temp file + rename). When the batch is aborted or
/// every document fails, nothing is written and an existing file at
/// `output_path` is left untouched.
pub async fn process_batch_to_file(
    documents: &[Document],
    output_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<BatchArtifact, InvoiceError> {
    let output = process_batch(documents, config).await?;
    write_artifact(output, output_path.as_ref()).await
}

/// [`process_paths`] followed by an atomic write to `output_path`.
pub async fn process_paths_to_file<P: AsRef<Path>>(
    paths: &[P],
    output_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<BatchArtifact, InvoiceError> {
    let output = process_paths(paths, config).await?;
    write_artifact(output, output_path.as_ref()).await
}

/// Synchronous wrapper around [`process_batch`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_batch_sync(
    documents: &[Document],
    config: &PipelineConfig,
) -> Result<BatchOutput, InvoiceError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| InvoiceError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process_batch(documents, config))
}

async fn write_artifact(output: BatchOutput, path: &Path) -> Result<BatchArtifact, InvoiceError> {
    output.table.write_atomic(path).await?;
    info!("Wrote {} rows to {}", output.table.len(), path.display());
    Ok(BatchArtifact {
        path: path.to_path_buf(),
        rows: output.table.len(),
        failures: output.failures(),
        stats: output.stats,
    })
}

// ── Batch driver ─────────────────────────────────────────────────────────

enum BatchItem {
    Ready(Document),
    /// Rejected before acquisition (missing file, not a PDF).
    Invalid { file_name: String, error: DocumentError },
}

impl BatchItem {
    fn file_name(&self) -> &str {
        match self {
            BatchItem::Ready(d) => &d.file_name,
            BatchItem::Invalid { file_name, .. } => file_name,
        }
    }
}

/// Everything a single document needs, shared across the batch.
struct Components {
    acquirer: Acquirer,
    normalizer: SemanticNormalizer,
}

async fn run_batch(
    items: Vec<BatchItem>,
    config: &PipelineConfig,
) -> Result<BatchOutput, InvoiceError> {
    let batch_start = Instant::now();
    if items.is_empty() {
        return Err(InvoiceError::EmptyBatch);
    }
    let total = items.len();
    info!("Starting batch: {} documents", total);

    // ── Step 1: Resolve components ───────────────────────────────────────
    let client = resolve_client(config)?;
    let components = Arc::new(Components {
        acquirer: Acquirer::new(
            resolve_pdf_backend(config)?,
            resolve_ocr_engine(config, &client)?,
            config.ocr_concurrency,
        ),
        normalizer: SemanticNormalizer::new(Arc::clone(&client), config.normalizer.clone()),
    });
    debug!("Using model client '{}'", client.name());

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    // ── Step 2: Process documents ────────────────────────────────────────
    // `buffered` yields in input order while keeping `concurrency` documents
    // in flight, so an abort stops at the first failure in input order.
    let mut results = stream::iter(items.into_iter().enumerate().map(|(index, item)| {
        let components = Arc::clone(&components);
        let config = config.clone();
        async move { process_item(index, total, item, &components, &config).await }
    }))
    .buffered(config.concurrency);

    let mut documents: Vec<DocumentResult> = Vec::with_capacity(total);
    while let Some(result) = results.next().await {
        if config.failure_policy == FailurePolicy::Abort {
            if let Some(ref error) = result.error {
                let processed = documents.len() + 1;
                warn!(
                    "Aborting batch at '{}' ({}/{}): {}",
                    result.file_name, processed, total, error
                );
                if let Some(ref cb) = config.progress_callback {
                    cb.on_batch_complete(total, documents.len());
                }
                return Err(InvoiceError::BatchAborted {
                    processed,
                    failed: 1,
                    file_name: result.file_name,
                    source: error.clone(),
                });
            }
        }
        documents.push(result);
    }
    drop(results);

    // ── Step 3: Assemble table ───────────────────────────────────────────
    let mut records = Vec::with_capacity(total);
    for doc in &documents {
        match (&doc.record, config.failure_policy) {
            (Some(record), _) => records.push(record.clone()),
            (None, FailurePolicy::Placeholder) => {
                records.push(InvoiceRecord::placeholder(&doc.file_name))
            }
            (None, _) => {}
        }
    }

    // ── Step 4: Compute stats ────────────────────────────────────────────
    let succeeded = documents.iter().filter(|d| d.is_success()).count();
    let failed = total - succeeded;
    let stats = BatchStats {
        total_documents: total,
        succeeded,
        failed,
        placeholders: if config.failure_policy == FailurePolicy::Placeholder {
            failed
        } else {
            0
        },
        ocr_documents: documents.iter().filter(|d| d.used_ocr).count(),
        degraded_documents: documents.iter().filter(|d| d.degraded).count(),
        total_input_tokens: documents.iter().map(|d| d.input_tokens).sum(),
        total_output_tokens: documents.iter().map(|d| d.output_tokens).sum(),
        total_duration_ms: batch_start.elapsed().as_millis() as u64,
    };

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(total, succeeded);
    }

    if succeeded == 0 {
        let failures = BatchOutput::collect_failures(&documents);
        return Err(InvoiceError::AllDocumentsFailed { total, failures });
    }

    info!(
        "Batch complete: {}/{} documents, {} via OCR, {}ms total",
        succeeded, total, stats.ocr_documents, stats.total_duration_ms
    );

    Ok(BatchOutput {
        table: ResultTable::new(records),
        documents,
        stats,
    })
}

/// Run one document through every stage. Never returns an error: failures
/// are recorded on the result.
async fn process_item(
    index: usize,
    total: usize,
    item: BatchItem,
    components: &Components,
    config: &PipelineConfig,
) -> DocumentResult {
    let start = Instant::now();
    let file_name = item.file_name().to_string();
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_start(index, total, &file_name);
    }

    let mut result = DocumentResult {
        index,
        file_name: file_name.clone(),
        record: None,
        error: None,
        used_ocr: false,
        degraded: false,
        retries: 0,
        input_tokens: 0,
        output_tokens: 0,
        duration_ms: 0,
    };

    let outcome = match item {
        BatchItem::Invalid { error, .. } => Err(error),
        BatchItem::Ready(document) => {
            run_document(&document, components, config, index, &mut result).await
        }
    };

    result.duration_ms = start.elapsed().as_millis() as u64;
    match outcome {
        Ok(record) => {
            info!("{}: done in {}ms", file_name, result.duration_ms);
            result.record = Some(record);
            if let Some(ref cb) = config.progress_callback {
                cb.on_document_complete(index, total, &file_name);
            }
        }
        Err(error) => {
            warn!("{}: {}", file_name, error);
            if let Some(ref cb) = config.progress_callback {
                cb.on_document_error(index, total, &file_name, &error.to_string());
            }
            result.error = Some(error);
        }
    }
    result
}

async fn run_document(
    document: &Document,
    components: &Components,
    config: &PipelineConfig,
    index: usize,
    result: &mut DocumentResult,
) -> Result<InvoiceRecord, DocumentError> {
    let acquired = acquire_text(document, &components.acquirer, config, || {
        if let Some(ref cb) = config.progress_callback {
            cb.on_ocr_fallback(index, &document.file_name);
        }
    })
    .await?;
    result.used_ocr = acquired.source == TextSource::Ocr;
    result.degraded = acquired.degraded;

    let text = normalize_whitespace(&acquired.text);
    let hints = pre_extract(&text);
    debug!("{}: {} chars, hints {:?}", document.file_name, text.chars().count(), hints);

    let outcome = components
        .normalizer
        .normalize(&text, &hints, &document.file_name)
        .await?;
    result.retries = outcome.retries;
    result.input_tokens = outcome.input_tokens;
    result.output_tokens = outcome.output_tokens;

    Ok(InvoiceRecord::from_fields(outcome.fields, &document.file_name))
}

// ── Component resolution ─────────────────────────────────────────────────

fn resolve_pdf_backend(config: &PipelineConfig) -> Result<Arc<dyn PdfBackend>, InvoiceError> {
    if let Some(ref backend) = config.pdf_backend {
        return Ok(Arc::clone(backend));
    }
    let backend = PdfiumBackend::new();
    backend.check()?;
    Ok(Arc::new(backend))
}

fn resolve_ocr_engine(
    config: &PipelineConfig,
    client: &Arc<dyn CompletionClient>,
) -> Result<Arc<dyn OcrEngine>, InvoiceError> {
    if let Some(ref engine) = config.ocr_engine {
        return Ok(Arc::clone(engine));
    }
    match config.ocr.backend {
        OcrBackend::Tesseract => Ok(Arc::new(TesseractOcr::from_config(&config.ocr))),
        OcrBackend::Vision => {
            let vision_client = match (&config.ocr.vision_model, &config.client) {
                (Some(model), None) => {
                    let provider_name = config.normalizer.provider_name.as_deref().unwrap_or("openai");
                    wrap(create_provider(provider_name, model)?, provider_name, model)
                }
                _ => Arc::clone(client),
            };
            Ok(Arc::new(VisionOcr::new(vision_client, &config.normalizer)))
        }
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, InvoiceError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        InvoiceError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn wrap(provider: Arc<dyn LLMProvider>, name: &str, model: &str) -> Arc<dyn CompletionClient> {
    Arc::new(LlmCompletionClient::new(provider, format!("{name}/{model}")))
}

/// Resolve the model client, from most-specific to least-specific.
///
/// 1. **Injected client** (`config.client`): used as-is. Tests and
///    embedders with their own middleware land here.
/// 2. **Explicit API key** (`normalizer.api_key`): an OpenAI provider built
///    with that key; no environment lookup.
/// 3. **Named provider + model** (`normalizer.provider_name`): the factory
///    reads the matching API key from the environment.
/// 4. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 5. **`OPENAI_API_KEY`**: OpenAI with the configured model.
/// 6. **Full auto-detection** (`ProviderFactory::from_env`).
///
/// Runs once per batch, never at module load.
pub fn resolve_client(config: &PipelineConfig) -> Result<Arc<dyn CompletionClient>, InvoiceError> {
    // 1) Injected client
    if let Some(ref client) = config.client {
        return Ok(Arc::clone(client));
    }

    let n = &config.normalizer;
    let model = n.model();

    // 2) Explicit key
    if let Some(ref key) = n.api_key {
        let openai = n.provider_name.as_deref().map_or(true, |p| p == "openai");
        if !key.is_empty() && openai {
            let provider: Arc<dyn LLMProvider> =
                Arc::new(OpenAIProvider::new(key.clone()).with_model(model));
            return Ok(wrap(provider, "openai", model));
        }
    }

    // 3) Provider name + model
    if let Some(ref name) = n.provider_name {
        return Ok(wrap(create_provider(name, model)?, name, model));
    }

    // 4) Environment pair
    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return Ok(wrap(create_provider(&prov, &env_model)?, &prov, &env_model));
        }
    }

    // 5) OpenAI key in the environment
    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return Ok(wrap(create_provider("openai", model)?, "openai", model));
    }

    // 6) Auto-detect
    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| InvoiceError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY (default model {}), pass --api-key, or choose --provider.\n\
                Error: {}",
                DEFAULT_MODEL, e
            ),
        })?;

    Ok(Arc::new(LlmCompletionClient::new(llm_provider, "auto")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_batch_is_rejected_before_any_work() {
        let err = process_batch(&[], &PipelineConfig::default()).await.unwrap_err();
        assert!(matches!(err, InvoiceError::EmptyBatch));
    }

    #[test]
    fn injected_client_wins() {
        use crate::error::ServiceError;
        use crate::pipeline::llm::{Completion, CompletionRequest};
        use async_trait::async_trait;

        struct Named;
        #[async_trait]
        impl CompletionClient for Named {
            fn name(&self) -> &str {
                "injected"
            }
            async fn complete(&self, _: &CompletionRequest) -> Result<Completion, ServiceError> {
                Ok(Completion::default())
            }
        }

        let config = PipelineConfig::builder()
            .client(Arc::new(Named))
            .api_key("sk-ignored")
            .build()
            .unwrap();
        assert_eq!(resolve_client(&config).unwrap().name(), "injected");
    }
}
