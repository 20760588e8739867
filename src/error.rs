//! Error types for the edgequake-invoice library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`InvoiceError`]: **Fatal**: the batch cannot produce an artifact at
//!   all (bad configuration, no provider, the output file cannot be written,
//!   the abort policy fired). Returned as `Err(InvoiceError)` from the
//!   top-level `process_batch*` functions.
//!
//! * [`DocumentError`]: **Non-fatal**: a single document failed (corrupt
//!   file, OCR crash, API outage, malformed model response) but the other
//!   documents of the batch are unaffected. Stored inside
//!   [`crate::output::DocumentResult`] and surfaced in the batch report.
//!
//! [`crate::config::FailurePolicy`] decides how a `DocumentError` affects the
//! table: skipped row, placeholder row, or batch abort.

use crate::output::DocumentFailure;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-invoice library.
///
/// Per-document failures use [`DocumentError`] and only become an
/// `InvoiceError` through [`InvoiceError::BatchAborted`] or
/// [`InvoiceError::AllDocumentsFailed`].
#[derive(Debug, Error)]
pub enum InvoiceError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The caller handed over zero documents.
    #[error("Batch is empty: at least one invoice PDF is required")]
    EmptyBatch,

    // ── Provider / engine errors ──────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install pdfium or point PDFIUM_LIB_PATH at an existing libpdfium\n\
(prebuilt binaries: https://github.com/bblanchon/pdfium-binaries).\n"
    )]
    PdfiumBindingFailed(String),

    // ── Batch outcome errors ──────────────────────────────────────────────
    /// A document failed while the failure policy was `Abort`.
    #[error("Batch aborted at '{file_name}' ({processed} processed, {failed} failed): {source}")]
    BatchAborted {
        processed: usize,
        failed: usize,
        file_name: String,
        #[source]
        source: DocumentError,
    },

    /// No document produced a usable record; nothing is written.
    ///
    /// `failures` holds every document's reason, in input order.
    #[error("All {total} documents failed:{}", list_failures(.failures))]
    AllDocumentsFailed {
        total: usize,
        failures: Vec<DocumentFailure>,
    },

    /// Some documents succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::BatchOutput::into_result`] when the
    /// caller wants to treat any document failure as an error.
    #[error("{failed}/{total} documents failed during normalization")]
    PartialFailure {
        succeeded: usize,
        failed: usize,
        total: usize,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output table (aggregation failure).
    #[error("Failed to write output table '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The table could not be serialised to CSV.
    #[error("Failed to encode result table: {0}")]
    TableEncode(String),

    /// A previously written table could not be read back.
    #[error("Failed to read result table '{path}': {detail}")]
    TableRead { path: PathBuf, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn list_failures(failures: &[DocumentFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("\n  {} [{}]: {}", f.file_name, f.kind, f.error))
        .collect()
}

/// Why a language-model or OCR service call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceErrorKind {
    /// Network blip, 5xx, rate limit. Retried with backoff.
    Transient,
    /// The call exceeded its configured timeout. Retried with backoff.
    Timeout,
    /// 401/403 or a missing/invalid key. Never retried.
    Auth,
    /// The service refused the request (400, content filter). Never retried.
    Rejected,
}

impl ServiceErrorKind {
    /// Whether another attempt can reasonably succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, ServiceErrorKind::Transient | ServiceErrorKind::Timeout)
    }
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceErrorKind::Transient => "transient",
            ServiceErrorKind::Timeout => "timeout",
            ServiceErrorKind::Auth => "authentication",
            ServiceErrorKind::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// A single failed service call, before retry bookkeeping.
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a provider error from its rendered message.
    ///
    /// Providers surface HTTP status and reason only through their
    /// `Display` output, so the classification is textual.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let kind = if lower.contains("401")
            || lower.contains("403")
            || lower.contains("unauthorized")
            || lower.contains("forbidden")
            || lower.contains("api key")
            || lower.contains("authentication")
        {
            ServiceErrorKind::Auth
        } else if lower.contains("timed out") || lower.contains("timeout") {
            ServiceErrorKind::Timeout
        } else if lower.contains("400")
            || lower.contains("bad request")
            || lower.contains("content_filter")
            || lower.contains("invalid_request")
        {
            ServiceErrorKind::Rejected
        } else {
            ServiceErrorKind::Transient
        };
        Self { kind, message }
    }
}

/// A non-fatal error for a single document.
///
/// Stored alongside [`crate::output::DocumentResult`] when a document fails.
/// The batch continues unless the failure policy is `Abort`.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum DocumentError {
    /// Neither the text layer nor OCR produced text (corrupt file, engine crash).
    #[error("acquisition failed: {detail}")]
    Acquisition { detail: String },

    /// The language-model or OCR service call failed after all attempts.
    #[error("{kind} service failure after {attempts} attempt(s): {detail}")]
    Service {
        kind: ServiceErrorKind,
        attempts: u32,
        detail: String,
    },

    /// The model answered, but not in the required structured shape.
    #[error("normalization response violated the output contract: {reason}")]
    NormalizationParse {
        reason: String,
        raw_response: String,
    },
}

impl DocumentError {
    pub(crate) fn acquisition(detail: impl Into<String>) -> Self {
        DocumentError::Acquisition {
            detail: detail.into(),
        }
    }

    pub(crate) fn parse(reason: impl Into<String>, raw_response: &str) -> Self {
        DocumentError::NormalizationParse {
            reason: reason.into(),
            raw_response: raw_response.to_string(),
        }
    }

    /// Short machine-friendly label used in reports and logs.
    pub fn kind_label(&self) -> &'static str {
        match self {
            DocumentError::Acquisition { .. } => "acquisition",
            DocumentError::Service { .. } => "service",
            DocumentError::NormalizationParse { .. } => "normalization_parse",
        }
    }
}
