//! # edgequake-invoice
//!
//! Normalize batches of invoice PDFs (digital or scanned) into one table with
//! the columns `Supplier, Date, Total, VAT, FileName`.
//!
//! ## Why this crate?
//!
//! Invoices arrive from every supplier in a different layout. Some are
//! generated PDFs with a perfect text layer; others are phone scans with no
//! text at all. Pure regex extraction breaks on the first unfamiliar layout,
//! and sending raw PDFs to a language model is slow and expensive. This
//! crate combines both: it reads the text layer when there is one, OCRs the
//! page images when there is not, finds the obvious fields with patterns,
//! and hands the text plus those hints to a model that returns four fields
//! under a strict contract.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Acquire    text layer via pdfium, else 300 DPI render + OCR
//!  ├─ 2. Normalize  collapse whitespace
//!  ├─ 3. Extract    regex hints for Date / Total / VAT
//!  ├─ 4. LLM        one zero-temperature call, ≤ 6000 chars of text
//!  ├─ 5. Validate   JSON contract, YYYY-MM-DD dates, no currency symbols
//!  └─ 6. Aggregate  rows in input order → CSV or .xlsx, written atomically
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_invoice::{process_paths_to_file, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::default();
//!     let artifact = process_paths_to_file(
//!         &["acme.pdf", "scan_0042.pdf"],
//!         "outputs/invoice_normalized.csv",
//!         &config,
//!     )
//!     .await?;
//!     eprintln!(
//!         "{} ok, {} failed",
//!         artifact.stats.succeeded, artifact.stats.failed
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invoice2csv` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-invoice = { version = "0.1", default-features = false }
//! ```
//!
//! ## External tools
//!
//! * **pdfium** shared library, found via `PDFIUM_LIB_PATH`, the working
//!   directory, or the system library path.
//! * **tesseract** on `PATH` for the default OCR backend (language packs
//!   `eng` and `spa` by default). Not needed when every input has a text
//!   layer, or with the vision OCR backend.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod accounting;
pub mod batch;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod table;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use accounting::{CreditLedger, FileLedger, LedgerError};
pub use batch::{
    process_batch, process_batch_sync, process_batch_to_file, process_paths,
    process_paths_to_file,
};
pub use config::{
    AcquisitionPolicy, DateOrder, FailurePolicy, MissingFieldPolicy, NormalizerConfig,
    OcrBackend, OcrConfig, PipelineConfig, PipelineConfigBuilder,
};
pub use error::{DocumentError, InvoiceError, ServiceErrorKind};
pub use output::{
    BatchArtifact, BatchOutput, BatchStats, DocumentFailure, DocumentResult, InvoiceFields,
    InvoiceRecord, PreExtractedFields,
};
pub use pipeline::acquire::{AcquiredText, TextSource};
pub use pipeline::input::Document;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use table::{ResultTable, TableFormat};
