//! Progress-callback trait for per-document batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the aggregator works through the batch.
//!
//! Callers can forward events to a channel, a database record, or a terminal
//! progress bar without the library knowing how the host application
//! communicates. The trait is `Send + Sync` because documents are processed
//! concurrently.
//!
//! # Example
//!
//! ```rust
//! use edgequake_invoice::{BatchProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, index: usize, total: usize, file_name: &str) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {}", index + 1, total, file_name);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch aggregator as it processes each document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `index` is the 0-based position in the input batch.
///
/// # Thread safety
///
/// With `concurrency > 1` the per-document methods may be called
/// concurrently and out of input order. Protect shared mutable state with
/// `Mutex` or atomics.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any document is opened.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when a document enters text acquisition.
    fn on_document_start(&self, index: usize, total: usize, file_name: &str) {
        let _ = (index, total, file_name);
    }

    /// Called when OCR is used because the document had no text layer.
    fn on_ocr_fallback(&self, index: usize, file_name: &str) {
        let _ = (index, file_name);
    }

    /// Called when a document produced a record.
    fn on_document_complete(&self, index: usize, total: usize, file_name: &str) {
        let _ = (index, total, file_name);
    }

    /// Called when a document failed.
    ///
    /// `error` is a human-readable description.
    fn on_document_error(&self, index: usize, total: usize, file_name: &str, error: &str) {
        let _ = (index, total, file_name, error);
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        let _ = (total, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
