//! Per-document pipeline stages for invoice normalization.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and the external engines (pdfium, tesseract, the
//! language model) can be swapped behind their traits.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ acquire ──▶ normalize ──▶ extract ──▶ llm ──▶ schema
//! (path)   (pdf/ocr)   (whitespace)  (regex)    (model)  (validate)
//! ```
//!
//! 1. [`input`]    : validate the file and remember its original name
//! 2. [`acquire`]  : text layer first, OCR of 300 DPI renders as fallback;
//!    uses [`pdf`] for pdfium work and [`ocr`] for recognition
//! 3. [`normalize`]: collapse whitespace so downstream stages see one line
//! 4. [`extract`]  : deterministic Date/Total/VAT hints; never fails
//! 5. [`llm`]      : one zero-temperature model call with retry/backoff;
//!    the only stage with network I/O
//! 6. [`schema`]   : turn the raw answer into validated [`crate::output::InvoiceFields`]

pub mod acquire;
pub mod encode;
pub mod extract;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod ocr;
pub mod pdf;
pub mod schema;
