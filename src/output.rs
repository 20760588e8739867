//! Records and reports produced by a batch run.

use crate::error::{DocumentError, InvoiceError};
use crate::table::ResultTable;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Hints recovered by the deterministic pattern pass.
///
/// Every key is always present; a field that did not match is `""`.
/// Serialised with the same field names the model is asked to produce.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreExtractedFields {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Total")]
    pub total: String,
    #[serde(rename = "VAT")]
    pub vat: String,
}

/// The four semantic fields returned by the normalizer, after validation.
///
/// `date` is empty or `YYYY-MM-DD`; `total` and `vat` carry no currency
/// symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceFields {
    #[serde(rename = "Supplier")]
    pub supplier: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Total")]
    pub total: String,
    #[serde(rename = "VAT")]
    pub vat: String,
}

/// One row of the result table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    #[serde(rename = "Supplier")]
    pub supplier: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Total")]
    pub total: String,
    #[serde(rename = "VAT")]
    pub vat: String,
    #[serde(rename = "FileName")]
    pub file_name: String,
}

impl InvoiceRecord {
    /// Tag normalized fields with the document's original filename.
    pub fn from_fields(fields: InvoiceFields, file_name: impl Into<String>) -> Self {
        Self {
            supplier: fields.supplier,
            date: fields.date,
            total: fields.total,
            vat: fields.vat,
            file_name: file_name.into(),
        }
    }

    /// Blank row used by [`crate::config::FailurePolicy::Placeholder`].
    pub fn placeholder(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            ..Self::default()
        }
    }
}

/// Outcome for a single document of the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResult {
    /// 0-based position in the input batch.
    pub index: usize,
    /// Original filename, as written to the `FileName` column.
    pub file_name: String,
    /// The record, when every stage succeeded.
    pub record: Option<InvoiceRecord>,
    /// The failure, when a stage failed.
    pub error: Option<DocumentError>,
    /// True when the text came from OCR rather than the text layer.
    pub used_ocr: bool,
    /// True when acquisition errors were tolerated and text may be incomplete.
    pub degraded: bool,
    /// Language-model retries consumed.
    pub retries: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
}

impl DocumentResult {
    pub fn is_success(&self) -> bool {
        self.record.is_some() && self.error.is_none()
    }
}

/// A failed document, as reported to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub index: usize,
    pub file_name: String,
    pub kind: String,
    pub error: DocumentError,
}

/// Aggregate counters for one invocation.
///
/// `succeeded` is the number of documents that yielded a usable record;
/// billing layers charge for those and refund `failed`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_documents: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Placeholder rows written (subset of `failed`).
    pub placeholders: usize,
    /// Documents whose text came from OCR.
    pub ocr_documents: usize,
    /// Documents processed with degraded acquisition.
    pub degraded_documents: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
}

/// Complete in-memory result of [`crate::batch::process_batch`].
#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// Rows in input order, according to the failure policy.
    pub table: ResultTable,
    /// Per-document outcomes in input order.
    pub documents: Vec<DocumentResult>,
    pub stats: BatchStats,
}

impl BatchOutput {
    /// Failed documents in input order.
    pub fn failures(&self) -> Vec<DocumentFailure> {
        Self::collect_failures(&self.documents)
    }

    pub(crate) fn collect_failures(documents: &[DocumentResult]) -> Vec<DocumentFailure> {
        documents
            .iter()
            .filter_map(|d| {
                d.error.as_ref().map(|e| DocumentFailure {
                    index: d.index,
                    file_name: d.file_name.clone(),
                    kind: e.kind_label().to_string(),
                    error: e.clone(),
                })
            })
            .collect()
    }

    /// Treat any document failure as an error.
    pub fn into_result(self) -> Result<Self, InvoiceError> {
        if self.stats.failed > 0 {
            return Err(InvoiceError::PartialFailure {
                succeeded: self.stats.succeeded,
                failed: self.stats.failed,
                total: self.stats.total_documents,
            });
        }
        Ok(self)
    }
}

/// Result of [`crate::batch::process_batch_to_file`]: where the table went and what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchArtifact {
    pub path: PathBuf,
    pub rows: usize,
    pub stats: BatchStats,
    pub failures: Vec<DocumentFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serialises_with_column_names() {
        let r = InvoiceRecord::from_fields(
            InvoiceFields {
                supplier: "Acme Corp".into(),
                date: "2024-05-12".into(),
                total: "500.00".into(),
                vat: "50.00".into(),
            },
            "acme.pdf",
        );
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["Supplier"], "Acme Corp");
        assert_eq!(json["FileName"], "acme.pdf");
        assert_eq!(json.as_object().unwrap().len(), 5);
    }

    #[test]
    fn pre_extracted_hints_always_have_three_keys() {
        let json = serde_json::to_value(PreExtractedFields::default()).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert_eq!(obj["Date"], "");
        assert_eq!(obj["Total"], "");
        assert_eq!(obj["VAT"], "");
    }

    #[test]
    fn placeholder_keeps_only_file_name() {
        let r = InvoiceRecord::placeholder("scan.pdf");
        assert_eq!(r.file_name, "scan.pdf");
        assert!(r.supplier.is_empty() && r.date.is_empty());
        assert!(r.total.is_empty() && r.vat.is_empty());
    }

    #[test]
    fn into_result_rejects_partial_failure() {
        let output = BatchOutput {
            table: ResultTable::default(),
            documents: vec![],
            stats: BatchStats {
                total_documents: 3,
                succeeded: 2,
                failed: 1,
                ..BatchStats::default()
            },
        };
        let err = output.into_result().unwrap_err();
        assert!(err.to_string().contains("1/3"));
    }
}
