//! Result table persistence.
//!
//! The table is written once per invocation with the columns
//! `Supplier,Date,Total,VAT,FileName`, either as CSV or as an Excel
//! workbook; the output path's extension picks the format. Writes are
//! atomic: the bytes go to a sibling `*.tmp` file which is then renamed over
//! the target, so readers never observe a half-written table and a failed
//! run never replaces a complete one.

use crate::error::InvoiceError;
use crate::output::InvoiceRecord;
use rust_xlsxwriter::{Format, Workbook};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Column order of the output artifact.
pub const COLUMNS: [&str; 5] = ["Supplier", "Date", "Total", "VAT", "FileName"];

/// Worksheet holding the rows in `.xlsx` output.
pub const SHEET_NAME: &str = "Invoices";

/// On-disk encoding of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TableFormat {
    /// UTF-8 CSV with a header row. (default)
    #[default]
    Csv,
    /// Excel workbook, one worksheet, every cell stored as text.
    Xlsx,
}

impl TableFormat {
    /// `.xlsx` (any case) selects Excel; every other path is CSV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("xlsx") => TableFormat::Xlsx,
            _ => TableFormat::Csv,
        }
    }
}

/// Ordered collection of records, one row per document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultTable {
    pub records: Vec<InvoiceRecord>,
}

impl ResultTable {
    pub fn new(records: Vec<InvoiceRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialise to CSV bytes. The header row is written even for an empty table.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, InvoiceError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer
            .write_record(COLUMNS)
            .map_err(|e| InvoiceError::TableEncode(e.to_string()))?;
        for record in &self.records {
            writer
                .serialize(record)
                .map_err(|e| InvoiceError::TableEncode(e.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|e| InvoiceError::TableEncode(e.to_string()))
    }

    /// Serialise to an `.xlsx` workbook with a bold header row.
    ///
    /// Values are written as strings so totals like `1,234.56` keep their
    /// separators; empty fields are left as blank cells.
    pub fn to_xlsx_bytes(&self) -> Result<Vec<u8>, InvoiceError> {
        let encode = |e: rust_xlsxwriter::XlsxError| InvoiceError::TableEncode(e.to_string());

        let mut workbook = Workbook::new();
        let header = Format::new().set_bold();
        let sheet = workbook.add_worksheet();
        sheet.set_name(SHEET_NAME).map_err(encode)?;

        for (col, name) in COLUMNS.iter().enumerate() {
            sheet
                .write_string_with_format(0, col as u16, *name, &header)
                .map_err(encode)?;
        }
        for (i, record) in self.records.iter().enumerate() {
            let row = i as u32 + 1;
            let cells = [
                &record.supplier,
                &record.date,
                &record.total,
                &record.vat,
                &record.file_name,
            ];
            for (col, value) in cells.into_iter().enumerate() {
                if !value.is_empty() {
                    sheet
                        .write_string(row, col as u16, value.as_str())
                        .map_err(encode)?;
                }
            }
        }
        sheet.autofit();

        workbook.save_to_buffer().map_err(encode)
    }

    /// Serialise in `format`.
    pub fn encode(&self, format: TableFormat) -> Result<Vec<u8>, InvoiceError> {
        match format {
            TableFormat::Csv => self.to_csv_bytes(),
            TableFormat::Xlsx => self.to_xlsx_bytes(),
        }
    }

    /// Write the table to `path` atomically (temp file + rename), in the
    /// format implied by its extension.
    pub async fn write_atomic(&self, path: &Path) -> Result<(), InvoiceError> {
        let bytes = self.encode(TableFormat::from_path(path))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| write_failed(path, e))?;
        }

        let tmp_path = tmp_path_for(path);
        if let Err(e) = tokio::fs::write(&tmp_path, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(write_failed(path, e));
        }

        if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(write_failed(path, e));
        }

        debug!("Wrote {} rows to {}", self.records.len(), path.display());
        Ok(())
    }

    /// Read a table previously written by [`ResultTable::write_atomic`].
    pub fn read_csv(path: &Path) -> Result<Self, InvoiceError> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| InvoiceError::TableRead {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

        let headers = reader
            .headers()
            .map_err(|e| InvoiceError::TableRead {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?
            .clone();
        if headers.iter().ne(COLUMNS.iter().copied()) {
            return Err(InvoiceError::TableRead {
                path: path.to_path_buf(),
                detail: format!("unexpected header row: {:?}", headers),
            });
        }

        let records = reader
            .deserialize::<InvoiceRecord>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| InvoiceError::TableRead {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;

        Ok(Self { records })
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "invoice_normalized.csv".into());
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_failed(path: &Path, source: std::io::Error) -> InvoiceError {
    InvoiceError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    }
}
