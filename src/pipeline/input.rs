//! Input documents: a local PDF path plus the filename shown in the table.
//!
//! pdfium needs a file-system path, so a document is always a file on disk.
//! Validation reads the first four bytes and checks the `%PDF` magic so a
//! mislabelled upload fails with a readable error instead of a pdfium crash.

use crate::error::DocumentError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A single invoice to normalize.
///
/// `file_name` is what ends up in the `FileName` column. Upstream callers
/// that stored uploads under generated names pass the user's original name
/// here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub path: PathBuf,
    pub file_name: String,
}

impl Document {
    /// Wrap an already-validated path without touching the file system.
    pub fn new(path: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            file_name: file_name.into(),
        }
    }

    /// Build a document from a path, taking the filename from its last component.
    ///
    /// Fails with [`DocumentError::Acquisition`] when the file is missing,
    /// unreadable, or not a PDF.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        validate_pdf(path)?;
        debug!("Validated PDF: {}", path.display());
        Ok(Self::new(path, display_name(path)))
    }
}

/// Filename used for the `FileName` column when none was supplied.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn validate_pdf(path: &Path) -> Result<(), DocumentError> {
    if !path.exists() {
        return Err(DocumentError::acquisition(format!(
            "file not found: {}",
            path.display()
        )));
    }

    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(DocumentError::acquisition(format!(
                "permission denied: {}",
                path.display()
            )));
        }
        Err(e) => {
            return Err(DocumentError::acquisition(format!(
                "cannot open {}: {}",
                path.display(),
                e
            )));
        }
    };

    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
        return Err(DocumentError::acquisition(format!(
            "not a PDF (bad magic bytes): {}",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_path_uses_last_component_as_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("factura_0042.pdf");
        std::fs::write(&path, b"%PDF-1.7\n%%EOF\n").unwrap();

        let doc = Document::from_path(&path).unwrap();
        assert_eq!(doc.file_name, "factura_0042.pdf");
        assert_eq!(doc.path, path);
    }

    #[test]
    fn missing_file_is_an_acquisition_error() {
        let err = Document::from_path("/definitely/not/here.pdf").unwrap_err();
        assert_eq!(err.kind_label(), "acquisition");
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn non_pdf_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoice.pdf");
        std::fs::write(&path, b"PK\x03\x04zip").unwrap();
        let err = Document::from_path(&path).unwrap_err();
        assert!(err.to_string().contains("not a PDF"));
    }

    #[test]
    fn new_keeps_caller_supplied_name() {
        let doc = Document::new("/uploads/3f9a.pdf", "March invoice.pdf");
        assert_eq!(doc.file_name, "March invoice.pdf");
    }
}
