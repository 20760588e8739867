//! PDF access: text-layer extraction and page rasterisation via pdfium.
//!
//! ## Why a trait?
//!
//! Text acquisition only needs two things from a PDF library: "give me the
//! embedded text of every page" and "give me every page as an image". The
//! [`PdfBackend`] trait captures exactly that, so the acquisition logic can
//! be tested with an in-memory fake and pdfium stays an implementation
//! detail.
//!
//! ## Why synchronous?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is CPU-bound. Callers run these methods inside
//! `tokio::task::spawn_blocking` (see [`crate::pipeline::acquire`]).

use crate::error::{DocumentError, InvoiceError};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Read-only access to the pages of a PDF file.
pub trait PdfBackend: Send + Sync {
    /// Embedded text of every page, in page order.
    fn text_layer(&self, path: &Path) -> Result<Vec<String>, DocumentError>;

    /// Every page rendered at `dpi`, with neither edge exceeding `max_pixels`.
    fn rasterize(
        &self,
        path: &Path,
        dpi: u32,
        max_pixels: u32,
    ) -> Result<Vec<DynamicImage>, DocumentError>;
}

/// [`PdfBackend`] backed by a dynamically loaded pdfium library.
///
/// Binding order: `PDFIUM_LIB_PATH`, then a library in the current working
/// directory, then the system library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumBackend {
    library_path: Option<PathBuf>,
}

impl PdfiumBackend {
    /// Use the default binding order.
    pub fn new() -> Self {
        Self {
            library_path: std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from),
        }
    }

    /// Bind to the pdfium library at `path` (a file or its directory).
    pub fn with_library_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }

    /// Check that a pdfium library can be loaded at all.
    ///
    /// Called once per batch so a missing library is a single fatal error
    /// rather than one acquisition failure per document.
    pub fn check(&self) -> Result<(), InvoiceError> {
        self.bind().map(|_| ()).map_err(InvoiceError::PdfiumBindingFailed)
    }

    fn bind(&self) -> Result<Pdfium, String> {
        if let Some(ref p) = self.library_path {
            let lib = if p.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(p)
            } else {
                p.clone()
            };
            return Pdfium::bind_to_library(&lib)
                .map(Pdfium::new)
                .map_err(|e| format!("{}: {:?}", lib.display(), e));
        }

        Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map(Pdfium::new)
            .map_err(|e| format!("{:?}", e))
    }

    fn open<'a>(&self, pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, DocumentError> {
        pdfium.load_pdf_from_file(path, None).map_err(|e| {
            let detail = format!("{:?}", e);
            if detail.to_lowercase().contains("password") {
                DocumentError::acquisition(format!(
                    "{} is password-protected",
                    path.display()
                ))
            } else {
                DocumentError::acquisition(format!(
                    "cannot open {}: {}",
                    path.display(),
                    detail
                ))
            }
        })
    }
}

impl PdfBackend for PdfiumBackend {
    fn text_layer(&self, path: &Path) -> Result<Vec<String>, DocumentError> {
        let pdfium = self.bind().map_err(DocumentError::acquisition)?;
        let document = self.open(&pdfium, path)?;

        let mut pages = Vec::new();
        for (idx, page) in document.pages().iter().enumerate() {
            let text = page.text().map_err(|e| {
                DocumentError::acquisition(format!(
                    "text layer of page {} unreadable: {:?}",
                    idx + 1,
                    e
                ))
            })?;
            pages.push(text.all());
        }

        debug!(
            "Text layer of {}: {} pages, {} chars",
            path.display(),
            pages.len(),
            pages.iter().map(|p| p.len()).sum::<usize>()
        );
        Ok(pages)
    }

    fn rasterize(
        &self,
        path: &Path,
        dpi: u32,
        max_pixels: u32,
    ) -> Result<Vec<DynamicImage>, DocumentError> {
        let pdfium = self.bind().map_err(DocumentError::acquisition)?;
        let document = self.open(&pdfium, path)?;

        // PDF user space is 72 points per inch.
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / 72.0)
            .set_maximum_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);

        let pages = document.pages();
        info!("Rasterising {} pages of {} at {} DPI", pages.len(), path.display(), dpi);

        let mut images = Vec::with_capacity(pages.len() as usize);
        for (idx, page) in pages.iter().enumerate() {
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                DocumentError::acquisition(format!(
                    "rasterisation of page {} failed: {:?}",
                    idx + 1,
                    e
                ))
            })?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            images.push(image);
        }

        Ok(images)
    }
}
