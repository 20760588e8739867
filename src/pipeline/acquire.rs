//! Text acquisition: text layer first, OCR as fallback.
//!
//! Digitally authored invoices carry a text layer that is exact and free to
//! read. Scans carry none (or only whitespace), so their pages are rendered
//! at the configured DPI and passed through the OCR engine one page at a
//! time. The result records which path produced the text.
//!
//! A document whose text layer yields any non-whitespace character never
//! reaches the OCR engine.

use crate::config::{AcquisitionPolicy, PipelineConfig};
use crate::error::DocumentError;
use crate::pipeline::input::Document;
use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::pdf::PdfBackend;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Where the acquired text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextSource {
    TextLayer,
    Ocr,
}

/// Text of one document plus how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredText {
    /// Raw text, pages joined with `\n`. May be empty.
    pub text: String,
    pub source: TextSource,
    /// True when the text layer was empty or unreadable and OCR ran.
    pub used_fallback: bool,
    /// True when an error was tolerated under [`AcquisitionPolicy::Degrade`].
    pub degraded: bool,
    /// Pages seen by the stage that produced `text`.
    pub pages: usize,
}

/// Shared handles needed by [`acquire_text`].
#[derive(Clone)]
pub struct Acquirer {
    pub backend: Arc<dyn PdfBackend>,
    pub ocr: Arc<dyn OcrEngine>,
    /// Bounds how many documents rasterise + OCR at once.
    pub ocr_permits: Arc<Semaphore>,
}

impl Acquirer {
    pub fn new(
        backend: Arc<dyn PdfBackend>,
        ocr: Arc<dyn OcrEngine>,
        ocr_concurrency: usize,
    ) -> Self {
        Self {
            backend,
            ocr,
            ocr_permits: Arc::new(Semaphore::new(ocr_concurrency.max(1))),
        }
    }
}

/// Produce the raw text for `document`.
///
/// `on_fallback` fires once, before OCR starts.
pub async fn acquire_text(
    document: &Document,
    acquirer: &Acquirer,
    config: &PipelineConfig,
    on_fallback: impl FnOnce(),
) -> Result<AcquiredText, DocumentError> {
    let strict = config.acquisition_policy == AcquisitionPolicy::Strict;

    // ── Stage 1: text layer ──────────────────────────────────────────────
    let layer_failed = match read_text_layer(document, acquirer, config).await {
        Ok(pages) => {
            let text = pages.join("\n");
            if !text.trim().is_empty() {
                debug!("{}: text layer, {} chars", document.file_name, text.len());
                return Ok(AcquiredText {
                    text,
                    source: TextSource::TextLayer,
                    used_fallback: false,
                    degraded: false,
                    pages: pages.len(),
                });
            }
            false
        }
        Err(e) if strict => return Err(e),
        Err(e) => {
            warn!("{}: text layer unreadable ({}), trying OCR", document.file_name, e);
            true
        }
    };

    // ── Stage 2: OCR fallback ────────────────────────────────────────────
    info!("{}: no text layer, falling back to {} OCR", document.file_name, acquirer.ocr.name());
    on_fallback();

    let _permit = acquirer
        .ocr_permits
        .acquire()
        .await
        .map_err(|e| DocumentError::acquisition(format!("OCR gate closed: {e}")))?;

    let images = match rasterize(document, acquirer, config).await {
        Ok(images) => images,
        Err(e) if strict => return Err(e),
        Err(e) => {
            warn!("{}: rasterisation failed ({}), continuing with empty text", document.file_name, e);
            return Ok(degraded_empty());
        }
    };

    let ocr_timeout = Duration::from_secs(config.ocr.timeout_secs);
    let mut page_texts = Vec::with_capacity(images.len());
    let mut degraded = layer_failed;

    for (idx, image) in images.iter().enumerate() {
        let page_num = idx + 1;
        let result = timeout(ocr_timeout, acquirer.ocr.recognize(page_num, image))
            .await
            .unwrap_or_else(|_| {
                Err(DocumentError::acquisition(format!(
                    "OCR of page {page_num} timed out after {}s",
                    config.ocr.timeout_secs
                )))
            });

        match result {
            Ok(text) => page_texts.push(text),
            Err(e) if strict => return Err(e),
            Err(e) => {
                warn!("{}: OCR page {} failed ({}), skipping page", document.file_name, page_num, e);
                degraded = true;
            }
        }
    }

    Ok(AcquiredText {
        text: page_texts.join("\n"),
        source: TextSource::Ocr,
        used_fallback: true,
        degraded,
        pages: images.len(),
    })
}

fn degraded_empty() -> AcquiredText {
    AcquiredText {
        text: String::new(),
        source: TextSource::Ocr,
        used_fallback: true,
        degraded: true,
        pages: 0,
    }
}

async fn read_text_layer(
    document: &Document,
    acquirer: &Acquirer,
    config: &PipelineConfig,
) -> Result<Vec<String>, DocumentError> {
    let backend = Arc::clone(&acquirer.backend);
    let path = document.path.clone();
    run_blocking(config.acquisition_timeout_secs, "text-layer read", move || {
        backend.text_layer(&path)
    })
    .await
}

async fn rasterize(
    document: &Document,
    acquirer: &Acquirer,
    config: &PipelineConfig,
) -> Result<Vec<image::DynamicImage>, DocumentError> {
    let backend = Arc::clone(&acquirer.backend);
    let path = document.path.clone();
    let (dpi, max_px) = (config.dpi, config.max_rendered_pixels);
    run_blocking(config.acquisition_timeout_secs, "rasterisation", move || {
        backend.rasterize(&path, dpi, max_px)
    })
    .await
}

/// Run pdfium work on the blocking pool with a deadline.
async fn run_blocking<T, F>(secs: u64, what: &str, f: F) -> Result<T, DocumentError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DocumentError> + Send + 'static,
{
    match timeout(Duration::from_secs(secs), tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(DocumentError::acquisition(format!("{what} task panicked: {join}"))),
        Err(_) => Err(DocumentError::acquisition(format!("{what} timed out after {secs}s"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{DynamicImage, RgbaImage};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakePdf {
        layer: Result<Vec<String>, String>,
        pages: usize,
    }

    impl PdfBackend for FakePdf {
        fn text_layer(&self, _path: &Path) -> Result<Vec<String>, DocumentError> {
            self.layer.clone().map_err(DocumentError::acquisition)
        }

        fn rasterize(&self, _: &Path, _: u32, _: u32) -> Result<Vec<DynamicImage>, DocumentError> {
            Ok((0..self.pages)
                .map(|_| DynamicImage::ImageRgba8(RgbaImage::new(4, 4)))
                .collect())
        }
    }

    /// Returns "page N"; fails on `fail_page`.
    #[derive(Default)]
    struct CountingOcr {
        calls: AtomicUsize,
        fail_page: Option<usize>,
    }

    #[async_trait]
    impl OcrEngine for CountingOcr {
        fn name(&self) -> &str {
            "counting"
        }

        async fn recognize(&self, page_num: usize, _: &DynamicImage) -> Result<String, DocumentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(page_num) == self.fail_page {
                return Err(DocumentError::acquisition("engine crashed"));
            }
            Ok(format!("page {page_num}"))
        }
    }

    fn setup(pdf: FakePdf, ocr: Arc<CountingOcr>) -> Acquirer {
        Acquirer::new(Arc::new(pdf), ocr, 1)
    }

    fn doc() -> Document {
        Document::new("/tmp/inv.pdf", "inv.pdf")
    }

    #[tokio::test]
    async fn text_layer_never_calls_ocr() {
        let ocr = Arc::new(CountingOcr::default());
        let acq = setup(
            FakePdf { layer: Ok(vec!["ACME".into(), "Total 5".into()]), pages: 2 },
            ocr.clone(),
        );
        let out = acquire_text(&doc(), &acq, &PipelineConfig::default(), || {}).await.unwrap();
        assert_eq!(out.text, "ACME\nTotal 5");
        assert_eq!(out.source, TextSource::TextLayer);
        assert!(!out.used_fallback);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn whitespace_layer_falls_back_to_ocr_in_page_order() {
        let ocr = Arc::new(CountingOcr::default());
        let acq = setup(FakePdf { layer: Ok(vec![" \n".into(), "\t".into()]), pages: 3 }, ocr.clone());
        let mut fired = false;
        let out = acquire_text(&doc(), &acq, &PipelineConfig::default(), || fired = true)
            .await
            .unwrap();
        assert!(fired);
        assert_eq!(out.text, "page 1\npage 2\npage 3");
        assert_eq!(out.source, TextSource::Ocr);
        assert!(out.used_fallback && !out.degraded);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_page_degrades_or_fails_by_policy() {
        let ocr = Arc::new(CountingOcr { fail_page: Some(2), ..Default::default() });
        let acq = setup(FakePdf { layer: Ok(vec![]), pages: 3 }, ocr);
        let out = acquire_text(&doc(), &acq, &PipelineConfig::default(), || {}).await.unwrap();
        assert_eq!(out.text, "page 1\npage 3");
        assert!(out.degraded);

        let strict = PipelineConfig::builder()
            .acquisition_policy(AcquisitionPolicy::Strict)
            .build()
            .unwrap();
        let err = acquire_text(&doc(), &acq, &strict, || {}).await.unwrap_err();
        assert!(err.to_string().contains("engine crashed"));
    }

    #[tokio::test]
    async fn unreadable_layer_is_fatal_only_when_strict() {
        let ocr = Arc::new(CountingOcr::default());
        let acq = setup(FakePdf { layer: Err("corrupt xref".into()), pages: 1 }, ocr);

        let out = acquire_text(&doc(), &acq, &PipelineConfig::default(), || {}).await.unwrap();
        assert_eq!(out.text, "page 1");
        assert!(out.degraded);

        let strict = PipelineConfig::builder()
            .acquisition_policy(AcquisitionPolicy::Strict)
            .build()
            .unwrap();
        let err = acquire_text(&doc(), &acq, &strict, || {}).await.unwrap_err();
        assert!(err.to_string().contains("corrupt xref"));
    }

    /// Never finishes recognising a page.
    struct StuckOcr;

    #[async_trait]
    impl OcrEngine for StuckOcr {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn recognize(&self, _: usize, _: &DynamicImage) -> Result<String, DocumentError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(String::new())
        }
    }

    /// Text layer read that blocks past any reasonable deadline.
    struct SlowPdf;

    impl PdfBackend for SlowPdf {
        fn text_layer(&self, _: &Path) -> Result<Vec<String>, DocumentError> {
            std::thread::sleep(std::time::Duration::from_secs(3));
            Ok(vec!["too late".into()])
        }

        fn rasterize(&self, _: &Path, _: u32, _: u32) -> Result<Vec<DynamicImage>, DocumentError> {
            Ok(vec![DynamicImage::ImageRgba8(RgbaImage::new(4, 4))])
        }
    }

    #[tokio::test]
    async fn stuck_ocr_page_times_out_under_both_policies() {
        let acq = Acquirer::new(
            Arc::new(FakePdf { layer: Ok(vec![]), pages: 2 }),
            Arc::new(StuckOcr),
            1,
        );

        let degrade = PipelineConfig::builder().ocr_timeout_secs(1).build().unwrap();
        let started = std::time::Instant::now();
        let out = acquire_text(&doc(), &acq, &degrade, || {}).await.unwrap();
        assert!(out.degraded);
        assert!(out.text.is_empty());
        assert_eq!(out.pages, 2);
        assert!(started.elapsed() < Duration::from_secs(10));

        let strict = PipelineConfig::builder()
            .ocr_timeout_secs(1)
            .acquisition_policy(AcquisitionPolicy::Strict)
            .build()
            .unwrap();
        let err = acquire_text(&doc(), &acq, &strict, || {}).await.unwrap_err();
        assert!(matches!(err, DocumentError::Acquisition { .. }));
        assert!(err.to_string().contains("OCR of page 1 timed out after 1s"));
    }

    #[tokio::test]
    async fn slow_text_layer_hits_acquisition_deadline() {
        let ocr = Arc::new(CountingOcr::default());
        let acq = Acquirer::new(Arc::new(SlowPdf), ocr.clone(), 1);

        let strict = PipelineConfig::builder()
            .acquisition_timeout_secs(1)
            .acquisition_policy(AcquisitionPolicy::Strict)
            .build()
            .unwrap();
        let err = acquire_text(&doc(), &acq, &strict, || {}).await.unwrap_err();
        assert!(err.to_string().contains("text-layer read timed out after 1s"));
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);

        // Degrade moves on to OCR once the deadline passes.
        let degrade = PipelineConfig::builder().acquisition_timeout_secs(1).build().unwrap();
        let out = acquire_text(&doc(), &acq, &degrade, || {}).await.unwrap();
        assert_eq!(out.source, TextSource::Ocr);
        assert_eq!(out.text, "page 1");
        assert!(out.degraded);
    }
}
