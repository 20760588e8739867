//! OCR engines for pages without a text layer.
//!
//! One [`OcrEngine::recognize`] call per rasterised page. Two engines ship
//! with the crate:
//!
//! * [`TesseractOcr`]: the local `tesseract` CLI, fed a PNG written to a
//!   temporary directory. No network, no API cost.
//! * [`VisionOcr`]: a vision-capable language model asked to transcribe
//!   the page verbatim. Better on noisy phone scans; costs tokens.

use crate::config::{NormalizerConfig, OcrConfig};
use crate::error::DocumentError;
use crate::pipeline::encode;
use crate::pipeline::llm::{call_with_retry, CompletionClient, CompletionRequest, RetryPolicy};
use crate::prompts::VISION_TRANSCRIBE_PROMPT;
use async_trait::async_trait;
use image::DynamicImage;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

/// Recognises the text on one page image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Engine label used in logs.
    fn name(&self) -> &str;

    /// Text on page `page_num` (1-based).
    async fn recognize(&self, page_num: usize, image: &DynamicImage)
        -> Result<String, DocumentError>;
}

/// Runs `tesseract <page.png> stdout -l <language>`.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: String,
    language: String,
}

impl TesseractOcr {
    pub fn new(binary: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            language: language.into(),
        }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(&config.tesseract_path, &config.language)
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(
        &self,
        page_num: usize,
        image: &DynamicImage,
    ) -> Result<String, DocumentError> {
        let png = encode::png_bytes(image).map_err(|e| {
            DocumentError::acquisition(format!("page {page_num}: PNG encoding failed: {e}"))
        })?;

        // Dropped at the end of the call, removing the page image.
        let dir = TempDir::new()
            .map_err(|e| DocumentError::acquisition(format!("temp dir for OCR: {e}")))?;
        let img_path = dir.path().join(format!("page_{page_num}.png"));
        tokio::fs::write(&img_path, &png)
            .await
            .map_err(|e| DocumentError::acquisition(format!("write OCR image: {e}")))?;

        let output = Command::new(&self.binary)
            .arg(&img_path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                DocumentError::acquisition(format!(
                    "cannot run '{}': {e} (is tesseract installed?)",
                    self.binary
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DocumentError::acquisition(format!(
                "tesseract failed on page {page_num} ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("tesseract page {}: {} chars", page_num, text.len());
        Ok(text)
    }
}

/// Transcribes pages with a vision-capable model.
pub struct VisionOcr {
    client: Arc<dyn CompletionClient>,
    policy: RetryPolicy,
    max_tokens: usize,
}

impl VisionOcr {
    pub fn new(client: Arc<dyn CompletionClient>, normalizer: &NormalizerConfig) -> Self {
        Self {
            client,
            policy: normalizer.into(),
            max_tokens: 4096,
        }
    }
}

#[async_trait]
impl OcrEngine for VisionOcr {
    fn name(&self) -> &str {
        "vision"
    }

    async fn recognize(
        &self,
        page_num: usize,
        image: &DynamicImage,
    ) -> Result<String, DocumentError> {
        let image_data = encode::encode_page(image).map_err(|e| {
            DocumentError::acquisition(format!("page {page_num}: image encoding failed: {e}"))
        })?;

        let request = CompletionRequest {
            system: VISION_TRANSCRIBE_PROMPT.to_string(),
            user: String::new(),
            images: vec![image_data],
            temperature: 0.0,
            max_tokens: self.max_tokens,
        };

        let label = format!("OCR page {page_num}");
        let (completion, _) =
            call_with_retry(self.client.as_ref(), &request, self.policy, &label).await?;
        Ok(completion.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ServiceError, ServiceErrorKind};
    use crate::pipeline::llm::Completion;
    use image::{Rgba, RgbaImage};
    use std::sync::Mutex;

    fn page() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 255])))
    }

    #[tokio::test]
    async fn missing_tesseract_binary_is_an_acquisition_error() {
        let ocr = TesseractOcr::new("/nonexistent/tesseract-bin", "eng");
        let err = ocr.recognize(1, &page()).await.unwrap_err();
        assert_eq!(err.kind_label(), "acquisition");
        assert!(err.to_string().contains("tesseract"));
    }

    struct Echo {
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl CompletionClient for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ServiceError> {
            self.seen.lock().unwrap().push(request.clone());
            if request.images.is_empty() {
                return Err(ServiceError::new(ServiceErrorKind::Rejected, "no image"));
            }
            Ok(Completion {
                content: "ACME CORP\nTOTAL 500.00".into(),
                ..Completion::default()
            })
        }
    }

    #[tokio::test]
    async fn vision_ocr_sends_one_image_at_zero_temperature() {
        let client = Arc::new(Echo {
            seen: Mutex::new(Vec::new()),
        });
        let ocr = VisionOcr::new(client.clone(), &NormalizerConfig::default());
        let text = ocr.recognize(1, &page()).await.unwrap();
        assert!(text.contains("ACME CORP"));

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].images.len(), 1);
        assert_eq!(seen[0].temperature, 0.0);
    }
}
