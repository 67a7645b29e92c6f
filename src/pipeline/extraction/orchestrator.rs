use std::sync::Arc;

use tracing::{info, warn};

use super::format::DetectedFormat;
use super::preprocess::preprocess_for_ocr;
use super::sanitize::sanitize_extracted_text;
use super::text_only::decode_text;
use super::types::{
    ExtractionMethod, ExtractionWarning, OcrEngine, OcrPageResult, PdfExtractor,
    PdfPageRenderer, RawReport,
};
use super::ExtractionError;
use crate::pipeline::fields::normalize::normalize_text;
use crate::pipeline::fields::{FieldDictionary, SourceKind};

/// Rendering resolution for scanned PDF pages.
pub const DEFAULT_RENDER_DPI: u32 = 150;

/// Pages with less text than this are treated as scanned.
pub const DEFAULT_MIN_PAGE_TEXT_CHARS: usize = 20;

/// OCR results below this mean confidence carry a warning.
const LOW_CONFIDENCE: f32 = 0.5;

/// Turns uploaded bytes into raw report text.
/// Uses trait objects for OCR and PDF backends, enabling dependency injection.
pub struct DocumentExtractor {
    ocr_engine: Arc<dyn OcrEngine + Send + Sync>,
    pdf_extractor: Box<dyn PdfExtractor + Send + Sync>,
    pdf_renderer: Option<Box<dyn PdfPageRenderer + Send + Sync>>,
    dictionary: Arc<FieldDictionary>,
    render_dpi: u32,
    min_page_text_chars: usize,
}

impl DocumentExtractor {
    /// `dictionary` decides whether a PDF page's text layer mentions any
    /// lab test at all.
    pub fn new(
        ocr_engine: Arc<dyn OcrEngine + Send + Sync>,
        pdf_extractor: Box<dyn PdfExtractor + Send + Sync>,
        dictionary: Arc<FieldDictionary>,
    ) -> Self {
        Self {
            ocr_engine,
            pdf_extractor,
            pdf_renderer: None,
            dictionary,
            render_dpi: DEFAULT_RENDER_DPI,
            min_page_text_chars: DEFAULT_MIN_PAGE_TEXT_CHARS,
        }
    }

    /// Add a PDF page renderer for per-page OCR of scanned PDFs.
    pub fn with_pdf_renderer(mut self, renderer: Box<dyn PdfPageRenderer + Send + Sync>) -> Self {
        self.pdf_renderer = Some(renderer);
        self
    }

    pub fn with_page_ocr_settings(mut self, render_dpi: u32, min_page_text_chars: usize) -> Self {
        self.render_dpi = render_dpi;
        self.min_page_text_chars = min_page_text_chars;
        self
    }

    pub fn ocr_backend(&self) -> &'static str {
        self.ocr_engine.backend()
    }

    pub fn has_pdf_renderer(&self) -> bool {
        self.pdf_renderer.is_some()
    }

    pub fn extract(
        &self,
        bytes: &[u8],
        format: &DetectedFormat,
    ) -> Result<RawReport, ExtractionError> {
        let _span = tracing::info_span!(
            "document_extraction",
            source = format.source.as_str(),
            size = bytes.len(),
        )
        .entered();

        let report = match format.source {
            SourceKind::Image => self.extract_image(bytes)?,
            SourceKind::Pdf => self.extract_pdf(bytes)?,
            SourceKind::Csv | SourceKind::Json | SourceKind::Text => {
                // Structured text keeps every character; sanitising would eat JSON braces
                let text = decode_text(bytes)?;
                let warnings = if text.trim().is_empty() {
                    vec![ExtractionWarning::EmptyText]
                } else {
                    vec![]
                };
                RawReport {
                    source: format.source,
                    method: ExtractionMethod::PlainText,
                    text,
                    page_count: 1,
                    warnings,
                }
            }
        };

        info!(
            method = ?report.method,
            pages = report.page_count,
            chars = report.text.len(),
            warnings = report.warnings.len(),
            "Document text extracted"
        );
        Ok(report)
    }

    fn extract_image(&self, bytes: &[u8]) -> Result<RawReport, ExtractionError> {
        let processed = preprocess_for_ocr(bytes)?;
        let ocr = self.ocr_engine.ocr_image(&processed)?;
        let text = sanitize_extracted_text(&ocr.text);

        let mut warnings = Vec::new();
        if text.is_empty() {
            warnings.push(ExtractionWarning::EmptyText);
        } else if ocr.confidence < LOW_CONFIDENCE {
            warnings.push(ExtractionWarning::LowConfidence {
                page: 1,
                confidence: ocr.confidence,
            });
        }

        Ok(RawReport {
            source: SourceKind::Image,
            method: ExtractionMethod::ImageOcr,
            text,
            page_count: 1,
            warnings,
        })
    }

    fn extract_pdf(&self, bytes: &[u8]) -> Result<RawReport, ExtractionError> {
        let mut pages = match self.pdf_extractor.extract_pages(bytes) {
            Ok(pages) => pages,
            Err(ExtractionError::PdfParsing(reason)) if self.pdf_renderer.is_some() => {
                warn!(reason = %reason, "PDF text layer unreadable, OCR on every page");
                let count = self
                    .pdf_renderer
                    .as_ref()
                    .map_or(Ok(0), |r| r.page_count(bytes))?;
                vec![String::new(); count]
            }
            Err(e) => return Err(e),
        };
        if pages.is_empty() {
            return Err(ExtractionError::EmptyDocument);
        }

        let mut warnings = Vec::new();
        let mut ocr_pages = 0usize;
        let mut ocr_unavailable: Option<String> = None;

        for (index, page_text) in pages.iter_mut().enumerate() {
            let page = index + 1;
            if !self.page_needs_ocr(page_text) {
                continue;
            }
            let Some(renderer) = self.pdf_renderer.as_deref() else {
                warnings.push(ExtractionWarning::RendererUnavailable { page });
                continue;
            };
            if let Some(reason) = &ocr_unavailable {
                warnings.push(ExtractionWarning::OcrSkipped {
                    page,
                    reason: reason.clone(),
                });
                continue;
            }

            match self.ocr_pdf_page(renderer, bytes, index) {
                Ok(result) => {
                    ocr_pages += 1;
                    let text = sanitize_extracted_text(&result.text);
                    if !text.is_empty() {
                        if result.confidence < LOW_CONFIDENCE {
                            warnings.push(ExtractionWarning::LowConfidence {
                                page,
                                confidence: result.confidence,
                            });
                        }
                        // OCR text goes after the text layer, which stays
                        if !page_text.is_empty() {
                            page_text.push('\n');
                        }
                        page_text.push_str(&text);
                    }
                }
                Err(ExtractionError::OcrUnavailable(reason)) => {
                    warn!(page, reason = %reason, "OCR engine unavailable, remaining pages use text layer only");
                    warnings.push(ExtractionWarning::OcrSkipped {
                        page,
                        reason: reason.clone(),
                    });
                    ocr_unavailable = Some(reason);
                }
                Err(e) => {
                    warn!(page, error = %e, "Page OCR failed, keeping text layer");
                    warnings.push(ExtractionWarning::PageOcrFailed {
                        page,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let text = sanitize_extracted_text(&pages.join("\n"));
        if text.is_empty() {
            if let Some(reason) = ocr_unavailable {
                return Err(ExtractionError::OcrUnavailable(reason));
            }
            warnings.push(ExtractionWarning::EmptyText);
        }

        Ok(RawReport {
            source: SourceKind::Pdf,
            method: if ocr_pages > 0 {
                ExtractionMethod::PdfOcr
            } else {
                ExtractionMethod::PdfText
            },
            text,
            page_count: pages.len(),
            warnings,
        })
    }

    fn ocr_pdf_page(
        &self,
        renderer: &(dyn PdfPageRenderer + Send + Sync),
        bytes: &[u8],
        index: usize,
    ) -> Result<OcrPageResult, ExtractionError> {
        let png = renderer.render_page(bytes, index, self.render_dpi)?;
        let processed = preprocess_for_ocr(&png)?;
        self.ocr_engine.ocr_image(&processed)
    }

    /// A page is OCR'd when its text layer is nearly empty or mentions no
    /// known lab test.
    fn page_needs_ocr(&self, page_text: &str) -> bool {
        let chars = page_text.chars().filter(|c| !c.is_whitespace()).count();
        if chars < self.min_page_text_chars {
            return true;
        }
        !normalize_text(page_text)
            .iter()
            .any(|line| !self.dictionary.find_anchors(line, None).is_empty())
    }
}
