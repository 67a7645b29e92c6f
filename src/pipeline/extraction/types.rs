use serde::{Deserialize, Serialize};

use super::ExtractionError;
use crate::pipeline::fields::SourceKind;

/// Raw report text produced from one upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReport {
    pub source: SourceKind,
    pub method: ExtractionMethod,
    pub text: String,
    pub page_count: usize,
    pub warnings: Vec<ExtractionWarning>,
}

/// How text was obtained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Embedded PDF text layer only.
    PdfText,
    /// PDF text layer plus OCR of at least one rendered page.
    PdfOcr,
    ImageOcr,
    PlainText,
}

/// Non-fatal problems met while reading a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionWarning {
    /// No text could be read at all.
    EmptyText,
    /// Page needed OCR but no PDF renderer is available.
    RendererUnavailable { page: usize },
    /// Page needed OCR but the engine could not be reached.
    OcrSkipped { page: usize, reason: String },
    /// Page OCR or rendering failed; the text layer was kept.
    PageOcrFailed { page: usize, reason: String },
    /// Engine reported low confidence for the recognised text.
    LowConfidence { page: usize, confidence: f32 },
}

/// Raw OCR result from the engine.
#[derive(Debug, Clone)]
pub struct OcrPageResult {
    pub text: String,
    pub confidence: f32,
}

/// OCR engine abstraction (allows mocking for tests).
pub trait OcrEngine {
    /// Short backend name reported by `/health`.
    fn backend(&self) -> &'static str;

    fn ocr_image(&self, image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError>;
}

/// PDF text-layer extraction abstraction.
pub trait PdfExtractor {
    /// Text of every page, in order.
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, ExtractionError>;
}

/// Renders PDF pages to images for OCR.
pub trait PdfPageRenderer {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError>;

    /// Render page `page_number` (0-based) to PNG bytes.
    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_number: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError>;
}
