pub mod types;
pub mod format;
pub mod sanitize;
pub mod text_only;
pub mod preprocess;
pub mod pdf;
pub mod pdfium;
pub mod ocr;
pub mod vision_ocr;
pub mod orchestrator;

pub use types::*;
pub use format::{detect_format, sanitize_filename, DetectedFormat};
pub use sanitize::*;
pub use preprocess::preprocess_for_ocr;
pub use text_only::decode_text;
pub use pdf::PdfTextExtractor;
pub use pdfium::{MockPdfPageRenderer, PdfiumRenderer};
pub use ocr::{DisabledOcr, MockOcrEngine, TesseractCli};
pub use vision_ocr::OllamaVisionOcr;
pub use orchestrator::{DocumentExtractor, DEFAULT_MIN_PAGE_TEXT_CHARS, DEFAULT_RENDER_DPI};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("The uploaded file is empty")]
    EmptyDocument,

    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("PDF is password-protected or encrypted")]
    PdfEncrypted,

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("OCR engine unavailable: {0}")]
    OcrUnavailable(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("Text encoding error: {0}")]
    EncodingError(String),
}
