use std::panic::{catch_unwind, AssertUnwindSafe};

use super::types::PdfExtractor;
use super::ExtractionError;

/// PDF text extractor using the pdf-extract crate.
/// Reads the embedded text layer of digital PDFs; scanned pages come back
/// (nearly) empty and are left to OCR.
pub struct PdfTextExtractor;

impl PdfExtractor for PdfTextExtractor {
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        // pdf-extract panics on some malformed font tables
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(pdf_bytes)
        }));

        match outcome {
            Ok(Ok(pages)) => Ok(pages),
            Ok(Err(e)) => Err(map_pdf_error(&e.to_string())),
            Err(_) => Err(ExtractionError::PdfParsing(
                "PDF text layer could not be decoded".into(),
            )),
        }
    }
}

fn map_pdf_error(message: &str) -> ExtractionError {
    let lower = message.to_lowercase();
    if lower.contains("encrypt") || lower.contains("password") {
        ExtractionError::PdfEncrypted
    } else {
        ExtractionError::PdfParsing(message.to_string())
    }
}
