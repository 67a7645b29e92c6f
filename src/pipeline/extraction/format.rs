use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ExtractionError;
use crate::pipeline::fields::SourceKind;

/// Extensions accepted for upload.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "tif", "tiff", "pdf", "csv", "json", "txt",
];

/// Result of format detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFormat {
    pub source: SourceKind,
    pub mime_type: String,
    pub extension: String,
}

/// Detect the upload format from its name and content.
///
/// The extension gates what is accepted at all. For images and PDFs the
/// magic bytes decide (a JPEG named `.png` is still a JPEG); text formats
/// must actually look like text.
pub fn detect_format(filename: &str, bytes: &[u8]) -> Result<DetectedFormat, ExtractionError> {
    let name = sanitize_filename(filename);
    let extension = Path::new(&name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        let shown = if extension.is_empty() { "(none)" } else { extension.as_str() };
        return Err(ExtractionError::UnsupportedFormat(format!(
            "extension {shown}; allowed: {}",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }

    if bytes.is_empty() {
        return Err(ExtractionError::EmptyDocument);
    }

    if let Some((source, mime)) = sniff_magic(bytes) {
        return Ok(DetectedFormat {
            source,
            mime_type: mime.to_string(),
            extension,
        });
    }

    let (source, mime) = match extension.as_str() {
        "csv" => (SourceKind::Csv, "text/csv"),
        "json" => (SourceKind::Json, "application/json"),
        "txt" => (SourceKind::Text, "text/plain"),
        other => {
            return Err(ExtractionError::UnsupportedFormat(format!(
                "content is not a valid {other} file"
            )))
        }
    };

    if !is_likely_text(bytes) {
        return Err(ExtractionError::UnsupportedFormat(format!(
            "content is not a text {extension} file"
        )));
    }

    Ok(DetectedFormat {
        source,
        mime_type: mime.to_string(),
        extension,
    })
}

/// Magic number detection for binary formats.
fn sniff_magic(bytes: &[u8]) -> Option<(SourceKind, &'static str)> {
    match bytes {
        // PDF: starts with %PDF
        [0x25, 0x50, 0x44, 0x46, ..] => Some((SourceKind::Pdf, "application/pdf")),
        // JPEG: starts with FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Some((SourceKind::Image, "image/jpeg")),
        // PNG: starts with 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => Some((SourceKind::Image, "image/png")),
        // TIFF: little-endian (49 49 2A 00) or big-endian (4D 4D 00 2A)
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => {
            Some((SourceKind::Image, "image/tiff"))
        }
        _ => None,
    }
}

/// Text if it decodes (UTF-8 or BOM-marked UTF-16) and the first chunk is
/// mostly printable.
fn is_likely_text(bytes: &[u8]) -> bool {
    if bytes.starts_with(&[0xFF, 0xFE]) || bytes.starts_with(&[0xFE, 0xFF]) {
        return true;
    }

    let chunk = &bytes[..bytes.len().min(4096)];
    let text = match std::str::from_utf8(chunk) {
        Ok(t) => t,
        // A multi-byte character cut at the chunk boundary is fine
        Err(e) if e.error_len().is_none() => match std::str::from_utf8(&chunk[..e.valid_up_to()]) {
            Ok(t) => t,
            Err(_) => return false,
        },
        Err(_) => return false,
    };

    let total = text.chars().count();
    if total == 0 {
        return false;
    }
    let printable = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .count();
    printable as f64 / total as f64 > 0.95
}

/// Sanitize a filename: strip path components, limit length.
pub fn sanitize_filename(original: &str) -> String {
    let name = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let clean: String = name
        .chars()
        .filter(|c| !c.is_control())
        .take(255)
        .collect();

    if clean.trim().is_empty() {
        "document".to_string()
    } else {
        clean
    }
}
