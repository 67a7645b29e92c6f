//! Text uploads (CSV, JSON, plain text): decoding only, no OCR.
//!
//! Exports from spreadsheet tools arrive as UTF-8 with or without a BOM, or
//! as BOM-marked UTF-16. Anything else that is not valid UTF-8 is rejected
//! rather than guessed at.

use super::ExtractionError;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16_LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16_BE_BOM: &[u8] = &[0xFE, 0xFF];

/// Decode a text upload and drop control characters other than line
/// breaks and tabs.
pub fn decode_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    let text = if let Some(rest) = bytes.strip_prefix(UTF16_LE_BOM) {
        decode_utf16(rest, u16::from_le_bytes)?
    } else if let Some(rest) = bytes.strip_prefix(UTF16_BE_BOM) {
        decode_utf16(rest, u16::from_be_bytes)?
    } else {
        let rest = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        String::from_utf8(rest.to_vec())
            .map_err(|e| ExtractionError::EncodingError(format!("not valid UTF-8: {e}")))?
    };

    Ok(text
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect())
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> Result<String, ExtractionError> {
    if bytes.len() % 2 != 0 {
        return Err(ExtractionError::EncodingError(
            "UTF-16 text has an odd number of bytes".into(),
        ));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| to_unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|e| ExtractionError::EncodingError(format!("not valid UTF-16: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_utf8() {
        assert_eq!(decode_text(b"glucose,95\n").unwrap(), "glucose,95\n");
    }

    #[test]
    fn utf8_bom_is_stripped() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"glucose");
        assert_eq!(decode_text(&bytes).unwrap(), "glucose");
    }

    #[test]
    fn utf16_le_with_bom() {
        let mut bytes = UTF16_LE_BOM.to_vec();
        for unit in "Hb,13".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_text(&bytes).unwrap(), "Hb,13");
    }

    #[test]
    fn utf16_be_with_bom() {
        let mut bytes = UTF16_BE_BOM.to_vec();
        for unit in "Age".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        assert_eq!(decode_text(&bytes).unwrap(), "Age");
    }

    #[test]
    fn carriage_returns_and_nulls_dropped() {
        assert_eq!(decode_text(b"a\r\nb\x00c\td").unwrap(), "a\nbc\td");
    }

    #[test]
    fn invalid_utf8_is_encoding_error() {
        let err = decode_text(&[b'a', 0xC3, 0x28]).unwrap_err();
        assert!(matches!(err, ExtractionError::EncodingError(_)));
    }

    #[test]
    fn odd_utf16_is_encoding_error() {
        let err = decode_text(&[0xFF, 0xFE, b'a']).unwrap_err();
        assert!(matches!(err, ExtractionError::EncodingError(_)));
    }
}
