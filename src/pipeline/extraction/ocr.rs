use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};

use tracing::debug;

use super::types::{OcrEngine, OcrPageResult};
use super::ExtractionError;
use crate::config::OcrConfig;

/// Tesseract OCR through its command-line binary.
///
/// The image is piped on stdin and TSV is read from stdout, which gives
/// per-word confidences alongside the text.
pub struct TesseractCli {
    command: String,
    psm: u8,
    languages: String,
}

impl TesseractCli {
    pub fn new(command: impl Into<String>, psm: u8, languages: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            psm,
            languages: languages.into(),
        }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(&config.tesseract_cmd, config.tesseract_psm, &config.languages)
    }

    /// Check that the binary runs. Returns its version line.
    pub fn probe(&self) -> Result<String, ExtractionError> {
        let output = Command::new(&self.command)
            .arg("--version")
            .output()
            .map_err(|e| self.spawn_error(e))?;
        // Older releases print the version on stderr
        let text = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        Ok(String::from_utf8_lossy(&text)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    fn spawn_error(&self, e: std::io::Error) -> ExtractionError {
        if e.kind() == ErrorKind::NotFound {
            ExtractionError::OcrUnavailable(format!(
                "tesseract binary '{}' not found; install Tesseract or set ocr.tesseract_cmd",
                self.command
            ))
        } else {
            ExtractionError::OcrUnavailable(format!("could not start '{}': {e}", self.command))
        }
    }
}

impl OcrEngine for TesseractCli {
    fn backend(&self) -> &'static str {
        "tesseract"
    }

    fn ocr_image(&self, image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError> {
        let mut child = Command::new(&self.command)
            .args(["stdin", "stdout", "--psm"])
            .arg(self.psm.to_string())
            .args(["-l", &self.languages, "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExtractionError::OcrProcessing("tesseract stdin unavailable".into()))?;

        // Feed stdin from a separate thread so a full stdout pipe cannot
        // deadlock the write.
        let output = std::thread::scope(|scope| {
            let writer = scope.spawn(move || stdin.write_all(image_bytes));
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));
            output.map(|o| (o, written))
        })
        .map_err(|e| ExtractionError::OcrProcessing(format!("tesseract failed: {e}")))?;

        let (output, written) = output;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::OcrProcessing(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if let Err(e) = written {
            // Tesseract may close stdin early once it has the whole image
            debug!(error = %e, "tesseract stdin write incomplete");
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let result = page_from_tsv(&tsv);
        debug!(
            chars = result.text.len(),
            confidence = result.confidence,
            "Tesseract OCR complete"
        );
        Ok(result)
    }
}

/// One recognised word from Tesseract TSV output.
#[derive(Debug, Clone, PartialEq)]
struct TsvWord {
    line_key: (u32, u32, u32, u32),
    text: String,
    confidence: f32,
}

/// Parse Tesseract TSV output into words.
/// TSV columns: level page_num block_num par_num line_num word_num left top width height conf text
/// Level 5 = individual word entries. Confidence is 0-100, scaled to 0.0-1.0.
fn parse_tsv_words(tsv: &str) -> Vec<TsvWord> {
    let mut words = Vec::new();

    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        let level: i32 = match fields[0].parse() {
            Ok(l) => l,
            Err(_) => continue,
        };
        if level != 5 {
            continue;
        }

        let conf: f32 = match fields[10].parse() {
            Ok(c) => c,
            Err(_) => continue,
        };

        let text = fields[11].trim();
        if text.is_empty() {
            continue;
        }

        let key = |i: usize| fields[i].parse::<u32>().unwrap_or(0);

        words.push(TsvWord {
            line_key: (key(1), key(2), key(3), key(4)),
            text: text.to_string(),
            // Tesseract returns -1 for words it can't assign confidence to
            confidence: if conf < 0.0 { 0.0 } else { conf / 100.0 },
        });
    }

    words
}

/// Rebuild page text (one output line per Tesseract line) and the mean
/// word confidence.
fn page_from_tsv(tsv: &str) -> OcrPageResult {
    let words = parse_tsv_words(tsv);
    if words.is_empty() {
        return OcrPageResult {
            text: String::new(),
            confidence: 0.0,
        };
    }

    let mut text = String::new();
    let mut current = None;
    for word in &words {
        if current == Some(word.line_key) {
            text.push(' ');
        } else {
            if current.is_some() {
                text.push('\n');
            }
            current = Some(word.line_key);
        }
        text.push_str(&word.text);
    }

    let confidence = words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32;
    OcrPageResult { text, confidence }
}

/// Engine used when OCR is switched off in the configuration.
pub struct DisabledOcr;

impl OcrEngine for DisabledOcr {
    fn backend(&self) -> &'static str {
        "disabled"
    }

    fn ocr_image(&self, _image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError> {
        Err(ExtractionError::OcrUnavailable(
            "OCR is disabled in the configuration".into(),
        ))
    }
}

/// Mock OCR engine for unit testing without Tesseract.
pub struct MockOcrEngine {
    pub text: String,
    pub confidence: f32,
}

impl MockOcrEngine {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            text: text.to_string(),
            confidence,
        }
    }
}

impl OcrEngine for MockOcrEngine {
    fn backend(&self) -> &'static str {
        "mock"
    }

    fn ocr_image(&self, _image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError> {
        Ok(OcrPageResult {
            text: self.text.clone(),
            confidence: self.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn mock_ocr_returns_configured_text() {
        let engine = MockOcrEngine::new("Glucose 95 mg/dL", 0.9);
        let result = engine.ocr_image(&[]).unwrap();
        assert_eq!(result.text, "Glucose 95 mg/dL");
        assert!((result.confidence - 0.9).abs() < f32::EPSILON);
        assert_eq!(engine.backend(), "mock");
    }

    #[test]
    fn disabled_engine_is_unavailable() {
        let err = DisabledOcr.ocr_image(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, ExtractionError::OcrUnavailable(_)));
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let engine = TesseractCli::new("gemhos-no-such-tesseract-binary", 6, "eng");
        let err = engine.ocr_image(&[0x89, 0x50]).unwrap_err();
        assert!(matches!(err, ExtractionError::OcrUnavailable(_)));
        assert!(matches!(
            engine.probe().unwrap_err(),
            ExtractionError::OcrUnavailable(_)
        ));
    }

    #[test]
    fn from_config_uses_configured_values() {
        let config = OcrConfig {
            tesseract_cmd: "/opt/tess/bin/tesseract".into(),
            tesseract_psm: 4,
            languages: "eng+fra".into(),
            ..OcrConfig::default()
        };
        let engine = TesseractCli::from_config(&config);
        assert_eq!(engine.command, "/opt/tess/bin/tesseract");
        assert_eq!(engine.psm, 4);
        assert_eq!(engine.languages, "eng+fra");
    }

    #[test]
    fn tsv_words_with_confidences() {
        let tsv = format!(
            "{HEADER}\n\
             1\t1\t0\t0\t0\t0\t0\t0\t600\t800\t-1\t\n\
             5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t95\tGlucose\n\
             5\t1\t1\t1\t1\t2\t100\t20\t60\t30\t88\t95\n\
             5\t1\t1\t1\t2\t1\t10\t60\t120\t30\t72.5\tHbA1c"
        );
        let words = parse_tsv_words(&tsv);
        assert_eq!(words.len(), 3);
        assert_eq!(words[0].text, "Glucose");
        assert!((words[0].confidence - 0.95).abs() < 1e-6);
        assert!((words[2].confidence - 0.725).abs() < 1e-6);
        assert_ne!(words[1].line_key, words[2].line_key);
    }

    #[test]
    fn tsv_rebuilds_lines() {
        let tsv = format!(
            "{HEADER}\n\
             4\t1\t1\t1\t1\t0\t10\t20\t200\t30\t-1\t\n\
             5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t90\tGlucose\n\
             5\t1\t1\t1\t1\t2\t100\t20\t60\t30\t90\t95\n\
             5\t1\t1\t1\t2\t1\t10\t60\t120\t30\t80\tHemoglobin\n\
             5\t1\t1\t1\t2\t2\t140\t60\t80\t30\t80\t13.5"
        );
        let page = page_from_tsv(&tsv);
        assert_eq!(page.text, "Glucose 95\nHemoglobin 13.5");
        assert!((page.confidence - 0.85).abs() < 1e-6);
    }

    #[test]
    fn tsv_negative_confidence_is_zero() {
        let tsv = format!("{HEADER}\n5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t-1\tgarbled");
        let words = parse_tsv_words(&tsv);
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].confidence, 0.0);
    }

    #[test]
    fn tsv_skips_malformed_and_empty() {
        let tsv = format!(
            "{HEADER}\n\
             too\tfew\tfields\n\
             5\t1\t1\t1\t1\t1\t10\t20\t80\t30\t90\t\n\
             5\t1\t1\t1\t1\t2\t10\t20\t80\t30\t92\tOK\n\
             notanumber\t1\t1\t1\t1\t1\t10\t20\t80\t30\t50\tbad"
        );
        let words = parse_tsv_words(&tsv);
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].text, "OK");
    }

    #[test]
    fn empty_tsv_gives_empty_page() {
        let page = page_from_tsv("");
        assert!(page.text.is_empty());
        assert_eq!(page.confidence, 0.0);
        assert!(page_from_tsv(HEADER).text.is_empty());
    }
}
