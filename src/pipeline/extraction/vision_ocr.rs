//! Vision-model OCR through a local Ollama instance.
//!
//! The page image goes to `/api/chat` as base64; the model is asked to
//! transcribe it line by line. Vision models report no confidence, so one
//! is estimated from the shape of the output.

use std::time::{Duration, Instant};

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::types::{OcrEngine, OcrPageResult};
use super::ExtractionError;
use crate::config::OcrConfig;

const TRANSCRIBE_PROMPT: &str = "\
Transcribe all visible text from this laboratory report image. \
Keep one table row or result per line, with the test name, value and unit in reading order. \
Output only the transcribed text, without commentary.";

/// OCR engine backed by an Ollama vision model.
pub struct OllamaVisionOcr {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaVisionOcr {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, ExtractionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ExtractionError::OcrUnavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn from_config(config: &OcrConfig) -> Result<Self, ExtractionError> {
        Self::new(
            &config.ollama_url,
            &config.ollama_model,
            config.ollama_timeout_secs,
        )
    }
}

/// Request body for Ollama /api/chat
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
    images: Vec<String>,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// Response body from Ollama /api/chat
#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

fn build_request<'a>(model: &'a str, image_bytes: &[u8]) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![ChatMessage {
            role: "user",
            content: TRANSCRIBE_PROMPT,
            images: vec![base64::engine::general_purpose::STANDARD.encode(image_bytes)],
        }],
        stream: false,
        options: ChatOptions { temperature: 0.0 },
    }
}

impl OcrEngine for OllamaVisionOcr {
    fn backend(&self) -> &'static str {
        "ollama"
    }

    fn ocr_image(&self, image_bytes: &[u8]) -> Result<OcrPageResult, ExtractionError> {
        let _span = tracing::info_span!(
            "vision_ocr",
            model = %self.model,
            image_size = image_bytes.len(),
        )
        .entered();
        let start = Instant::now();

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&build_request(&self.model, image_bytes))
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    ExtractionError::OcrUnavailable(format!(
                        "cannot reach Ollama at {}",
                        self.base_url
                    ))
                } else if e.is_timeout() {
                    ExtractionError::OcrProcessing(format!(
                        "vision OCR timed out after {}s",
                        self.timeout_secs
                    ))
                } else {
                    ExtractionError::OcrProcessing(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ExtractionError::OcrUnavailable(format!(
                "model '{}' is not available in Ollama",
                self.model
            )));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ExtractionError::OcrProcessing(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| ExtractionError::OcrProcessing(format!("bad Ollama response: {e}")))?;

        let text = strip_code_fence(&parsed.message.content);
        let confidence = compute_heuristic_confidence(&text);

        tracing::info!(
            elapsed_ms = %start.elapsed().as_millis(),
            text_len = text.len(),
            confidence,
            "Vision OCR complete"
        );

        Ok(OcrPageResult { text, confidence })
    }
}

/// Models sometimes wrap the transcription in a Markdown code fence.
fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = rest.split_once('\n').map_or("", |(_, body)| body);
            body.trim_end()
                .strip_suffix("```")
                .unwrap_or(body)
                .trim()
                .to_string()
        }
        None => trimmed.to_string(),
    }
}

/// Estimate confidence from output length and structure.
///
/// Length gives the base (0.2 below 50 chars, 0.4 below 200, 0.6 below 500,
/// 0.8 beyond). Lines holding a number add 0.1, table pipes add 0.05.
/// Capped at 0.95.
fn compute_heuristic_confidence(text: &str) -> f32 {
    if text.is_empty() {
        return 0.0;
    }

    let len = text.len();
    let base: f32 = if len < 50 {
        0.2
    } else if len < 200 {
        0.4
    } else if len < 500 {
        0.6
    } else {
        0.8
    };

    let has_values = text
        .lines()
        .any(|l| l.chars().any(|c| c.is_ascii_digit()) && l.chars().any(char::is_alphabetic));
    let has_tables = text.lines().any(|l| l.matches('|').count() >= 2);

    let bonus: f32 = if has_values { 0.1 } else { 0.0 } + if has_tables { 0.05 } else { 0.0 };

    (base + bonus).min(0.95)
}
