//! Process-wide state built once at start-up.
//!
//! `CoreState` owns the field dictionary, both extractors, the OCR
//! backend and the loaded risk models. Everything in it is read-only after
//! construction, so it is shared as `Arc<CoreState>` without locks and
//! handed to request handlers through axum `State`.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{AppConfig, ConfigError, OcrBackend};
use crate::pipeline::extraction::{
    detect_format, DetectedFormat, DisabledOcr, DocumentExtractor, ExtractionError, OcrEngine,
    OllamaVisionOcr, PdfTextExtractor, PdfiumRenderer, RawReport, TesseractCli,
};
use crate::pipeline::fields::{
    DictionaryError, ExtractionResult, ExtractionSettings, FieldDictionary, FieldExtractor,
};
use crate::pipeline::risk::{ModelRegistry, RiskAssessor};

#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dictionary(#[from] DictionaryError),

    #[error("OCR backend setup failed: {0}")]
    Ocr(#[from] ExtractionError),
}

/// Raw text and extracted fields for one upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadExtraction {
    pub format: DetectedFormat,
    pub report: RawReport,
    pub result: ExtractionResult,
}

pub struct CoreState {
    config: AppConfig,
    fields: FieldExtractor,
    documents: DocumentExtractor,
    assessor: RiskAssessor,
    started_at: Instant,
}

impl CoreState {
    /// Build real backends from configuration.
    ///
    /// Missing optional pieces (Tesseract binary, PDFium library, model
    /// files) are logged and the service starts without them.
    pub fn from_config(config: AppConfig) -> Result<Self, CoreError> {
        config.validate()?;

        let dictionary = match &config.extraction.dictionary_path {
            Some(path) => FieldDictionary::load(path)?,
            None => FieldDictionary::builtin(),
        };
        let dictionary = Arc::new(dictionary);

        let ocr = build_ocr_engine(&config)?;
        let mut documents =
            DocumentExtractor::new(ocr, Box::new(PdfTextExtractor), dictionary.clone())
                .with_page_ocr_settings(
                    config.extraction.pdf_render_dpi,
                    config.extraction.min_page_text_chars,
                );
        match PdfiumRenderer::new() {
            Ok(renderer) => documents = documents.with_pdf_renderer(Box::new(renderer)),
            Err(e) => warn!(error = %e, "PDFium unavailable, scanned PDF pages will not be OCR'd"),
        }

        let registry = ModelRegistry::load(&config.models.dir);
        info!(
            dictionary_version = dictionary.version,
            fields = dictionary.len(),
            models = registry.len(),
            ocr_backend = documents.ocr_backend(),
            "Core state ready"
        );

        Ok(Self::with_components(config, dictionary, documents, registry))
    }

    /// Assemble state from prepared parts (tests and embedding).
    pub fn with_components(
        config: AppConfig,
        dictionary: Arc<FieldDictionary>,
        documents: DocumentExtractor,
        registry: ModelRegistry,
    ) -> Self {
        let settings = ExtractionSettings::from(&config.extraction);
        Self {
            fields: FieldExtractor::new(dictionary, settings),
            documents,
            assessor: RiskAssessor::new(Arc::new(registry)),
            config,
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn dictionary(&self) -> &FieldDictionary {
        self.fields.dictionary()
    }

    pub fn field_extractor(&self) -> &FieldExtractor {
        &self.fields
    }

    pub fn document_extractor(&self) -> &DocumentExtractor {
        &self.documents
    }

    pub fn assessor(&self) -> &RiskAssessor {
        &self.assessor
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Detect, read and extract one uploaded file. Blocking.
    pub fn extract_upload(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<UploadExtraction, ExtractionError> {
        let format = detect_format(filename, bytes)?;
        let report = self.documents.extract(bytes, &format)?;
        let result = self.fields.extract(&report.text, format.source);
        Ok(UploadExtraction {
            format,
            report,
            result,
        })
    }
}

fn build_ocr_engine(config: &AppConfig) -> Result<Arc<dyn OcrEngine + Send + Sync>, CoreError> {
    let engine: Arc<dyn OcrEngine + Send + Sync> = match config.ocr.backend {
        OcrBackend::Tesseract => {
            let engine = TesseractCli::from_config(&config.ocr);
            match engine.probe() {
                Ok(version) => info!(version = %version, "Tesseract found"),
                Err(e) => warn!(error = %e, "Tesseract not usable, image uploads will be refused"),
            }
            Arc::new(engine)
        }
        OcrBackend::Ollama => {
            info!(
                url = %config.ocr.ollama_url,
                model = %config.ocr.ollama_model,
                "Using Ollama vision OCR"
            );
            Arc::new(OllamaVisionOcr::from_config(&config.ocr)?)
        }
        OcrBackend::Disabled => {
            info!("OCR disabled by configuration");
            Arc::new(DisabledOcr)
        }
    };
    Ok(engine)
}
