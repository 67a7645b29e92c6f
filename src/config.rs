//! Application configuration with layered resolution.
//!
//! Resolution order (highest priority first):
//! 1. Environment variables (`GEMHOS_*`)
//! 2. Project config (`$GEMHOS_CONFIG`, or `gemhos.toml` in the working directory)
//! 3. User config (`<config_dir>/gemhos/config.toml`)
//! 4. Compiled defaults
//!
//! TOML layers are merged table-by-table before deserialization, so a
//! project file only needs the keys it changes.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "gemhos";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "GEMHOS_CONFIG";

/// Project config file name looked up in the working directory.
pub const PROJECT_CONFIG_FILE: &str = "gemhos.toml";

/// Original upload limit: 16 MiB.
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "gemhos_lib=info,gemhos=info,tower_http=warn"
}

/// User-level config path: `<config_dir>/gemhos/config.toml`.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME).join("config.toml"))
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid config in {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Invalid value for {field}: {message}")]
    ValidationFailed { field: String, message: String },
}

// ═══════════════════════════════════════════════════════════
// Sections
// ═══════════════════════════════════════════════════════════

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum accepted upload body, in bytes.
    pub max_upload_bytes: usize,
    /// Wall-clock bound on one extraction or analysis request.
    pub processing_timeout_secs: u64,
    /// Allow cross-origin requests (the bundled UI does not need it).
    pub permissive_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            processing_timeout_secs: 60,
            permissive_cors: false,
        }
    }
}

/// Field extraction tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Characters scanned after a keyword for its value.
    pub proximity_window: usize,
    /// Minimum similarity for fuzzy label matches (0.0-1.0).
    pub fuzzy_cutoff: f64,
    /// Optional field dictionary file (TOML or JSON). Built-in when unset.
    pub dictionary_path: Option<PathBuf>,
    /// DPI used when rendering scanned PDF pages for OCR.
    pub pdf_render_dpi: u32,
    /// PDF pages with less embedded text than this are sent to OCR.
    pub min_page_text_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            proximity_window: 40,
            fuzzy_cutoff: 0.80,
            dictionary_path: None,
            pdf_render_dpi: 150,
            min_page_text_chars: 20,
        }
    }
}

/// Which OCR engine backs image and scanned-PDF extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrBackend {
    Tesseract,
    Ollama,
    Disabled,
}

impl OcrBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tesseract => "tesseract",
            Self::Ollama => "ollama",
            Self::Disabled => "disabled",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "tesseract" => Some(Self::Tesseract),
            "ollama" => Some(Self::Ollama),
            "disabled" | "none" | "off" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// OCR engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub backend: OcrBackend,
    pub tesseract_cmd: String,
    /// Tesseract page segmentation mode (6 = single uniform block).
    pub tesseract_psm: u8,
    pub languages: String,
    pub ollama_url: String,
    pub ollama_model: String,
    pub ollama_timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            backend: OcrBackend::Tesseract,
            tesseract_cmd: default_tesseract_cmd().into(),
            tesseract_psm: 6,
            languages: "eng".into(),
            ollama_url: "http://localhost:11434".into(),
            ollama_model: "llama3.2-vision".into(),
            ollama_timeout_secs: 120,
        }
    }
}

#[cfg(windows)]
fn default_tesseract_cmd() -> &'static str {
    r"C:\Program Files\Tesseract-OCR\tesseract.exe"
}

#[cfg(not(windows))]
fn default_tesseract_cmd() -> &'static str {
    "tesseract"
}

/// Risk model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Directory holding `<name>_model.json` / `<name>_model.onnx` files.
    pub dir: PathBuf,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub extraction: ExtractionConfig,
    pub ocr: OcrConfig,
    pub models: ModelsConfig,
}

impl AppConfig {
    /// Load configuration from the process environment and config files.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from);
        Self::load_layers(
            user_config_path().as_deref(),
            explicit.as_deref(),
            Path::new(PROJECT_CONFIG_FILE),
            |key| std::env::var(key).ok(),
        )
    }

    /// Layered load with injectable sources.
    ///
    /// `explicit` must exist when given; `user` and `project` are optional.
    pub fn load_layers(
        user: Option<&Path>,
        explicit: Option<&Path>,
        project: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();

        if let Some(path) = user {
            if path.exists() {
                merge_tables(&mut merged, read_table(path)?);
            }
        }

        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound {
                        path: path.display().to_string(),
                    });
                }
                merge_tables(&mut merged, read_table(path)?);
            }
            None if project.exists() => merge_tables(&mut merged, read_table(project)?),
            None => {}
        }

        let mut config: AppConfig =
            toml::Value::Table(merged)
                .try_into()
                .map_err(|e: toml::de::Error| ConfigError::ParseError {
                    path: "<merged>".into(),
                    message: e.to_string(),
                })?;

        config.apply_env_overrides(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a single TOML document (for testing and embedded configs).
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            path: "<string>".into(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `GEMHOS_*` environment overrides.
    pub fn apply_env_overrides(
        &mut self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = env("GEMHOS_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env("GEMHOS_PORT") {
            self.server.port = parse_env("GEMHOS_PORT", &port)?;
        }
        if let Some(bytes) = env("GEMHOS_MAX_UPLOAD_BYTES") {
            self.server.max_upload_bytes = parse_env("GEMHOS_MAX_UPLOAD_BYTES", &bytes)?;
        }
        if let Some(secs) = env("GEMHOS_TIMEOUT_SECS") {
            self.server.processing_timeout_secs = parse_env("GEMHOS_TIMEOUT_SECS", &secs)?;
        }
        if let Some(backend) = env("GEMHOS_OCR_BACKEND") {
            self.ocr.backend =
                OcrBackend::parse(&backend).ok_or_else(|| ConfigError::ValidationFailed {
                    field: "GEMHOS_OCR_BACKEND".into(),
                    message: format!("unknown backend '{backend}'"),
                })?;
        }
        if let Some(cmd) = env("GEMHOS_TESSERACT_CMD") {
            self.ocr.tesseract_cmd = cmd;
        }
        if let Some(url) = env("GEMHOS_OLLAMA_URL") {
            self.ocr.ollama_url = url;
        }
        if let Some(model) = env("GEMHOS_OLLAMA_MODEL") {
            self.ocr.ollama_model = model;
        }
        if let Some(dir) = env("GEMHOS_MODELS_DIR") {
            self.models.dir = PathBuf::from(dir);
        }
        if let Some(path) = env("GEMHOS_DICTIONARY") {
            self.extraction.dictionary_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_upload_bytes == 0 {
            return Err(invalid("server.max_upload_bytes", "must be greater than 0"));
        }
        if self.server.processing_timeout_secs == 0 {
            return Err(invalid(
                "server.processing_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.extraction.proximity_window == 0 {
            return Err(invalid("extraction.proximity_window", "must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.extraction.fuzzy_cutoff) {
            return Err(invalid(
                "extraction.fuzzy_cutoff",
                "must be between 0.0 and 1.0",
            ));
        }
        if !(36..=600).contains(&self.extraction.pdf_render_dpi) {
            return Err(invalid("extraction.pdf_render_dpi", "must be between 36 and 600"));
        }
        if self.ocr.backend == OcrBackend::Tesseract && self.ocr.tesseract_cmd.trim().is_empty() {
            return Err(invalid("ocr.tesseract_cmd", "must not be empty"));
        }
        Ok(())
    }

    /// Socket address the HTTP server binds to.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| invalid("server.host", &format!("{e}")))
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::ValidationFailed {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::ValidationFailed {
        field: key.to_string(),
        message: e.to_string(),
    })
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.display().to_string(),
    })?;
    content.parse::<toml::Table>().map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Recursive merge: tables merge key-by-key, other values are replaced.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_match_original_service() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.max_upload_bytes, 16 * 1024 * 1024);
        assert_eq!(config.ocr.tesseract_psm, 6);
        assert_eq!(config.extraction.pdf_render_dpi, 150);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = AppConfig::from_toml("[server]\nport = 8080\n").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.extraction.proximity_window, 40);
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let err = AppConfig::from_toml("[server\nport = ").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn validation_rejects_bad_cutoff() {
        let err = AppConfig::from_toml("[extraction]\nfuzzy_cutoff = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed { ref field, .. } if field == "extraction.fuzzy_cutoff"));
    }

    #[test]
    fn project_file_overrides_user_file_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.toml");
        let project = dir.path().join("gemhos.toml");
        std::fs::write(&user, "[server]\nport = 7000\nhost = \"127.0.0.1\"\n").unwrap();
        std::fs::write(&project, "[server]\nport = 9000\n").unwrap();

        let config = AppConfig::load_layers(Some(&user), None, &project, no_env).unwrap();
        assert_eq!(config.server.port, 9000);
        // Host survives from the user layer
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = AppConfig::load_layers(None, Some(&missing), Path::new("absent.toml"), no_env)
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn env_overrides_win() {
        let vars: HashMap<&str, &str> = [
            ("GEMHOS_PORT", "6001"),
            ("GEMHOS_OCR_BACKEND", "ollama"),
            ("GEMHOS_MODELS_DIR", "/srv/models"),
        ]
        .into_iter()
        .collect();

        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_layers(
            None,
            None,
            &dir.path().join("absent.toml"),
            |k| vars.get(k).map(|v| v.to_string()),
        )
        .unwrap();

        assert_eq!(config.server.port, 6001);
        assert_eq!(config.ocr.backend, OcrBackend::Ollama);
        assert_eq!(config.models.dir, PathBuf::from("/srv/models"));
    }

    #[test]
    fn bad_env_value_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_overrides(|k| (k == "GEMHOS_PORT").then(|| "not-a-port".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed { .. }));
    }

    #[test]
    fn bind_addr_parses_host_and_port() {
        let mut config = AppConfig::default();
        config.server.host = "127.0.0.1".into();
        config.server.port = 5050;
        assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:5050");
    }

    #[test]
    fn user_config_path_is_namespaced() {
        if let Some(path) = user_config_path() {
            assert!(path.ends_with("gemhos/config.toml"));
        }
    }
}
