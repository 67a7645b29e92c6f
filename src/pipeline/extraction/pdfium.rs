//! Scanned-page rasterisation through Google PDFium.
//!
//! The library location is resolved once, when the renderer is built. The
//! upstream `Pdfium` handle is `!Send`, so each call binds its own handle
//! from that location; the OS keeps the library mapped between calls.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::ImageOutputFormat;
use pdfium_render::prelude::*;
use tracing::{debug, info, warn};

use super::types::PdfPageRenderer;
use super::ExtractionError;

/// Env var naming the PDFium shared library file.
pub const PDFIUM_PATH_ENV: &str = "PDFIUM_DYNAMIC_LIB_PATH";

/// Longest rendered edge, in pixels.
const MAX_DIMENSION_PX: u32 = 4096;

const POINTS_PER_INCH: f32 = 72.0;

#[derive(Debug, Clone, PartialEq)]
enum LibrarySource {
    File(PathBuf),
    System,
}

/// `PdfPageRenderer` backed by PDFium.
#[derive(Debug)]
pub struct PdfiumRenderer {
    library: LibrarySource,
}

impl PdfiumRenderer {
    /// Locate PDFium and check that it binds.
    ///
    /// Looks at `PDFIUM_DYNAMIC_LIB_PATH`, then next to the executable
    /// (directly or under `pdfium/lib`, `pdfium/bin`), then the system
    /// search path. Missing library is an error so the caller can decide to
    /// run text-layer only.
    pub fn new() -> Result<Self, ExtractionError> {
        let library = locate_library()?;
        info!(library = ?library, "PDFium available");
        Ok(Self { library })
    }

    fn bind(&self) -> Result<Pdfium, ExtractionError> {
        let bindings = match &self.library {
            LibrarySource::File(path) => Pdfium::bind_to_library(path),
            LibrarySource::System => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| unavailable(format!("PDFium bind failed: {e}")))?;
        Ok(Pdfium::new(bindings))
    }

    fn with_document<T>(
        &self,
        pdf_bytes: &[u8],
        f: impl FnOnce(&PdfDocument<'_>) -> Result<T, ExtractionError>,
    ) -> Result<T, ExtractionError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(document_error)?;
        f(&document)
    }
}

fn unavailable(reason: String) -> ExtractionError {
    ExtractionError::PdfRendering { page: 0, reason }
}

fn locate_library() -> Result<LibrarySource, ExtractionError> {
    if let Ok(path) = std::env::var(PDFIUM_PATH_ENV) {
        Pdfium::bind_to_library(&path)
            .map_err(|e| unavailable(format!("{PDFIUM_PATH_ENV}={path} does not load: {e}")))?;
        return Ok(LibrarySource::File(PathBuf::from(path)));
    }

    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    for dir in exe_dir.iter().flat_map(|d| candidate_dirs(d)) {
        let file = PathBuf::from(Pdfium::pdfium_platform_library_name_at_path(
            dir.to_string_lossy().as_ref(),
        ));
        if Pdfium::bind_to_library(&file).is_ok() {
            debug!(file = %file.display(), "Found PDFium next to executable");
            return Ok(LibrarySource::File(file));
        }
    }

    Pdfium::bind_to_system_library()
        .map(|_| LibrarySource::System)
        .map_err(|e| {
            unavailable(format!(
                "PDFium not found; set {PDFIUM_PATH_ENV} or install it system-wide: {e}"
            ))
        })
}

fn candidate_dirs(exe_dir: &Path) -> [PathBuf; 3] {
    [
        exe_dir.to_path_buf(),
        exe_dir.join("pdfium").join("lib"),
        exe_dir.join("pdfium").join("bin"),
    ]
}

fn document_error(e: PdfiumError) -> ExtractionError {
    let text = e.to_string().to_lowercase();
    if text.contains("password") || text.contains("encrypt") {
        ExtractionError::PdfEncrypted
    } else {
        unavailable(format!("PDF could not be opened: {e}"))
    }
}

/// Output bitmap size for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RenderSize {
    width: u32,
    height: u32,
    /// The longest edge was reduced to `MAX_DIMENSION_PX`.
    capped: bool,
}

impl RenderSize {
    fn for_page(width_pt: f32, height_pt: f32, dpi: u32) -> Self {
        let scale = dpi as f32 / POINTS_PER_INCH;
        let w = (width_pt * scale).max(1.0);
        let h = (height_pt * scale).max(1.0);
        let longest = w.max(h);
        let limit = MAX_DIMENSION_PX as f32;

        let (w, h, capped) = if longest > limit {
            let shrink = limit / longest;
            (w * shrink, h * shrink, true)
        } else {
            (w, h, false)
        };
        Self {
            width: (w as u32).clamp(1, MAX_DIMENSION_PX),
            height: (h as u32).clamp(1, MAX_DIMENSION_PX),
            capped,
        }
    }
}

impl PdfPageRenderer for PdfiumRenderer {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        self.with_document(pdf_bytes, |doc| Ok(doc.pages().len() as usize))
    }

    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_number: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError> {
        let render_error = |reason: String| ExtractionError::PdfRendering {
            page: page_number,
            reason,
        };

        self.with_document(pdf_bytes, |doc| {
            let pages = doc.pages();
            let page = u16::try_from(page_number)
                .ok()
                .and_then(|index| pages.get(index).ok())
                .ok_or_else(|| {
                    render_error(format!("no such page (document has {})", pages.len()))
                })?;

            let size = RenderSize::for_page(page.width().value, page.height().value, dpi);
            if size.capped {
                warn!(page = page_number, dpi, "Oversized page scaled down to {MAX_DIMENSION_PX}px");
            }

            let config = PdfRenderConfig::new()
                .set_target_width(size.width as i32)
                .set_maximum_height(size.height as i32);
            let bitmap = page
                .render_with_config(&config)
                .map_err(|e| render_error(e.to_string()))?;

            let mut png = Cursor::new(Vec::new());
            bitmap
                .as_image()
                .write_to(&mut png, ImageOutputFormat::Png)
                .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding: {e}")))?;

            debug!(page = page_number, width = size.width, height = size.height, "Page rendered");
            Ok(png.into_inner())
        })
    }
}

/// Renderer for tests: a fixed page count, each page a small white PNG.
pub struct MockPdfPageRenderer {
    page_count: usize,
}

impl MockPdfPageRenderer {
    pub fn new(page_count: usize) -> Self {
        Self { page_count }
    }
}

impl PdfPageRenderer for MockPdfPageRenderer {
    fn page_count(&self, _pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        Ok(self.page_count)
    }

    fn render_page(
        &self,
        _pdf_bytes: &[u8],
        page_number: usize,
        _dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError> {
        if page_number >= self.page_count {
            return Err(ExtractionError::PdfRendering {
                page: page_number,
                reason: format!("no such page (mock has {})", self.page_count),
            });
        }
        let page = image::GrayImage::from_pixel(8, 8, image::Luma([255]));
        super::preprocess::encode_png(page)
    }
}
