//! Document rasterisation and replacement-PDF composition via pdfium.
//!
//! pdfium is not async-safe, so every call binds the library inside
//! `tokio::task::spawn_blocking`. Pages are rendered with a pixel cap rather
//! than a DPI so an oversized page cannot exhaust memory.
//!
//! The composed replacement document is plain text set in Helvetica on A4
//! pages, one or more pages per extracted text segment.

use crate::error::PipelineError;
use crate::store::DocumentId;
use async_trait::async_trait;
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Longest edge of a rendered page in pixels.
const MAX_RENDERED_PIXELS: u32 = 2000;

const LINE_WIDTH_CHARS: usize = 100;
const MARGIN_LEFT: f32 = 40.0;
const TOP_BASELINE: f32 = 800.0;
const BOTTOM_MARGIN: f32 = 40.0;
const FONT_SIZE: f32 = 10.0;
const LEADING: f32 = 12.0;

/// Page images produced from a source document.
#[derive(Debug, Clone)]
pub struct Rasterized {
    /// PNG bytes, at most `page_limit` of them.
    pub pages: Vec<Vec<u8>>,
    /// Page count of the whole source document.
    pub total_pages: usize,
}

/// Turns documents into page images and text back into a document.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Render the first `page_limit` pages of `bytes` as PNG images.
    async fn rasterize(
        &self,
        id: DocumentId,
        bytes: Vec<u8>,
        page_limit: usize,
    ) -> Result<Rasterized, PipelineError>;

    /// Count the pages of `bytes` without rendering them.
    async fn page_count(&self, id: DocumentId, bytes: &[u8]) -> Result<usize, PipelineError>;

    /// Compose a text-only PDF, starting a new page for every segment.
    async fn compose(&self, segments: Vec<String>) -> Result<Vec<u8>, PipelineError>;
}

/// [`DocumentRenderer`] backed by a pdfium shared library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRenderer {
    library_path: Option<PathBuf>,
}

impl PdfiumRenderer {
    /// Bind to the system pdfium library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to the pdfium library at `path` instead of the system one.
    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }
}

fn bind(library_path: Option<&Path>) -> Result<Pdfium, PipelineError> {
    let bindings = match library_path {
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| PipelineError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn join_err(e: tokio::task::JoinError) -> PipelineError {
    PipelineError::Internal(format!("Render task panicked: {e}"))
}

#[async_trait]
impl DocumentRenderer for PdfiumRenderer {
    async fn rasterize(
        &self,
        id: DocumentId,
        bytes: Vec<u8>,
        page_limit: usize,
    ) -> Result<Rasterized, PipelineError> {
        let library = self.library_path.clone();
        tokio::task::spawn_blocking(move || {
            rasterize_blocking(library.as_deref(), id, &bytes, page_limit)
        })
        .await
        .map_err(join_err)?
    }

    async fn page_count(&self, id: DocumentId, bytes: &[u8]) -> Result<usize, PipelineError> {
        let library = self.library_path.clone();
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            let pdfium = bind(library.as_deref())?;
            let document = pdfium
                .load_pdf_from_byte_slice(&bytes, None)
                .map_err(|e| PipelineError::CorruptDocument {
                    id,
                    detail: format!("{e:?}"),
                })?;
            let count = document.pages().len() as usize;
            Ok(count)
        })
        .await
        .map_err(join_err)?
    }

    async fn compose(&self, segments: Vec<String>) -> Result<Vec<u8>, PipelineError> {
        let library = self.library_path.clone();
        tokio::task::spawn_blocking(move || compose_blocking(library.as_deref(), &segments))
            .await
            .map_err(join_err)?
    }
}

fn rasterize_blocking(
    library: Option<&Path>,
    id: DocumentId,
    bytes: &[u8],
    page_limit: usize,
) -> Result<Rasterized, PipelineError> {
    let pdfium = bind(library)?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| PipelineError::CorruptDocument {
            id,
            detail: format!("{e:?}"),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("Document {} loaded: {} pages", id, total_pages);

    let render_config = PdfRenderConfig::new()
        .set_target_width(MAX_RENDERED_PIXELS as i32)
        .set_maximum_height(MAX_RENDERED_PIXELS as i32);

    let selected = total_pages.min(page_limit);
    let mut images = Vec::with_capacity(selected);
    for idx in 0..selected {
        let page = pages
            .get(idx as u16)
            .map_err(|e| PipelineError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{e:?}"),
            })?;
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            PipelineError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{e:?}"),
            }
        })?;

        let image = bitmap.as_image();
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| PipelineError::RasterisationFailed {
                page: idx + 1,
                detail: format!("PNG encoding failed: {e}"),
            })?;
        debug!(
            "Rendered page {} → {}x{} px, {} bytes",
            idx + 1,
            image.width(),
            image.height(),
            png.len()
        );
        images.push(png);
    }

    Ok(Rasterized {
        pages: images,
        total_pages,
    })
}

fn compose_blocking(library: Option<&Path>, segments: &[String]) -> Result<Vec<u8>, PipelineError> {
    let compose_err = |e: PdfiumError| PipelineError::ComposeFailed(format!("{e:?}"));

    let pdfium = bind(library)?;
    let mut document = pdfium.create_new_pdf().map_err(compose_err)?;
    let font = document.fonts_mut().helvetica();

    for lines in layout_pages(segments) {
        let mut page = document
            .pages_mut()
            .create_page_at_end(PdfPagePaperSize::a4())
            .map_err(compose_err)?;
        for (row, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            page.objects_mut()
                .create_text_object(
                    PdfPoints::new(MARGIN_LEFT),
                    PdfPoints::new(TOP_BASELINE - row as f32 * LEADING),
                    line,
                    font,
                    PdfPoints::new(FONT_SIZE),
                )
                .map_err(compose_err)?;
        }
    }

    document.save_to_bytes().map_err(compose_err)
}

/// Lines that fit on one composed page.
fn lines_per_page() -> usize {
    ((TOP_BASELINE - BOTTOM_MARGIN) / LEADING) as usize + 1
}

/// Split text segments into wrapped lines grouped by output page.
///
/// Every segment starts on a fresh page; long segments continue onto
/// further pages. At least one (blank) page is always produced.
pub fn layout_pages(segments: &[String]) -> Vec<Vec<String>> {
    let per_page = lines_per_page();
    let mut pages = Vec::new();

    for segment in segments {
        let lines: Vec<String> = segment.lines().flat_map(wrap_line).collect();
        if lines.is_empty() {
            pages.push(Vec::new());
            continue;
        }
        for chunk in lines.chunks(per_page) {
            pages.push(chunk.to_vec());
        }
    }

    if pages.is_empty() {
        pages.push(Vec::new());
    }
    pages
}

fn wrap_line(line: &str) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(LINE_WIDTH_CHARS)
        .map(|c| c.iter().collect())
        .collect()
}
