//! PDF rasterisation and text extraction via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async
//! contexts. `tokio::task::spawn_blocking` moves the work onto the blocking
//! thread pool so Tokio worker threads never stall during CPU-heavy
//! rendering.
//!
//! ## Why cap pixels?
//!
//! Page sizes vary wildly; an uncapped render of a poster-sized page could
//! allocate hundreds of megabytes and exceed the endpoint's upload limits.
//! `max_pixels` caps the longest edge, scaling the other proportionally.

use crate::error::SharemapError;
use crate::output::DocumentMetadata;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

/// Rasterise selected pages of a PDF into images.
///
/// # Returns
/// A vector of `(page_index_0based, DynamicImage)` tuples, in index order.
pub async fn render_pages(
    pdf_path: &Path,
    max_pixels: u32,
    page_indices: &[usize],
) -> Result<Vec<(usize, DynamicImage)>, SharemapError> {
    let path = pdf_path.to_path_buf();
    let indices = page_indices.to_vec();

    tokio::task::spawn_blocking(move || render_pages_blocking(&path, max_pixels, &indices))
        .await
        .map_err(|e| SharemapError::Internal(format!("render task panicked: {}", e)))?
}

fn render_pages_blocking(
    pdf_path: &Path,
    max_pixels: u32,
    page_indices: &[usize],
) -> Result<Vec<(usize, DynamicImage)>, SharemapError> {
    let pdfium = Pdfium::default();

    let document =
        pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| SharemapError::DocumentParse {
                path: pdf_path.to_path_buf(),
                detail: format!("{:?}", e),
            })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(page_indices.len());

    for &idx in page_indices {
        if idx >= total_pages {
            warn!("skipping page {} (out of range, total={})", idx + 1, total_pages);
            continue;
        }

        let page = pages
            .get(idx as u16)
            .map_err(|e| SharemapError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            SharemapError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );

        results.push((idx, image));
    }

    Ok(results)
}

/// Extract document metadata (page count, title, author) without rendering.
pub async fn extract_metadata(pdf_path: &Path) -> Result<DocumentMetadata, SharemapError> {
    let path = pdf_path.to_path_buf();

    tokio::task::spawn_blocking(move || extract_metadata_blocking(&path))
        .await
        .map_err(|e| SharemapError::Internal(format!("metadata task panicked: {}", e)))?
}

fn extract_metadata_blocking(pdf_path: &Path) -> Result<DocumentMetadata, SharemapError> {
    let pdfium = Pdfium::default();

    let document =
        pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| SharemapError::DocumentParse {
                path: pdf_path.to_path_buf(),
                detail: format!("{:?}", e),
            })?;

    let metadata = document.metadata();
    let page_count = document.pages().len() as usize;

    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    Ok(DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        page_count,
    })
}

/// Extract and concatenate the embedded text of all pages.
///
/// An auxiliary path: the analysis pipeline never needs it, but callers
/// sometimes want the native text layer alongside the visual analysis.
/// Pages whose text layer cannot be read are skipped with a warning rather
/// than failing the whole document.
pub async fn extract_text(pdf_path: &Path) -> Result<String, SharemapError> {
    let path = pdf_path.to_path_buf();

    tokio::task::spawn_blocking(move || extract_text_blocking(&path))
        .await
        .map_err(|e| SharemapError::Internal(format!("text task panicked: {}", e)))?
}

fn extract_text_blocking(pdf_path: &Path) -> Result<String, SharemapError> {
    let pdfium = Pdfium::default();

    let document =
        pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| SharemapError::DocumentParse {
                path: pdf_path.to_path_buf(),
                detail: format!("{:?}", e),
            })?;

    let mut text = String::new();
    for (index, page) in document.pages().iter().enumerate() {
        match page.text() {
            Ok(t) => text.push_str(&t.all()),
            Err(e) => warn!("no text layer on page {}: {:?}", index + 1, e),
        }
        text.push('\n');
    }

    Ok(text)
}
