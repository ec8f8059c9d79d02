//! Error types for the sharemap library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`SharemapError`] — **Fatal**: the analysis run cannot proceed at all
//!   (bad input file, office conversion failed, endpoint not configured).
//!   Returned as `Err(SharemapError)` from the top-level `analyze*` functions.
//!
//! * [`PageError`] — **Non-fatal**: a single page failed (encoding glitch,
//!   transport error, model returned garbage) but the remaining pages are
//!   fine. Stored inside [`crate::output::PageAnalysis`] so callers can
//!   inspect partial success rather than losing the whole document to one
//!   bad page.
//!
//! The separation mirrors the run semantics: format conversion and initial
//! document parsing abort the run (there is no partial document to proceed
//! with), while anything that happens after pages exist is page-local.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the sharemap library.
///
/// Page-level failures use [`PageError`] and are stored in
/// [`crate::output::PageAnalysis`] rather than propagated here.
#[derive(Debug, Error)]
pub enum SharemapError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// The file extension is not one of pdf, pptx, xlsx, jpeg, jpg, png.
    #[error("unsupported file extension '.{extension}' (expected pdf, pptx, xlsx, jpeg, jpg, or png)")]
    UnsupportedExtension { extension: String },

    /// HTTP URL was syntactically valid but the download failed.
    #[error("failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file was declared a PDF but does not start with the PDF magic.
    #[error("file is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Document errors ───────────────────────────────────────────────────
    /// The byte stream does not parse as a valid document of its declared
    /// type. Fatal: the run aborts before any page is dispatched.
    #[error("document '{path}' could not be parsed: {detail}")]
    DocumentParse { path: PathBuf, detail: String },

    /// pdfium returned an error while rasterising a specific page.
    #[error("rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The external document converter failed outright.
    /// Fatal: there is no page-oriented document to proceed with.
    #[error("failed to convert {format} input to PDF: {detail}")]
    ConversionFailed { format: String, detail: String },

    /// The external document converter ran past its deadline.
    #[error("{format} conversion timed out after {secs}s")]
    ConversionTimeout { format: String, secs: u64 },

    // ── Endpoint errors ───────────────────────────────────────────────────
    /// No vision endpoint was configured and none could be read from the
    /// environment.
    #[error("vision endpoint is not configured.\n{hint}")]
    EndpointNotConfigured { hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Stored alongside [`crate::output::PageAnalysis`] when a page fails.
/// The run always continues to the next page; a page failure never aborts
/// the document.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The page image could not be encoded to a data URI.
    /// Raised before any network call is attempted for the page.
    #[error("page {page}: image encoding failed: {detail}")]
    Encoding { page: usize, detail: String },

    /// Network or HTTP failure talking to the inference endpoint,
    /// after all retries were exhausted.
    #[error("page {page}: transport failure: {detail}")]
    Transport {
        page: usize,
        /// HTTP status when the endpoint answered with a non-2xx response;
        /// `None` for connection-level failures (DNS, refused, reset).
        status: Option<u16>,
        retries: u32,
        detail: String,
    },

    /// The outer response body was not valid JSON.
    #[error("page {page}: response envelope is not valid JSON: {detail}")]
    EnvelopeParse { page: usize, detail: String },

    /// The model's generated text was not valid JSON.
    #[error("page {page}: model output is not valid JSON: {detail}")]
    ContentParse { page: usize, detail: String },

    /// The envelope parsed but the expected field path was absent.
    #[error("page {page}: expected field missing from envelope: {path}")]
    SchemaMismatch { page: usize, path: String },

    /// The API call exceeded the configured timeout, after all retries.
    #[error("page {page}: analysis call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

impl PageError {
    /// The 1-indexed page this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::Encoding { page, .. }
            | PageError::Transport { page, .. }
            | PageError::EnvelopeParse { page, .. }
            | PageError::ContentParse { page, .. }
            | PageError::SchemaMismatch { page, .. }
            | PageError::Timeout { page, .. } => *page,
        }
    }
}
