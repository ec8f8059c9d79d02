//! Pipeline stages for document analysis.
//!
//! Each submodule implements exactly one transformation step. Keeping stages
//! separate makes each independently testable and lets us swap
//! implementations (e.g. a different office converter) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ convert ──▶ render ──▶ encode ──▶ vision
//! (path/URL) (soffice)  (pdfium)  (data URI)  (chat API)
//! ```
//!
//! 1. [`input`]   — canonicalise the user-supplied path or URL to a local
//!    file and classify it by declared extension
//! 2. [`convert`] — office formats (PPTX/XLSX) to PDF via an external
//!    converter behind the [`convert::DocumentConverter`] trait
//! 3. [`render`]  — rasterise PDF pages; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 4. [`encode`]  — re-serialise each page image and wrap it in a base64
//!    data URI for the multimodal request body
//! 5. [`vision`]  — build the chat-completion request and decode the
//!    two-layer JSON response; the only stage with network I/O

pub mod convert;
pub mod encode;
pub mod input;
pub mod render;
pub mod vision;
