//! # sharemap
//!
//! Extract corporate shareholding structures from documents using a vision
//! language model.
//!
//! ## Why this crate?
//!
//! Shareholding structures live in org-chart diagrams inside PDFs, slide
//! decks, and spreadsheets. Text extraction gets you boxes of names with no
//! idea which arrow connects which entity. Instead this crate rasterises
//! each page into an image and lets a vision model read the diagram as a
//! human analyst would, returning a JSON object of entities, parent/child
//! relationships, and share percentages per page.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / PPTX / XLSX / PNG / JPEG
//!  │
//!  ├─ 1. Input    resolve local file or download from URL
//!  ├─ 2. Convert  office formats → PDF via LibreOffice headless
//!  ├─ 3. Render   rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 4. Encode   PNG → base64 data URI
//!  ├─ 5. Vision   chat-completion call per page (api-key header, JSON mode)
//!  ├─ 6. Parse    envelope JSON, then the model's JSON object inside it
//!  └─ 7. Output   per-page results + entity totals + run stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sharemap::{analyze, AnalysisConfig, VisionEndpoint};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Or omit .endpoint() and set SHAREMAP_ENDPOINT / SHAREMAP_API_KEY
//!     // / SHAREMAP_DEPLOYMENT in the environment.
//!     let config = AnalysisConfig::builder()
//!         .endpoint(VisionEndpoint::new(
//!             "https://myresource.openai.azure.com",
//!             "api-key",
//!             "gpt-4o",
//!         ))
//!         .build()?;
//!
//!     let output = analyze("holding-structure.pdf", &config).await?;
//!     for (page, result) in output.results() {
//!         println!("page {page}: {}", serde_json::to_string_pretty(result)?);
//!     }
//!     eprintln!(
//!         "{} entities across {} pages",
//!         output.stats.total_entities, output.stats.processed_pages
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `sharemap` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! sharemap = { version = "0.1", default-features = false }
//! ```
//!
//! ## Errors
//!
//! Document-level problems (missing file, unparsable PDF, failed office
//! conversion) abort the run with a [`SharemapError`]. Page-level problems
//! (encoding, transport, response parsing) never do: each failed page is
//! recorded as a [`PageError`] in its [`PageAnalysis`] entry and the run
//! continues, so one unreadable page cannot discard forty good ones.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze, analyze_bytes, analyze_sync, analyze_to_file, extract_text, inspect};
pub use config::{
    AnalysisConfig, AnalysisConfigBuilder, PageSelection, VisionEndpoint, DEFAULT_API_VERSION,
};
pub use error::{PageError, SharemapError};
pub use output::{
    entity_count, AnalysisOutput, AnalysisResult, AnalysisStats, DocumentMetadata, PageAnalysis,
};
pub use pipeline::convert::{DocumentConverter, OfficeFormat, SofficeConverter};
pub use pipeline::vision::{VisionBackend, VisionError};
pub use progress::{AnalysisProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{analyze_stream, PageStream, StreamItem};
