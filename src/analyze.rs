//! End-to-end document analysis.
//!
//! This module wires the pipeline together: resolve the input, convert
//! office formats to PDF, rasterise pages, encode them, and drive the
//! vision backend over every selected page. Page failures are collected,
//! never propagated; only document-level problems (missing file, unparsable
//! PDF, failed conversion) abort the run.

use crate::config::{AnalysisConfig, VisionEndpoint};
use crate::error::{PageError, SharemapError};
use crate::output::{AnalysisOutput, AnalysisStats, DocumentMetadata, PageAnalysis};
use crate::pipeline::convert::{DocumentConverter, SofficeConverter};
use crate::pipeline::encode::{self, EncodedImage};
use crate::pipeline::input::{resolve_input, InputKind, ResolvedInput};
use crate::pipeline::render;
use crate::pipeline::vision::{analyze_page, HttpVisionClient, VisionBackend};
use crate::prompts::DEFAULT_USER_PROMPT;
use futures::stream::{self, StreamExt};
use image::ImageFormat;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Analyse a document from a file path or HTTP(S) URL.
///
/// Accepts `.pdf`, `.pptx`, `.xlsx`, `.png`, `.jpg`, and `.jpeg` inputs.
/// Office formats are converted to PDF first; PDFs are rasterised page by
/// page; images are sent as a single page.
///
/// # Example
/// ```rust,no_run
/// use sharemap::{analyze, AnalysisConfig, VisionEndpoint};
///
/// # async fn run() -> Result<(), sharemap::SharemapError> {
/// let config = AnalysisConfig::builder()
///     .endpoint(VisionEndpoint::new(
///         "https://myresource.openai.azure.com",
///         "key",
///         "gpt-4o",
///     ))
///     .build()?;
/// let output = analyze("structure.pdf", &config).await?;
/// for (page, result) in output.results() {
///     println!("page {page}: {} entities", sharemap::entity_count(result));
/// }
/// # Ok(())
/// # }
/// ```
pub async fn analyze(input: &str, config: &AnalysisConfig) -> Result<AnalysisOutput, SharemapError> {
    let (resolved, kind) = resolve_input(input, config.download_timeout_secs).await?;
    analyze_resolved(&resolved, kind, config).await
}

/// Analyse a document supplied as raw bytes.
///
/// `filename` supplies the extension used to route the bytes (same rules as
/// [`analyze`]); it does not need to exist on disk. Useful when the
/// document arrives over the network or from an upload rather than a file.
pub async fn analyze_bytes(
    bytes: &[u8],
    filename: &str,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, SharemapError> {
    let kind = InputKind::from_path(Path::new(filename))?;

    // Staging through a temp file keeps a single pipeline for both entry
    // points; pdfium and soffice want paths anyway.
    let temp_dir = tempfile::tempdir().map_err(|e| {
        SharemapError::Internal(format!("failed to create staging directory: {e}"))
    })?;
    let staged = temp_dir.path().join(
        Path::new(filename)
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("input")),
    );
    tokio::fs::write(&staged, bytes).await.map_err(|e| {
        SharemapError::Internal(format!("failed to stage input bytes: {e}"))
    })?;

    let resolved = ResolvedInput::Downloaded {
        path: staged,
        _temp_dir: temp_dir,
    };
    analyze_resolved(&resolved, kind, config).await
}

/// Analyse a document and write the full output as pretty-printed JSON.
///
/// Returns the output as well, so callers can inspect stats without
/// re-reading the file.
pub async fn analyze_to_file(
    input: &str,
    output_path: &Path,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, SharemapError> {
    let output = analyze(input, config).await?;
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| SharemapError::Internal(format!("failed to serialise output: {e}")))?;
    tokio::fs::write(output_path, json)
        .await
        .map_err(|e| SharemapError::OutputWriteFailed {
            path: output_path.to_path_buf(),
            source: e,
        })?;
    info!("output written to {}", output_path.display());
    Ok(output)
}

/// Blocking wrapper around [`analyze`] for callers without a runtime.
pub fn analyze_sync(input: &str, config: &AnalysisConfig) -> Result<AnalysisOutput, SharemapError> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| SharemapError::Internal(format!("failed to create runtime: {e}")))?;
    runtime.block_on(analyze(input, config))
}

/// Extract document metadata (title, author, page count) without invoking
/// the vision endpoint. Office inputs are converted first so the page count
/// reflects the rendered PDF.
pub async fn inspect(input: &str, config: &AnalysisConfig) -> Result<DocumentMetadata, SharemapError> {
    let (resolved, kind) = resolve_input(input, config.download_timeout_secs).await?;
    match kind {
        InputKind::Image(_) => Ok(DocumentMetadata {
            title: None,
            author: None,
            page_count: 1,
        }),
        InputKind::Pdf => render::extract_metadata(resolved.path()).await,
        InputKind::Office(format) => {
            let (pdf_path, _guard) = convert_to_pdf(resolved.path(), format, config).await?;
            render::extract_metadata(&pdf_path).await
        }
    }
}

/// Extract the embedded text layer of a PDF (or office) input.
///
/// Image inputs have no text layer and yield an empty string. Scanned PDFs
/// usually do too; this reads what the document carries, it does not OCR.
pub async fn extract_text(input: &str, config: &AnalysisConfig) -> Result<String, SharemapError> {
    let (resolved, kind) = resolve_input(input, config.download_timeout_secs).await?;
    match kind {
        InputKind::Image(_) => Ok(String::new()),
        InputKind::Pdf => render::extract_text(resolved.path()).await,
        InputKind::Office(format) => {
            let (pdf_path, _guard) = convert_to_pdf(resolved.path(), format, config).await?;
            render::extract_text(&pdf_path).await
        }
    }
}

// ── Internals ────────────────────────────────────────────────────────────

async fn analyze_resolved(
    resolved: &ResolvedInput,
    kind: InputKind,
    config: &AnalysisConfig,
) -> Result<AnalysisOutput, SharemapError> {
    let run_start = Instant::now();
    let backend = resolve_backend(config)?;
    let prompt = config
        .user_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_USER_PROMPT.to_string());

    let render_start = Instant::now();
    let (metadata, pages) = prepare_pages(resolved, kind, config).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;

    let total_pages = metadata.page_count;
    info!(
        "analysing {} of {} pages",
        pages.len(),
        total_pages
    );

    if let Some(cb) = &config.progress_callback {
        cb.on_run_start(total_pages, pages.len());
    }

    let analysis_start = Instant::now();
    let results = run_pages(&backend, pages, &prompt, total_pages, config).await;
    let analysis_duration_ms = analysis_start.elapsed().as_millis() as u64;

    let stats = compute_stats(
        &results,
        total_pages,
        run_start.elapsed().as_millis() as u64,
        render_duration_ms,
        analysis_duration_ms,
    );

    if let Some(cb) = &config.progress_callback {
        cb.on_run_complete(total_pages, stats.processed_pages);
    }

    info!(
        "run complete: {}/{} pages succeeded, {} entities",
        stats.processed_pages, stats.total_pages, stats.total_entities
    );

    Ok(AnalysisOutput {
        pages: results,
        stats,
        metadata,
    })
}

/// Turn the resolved input into per-page encoded images.
///
/// Encoding failures do not stop the run: they become `Err` entries that
/// [`run_pages`] records as failed pages without touching the network.
pub(crate) async fn prepare_pages(
    resolved: &ResolvedInput,
    kind: InputKind,
    config: &AnalysisConfig,
) -> Result<(DocumentMetadata, Vec<(usize, Result<EncodedImage, PageError>)>), SharemapError> {
    match kind {
        InputKind::Image(_) => {
            let bytes = tokio::fs::read(resolved.path()).await.map_err(|e| {
                SharemapError::Internal(format!("failed to read image input: {e}"))
            })?;
            let metadata = DocumentMetadata {
                title: None,
                author: None,
                page_count: 1,
            };
            let pages = if config.pages.to_indices(1).is_empty() {
                Vec::new()
            } else {
                // Image bytes go up as-is after a decode check; no
                // rasterisation pass.
                let encoded = encode::load_and_encode(&bytes).map_err(|e| PageError::Encoding {
                    page: 1,
                    detail: e.to_string(),
                });
                vec![(1, encoded)]
            };
            Ok((metadata, pages))
        }
        InputKind::Pdf => prepare_pdf_pages(resolved.path(), config).await,
        InputKind::Office(format) => {
            let (pdf_path, _guard) = convert_to_pdf(resolved.path(), format, config).await?;
            prepare_pdf_pages(&pdf_path, config).await
        }
    }
}

async fn prepare_pdf_pages(
    pdf_path: &Path,
    config: &AnalysisConfig,
) -> Result<(DocumentMetadata, Vec<(usize, Result<EncodedImage, PageError>)>), SharemapError> {
    let metadata = render::extract_metadata(pdf_path).await?;
    let indices = config.pages.to_indices(metadata.page_count);
    if indices.is_empty() {
        debug!("page selection matches no pages");
        return Ok((metadata, Vec::new()));
    }

    let rendered = render::render_pages(pdf_path, config.max_rendered_pixels, &indices).await?;

    let pages = rendered
        .into_iter()
        .map(|(index, img)| {
            let page_num = index + 1;
            let encoded =
                encode::encode_image(&img, ImageFormat::Png).map_err(|e| PageError::Encoding {
                    page: page_num,
                    detail: e.to_string(),
                });
            (page_num, encoded)
        })
        .collect();

    Ok((metadata, pages))
}

async fn convert_to_pdf(
    input_path: &Path,
    format: crate::pipeline::convert::OfficeFormat,
    config: &AnalysisConfig,
) -> Result<(PathBuf, tempfile::TempDir), SharemapError> {
    let converter = resolve_converter(config);
    let bytes = tokio::fs::read(input_path).await.map_err(|e| {
        SharemapError::Internal(format!("failed to read office input: {e}"))
    })?;

    info!("converting {} input to PDF", format);
    let pdf_bytes = converter.convert(&bytes, format).await?;

    let temp_dir = tempfile::tempdir().map_err(|e| {
        SharemapError::Internal(format!("failed to create conversion directory: {e}"))
    })?;
    let pdf_path = temp_dir.path().join("converted.pdf");
    tokio::fs::write(&pdf_path, &pdf_bytes).await.map_err(|e| {
        SharemapError::Internal(format!("failed to write converted PDF: {e}"))
    })?;

    Ok((pdf_path, temp_dir))
}

/// Drive the backend over every prepared page.
///
/// With `concurrency == 1` pages run strictly sequentially in page order;
/// above 1 they run through a bounded pool. Either way the returned list is
/// ordered by page number and has one entry per prepared page.
async fn run_pages(
    backend: &Arc<dyn VisionBackend>,
    pages: Vec<(usize, Result<EncodedImage, PageError>)>,
    prompt: &str,
    total_pages: usize,
    config: &AnalysisConfig,
) -> Vec<PageAnalysis> {
    let mut results: Vec<PageAnalysis> = if config.concurrency <= 1 {
        let mut out = Vec::with_capacity(pages.len());
        for (page_num, prepared) in pages {
            out.push(run_one_page(backend, page_num, prepared, prompt, total_pages, config).await);
        }
        out
    } else {
        stream::iter(pages)
            .map(|(page_num, prepared)| {
                run_one_page(backend, page_num, prepared, prompt, total_pages, config)
            })
            .buffer_unordered(config.concurrency)
            .collect()
            .await
    };

    results.sort_by_key(|p| p.page_num);
    results
}

pub(crate) async fn run_one_page(
    backend: &Arc<dyn VisionBackend>,
    page_num: usize,
    prepared: Result<EncodedImage, PageError>,
    prompt: &str,
    total_pages: usize,
    config: &AnalysisConfig,
) -> PageAnalysis {
    if let Some(cb) = &config.progress_callback {
        cb.on_page_start(page_num, total_pages);
    }

    let analysis = match prepared {
        Ok(image) => analyze_page(backend, page_num, &image, prompt, config).await,
        Err(e) => {
            // Encoding already failed; the endpoint is never contacted.
            warn!("page {}: skipped, {}", page_num, e);
            PageAnalysis::failed(page_num, e)
        }
    };

    if let Some(cb) = &config.progress_callback {
        match &analysis.error {
            None => cb.on_page_complete(page_num, total_pages, analysis.entity_count),
            Some(e) => cb.on_page_error(page_num, total_pages, &e.to_string()),
        }
    }

    analysis
}

fn compute_stats(
    pages: &[PageAnalysis],
    total_pages: usize,
    total_duration_ms: u64,
    render_duration_ms: u64,
    analysis_duration_ms: u64,
) -> AnalysisStats {
    AnalysisStats {
        total_pages,
        processed_pages: pages.iter().filter(|p| p.is_success()).count(),
        failed_pages: pages.iter().filter(|p| !p.is_success()).count(),
        total_entities: pages.iter().map(|p| p.entity_count).sum(),
        total_duration_ms,
        render_duration_ms,
        analysis_duration_ms,
    }
}

pub(crate) fn resolve_backend(
    config: &AnalysisConfig,
) -> Result<Arc<dyn VisionBackend>, SharemapError> {
    if let Some(backend) = &config.backend {
        return Ok(Arc::clone(backend));
    }
    let endpoint = match &config.endpoint {
        Some(ep) => ep.clone(),
        None => VisionEndpoint::from_env()?,
    };
    Ok(Arc::new(HttpVisionClient::new(endpoint, config)?))
}

fn resolve_converter(config: &AnalysisConfig) -> Arc<dyn DocumentConverter> {
    match &config.converter {
        Some(c) => Arc::clone(c),
        None => Arc::new(SofficeConverter::new(
            config.soffice_path.clone(),
            config.convert_timeout_secs,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::AnalysisResult;
    use crate::pipeline::vision::VisionError;
    use crate::progress::AnalysisProgressCallback;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Deterministic backend: records every prompt it sees and returns
    /// canned responses per call, in order.
    struct StubBackend {
        calls: Mutex<Vec<String>>,
        responses: Mutex<Vec<Result<AnalysisResult, VisionError>>>,
    }

    impl StubBackend {
        fn with_responses(responses: Vec<Result<AnalysisResult, VisionError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                responses: Mutex::new(responses),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl VisionBackend for StubBackend {
        async fn analyze(
            &self,
            _image: &EncodedImage,
            prompt: &str,
        ) -> Result<AnalysisResult, VisionError> {
            self.calls.lock().unwrap().push(prompt.to_string());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(result_with_entities(0));
            }
            responses.remove(0)
        }
    }

    fn result_with_entities(n: usize) -> AnalysisResult {
        let entities: Vec<_> = (0..n)
            .map(|i| json!({"Entity_ID": format!("E{i}"), "Entity_Name": format!("Company {i}")}))
            .collect();
        match json!({"entities": entities, "relationships": []}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn encoded() -> EncodedImage {
        EncodedImage {
            data_uri: "data:image/png;base64,AAAA".to_string(),
            mime_type: "image/png",
        }
    }

    fn fast_config() -> AnalysisConfig {
        AnalysisConfig::builder()
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn pages_run_in_order_and_totals_accumulate() {
        let stub = StubBackend::with_responses(vec![
            Ok(result_with_entities(2)),
            Ok(result_with_entities(3)),
            Ok(result_with_entities(0)),
        ]);
        let backend: Arc<dyn VisionBackend> = stub.clone();
        let config = fast_config();

        let pages = vec![(1, Ok(encoded())), (2, Ok(encoded())), (3, Ok(encoded()))];
        let results = run_pages(&backend, pages, "prompt", 3, &config).await;

        assert_eq!(stub.call_count(), 3);
        let nums: Vec<usize> = results.iter().map(|p| p.page_num).collect();
        assert_eq!(nums, vec![1, 2, 3]);
        // Responses are consumed in call order, so the per-page counts prove
        // pages were dispatched 1, 2, 3.
        let counts: Vec<usize> = results.iter().map(|p| p.entity_count).collect();
        assert_eq!(counts, vec![2, 3, 0]);

        let stats = compute_stats(&results, 3, 0, 0, 0);
        assert_eq!(stats.processed_pages, 3);
        assert_eq!(stats.failed_pages, 0);
        assert_eq!(stats.total_entities, 5);
    }

    #[tokio::test]
    async fn failed_page_does_not_stop_the_run() {
        let stub = StubBackend::with_responses(vec![
            Ok(result_with_entities(1)),
            Err(VisionError::ContentParse("truncated".into())),
            Ok(result_with_entities(4)),
        ]);
        let backend: Arc<dyn VisionBackend> = stub.clone();
        let config = fast_config();

        let pages = vec![(1, Ok(encoded())), (2, Ok(encoded())), (3, Ok(encoded()))];
        let results = run_pages(&backend, pages, "prompt", 3, &config).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert!(!results[1].is_success());
        assert!(matches!(
            results[1].error,
            Some(PageError::ContentParse { page: 2, .. })
        ));
        assert!(results[2].is_success());

        let stats = compute_stats(&results, 3, 0, 0, 0);
        assert_eq!(stats.processed_pages, 2);
        assert_eq!(stats.failed_pages, 1);
        assert_eq!(stats.total_entities, 5);
    }

    #[tokio::test]
    async fn encoding_failure_never_reaches_the_backend() {
        let stub = StubBackend::with_responses(vec![Ok(result_with_entities(1))]);
        let backend: Arc<dyn VisionBackend> = stub.clone();
        let config = fast_config();

        let pages = vec![
            (
                1,
                Err(PageError::Encoding {
                    page: 1,
                    detail: "image carries no recognisable format tag".into(),
                }),
            ),
            (2, Ok(encoded())),
        ];
        let results = run_pages(&backend, pages, "prompt", 2, &config).await;

        // Only page 2 hit the backend.
        assert_eq!(stub.call_count(), 1);
        assert!(matches!(
            results[0].error,
            Some(PageError::Encoding { page: 1, .. })
        ));
        assert!(results[1].is_success());
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let stub = StubBackend::with_responses(vec![
            Err(VisionError::Transport {
                status: Some(503),
                detail: "unavailable".into(),
            }),
            Err(VisionError::Transport {
                status: None,
                detail: "connection reset".into(),
            }),
            Ok(result_with_entities(2)),
        ]);
        let backend: Arc<dyn VisionBackend> = stub.clone();
        let config = fast_config();

        let pages = vec![(1, Ok(encoded()))];
        let results = run_pages(&backend, pages, "prompt", 1, &config).await;

        assert_eq!(stub.call_count(), 3);
        assert!(results[0].is_success());
        assert_eq!(results[0].retries, 2);
        assert_eq!(results[0].entity_count, 2);
    }

    #[tokio::test]
    async fn non_retryable_failure_is_not_retried() {
        let stub = StubBackend::with_responses(vec![Err(VisionError::Transport {
            status: Some(401),
            detail: "bad key".into(),
        })]);
        let backend: Arc<dyn VisionBackend> = stub.clone();
        let config = fast_config();

        let pages = vec![(1, Ok(encoded()))];
        let results = run_pages(&backend, pages, "prompt", 1, &config).await;

        assert_eq!(stub.call_count(), 1);
        assert!(matches!(
            results[0].error,
            Some(PageError::Transport {
                status: Some(401),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn zero_pages_is_an_empty_success() {
        let stub = StubBackend::with_responses(vec![]);
        let backend: Arc<dyn VisionBackend> = stub.clone();
        let config = fast_config();

        let results = run_pages(&backend, Vec::new(), "prompt", 0, &config).await;
        assert!(results.is_empty());
        assert_eq!(stub.call_count(), 0);

        let stats = compute_stats(&results, 0, 0, 0, 0);
        assert_eq!(stats.total_pages, 0);
        assert_eq!(stats.total_entities, 0);
    }

    #[tokio::test]
    async fn concurrent_results_are_still_page_ordered() {
        let stub = StubBackend::with_responses(vec![
            Ok(result_with_entities(1)),
            Ok(result_with_entities(1)),
            Ok(result_with_entities(1)),
            Ok(result_with_entities(1)),
        ]);
        let backend: Arc<dyn VisionBackend> = stub.clone();
        let config = AnalysisConfig::builder()
            .concurrency(4)
            .retry_backoff_ms(1)
            .build()
            .unwrap();

        let pages = (1..=4).map(|n| (n, Ok(encoded()))).collect();
        let results = run_pages(&backend, pages, "prompt", 4, &config).await;

        let nums: Vec<usize> = results.iter().map(|p| p.page_num).collect();
        assert_eq!(nums, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn custom_prompt_reaches_the_backend() {
        let stub = StubBackend::with_responses(vec![Ok(result_with_entities(0))]);
        let backend: Arc<dyn VisionBackend> = stub.clone();
        let config = fast_config();

        let pages = vec![(1, Ok(encoded()))];
        run_pages(&backend, pages, "list only ultimate parents", 1, &config).await;

        let calls = stub.calls.lock().unwrap();
        assert_eq!(calls[0], "list only ultimate parents");
    }

    struct CountingProgress {
        events: Mutex<Vec<String>>,
    }

    impl AnalysisProgressCallback for CountingProgress {
        fn on_page_start(&self, page_num: usize, _total: usize) {
            self.events.lock().unwrap().push(format!("start:{page_num}"));
        }
        fn on_page_complete(&self, page_num: usize, _total: usize, entity_count: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("complete:{page_num}:{entity_count}"));
        }
        fn on_page_error(&self, page_num: usize, _total: usize, _error: &str) {
            self.events.lock().unwrap().push(format!("error:{page_num}"));
        }
    }

    #[tokio::test]
    async fn progress_events_fire_per_page() {
        let progress = Arc::new(CountingProgress {
            events: Mutex::new(Vec::new()),
        });
        let stub = StubBackend::with_responses(vec![
            Ok(result_with_entities(2)),
            Err(VisionError::SchemaMismatch("choices".into())),
        ]);
        let backend: Arc<dyn VisionBackend> = stub.clone();
        let config = AnalysisConfig::builder()
            .retry_backoff_ms(1)
            .progress_callback(progress.clone())
            .build()
            .unwrap();

        let pages = vec![(1, Ok(encoded())), (2, Ok(encoded()))];
        run_pages(&backend, pages, "prompt", 2, &config).await;

        let events = progress.events.lock().unwrap();
        assert_eq!(
            *events,
            vec!["start:1", "complete:1:2", "start:2", "error:2"]
        );
    }

    #[test]
    fn backend_resolution_prefers_injected_backend() {
        let stub = StubBackend::with_responses(vec![]);
        let config = AnalysisConfig::builder()
            .backend(stub.clone())
            .build()
            .unwrap();
        assert!(resolve_backend(&config).is_ok());
    }
}
