//! Streaming analysis: per-page results as they complete.
//!
//! [`analyze`](crate::analyze()) holds everything until the last page is
//! done; for long documents a UI usually wants to show each page's entities
//! the moment they arrive. [`analyze_stream`] yields one
//! [`PageAnalysis`] per selected page, then a final [`StreamItem::Summary`]
//! with the run statistics.
//!
//! With `concurrency == 1` pages arrive strictly in page order. Above 1
//! they arrive in completion order; each item carries its page number.

use crate::analyze::{prepare_pages, resolve_backend, run_one_page};
use crate::config::AnalysisConfig;
use crate::error::SharemapError;
use crate::output::{AnalysisStats, DocumentMetadata, PageAnalysis};
use crate::pipeline::input::resolve_input;
use crate::prompts::DEFAULT_USER_PROMPT;
use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

/// One event from a streaming run.
#[derive(Debug, Clone)]
pub enum StreamItem {
    /// Document metadata, emitted once before any page.
    Metadata(DocumentMetadata),
    /// A page finished (successfully or not).
    Page(PageAnalysis),
    /// The run is over; emitted exactly once, last.
    Summary(AnalysisStats),
}

/// A stream of per-page analysis events.
///
/// Document-level failures (missing file, unparsable PDF, failed
/// conversion) surface as a single `Err` item, after which the stream ends.
pub struct PageStream {
    inner: ReceiverStream<Result<StreamItem, SharemapError>>,
}

impl Stream for PageStream {
    type Item = Result<StreamItem, SharemapError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Analyse a document, yielding results page by page.
///
/// # Example
/// ```rust,no_run
/// use futures::StreamExt;
/// use sharemap::{analyze_stream, AnalysisConfig, StreamItem};
///
/// # async fn run(config: AnalysisConfig) {
/// let mut stream = analyze_stream("structure.pdf", config);
/// while let Some(item) = stream.next().await {
///     match item {
///         Ok(StreamItem::Page(page)) if page.is_success() => {
///             println!("page {}: {} entities", page.page_num, page.entity_count);
///         }
///         Ok(StreamItem::Page(page)) => {
///             eprintln!("page {} failed", page.page_num);
///         }
///         Ok(_) => {}
///         Err(e) => {
///             eprintln!("run aborted: {e}");
///             break;
///         }
///     }
/// }
/// # }
/// ```
pub fn analyze_stream(input: impl Into<String>, config: AnalysisConfig) -> PageStream {
    let input = input.into();
    // Buffer of 2 keeps the producer one page ahead of the consumer without
    // rendering far past what has been read.
    let (tx, rx) = mpsc::channel(2);

    tokio::spawn(async move {
        if let Err(e) = drive(&input, &config, &tx).await {
            let _ = tx.send(Err(e)).await;
        }
    });

    PageStream {
        inner: ReceiverStream::new(rx),
    }
}

async fn drive(
    input: &str,
    config: &AnalysisConfig,
    tx: &mpsc::Sender<Result<StreamItem, SharemapError>>,
) -> Result<(), SharemapError> {
    let run_start = Instant::now();
    let (resolved, kind) = resolve_input(input, config.download_timeout_secs).await?;
    let backend = resolve_backend(config)?;
    let prompt = config
        .user_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_USER_PROMPT.to_string());

    let render_start = Instant::now();
    let (metadata, pages) = prepare_pages(&resolved, kind, config).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;

    let total_pages = metadata.page_count;
    if tx
        .send(Ok(StreamItem::Metadata(metadata)))
        .await
        .is_err()
    {
        return Ok(()); // receiver dropped, stop quietly
    }

    if let Some(cb) = &config.progress_callback {
        cb.on_run_start(total_pages, pages.len());
    }

    let mut stats = AnalysisStats {
        total_pages,
        render_duration_ms,
        ..Default::default()
    };

    let analysis_start = Instant::now();

    if config.concurrency <= 1 {
        for (page_num, prepared) in pages {
            let analysis =
                run_one_page(&backend, page_num, prepared, &prompt, total_pages, config).await;
            accumulate(&mut stats, &analysis);
            if tx.send(Ok(StreamItem::Page(analysis))).await.is_err() {
                return Ok(());
            }
        }
    } else {
        let mut completed = stream::iter(pages)
            .map(|(page_num, prepared)| {
                run_one_page(&backend, page_num, prepared, &prompt, total_pages, config)
            })
            .buffer_unordered(config.concurrency);

        while let Some(analysis) = completed.next().await {
            accumulate(&mut stats, &analysis);
            if tx.send(Ok(StreamItem::Page(analysis))).await.is_err() {
                return Ok(());
            }
        }
    }

    stats.analysis_duration_ms = analysis_start.elapsed().as_millis() as u64;
    stats.total_duration_ms = run_start.elapsed().as_millis() as u64;

    if let Some(cb) = &config.progress_callback {
        cb.on_run_complete(total_pages, stats.processed_pages);
    }

    info!(
        "stream complete: {}/{} pages succeeded, {} entities",
        stats.processed_pages, stats.total_pages, stats.total_entities
    );

    let _ = tx.send(Ok(StreamItem::Summary(stats))).await;
    Ok(())
}

fn accumulate(stats: &mut AnalysisStats, page: &PageAnalysis) {
    if page.is_success() {
        stats.processed_pages += 1;
        stats.total_entities += page.entity_count;
    } else {
        stats.failed_pages += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate_tracks_successes_and_failures() {
        let mut stats = AnalysisStats {
            total_pages: 2,
            ..Default::default()
        };

        let ok = PageAnalysis {
            page_num: 1,
            result: Some(serde_json::Map::new()),
            entity_count: 4,
            duration_ms: 5,
            retries: 0,
            error: None,
        };
        let failed = PageAnalysis::failed(
            2,
            crate::error::PageError::Encoding {
                page: 2,
                detail: "bad bytes".into(),
            },
        );

        accumulate(&mut stats, &ok);
        accumulate(&mut stats, &failed);

        assert_eq!(stats.processed_pages, 1);
        assert_eq!(stats.failed_pages, 1);
        assert_eq!(stats.total_entities, 4);
    }

    #[tokio::test]
    async fn stream_ends_with_error_for_missing_input() {
        use futures::StreamExt;

        let config = AnalysisConfig::default();
        let mut stream = analyze_stream("/no/such/file.pdf", config);

        let item = stream.next().await.expect("stream yields one item");
        assert!(matches!(item, Err(SharemapError::FileNotFound { .. })));
        assert!(stream.next().await.is_none());
    }
}
