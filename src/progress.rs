//! Progress-callback trait for per-page analysis events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::config::AnalysisConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline works through a document.
//!
//! Callbacks are the least-invasive integration point: callers can forward
//! events to a channel, a WebSocket, or a terminal progress bar without the
//! library knowing how the host application communicates. The trait is
//! `Send + Sync` because pages may be dispatched concurrently when
//! `concurrency > 1`.

use std::sync::Arc;

/// Called by the analysis pipeline as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. With `concurrency > 1` the page-level methods may
/// be invoked concurrently from different tasks; implementations must guard
/// shared mutable state accordingly.
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called once before any page is dispatched, after the page count is
    /// known.
    ///
    /// `selected_pages` is the number of pages actually scheduled for this
    /// run; with a page selection it can be smaller than `total_pages`.
    fn on_run_start(&self, total_pages: usize, selected_pages: usize) {
        let _ = (total_pages, selected_pages);
    }

    /// Called just before a page's vision request is sent.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page's analysis succeeds.
    ///
    /// `entity_count` is the number of entries in the page result's
    /// `entities` collection (0 when absent).
    fn on_page_complete(&self, page_num: usize, total_pages: usize, entity_count: usize) {
        let _ = (page_num, total_pages, entity_count);
    }

    /// Called when a page fails, either before dispatch (encoding) or after
    /// all retries are exhausted.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after the last page has been attempted.
    fn on_run_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AnalysisConfig`].
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        entities: AtomicUsize,
    }

    impl AnalysisProgressCallback for TrackingCallback {
        fn on_page_start(&self, _page_num: usize, _total_pages: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _page_num: usize, _total_pages: usize, entity_count: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
            self.entities.fetch_add(entity_count, Ordering::SeqCst);
        }

        fn on_page_error(&self, _page_num: usize, _total_pages: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(3, 3);
        cb.on_page_start(1, 3);
        cb.on_page_complete(1, 3, 7);
        cb.on_page_error(2, 3, "transport failure");
        cb.on_run_complete(3, 2);
    }

    #[test]
    fn tracking_callback_accumulates_entity_counts() {
        let tracker = TrackingCallback {
            starts: AtomicUsize::new(0),
            completes: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            entities: AtomicUsize::new(0),
        };

        tracker.on_page_start(1, 3);
        tracker.on_page_complete(1, 3, 4);
        tracker.on_page_start(2, 3);
        tracker.on_page_error(2, 3, "model output is not valid JSON");
        tracker.on_page_start(3, 3);
        tracker.on_page_complete(3, 3, 2);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.entities.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn AnalysisProgressCallback> = Arc::new(NoopProgressCallback);
        cb.on_run_start(10, 10);
        cb.on_page_complete(1, 10, 0);
    }
}
