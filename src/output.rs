//! Result types produced by an analysis run.
//!
//! The per-page [`AnalysisResult`] is deliberately loose: a plain JSON
//! object. The model's output shape is prompt-dependent (the default prompt
//! asks for entities, relationships, share percentages, and a relevancy
//! score) and not contractually guaranteed, so parsing never enforces a
//! schema. Validating against an expected shape is an explicit
//! post-processing step for callers that need one.

use crate::error::PageError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The structured document extracted from one page image: a mapping of
/// string keys to arbitrary JSON values.
pub type AnalysisResult = serde_json::Map<String, Value>;

/// Outcome of analysing a single page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageAnalysis {
    /// 1-indexed page number in the source document.
    pub page_num: usize,

    /// The extracted document, present on success.
    pub result: Option<AnalysisResult>,

    /// Number of entries in the result's `entities` collection (0 when the
    /// field is absent or the page failed).
    pub entity_count: usize,

    /// Wall-clock duration of the page's analysis, including retries.
    pub duration_ms: u64,

    /// Number of retry attempts that were made (0 = first attempt succeeded).
    pub retries: u32,

    /// The page-local failure, if any. `None` means `result` is `Some`.
    pub error: Option<PageError>,
}

impl PageAnalysis {
    /// Whether this page produced a result.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// A failed page with zero timing data, used for pages that never
    /// reached the endpoint (e.g. encoding failures).
    pub fn failed(page_num: usize, error: PageError) -> Self {
        Self {
            page_num,
            result: None,
            entity_count: 0,
            duration_ms: 0,
            retries: 0,
            error: Some(error),
        }
    }
}

/// Aggregate statistics for an analysis run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisStats {
    /// Total pages in the source document.
    pub total_pages: usize,
    /// Pages that produced an analysis result.
    pub processed_pages: usize,
    /// Pages that failed (encoding, transport, or parse).
    pub failed_pages: usize,
    /// Sum of `entity_count` over all successful pages.
    pub total_entities: usize,
    /// End-to-end wall-clock duration.
    pub total_duration_ms: u64,
    /// Time spent rasterising pages (0 for direct image inputs).
    pub render_duration_ms: u64,
    /// Time spent in vision API calls (including retries and backoff).
    pub analysis_duration_ms: u64,
}

/// Document metadata extracted without any analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub page_count: usize,
}

/// The complete output of one analysis run.
///
/// Pages are ordered by page number regardless of completion order, and the
/// list never contains more entries than the source document has pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutput {
    /// Per-page outcomes, ordered by `page_num`, failures included.
    pub pages: Vec<PageAnalysis>,
    /// Aggregate statistics.
    pub stats: AnalysisStats,
    /// Source document metadata.
    pub metadata: DocumentMetadata,
}

impl AnalysisOutput {
    /// Successful page results only, in page order.
    pub fn results(&self) -> impl Iterator<Item = (usize, &AnalysisResult)> {
        self.pages
            .iter()
            .filter_map(|p| p.result.as_ref().map(|r| (p.page_num, r)))
    }
}

/// Best-effort count of the `entities` collection in a result.
///
/// The default prompt asks for an array, but the model is free to return an
/// object keyed by entity ID instead; both count. Anything else (string,
/// number, absent) contributes 0.
pub fn entity_count(result: &AnalysisResult) -> usize {
    match result.get("entities") {
        Some(Value::Array(items)) => items.len(),
        Some(Value::Object(map)) => map.len(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result_from(value: Value) -> AnalysisResult {
        match value {
            Value::Object(map) => map,
            _ => panic!("test fixture must be an object"),
        }
    }

    #[test]
    fn entity_count_array() {
        let r = result_from(json!({"entities": [{"Entity_Name": "A"}, {"Entity_Name": "B"}]}));
        assert_eq!(entity_count(&r), 2);
    }

    #[test]
    fn entity_count_object() {
        let r = result_from(json!({"entities": {"A1": {}, "B2": {}, "C3": {}}}));
        assert_eq!(entity_count(&r), 3);
    }

    #[test]
    fn entity_count_absent_or_scalar() {
        assert_eq!(entity_count(&result_from(json!({"relationships": []}))), 0);
        assert_eq!(entity_count(&result_from(json!({"entities": "three"}))), 0);
        assert_eq!(entity_count(&result_from(json!({"entities": null}))), 0);
    }

    #[test]
    fn results_iterator_skips_failures() {
        let ok = PageAnalysis {
            page_num: 1,
            result: Some(result_from(json!({"entities": []}))),
            entity_count: 0,
            duration_ms: 10,
            retries: 0,
            error: None,
        };
        let failed = PageAnalysis::failed(
            2,
            crate::error::PageError::ContentParse {
                page: 2,
                detail: "not json".into(),
            },
        );
        let output = AnalysisOutput {
            pages: vec![ok, failed],
            stats: AnalysisStats::default(),
            metadata: DocumentMetadata::default(),
        };
        let pages: Vec<usize> = output.results().map(|(n, _)| n).collect();
        assert_eq!(pages, vec![1]);
    }
}
