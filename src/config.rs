//! Configuration types for document analysis.
//!
//! All run behaviour is controlled through [`AnalysisConfig`], built via its
//! [`AnalysisConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across threads, and the builder lets callers set
//! only what they care about and rely on documented defaults for the rest.
//!
//! The endpoint, API key, and deployment name live in an explicit
//! [`VisionEndpoint`] value constructed once at startup and handed to the
//! HTTP client; request logic never reads ambient environment state.

use crate::error::SharemapError;
use crate::pipeline::convert::DocumentConverter;
use crate::pipeline::vision::VisionBackend;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default Azure OpenAI API version string.
pub const DEFAULT_API_VERSION: &str = "2024-02-15-preview";

/// Connection details for the vision inference endpoint.
///
/// The endpoint is Azure-OpenAI shaped: requests go to
/// `{base_url}/openai/deployments/{deployment}/chat/completions?api-version={api_version}`
/// with the key in an `api-key` header.
#[derive(Clone, Serialize, Deserialize)]
pub struct VisionEndpoint {
    /// Base URL of the inference service, e.g. `https://myresource.openai.azure.com`.
    pub base_url: String,
    /// API key sent in the `api-key` header.
    pub api_key: String,
    /// Model deployment name, e.g. `gpt-4o`.
    pub deployment: String,
    /// API version query parameter.
    pub api_version: String,
}

impl VisionEndpoint {
    /// Create an endpoint with the default API version.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            deployment: deployment.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    /// Read the endpoint from `SHAREMAP_ENDPOINT`, `SHAREMAP_API_KEY`,
    /// `SHAREMAP_DEPLOYMENT`, and optionally `SHAREMAP_API_VERSION`.
    pub fn from_env() -> Result<Self, SharemapError> {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| SharemapError::EndpointNotConfigured {
                    hint: format!(
                        "Set {name} (along with SHAREMAP_ENDPOINT, SHAREMAP_API_KEY, \
                         and SHAREMAP_DEPLOYMENT), or pass a VisionEndpoint explicitly."
                    ),
                })
        };

        Ok(Self {
            base_url: var("SHAREMAP_ENDPOINT")?,
            api_key: var("SHAREMAP_API_KEY")?,
            deployment: var("SHAREMAP_DEPLOYMENT")?,
            api_version: std::env::var("SHAREMAP_API_VERSION")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
        })
    }

    /// Full chat-completions URL for this endpoint.
    pub fn chat_completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.base_url.trim_end_matches('/'),
            self.deployment,
            self.api_version
        )
    }
}

impl fmt::Debug for VisionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionEndpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("deployment", &self.deployment)
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// Configuration for a document analysis run.
///
/// Built via [`AnalysisConfig::builder()`] or using
/// [`AnalysisConfig::default()`].
///
/// # Example
/// ```rust
/// use sharemap::{AnalysisConfig, VisionEndpoint};
///
/// let config = AnalysisConfig::builder()
///     .endpoint(VisionEndpoint::new(
///         "https://myresource.openai.azure.com",
///         "key",
///         "gpt-4o",
///     ))
///     .max_retries(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Vision inference endpoint. If `None` (and no `backend` is set),
    /// [`VisionEndpoint::from_env`] is consulted at run time.
    pub endpoint: Option<VisionEndpoint>,

    /// Pre-constructed vision backend. Takes precedence over `endpoint`.
    /// Useful in tests and for callers that need custom middleware.
    pub backend: Option<Arc<dyn VisionBackend>>,

    /// Office-to-PDF converter. Defaults to [`crate::SofficeConverter`]
    /// using `soffice_path`.
    pub converter: Option<Arc<dyn DocumentConverter>>,

    /// Path or name of the LibreOffice binary used by the default converter.
    pub soffice_path: String,

    /// System-role instruction sent with every page. If `None`, uses
    /// [`crate::prompts::DEFAULT_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// User-editable analysis prompt sent alongside each page image.
    /// If `None`, uses [`crate::prompts::DEFAULT_USER_PROMPT`].
    pub user_prompt: Option<String>,

    /// Sampling temperature. Default: 0.2.
    ///
    /// Low temperature keeps the model faithful to what is drawn on the
    /// page, which is what you want when transcribing entity names and
    /// share percentages rather than generating prose.
    pub temperature: f64,

    /// Nucleus sampling parameter. Default: 0.95.
    pub top_p: f64,

    /// Maximum tokens the model may generate per page. Default: 4096.
    ///
    /// Dense shareholding diagrams can produce large entity lists; setting
    /// this too low truncates the JSON mid-object and the page fails with a
    /// content-parse error.
    pub max_tokens: usize,

    /// Maximum retry attempts on a transient API failure. Default: 3.
    ///
    /// Transport-class failures (connection reset, 429, 5xx, timeout) are
    /// retried; parse failures are permanent and surface immediately as
    /// [`crate::error::PageError`].
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s.
    pub retry_backoff_ms: u64,

    /// Per-API-call timeout in seconds. Default: 60.
    ///
    /// A call that produces nothing within a minute is dead; waiting
    /// indefinitely just hangs the page.
    pub api_timeout_secs: u64,

    /// Office-to-PDF conversion timeout in seconds. Default: 120.
    pub convert_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Maximum rendered page dimension (width or height) in pixels. Default: 2000.
    ///
    /// A safety cap: an A0 poster page rendered without one could exhaust
    /// memory and blow through API upload limits. Either dimension is
    /// capped, the other scales proportionally.
    pub max_rendered_pixels: u32,

    /// Number of concurrent analysis calls. Default: 1 (strictly sequential,
    /// pages visited in source order).
    ///
    /// Values above 1 dispatch pages through a bounded worker pool; the
    /// final result list is still ordered by page number.
    pub concurrency: usize,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// Progress callback fired per page. Default: none.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            backend: None,
            converter: None,
            soffice_path: "soffice".to_string(),
            system_prompt: None,
            user_prompt: None,
            temperature: 0.2,
            top_p: 0.95,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            convert_timeout_secs: 120,
            download_timeout_secs: 120,
            max_rendered_pixels: 2000,
            concurrency: 1,
            pages: PageSelection::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("endpoint", &self.endpoint)
            .field("backend", &self.backend.as_ref().map(|_| "<dyn VisionBackend>"))
            .field("converter", &self.converter.as_ref().map(|_| "<dyn DocumentConverter>"))
            .field("soffice_path", &self.soffice_path)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("pages", &self.pages)
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn endpoint(mut self, endpoint: VisionEndpoint) -> Self {
        self.config.endpoint = Some(endpoint);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn VisionBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn converter(mut self, converter: Arc<dyn DocumentConverter>) -> Self {
        self.config.converter = Some(converter);
        self
    }

    pub fn soffice_path(mut self, path: impl Into<String>) -> Self {
        self.config.soffice_path = path.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn user_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.user_prompt = Some(prompt.into());
        self
    }

    pub fn temperature(mut self, t: f64) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn top_p(mut self, p: f64) -> Self {
        self.config.top_p = p.clamp(0.0, 1.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn convert_timeout_secs(mut self, secs: u64) -> Self {
        self.config.convert_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, SharemapError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(SharemapError::InvalidConfig("concurrency must be ≥ 1".into()));
        }
        if c.max_tokens == 0 {
            return Err(SharemapError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if let Some(ref ep) = c.endpoint {
            if ep.base_url.is_empty() {
                return Err(SharemapError::InvalidConfig("endpoint base_url is empty".into()));
            }
            if ep.deployment.is_empty() {
                return Err(SharemapError::InvalidConfig("endpoint deployment is empty".into()));
            }
        }
        Ok(self.config)
    }
}

/// Specifies which pages of the document to analyse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// Analyse all pages (default).
    #[default]
    All,
    /// Analyse a single page (1-indexed).
    Single(usize),
    /// Analyse a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Analyse specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed
    /// page numbers. Out-of-range pages are dropped silently.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_generation_parameters() {
        let config = AnalysisConfig::default();
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.top_p, 0.95);
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn builder_clamps_out_of_range_values() {
        let config = AnalysisConfig::builder()
            .temperature(5.0)
            .top_p(2.0)
            .concurrency(0)
            .max_rendered_pixels(10)
            .build()
            .unwrap();
        assert_eq!(config.temperature, 2.0);
        assert_eq!(config.top_p, 1.0);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_rendered_pixels, 100);
    }

    #[test]
    fn build_rejects_empty_endpoint_fields() {
        let result = AnalysisConfig::builder()
            .endpoint(VisionEndpoint::new("", "key", "gpt-4o"))
            .build();
        assert!(matches!(result, Err(SharemapError::InvalidConfig(_))));
    }

    #[test]
    fn chat_completions_url_shape() {
        let ep = VisionEndpoint::new("https://res.openai.azure.com/", "k", "gpt-4o");
        assert_eq!(
            ep.chat_completions_url(),
            "https://res.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-02-15-preview"
        );
    }

    #[test]
    fn endpoint_debug_redacts_api_key() {
        let ep = VisionEndpoint::new("https://res.openai.azure.com", "secret", "gpt-4o");
        let dbg = format!("{:?}", ep);
        assert!(!dbg.contains("secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn page_selection_to_indices() {
        assert_eq!(PageSelection::All.to_indices(5), vec![0, 1, 2, 3, 4]);
        assert_eq!(PageSelection::Single(3).to_indices(5), vec![2]);
        assert_eq!(PageSelection::Single(6).to_indices(5), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(2, 4).to_indices(5), vec![1, 2, 3]);
        assert_eq!(PageSelection::Set(vec![3, 1, 3]).to_indices(5), vec![0, 2]);
        assert_eq!(PageSelection::All.to_indices(0), Vec::<usize>::new());
    }
}
