//! Vision analysis: build the chat-completion request and decode the
//! two-layer JSON response.
//!
//! The response has two parse boundaries: the outer **envelope** (the HTTP
//! body, a chat-completion object) and the **content** (the model's
//! generated text, itself expected to be a JSON object because the request
//! asks for `response_format: json_object`). Each boundary fails
//! independently and maps to its own [`VisionError`] variant, so a caller
//! can tell a broken endpoint from a model that ignored its instructions.
//!
//! ## Retry strategy
//!
//! Transport-class failures (connection errors, 429, 5xx, timeouts) are
//! transient and retried with exponential backoff
//! (`retry_backoff_ms * 2^attempt`). Parse failures are permanent: the
//! same bytes will fail the same way, so they surface immediately.

use crate::config::{AnalysisConfig, VisionEndpoint};
use crate::error::PageError;
use crate::output::{self, AnalysisResult, PageAnalysis};
use crate::pipeline::encode::EncodedImage;
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Failure of a single analysis attempt.
#[derive(Debug, Error)]
pub enum VisionError {
    /// Network-level or HTTP-level failure.
    #[error("transport failure: {detail}")]
    Transport {
        /// HTTP status when the endpoint answered; `None` for
        /// connection-level failures.
        status: Option<u16>,
        detail: String,
    },

    /// The call exceeded the configured timeout.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The response body is not valid JSON.
    #[error("response envelope is not valid JSON: {0}")]
    EnvelopeParse(String),

    /// The model's generated text is not valid JSON.
    #[error("model output is not valid JSON: {0}")]
    ContentParse(String),

    /// The envelope is valid JSON but lacks the expected field path.
    #[error("expected field missing from envelope: {0}")]
    SchemaMismatch(String),
}

impl VisionError {
    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Connection failures, timeouts, 429, and 5xx are transient; client
    /// errors and parse failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            VisionError::Timeout { .. } => true,
            VisionError::Transport { status, .. } => match status {
                None => true,
                Some(429) => true,
                Some(s) => *s >= 500,
            },
            _ => false,
        }
    }

    /// Attach a page number, producing the page-local error stored in
    /// [`PageAnalysis`].
    pub fn into_page_error(self, page: usize, retries: u32) -> PageError {
        match self {
            VisionError::Transport { status, detail } => PageError::Transport {
                page,
                status,
                retries,
                detail,
            },
            VisionError::Timeout { secs } => PageError::Timeout { page, secs },
            VisionError::EnvelopeParse(detail) => PageError::EnvelopeParse { page, detail },
            VisionError::ContentParse(detail) => PageError::ContentParse { page, detail },
            VisionError::SchemaMismatch(path) => PageError::SchemaMismatch { page, path },
        }
    }
}

/// A single analysis attempt against some vision backend.
///
/// This is the injection seam: production uses [`HttpVisionClient`], tests
/// substitute a deterministic stub via
/// [`crate::config::AnalysisConfigBuilder::backend`]. The retry policy
/// lives in [`analyze_page`], so implementations perform exactly one
/// attempt.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn analyze(
        &self,
        image: &EncodedImage,
        prompt: &str,
    ) -> Result<AnalysisResult, VisionError>;
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: Vec<Message<'a>>,
    temperature: f64,
    top_p: f64,
    max_tokens: usize,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

// ── HTTP client ──────────────────────────────────────────────────────────

/// Vision client speaking the Azure-OpenAI chat-completions dialect.
///
/// Holds a connection pool and the full endpoint configuration; nothing in
/// the request path reads ambient environment state. Generation parameters
/// are pinned low-randomness (`temperature` 0.2, `top_p` 0.95 by default)
/// and the endpoint is told to produce a JSON object.
pub struct HttpVisionClient {
    client: reqwest::Client,
    endpoint: VisionEndpoint,
    system_prompt: String,
    temperature: f64,
    top_p: f64,
    max_tokens: usize,
    timeout_secs: u64,
}

impl HttpVisionClient {
    /// Build a client from an endpoint and the run configuration.
    pub fn new(
        endpoint: VisionEndpoint,
        config: &AnalysisConfig,
    ) -> Result<Self, crate::error::SharemapError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| crate::error::SharemapError::Internal(format!("http client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            timeout_secs: config.api_timeout_secs,
        })
    }

    fn build_request<'a>(&'a self, image: &'a EncodedImage, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            messages: vec![
                Message {
                    role: "system",
                    content: MessageContent::Text(&self.system_prompt),
                },
                Message {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        ContentPart::Text { text: prompt },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: &image.data_uri,
                            },
                        },
                    ]),
                },
            ],
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        }
    }
}

#[async_trait]
impl VisionBackend for HttpVisionClient {
    async fn analyze(
        &self,
        image: &EncodedImage,
        prompt: &str,
    ) -> Result<AnalysisResult, VisionError> {
        let request = self.build_request(image, prompt);
        let url = self.endpoint.chat_completions_url();

        let response = self
            .client
            .post(&url)
            .header("api-key", &self.endpoint.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VisionError::Timeout {
                        secs: self.timeout_secs,
                    }
                } else {
                    VisionError::Transport {
                        status: None,
                        detail: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::Transport {
                status: Some(status.as_u16()),
                detail: format!("HTTP {}: {}", status, truncate(&body, 300)),
            });
        }

        let body = response.text().await.map_err(|e| VisionError::Transport {
            status: Some(status.as_u16()),
            detail: format!("failed to read response body: {e}"),
        })?;

        parse_envelope(&body)
    }
}

// ── Response decoding ────────────────────────────────────────────────────

/// Decode the chat-completion envelope and the JSON object inside it.
///
/// Both layers are independent failure points by design: a malformed body
/// is `EnvelopeParse`, a missing `choices[0].message.content` is
/// `SchemaMismatch`, and content that is not a JSON object is
/// `ContentParse`.
pub(crate) fn parse_envelope(body: &str) -> Result<AnalysisResult, VisionError> {
    let envelope: ChatResponse =
        serde_json::from_str(body).map_err(|e| VisionError::EnvelopeParse(e.to_string()))?;

    let content = envelope
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| VisionError::SchemaMismatch("choices[0].message.content".to_string()))?;

    let text = strip_json_fences(&content);
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| VisionError::ContentParse(e.to_string()))?;

    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(VisionError::ContentParse(format!(
            "expected a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

static RE_JSON_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*\n(.*)\n```\s*$").unwrap());

/// Strip a wrapping ```json fence, if present.
///
/// Models occasionally fence their output despite `response_format`
/// requesting a bare JSON object; the fence is noise, not content.
fn strip_json_fences(input: &str) -> &str {
    let trimmed = input.trim();
    match RE_JSON_FENCES.captures(trimmed) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(trimmed),
        None => trimmed,
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ── Per-page driver ──────────────────────────────────────────────────────

/// Analyse a single page image with retry and backoff.
///
/// Always returns a `PageAnalysis` — never propagates the error upward, so
/// a single bad page cannot abort the document. Callers check
/// `result.error` to decide whether the page contributes to totals.
pub async fn analyze_page(
    backend: &Arc<dyn VisionBackend>,
    page_num: usize,
    image: &EncodedImage,
    prompt: &str,
    config: &AnalysisConfig,
) -> PageAnalysis {
    let start = Instant::now();
    let mut last_err: Option<VisionError> = None;
    let mut attempt: u32 = 0;

    while attempt <= config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "page {}: retry {}/{} after {}ms",
                page_num, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match backend.analyze(image, prompt).await {
            Ok(result) => {
                let entity_count = output::entity_count(&result);
                let duration = start.elapsed();
                debug!(
                    "page {}: {} entities in {:?} ({} retries)",
                    page_num, entity_count, duration, attempt
                );

                return PageAnalysis {
                    page_num,
                    result: Some(result),
                    entity_count,
                    duration_ms: duration.as_millis() as u64,
                    retries: attempt,
                    error: None,
                };
            }
            Err(e) => {
                warn!("page {}: attempt {} failed: {}", page_num, attempt + 1, e);
                let retryable = e.is_retryable();
                last_err = Some(e);
                if !retryable {
                    break;
                }
            }
        }

        attempt += 1;
    }

    let duration = start.elapsed();
    let err = last_err.unwrap_or(VisionError::Transport {
        status: None,
        detail: "no attempt was made".to_string(),
    });

    PageAnalysis {
        page_num,
        result: None,
        entity_count: 0,
        duration_ms: duration.as_millis() as u64,
        retries: attempt.min(config.max_retries),
        error: Some(err.into_page_error(page_num, attempt.min(config.max_retries))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> HttpVisionClient {
        let endpoint = VisionEndpoint::new("https://res.openai.azure.com", "key", "gpt-4o");
        HttpVisionClient::new(endpoint, &AnalysisConfig::default()).unwrap()
    }

    fn image() -> EncodedImage {
        EncodedImage {
            data_uri: "data:image/png;base64,AAAA".to_string(),
            mime_type: "image/png",
        }
    }

    #[test]
    fn request_body_shape() {
        let c = client();
        let img = image();
        let request = c.build_request(&img, "extract the entities");
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["temperature"], json!(0.2));
        assert_eq!(body["top_p"], json!(0.95));
        assert_eq!(body["max_tokens"], json!(4096));
        assert_eq!(body["response_format"]["type"], json!("json_object"));

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], json!("system"));
        assert!(messages[0]["content"].as_str().unwrap().contains("business analyst"));
        assert_eq!(messages[1]["role"], json!("user"));

        let parts = messages[1]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], json!("text"));
        assert_eq!(parts[0]["text"], json!("extract the entities"));
        assert_eq!(parts[1]["type"], json!("image_url"));
        assert_eq!(parts[1]["image_url"]["url"], json!("data:image/png;base64,AAAA"));
    }

    #[test]
    fn parse_envelope_happy_path() {
        let body = json!({
            "choices": [{"message": {"content": "{\"entities\": [1, 2, 3]}"}}]
        })
        .to_string();
        let result = parse_envelope(&body).unwrap();
        assert_eq!(result["entities"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn parse_envelope_malformed_body() {
        let err = parse_envelope("{not json").unwrap_err();
        assert!(matches!(err, VisionError::EnvelopeParse(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn parse_envelope_missing_field_path() {
        let err = parse_envelope(r#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, VisionError::SchemaMismatch(_)));

        let err = parse_envelope(r#"{"choices": [{"message": {}}]}"#).unwrap_err();
        assert!(matches!(err, VisionError::SchemaMismatch(_)));
    }

    #[test]
    fn parse_envelope_content_not_json() {
        let body = json!({
            "choices": [{"message": {"content": "I could not read the diagram."}}]
        })
        .to_string();
        let err = parse_envelope(&body).unwrap_err();
        assert!(matches!(err, VisionError::ContentParse(_)));
    }

    #[test]
    fn parse_envelope_content_not_an_object() {
        let body = json!({
            "choices": [{"message": {"content": "[1, 2, 3]"}}]
        })
        .to_string();
        let err = parse_envelope(&body).unwrap_err();
        match err {
            VisionError::ContentParse(detail) => assert!(detail.contains("an array")),
            other => panic!("expected ContentParse, got {other:?}"),
        }
    }

    #[test]
    fn fenced_content_is_unwrapped() {
        let body = json!({
            "choices": [{"message": {"content": "```json\n{\"entities\": []}\n```"}}]
        })
        .to_string();
        let result = parse_envelope(&body).unwrap();
        assert!(result.contains_key("entities"));
    }

    #[test]
    fn strip_fences_handles_plain_and_fenced() {
        assert_eq!(strip_json_fences("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_json_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_json_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_json_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn retryability_classification() {
        assert!(VisionError::Timeout { secs: 60 }.is_retryable());
        assert!(VisionError::Transport { status: None, detail: "dns".into() }.is_retryable());
        assert!(VisionError::Transport { status: Some(429), detail: "".into() }.is_retryable());
        assert!(VisionError::Transport { status: Some(503), detail: "".into() }.is_retryable());
        assert!(!VisionError::Transport { status: Some(401), detail: "".into() }.is_retryable());
        assert!(!VisionError::ContentParse("bad".into()).is_retryable());
        assert!(!VisionError::SchemaMismatch("choices".into()).is_retryable());
    }
}
