//! Prompts for shareholding-structure extraction.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing the default behaviour (e.g.
//!    adding a field to the requested JSON shape) requires editing exactly
//!    one place.
//!
//! 2. **Testability** — unit tests can inspect prompts directly without a
//!    live endpoint, making prompt regressions easy to catch.
//!
//! Callers override these via [`crate::config::AnalysisConfig::system_prompt`]
//! and [`crate::config::AnalysisConfig::user_prompt`]; the constants here are
//! used only when no override is provided. The user prompt is the editable
//! half: it describes the JSON shape the caller wants back, and nothing in
//! the pipeline validates that the model honoured it.

/// Default system-role instruction sent with every page.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a business analyst working on CRM \
(Customer Relationship Management) systems to input and manage data related to corporate \
shareholding structures and have strong expertise in Corporate Structure Knowledge, Data \
Integrity and Validation, Reporting and Insights. Your goal is to analyse Corporate \
Shareholder Diagrams, extract entities and their respective relationships, as well as the \
shares that belong to each one of the entities.";

/// Default user-editable analysis prompt.
///
/// Requests a JSON object with an `entities` array, a `relationships` array
/// with share percentages, and a relevancy score. The endpoint is asked for
/// `response_format: json_object`, so the model's reply is expected to be a
/// single well-formed JSON object following this shape.
pub const DEFAULT_USER_PROMPT: &str = r#"Evaluate the image provided. Your response should be precise and strictly adhere to the instructions below. Respond with a single JSON object.

1. entities: Extract each and every entity present in the provided diagram. For every entity report:
   - "Entity_ID": a unique identifier for the extracted entity
   - "Entity_Name": a verbatim copy of the entity name as it appears on the diagram
   - "Entity_Type": for example GP, Fund, LP, or Holding
   - "Location": the jurisdiction of the entity formation, if present

2. relationships: Extract parent-child relationships between entities, including the shareholding shown over each relationship when available:
   - "parent": {"ID": "...", "name": "..."}
   - "child": {"ID": "...", "name": "..."}
   - "share_percent": the shareholding of the parent in the child, per share class when the diagram distinguishes classes

3. relevancy_score: How confident you are in the diagram analysis and in the entity and relationship extraction, from 0 to 1.

Example format:
{
  "entities": [
    {
      "Entity_ID": "123456ABC",
      "Entity_Name": "Elpam Asia Ltd.",
      "Entity_Type": "Holding",
      "Location": "Cayman Islands"
    }
  ],
  "relationships": [
    {
      "parent": {"ID": "123456ABC", "name": "Elpam Asia Ltd."},
      "child": {"ID": "123478ABC", "name": "CPV 88 Ltd"},
      "share_percent": {"Series C": 2733035, "Ordinary": 2522296}
    }
  ],
  "relevancy_score": 0.92
}"#;
