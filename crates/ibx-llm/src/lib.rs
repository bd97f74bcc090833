//! LLM inference boundary: structured-object generation only.
//!
//! The core uses the LLM for exactly two things — a spam/promotional gate and
//! a per-thread structured extraction. Both go through one object-safe trait
//! so tests can swap in a canned implementation.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod http;
pub mod schema;

pub use http::HttpLlmClient;
pub use schema::{extraction_schema, spam_schema};

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f64,
    /// Enforce strict schema validation server-side when the backend
    /// supports it; decode failures are an [`LlmError::Schema`] either way.
    pub strict_schema: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            strict_schema: true,
        }
    }
}

/// Raw result of a structured generation: the object plus token accounting.
#[derive(Debug, Clone)]
pub struct GeneratedObject {
    pub object: Value,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum LlmError {
    /// Network or transport failure.
    Transport(String),
    /// The inference API returned an application-level error.
    Api { status: Option<u16>, message: String },
    /// The model output did not satisfy the requested schema.
    Schema(String),
    /// A required configuration value (e.g. API key) is missing or invalid.
    Config(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Transport(msg) => write!(f, "transport error: {msg}"),
            LlmError::Api {
                status: Some(s),
                message,
            } => write!(f, "llm api error status={s}: {message}"),
            LlmError::Api {
                status: None,
                message,
            } => write!(f, "llm api error: {message}"),
            LlmError::Schema(msg) => write!(f, "schema error: {msg}"),
            LlmError::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for LlmError {}

// ---------------------------------------------------------------------------
// Client trait
// ---------------------------------------------------------------------------

/// Structured-output inference contract.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Generate a JSON object conforming to `schema` from `prompt`.
    async fn generate_object(
        &self,
        model: &str,
        schema: &Value,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<GeneratedObject, LlmError>;
}

// ---------------------------------------------------------------------------
// Typed outputs
// ---------------------------------------------------------------------------

/// Minimal spam-gate verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpamVerdict {
    pub is_spam: bool,
    pub is_promotional: bool,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
}

impl SpamVerdict {
    pub fn from_generated(obj: &Value) -> Result<Self, LlmError> {
        serde_json::from_value(obj.clone())
            .map_err(|e| LlmError::Schema(format!("spam verdict decode failed: {e}")))
    }

    pub fn should_skip(&self) -> bool {
        self.is_spam || self.is_promotional
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionScores {
    #[serde(default)]
    pub urgency: f64,
    #[serde(default)]
    pub importance: f64,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub kind: String,
    pub value: String,
}

/// Full structured record extracted from a thread transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadExtraction {
    pub summary: String,
    pub intent: String,
    pub urgency: String,
    pub sentiment: String,
    pub needs_reply: bool,
    pub actionability: String,
    #[serde(default)]
    pub scores: ExtractionScores,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub is_reply: bool,
    #[serde(default)]
    pub is_forward: bool,
    #[serde(default)]
    pub reading_time_seconds: i32,
}

impl ThreadExtraction {
    pub fn from_generated(obj: &Value) -> Result<Self, LlmError> {
        serde_json::from_value(obj.clone())
            .map_err(|e| LlmError::Schema(format!("extraction decode failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn spam_verdict_decodes_and_gates() {
        let v = SpamVerdict::from_generated(&json!({
            "is_spam": false,
            "is_promotional": true,
            "confidence": 0.93,
            "reasoning": "bulk newsletter footer",
        }))
        .unwrap();
        assert!(v.should_skip());
        assert!(!v.is_spam);
    }

    #[test]
    fn spam_verdict_rejects_wrong_shape() {
        let err = SpamVerdict::from_generated(&json!({ "is_spam": "yes" })).unwrap_err();
        assert!(matches!(err, LlmError::Schema(_)));
    }

    #[test]
    fn extraction_fills_defaults_for_optional_lists() {
        let x = ThreadExtraction::from_generated(&json!({
            "summary": "Customer asks for a refund on order 1431.",
            "intent": "refund_request",
            "urgency": "high",
            "sentiment": "negative",
            "needs_reply": true,
            "actionability": "actionable",
        }))
        .unwrap();
        assert!(x.tags.is_empty());
        assert!(x.entities.is_empty());
        assert_eq!(x.reading_time_seconds, 0);
        assert!(x.needs_reply);
    }

    #[test]
    fn llm_error_display() {
        let err = LlmError::Api {
            status: Some(500),
            message: "overloaded".into(),
        };
        assert_eq!(err.to_string(), "llm api error status=500: overloaded");
    }
}
