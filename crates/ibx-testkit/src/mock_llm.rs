//! Canned-output [`LlmClient`] for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde_json::{json, Value};

use ibx_llm::{GenerateOptions, GeneratedObject, LlmClient, LlmError, TokenUsage};

/// Routes on the requested schema: a schema with an `is_spam` property gets
/// the canned spam verdict, anything else gets the canned extraction.
pub struct MockLlm {
    spam_verdict: Mutex<Value>,
    extraction: Mutex<Value>,
    calls: AtomicUsize,
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlm {
    /// Ham verdict + a minimal valid extraction.
    pub fn new() -> Self {
        Self {
            spam_verdict: Mutex::new(json!({
                "is_spam": false,
                "is_promotional": false,
                "confidence": 0.99,
                "reasoning": "legitimate support request",
            })),
            extraction: Mutex::new(json!({
                "summary": "Customer asks about an order.",
                "intent": "inquiry",
                "urgency": "medium",
                "sentiment": "neutral",
                "needs_reply": true,
                "actionability": "actionable",
                "scores": { "urgency": 0.5, "importance": 0.5, "confidence": 0.9 },
                "tags": ["order"],
                "tasks": ["reply to the customer"],
                "risks": [],
                "keywords": ["order"],
                "entities": [{ "kind": "order_id", "value": "1431" }],
                "participants": ["sender@example.com"],
                "project": null,
                "message_type": "inquiry",
                "is_reply": false,
                "is_forward": false,
                "reading_time_seconds": 20,
            })),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_spam_verdict(self, verdict: Value) -> Self {
        *self.spam_verdict.lock().unwrap() = verdict;
        self
    }

    pub fn with_extraction(self, extraction: Value) -> Self {
        *self.extraction.lock().unwrap() = extraction;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmClient for MockLlm {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn generate_object(
        &self,
        _model: &str,
        schema: &Value,
        _prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<GeneratedObject, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let is_spam_schema = schema
            .pointer("/properties/is_spam")
            .is_some();

        let object = if is_spam_schema {
            self.spam_verdict.lock().unwrap().clone()
        } else {
            self.extraction.lock().unwrap().clone()
        };

        Ok(GeneratedObject {
            object,
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
            },
        })
    }
}
