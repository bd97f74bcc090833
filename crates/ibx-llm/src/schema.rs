//! JSON schemas for the two structured outputs the core requests.

use serde_json::{json, Value};

/// Minimal spam-gate schema: `{is_spam, is_promotional, confidence, reasoning}`.
pub fn spam_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["is_spam", "is_promotional", "confidence", "reasoning"],
        "properties": {
            "is_spam": { "type": "boolean" },
            "is_promotional": { "type": "boolean" },
            "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
            "reasoning": { "type": "string" },
        }
    })
}

/// Fixed thread-extraction schema. Field set matches
/// [`crate::ThreadExtraction`]; keep the two in lockstep.
pub fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": [
            "summary", "intent", "urgency", "sentiment", "needs_reply",
            "actionability", "scores", "tags", "tasks", "risks", "keywords",
            "entities", "participants", "message_type", "is_reply",
            "is_forward", "reading_time_seconds"
        ],
        "properties": {
            "summary": { "type": "string" },
            "intent": { "type": "string" },
            "urgency": { "type": "string", "enum": ["low", "medium", "high", "critical"] },
            "sentiment": { "type": "string", "enum": ["negative", "neutral", "positive"] },
            "needs_reply": { "type": "boolean" },
            "actionability": { "type": "string", "enum": ["none", "informational", "actionable", "blocked"] },
            "scores": {
                "type": "object",
                "additionalProperties": false,
                "required": ["urgency", "importance", "confidence"],
                "properties": {
                    "urgency": { "type": "number" },
                    "importance": { "type": "number" },
                    "confidence": { "type": "number" },
                }
            },
            "tags": { "type": "array", "items": { "type": "string" } },
            "tasks": { "type": "array", "items": { "type": "string" } },
            "risks": { "type": "array", "items": { "type": "string" } },
            "keywords": { "type": "array", "items": { "type": "string" } },
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["kind", "value"],
                    "properties": {
                        "kind": { "type": "string" },
                        "value": { "type": "string" },
                    }
                }
            },
            "participants": { "type": "array", "items": { "type": "string" } },
            "project": { "type": ["string", "null"] },
            "message_type": { "type": "string" },
            "is_reply": { "type": "boolean" },
            "is_forward": { "type": "boolean" },
            "reading_time_seconds": { "type": "integer", "minimum": 0 },
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spam_schema_names_all_verdict_fields() {
        let s = spam_schema();
        for field in ["is_spam", "is_promotional", "confidence", "reasoning"] {
            assert!(s["properties"].get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn extraction_schema_stays_in_lockstep_with_type() {
        // A value satisfying the schema must decode into ThreadExtraction.
        let sample = serde_json::json!({
            "summary": "s", "intent": "i", "urgency": "low",
            "sentiment": "neutral", "needs_reply": false,
            "actionability": "none",
            "scores": { "urgency": 0.1, "importance": 0.2, "confidence": 0.9 },
            "tags": [], "tasks": [], "risks": [], "keywords": [],
            "entities": [{ "kind": "order", "value": "1431" }],
            "participants": ["a@example.com"],
            "project": null,
            "message_type": "inquiry", "is_reply": false, "is_forward": false,
            "reading_time_seconds": 30,
        });
        let x = crate::ThreadExtraction::from_generated(&sample).unwrap();
        assert_eq!(x.entities.len(), 1);
        assert_eq!(x.entities[0].value, "1431");
    }
}
