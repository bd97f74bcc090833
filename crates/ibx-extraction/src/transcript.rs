//! Transcript composition and prompt text for the two LLM calls.

use ibx_db::StoredMessage;
use serde_json::Value;

/// Render a sender label from a `from_addr` blob: `"Name <email>"`,
/// `email`, or `"unknown"`.
fn sender_label(from_addr: &Value) -> String {
    // from_addr is either a participant object or a one-element array of them
    let obj = match from_addr {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    };
    let name = obj.get("name").and_then(Value::as_str).unwrap_or("");
    let email = obj.get("email").and_then(Value::as_str).unwrap_or("");
    match (name.is_empty(), email.is_empty()) {
        (false, false) => format!("{name} <{email}>"),
        (true, false) => email.to_string(),
        (false, true) => name.to_string(),
        (true, true) => "unknown".to_string(),
    }
}

/// Compose a chronological transcript: one block per message with sender,
/// timestamp, and body (snippet when the body is absent).
pub fn compose_transcript(messages: &[StoredMessage]) -> String {
    let mut out = String::new();
    for (i, msg) in messages.iter().enumerate() {
        if i > 0 {
            out.push_str("\n---\n");
        }
        let when = msg
            .sent_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unknown time".to_string());
        out.push_str(&format!("From: {}\nDate: {}\n\n", sender_label(&msg.from_addr), when));
        let body = msg
            .body
            .as_deref()
            .or(msg.snippet.as_deref())
            .unwrap_or("(empty message)");
        out.push_str(body.trim());
        out.push('\n');
    }
    out
}

/// Prompt for the spam/promotional gate. Deliberately small: subject plus the
/// first snippet is enough signal and keeps the gate cheap.
pub fn spam_prompt(subject: &str, first_snippet: &str) -> String {
    format!(
        "Classify this email thread for a support inbox.\n\
         Subject: {subject}\n\
         First message: {first_snippet}\n\n\
         Decide whether it is spam and/or bulk promotional mail. \
         Respond with the requested JSON object only."
    )
}

/// Prompt for the full structured extraction over a transcript.
pub fn extraction_prompt(transcript: &str) -> String {
    format!(
        "You are analyzing a complete support email thread. Extract a \
         structured record: a concise summary, the sender's intent, urgency, \
         sentiment, whether a reply is needed, actionability, numeric scores, \
         classification tags, open tasks, risks, keywords, named entities, \
         participants, a project tag when one is evident, the message type, \
         whether the thread is a reply or a forward, and an estimated reading \
         time in seconds.\n\nThread transcript:\n{transcript}\n\n\
         Respond with the requested JSON object only."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn stored(from: Value, body: Option<&str>, snippet: Option<&str>, ts: Option<&str>) -> StoredMessage {
        StoredMessage {
            message_id: Uuid::new_v4(),
            remote_message_id: "m".into(),
            from_addr: from,
            to_addrs: json!([]),
            snippet: snippet.map(String::from),
            body: body.map(String::from),
            sent_at: ts.map(|t| t.parse().unwrap()),
        }
    }

    #[test]
    fn sender_label_handles_shapes() {
        assert_eq!(
            sender_label(&json!({ "name": "Ada", "email": "ada@example.com" })),
            "Ada <ada@example.com>"
        );
        assert_eq!(sender_label(&json!([{ "email": "bob@example.com" }])), "bob@example.com");
        assert_eq!(sender_label(&json!({})), "unknown");
    }

    #[test]
    fn transcript_orders_and_separates_messages() {
        let msgs = vec![
            stored(
                json!({ "email": "a@example.com" }),
                Some("First question"),
                None,
                Some("2024-01-01T10:00:00Z"),
            ),
            stored(
                json!({ "email": "b@example.com" }),
                None,
                Some("A reply snippet"),
                Some("2024-01-01T11:00:00Z"),
            ),
        ];
        let t = compose_transcript(&msgs);
        assert!(t.contains("First question"));
        assert!(t.contains("A reply snippet"));
        assert_eq!(t.matches("---").count(), 1);
        let first = t.find("First question").unwrap();
        let second = t.find("A reply snippet").unwrap();
        assert!(first < second);
    }

    #[test]
    fn transcript_of_empty_thread_is_empty() {
        assert!(compose_transcript(&[]).is_empty());
    }

    #[test]
    fn prompts_embed_their_inputs() {
        assert!(spam_prompt("Win a prize", "click here").contains("Win a prize"));
        assert!(extraction_prompt("the transcript").contains("the transcript"));
    }
}
