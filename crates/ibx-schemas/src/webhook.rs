//! Webhook notification routing vocabulary.

use serde_json::Value;

/// Recognized push-notification types. Anything else routes to `Unknown`
/// and is acknowledged without side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationType {
    MessageCreated,
    MessageUpdated,
    ThreadReplied,
    GrantExpired,
    Unknown(String),
}

impl NotificationType {
    pub fn parse(s: &str) -> Self {
        match s {
            "message.created" => NotificationType::MessageCreated,
            "message.updated" => NotificationType::MessageUpdated,
            "thread.replied" => NotificationType::ThreadReplied,
            "grant.expired" => NotificationType::GrantExpired,
            other => NotificationType::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NotificationType::MessageCreated => "message.created",
            NotificationType::MessageUpdated => "message.updated",
            NotificationType::ThreadReplied => "thread.replied",
            NotificationType::GrantExpired => "grant.expired",
            NotificationType::Unknown(s) => s,
        }
    }
}

/// Probe a webhook payload blob for the remote object id.
///
/// Provider webhook shapes have drifted across API versions; the probe order
/// is `data.object.id`, `data.id`, `object.id`, `id` — first non-empty string
/// wins. Returns `None` when no candidate is present (a permanent payload
/// error for message notifications).
pub fn extract_remote_message_id(payload: &Value) -> Option<String> {
    const PATHS: [&str; 4] = ["/data/object/id", "/data/id", "/object/id", "/id"];
    for path in PATHS {
        if let Some(id) = payload.pointer(path).and_then(Value::as_str) {
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_types() {
        assert_eq!(
            NotificationType::parse("message.created"),
            NotificationType::MessageCreated
        );
        assert_eq!(
            NotificationType::parse("grant.expired"),
            NotificationType::GrantExpired
        );
        assert_eq!(
            NotificationType::parse("calendar.updated"),
            NotificationType::Unknown("calendar.updated".to_string())
        );
    }

    #[test]
    fn message_id_prefers_deepest_path() {
        let payload = json!({
            "id": "outer",
            "data": { "id": "mid", "object": { "id": "inner" } },
            "object": { "id": "obj" },
        });
        assert_eq!(extract_remote_message_id(&payload).as_deref(), Some("inner"));
    }

    #[test]
    fn message_id_falls_back_in_order() {
        assert_eq!(
            extract_remote_message_id(&json!({ "data": { "id": "mid" } })).as_deref(),
            Some("mid")
        );
        assert_eq!(
            extract_remote_message_id(&json!({ "object": { "id": "obj" } })).as_deref(),
            Some("obj")
        );
        assert_eq!(
            extract_remote_message_id(&json!({ "id": "outer" })).as_deref(),
            Some("outer")
        );
    }

    #[test]
    fn message_id_skips_empty_and_non_string() {
        let payload = json!({ "data": { "object": { "id": "" } }, "id": 42 });
        assert_eq!(extract_remote_message_id(&payload), None);
    }
}
