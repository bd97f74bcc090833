//! Provider boundary for remote email thread/message retrieval.
//!
//! This module defines **only** the remote record types, the query/page
//! types, and the provider trait. No DB logic and no sync policy belong
//! here; the HTTP implementation lives in `http.rs`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod http;

pub use http::HttpEmailProvider;

// ---------------------------------------------------------------------------
// Remote records
// ---------------------------------------------------------------------------

/// A thread as returned verbatim by the upstream provider.
///
/// Timestamps are provider epoch seconds; normalization to `DateTime<Utc>`
/// happens at the persistence boundary, not here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteThread {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    /// Epoch seconds of the newest message in the thread.
    #[serde(default, alias = "latest_message_received_date")]
    pub latest_ts: Option<i64>,
    #[serde(default)]
    pub unread: bool,
    #[serde(default)]
    pub starred: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: String,
}

/// A message as returned verbatim by the upstream provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub from: Vec<Participant>,
    #[serde(default)]
    pub to: Vec<Participant>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Epoch seconds.
    #[serde(default)]
    pub date: Option<i64>,
}

impl RemoteMessage {
    pub fn from_json(&self) -> Value {
        serde_json::to_value(&self.from).unwrap_or(Value::Array(vec![]))
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.to).unwrap_or(Value::Array(vec![]))
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Cursor-paged thread listing filtered by a received-date window.
#[derive(Debug, Clone, Default)]
pub struct ListThreadsQuery {
    pub limit: i32,
    /// Inclusive lower bound, epoch seconds.
    pub after_ts: Option<i64>,
    /// Inclusive upper bound, epoch seconds.
    pub before_ts: Option<i64>,
    pub page_token: Option<String>,
}

/// One page of threads plus the cursor for the next page (None = exhausted).
#[derive(Debug, Clone, Default)]
pub struct ThreadPage {
    pub data: Vec<RemoteThread>,
    pub next_cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that an [`EmailProvider`] implementation may return.
#[derive(Debug)]
pub enum ProviderError {
    /// Network or transport failure.
    Transport(String),
    /// The upstream API returned an application-level error.
    Api { status: Option<u16>, message: String },
    /// A response payload could not be decoded.
    Decode(String),
    /// A required configuration value (e.g. API key) is missing or invalid.
    Config(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Transport(msg) => write!(f, "transport error: {msg}"),
            ProviderError::Api {
                status: Some(s),
                message,
            } => {
                write!(f, "provider api error status={s}: {message}")
            }
            ProviderError::Api {
                status: None,
                message,
            } => {
                write!(f, "provider api error: {message}")
            }
            ProviderError::Decode(msg) => write!(f, "decode error: {msg}"),
            ProviderError::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Upstream email provider contract.
///
/// Implementations must be object-safe so callers can hold an
/// `Arc<dyn EmailProvider>` without knowing the concrete type, and
/// `Send + Sync` so they can cross task boundaries.
///
/// `find_thread` / `find_message` return `Ok(None)` for a clean upstream
/// not-found; errors are reserved for transport/API/decode failures.
#[async_trait::async_trait]
pub trait EmailProvider: Send + Sync {
    /// Human-readable name identifying this provider (e.g. `"nylas"`).
    fn name(&self) -> &'static str;

    async fn list_threads(
        &self,
        grant_id: &str,
        query: &ListThreadsQuery,
    ) -> Result<ThreadPage, ProviderError>;

    async fn find_thread(
        &self,
        grant_id: &str,
        remote_thread_id: &str,
    ) -> Result<Option<RemoteThread>, ProviderError>;

    async fn list_messages(
        &self,
        grant_id: &str,
        remote_thread_id: &str,
        limit: i32,
    ) -> Result<Vec<RemoteMessage>, ProviderError>;

    async fn find_message(
        &self,
        grant_id: &str,
        remote_message_id: &str,
    ) -> Result<Option<RemoteMessage>, ProviderError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyProvider;

    #[async_trait::async_trait]
    impl EmailProvider for EmptyProvider {
        fn name(&self) -> &'static str {
            "empty"
        }

        async fn list_threads(
            &self,
            _grant_id: &str,
            _query: &ListThreadsQuery,
        ) -> Result<ThreadPage, ProviderError> {
            Ok(ThreadPage::default())
        }

        async fn find_thread(
            &self,
            _grant_id: &str,
            _remote_thread_id: &str,
        ) -> Result<Option<RemoteThread>, ProviderError> {
            Ok(None)
        }

        async fn list_messages(
            &self,
            _grant_id: &str,
            _remote_thread_id: &str,
            _limit: i32,
        ) -> Result<Vec<RemoteMessage>, ProviderError> {
            Ok(Vec::new())
        }

        async fn find_message(
            &self,
            _grant_id: &str,
            _remote_message_id: &str,
        ) -> Result<Option<RemoteMessage>, ProviderError> {
            Ok(None)
        }
    }

    #[test]
    fn provider_is_object_safe_via_arc() {
        // Compile-time proof: trait object can be constructed.
        let _p: std::sync::Arc<dyn EmailProvider> = std::sync::Arc::new(EmptyProvider);
    }

    #[tokio::test]
    async fn empty_provider_returns_exhausted_page() {
        let p = EmptyProvider;
        let page = p
            .list_threads("g", &ListThreadsQuery::default())
            .await
            .unwrap();
        assert!(page.data.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn provider_error_display_api_with_status() {
        let err = ProviderError::Api {
            status: Some(429),
            message: "rate limited".to_string(),
        };
        assert_eq!(err.to_string(), "provider api error status=429: rate limited");
    }

    #[test]
    fn provider_error_display_transport() {
        let err = ProviderError::Transport("connection refused".to_string());
        assert_eq!(err.to_string(), "transport error: connection refused");
    }

    #[test]
    fn remote_thread_decodes_provider_alias() {
        let t: RemoteThread = serde_json::from_value(serde_json::json!({
            "id": "thr_1",
            "subject": "Quarterly invoice",
            "latest_message_received_date": 1_704_067_200,
            "unread": true,
        }))
        .unwrap();
        assert_eq!(t.latest_ts, Some(1_704_067_200));
        assert!(t.unread);
        assert!(!t.starred);
    }
}
