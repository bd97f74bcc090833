//! Backfill checkpoint blob persisted on the configuration row.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resumption state for a backfill pass, stored as jsonb on
/// `sync_configurations.checkpoint`.
///
/// `current_page` is monotone for a given configuration until the monitor
/// clears the blob on completion. On failure the blob is preserved and
/// `error` carries the human-readable cause for manual restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackfillCheckpoint {
    #[serde(default)]
    pub last_page_token: Option<String>,
    #[serde(default)]
    pub threads_queued: i64,
    #[serde(default)]
    pub current_page: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackfillCheckpoint {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("checkpoint serialization must not fail")
    }

    /// Lenient decode: a null / missing / malformed blob yields a fresh
    /// checkpoint so a corrupt blob can never wedge the orchestrator.
    pub fn from_value(v: Option<&Value>) -> Self {
        match v {
            Some(v) if !v.is_null() => {
                serde_json::from_value(v.clone()).unwrap_or_default()
            }
            _ => Self::default(),
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}
