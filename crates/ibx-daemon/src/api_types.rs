//! Request and response types for all ibx-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests.  No business logic lives here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// /v1/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub daemon_uptime_secs: u64,
    /// Database reachable and sync schema present.
    pub db_ok: bool,
    pub has_sync_schema: bool,
    /// Configurations currently in backfill or thread_sync.
    pub active_syncs: i64,
}

// ---------------------------------------------------------------------------
// /v1/configs/{config_id}/progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub config_id: Uuid,
    pub status: String,
    pub threads_queued: i32,
    pub threads_processing: i32,
    pub threads_completed: i32,
    pub threads_failed: i32,
    pub messages_synced: i32,
    /// `(completed + failed) / queued`; the provider never reports a total,
    /// so the cumulative queued count is the denominator.
    pub progress_ratio: f64,
    pub sync_started_at: Option<DateTime<Utc>>,
    pub sync_completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotFoundResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_response_round_trips() {
        let p = ProgressResponse {
            config_id: Uuid::new_v4(),
            status: "thread_sync".into(),
            threads_queued: 10,
            threads_processing: 2,
            threads_completed: 7,
            threads_failed: 1,
            messages_synced: 42,
            progress_ratio: 0.8,
            sync_started_at: None,
            sync_completed_at: None,
        };
        let s = serde_json::to_string(&p).unwrap();
        let back: ProgressResponse = serde_json::from_str(&s).unwrap();
        assert_eq!(back.threads_completed, 7);
        assert_eq!(back.status, "thread_sync");
    }
}
