//! Shared wire and status types for the inbox-sync core.
//!
//! Every durable-queue payload and webhook envelope is typed here; the single
//! parsing boundary is at queue ingest (`ibx-db::queue::read_batch`) and
//! nothing downstream touches loosely-typed JSON except the opaque webhook
//! `payload` blob, which is probed through [`webhook::extract_remote_message_id`].

pub mod checkpoint;
pub mod status;
pub mod webhook;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use checkpoint::BackfillCheckpoint;
pub use status::{ConfigStatus, ExtractionQueueStatus, WorkStatus};
pub use webhook::{extract_remote_message_id, NotificationType};

/// Queue names, used verbatim as pgmq queue identifiers.
pub const QUEUE_BACKFILL: &str = "inbox_backfill_jobs";
pub const QUEUE_THREAD_SYNC: &str = "thread_sync_jobs";
pub const QUEUE_WEBHOOKS: &str = "webhook_notifications";
pub const QUEUE_EXTRACTION: &str = "extraction_jobs";

/// Payload on `inbox_backfill_jobs`: one historical backfill request for a
/// configuration. The date window is clamped by the orchestrator, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillJob {
    pub inbox_id: Uuid,
    pub config_id: Uuid,
    pub grant_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Payload on `thread_sync_jobs`: sync one remote thread and all its messages.
///
/// `grant_id` may arrive empty when the work row predates grant resolution;
/// the thread-sync worker falls back to the inbox binding in that case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSyncJob {
    /// Remote thread identifier (provider-issued, not a local key).
    pub thread_id: String,
    #[serde(default)]
    pub grant_id: String,
    pub inbox_id: Uuid,
    pub config_id: Uuid,
}

/// Payload on `webhook_notifications`: one push notification as received.
///
/// `payload` stays an opaque blob; the consumer routes on `notification_type`
/// and probes `payload` for the remote object id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookNotification {
    pub notification_id: Uuid,
    #[serde(default)]
    pub webhook_id: String,
    pub inbox_id: Uuid,
    pub notification_type: String,
    #[serde(default)]
    pub grant_id: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

/// Payload on `extraction_jobs`: extract a structured record from one thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionJob {
    /// Local thread key (threads.thread_id), not the remote identifier.
    pub thread_id: Uuid,
    pub inbox_id: Uuid,
    pub tenant_id: Uuid,
    /// 0..=100, higher drains first. Advisory only.
    #[serde(default)]
    pub priority: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_sync_job_tolerates_missing_grant() {
        let v: ThreadSyncJob = serde_json::from_value(serde_json::json!({
            "thread_id": "thr_123",
            "inbox_id": "7b7c0a52-53e0-4f2b-a53d-111111111111",
            "config_id": "7b7c0a52-53e0-4f2b-a53d-222222222222",
        }))
        .unwrap();
        assert_eq!(v.thread_id, "thr_123");
        assert!(v.grant_id.is_empty());
    }

    #[test]
    fn backfill_job_round_trips() {
        let job = BackfillJob {
            inbox_id: Uuid::new_v4(),
            config_id: Uuid::new_v4(),
            grant_id: "grant-1".into(),
            start_date: "2024-01-01T00:00:00Z".parse().unwrap(),
            end_date: "2024-01-02T00:00:00Z".parse().unwrap(),
        };
        let v = serde_json::to_value(&job).unwrap();
        let back: BackfillJob = serde_json::from_value(v).unwrap();
        assert_eq!(back.config_id, job.config_id);
        assert_eq!(back.grant_id, "grant-1");
    }

    #[test]
    fn extraction_job_priority_defaults_to_zero() {
        let v: ExtractionJob = serde_json::from_value(serde_json::json!({
            "thread_id": "7b7c0a52-53e0-4f2b-a53d-333333333333",
            "inbox_id": "7b7c0a52-53e0-4f2b-a53d-111111111111",
            "tenant_id": "7b7c0a52-53e0-4f2b-a53d-444444444444",
        }))
        .unwrap();
        assert_eq!(v.priority, 0);
    }
}
